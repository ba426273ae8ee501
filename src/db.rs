use crate::types::{Role, Turn};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Conversation storage keyed by a history key.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<(), sqlx::Error> {
        let schema = r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                turn_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id)
            );

            CREATE INDEX IF NOT EXISTS idx_turns_seq ON turns(conversation_id, sequence_index);
        "#;

        sqlx::query(schema).execute(&self.pool).await?;
        info!("Database initialized");
        Ok(())
    }

    pub async fn load_conversation(&self, key: &str) -> Result<Vec<Turn>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT turn_id, role, content FROM turns WHERE conversation_id = ? ORDER BY sequence_index ASC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Turn, sqlx::Error> {
                let role: String = row.try_get("role")?;
                let role = Role::parse(&role).ok_or_else(|| sqlx::Error::ColumnDecode {
                    index: "role".to_string(),
                    source: format!("unknown role {:?}", role).into(),
                })?;
                let id: i64 = row.try_get("turn_id")?;
                Ok(Turn {
                    id: id as u64,
                    role,
                    content: row.try_get("content")?,
                })
            })
            .collect()
    }

    /// Replaces the stored conversation with `turns`.
    pub async fn save_conversation(&self, key: &str, turns: &[Turn]) -> Result<(), sqlx::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?, ?)")
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM turns WHERE conversation_id = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        for (sequence_index, turn) in turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO turns (conversation_id, sequence_index, turn_id, role, content) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(key)
            .bind(sequence_index as i64)
            .bind(turn.id as i64)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Saved {} turns under {}", turns.len(), key);
        Ok(())
    }

    pub async fn clear_conversation(&self, key: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM turns WHERE conversation_id = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
