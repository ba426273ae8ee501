//! HTTP surface publishing the chat session to observers.

use crate::db::Db;
use crate::error::ChatError;
use crate::session::{ChatSession, Outcome, SessionSnapshot};
use crate::upstream::GenerationBackend;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct AppState<B> {
    session: ChatSession<B>,
    db: Db,
    history_key: String,
    cancel: Mutex<CancellationToken>,
    /// Serialises every write to stored history so a save never lands after a clear.
    storage: tokio::sync::Mutex<()>,
}

impl<B: GenerationBackend> AppState<B> {
    pub fn new(session: ChatSession<B>, db: Db, history_key: String) -> Self {
        Self {
            session,
            db,
            history_key,
            cancel: Mutex::new(CancellationToken::new()),
            storage: tokio::sync::Mutex::new(()),
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancels whatever generation holds the current token and arms a fresh one.
    pub fn cancel_generation(&self) {
        let old = std::mem::take(&mut *self.cancel.lock().unwrap_or_else(PoisonError::into_inner));
        old.cancel();
    }

    async fn persist(&self) {
        let _storage = self.storage.lock().await;
        let snapshot = self.session.snapshot();
        // A newer generation already started; it saves the whole history when it settles.
        if snapshot.state.is_in_flight() {
            debug!("Skipping save while a generation is in flight");
            return;
        }
        if let Err(e) = self.db.save_conversation(&self.history_key, &snapshot.conversation).await {
            error!("Failed to persist conversation: {}", e);
        }
    }

    /// Empties memory and storage together. `false` while a generation is in flight.
    async fn clear_history(&self) -> Result<bool, sqlx::Error> {
        let _storage = self.storage.lock().await;
        if !self.session.clear() {
            return Ok(false);
        }
        self.db.clear_conversation(&self.history_key).await?;
        Ok(true)
    }
}

pub fn router<B: GenerationBackend + 'static>(state: Arc<AppState<B>>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/chat", post(chat::<B>))
        .route("/v1/chat/cancel", post(cancel::<B>))
        .route("/v1/conversation", get(conversation::<B>).delete(clear::<B>))
        .route("/v1/conversation/events", get(events::<B>))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Deserialize, Debug)]
pub struct ChatInput {
    pub message: String,
}

fn status_for(result: &Result<Outcome, ChatError>) -> StatusCode {
    match result {
        Ok(Outcome::Completed) => StatusCode::OK,
        Ok(Outcome::Ignored) => StatusCode::CONFLICT,
        Err(ChatError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Err(ChatError::QuotaExceeded) => StatusCode::PAYMENT_REQUIRED,
        Err(ChatError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
        Err(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn chat<B: GenerationBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Json(input): Json<ChatInput>,
) -> Response {
    let token = state.cancel_token();
    let task_state = state.clone();

    // Spawned so a disconnecting client does not abort the generation.
    let handle = tokio::spawn(async move {
        let result = task_state.session.submit(&input.message, &token).await;
        if !matches!(result, Ok(Outcome::Ignored)) {
            task_state.persist().await;
        }
        result
    });

    let result = match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!("Generation task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (status_for(&result), Json(state.session.snapshot())).into_response()
}

async fn cancel<B: GenerationBackend + 'static>(State(state): State<Arc<AppState<B>>>) -> StatusCode {
    info!("Cancellation requested");
    state.cancel_generation();
    StatusCode::ACCEPTED
}

async fn conversation<B: GenerationBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

async fn clear<B: GenerationBackend + 'static>(State(state): State<Arc<AppState<B>>>) -> Response {
    match state.clear_history().await {
        Ok(true) => {}
        Ok(false) => return (StatusCode::CONFLICT, Json(state.session.snapshot())).into_response(),
        Err(e) => {
            error!("Failed to clear stored conversation: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    info!("Conversation cleared");
    (StatusCode::OK, Json(state.session.snapshot())).into_response()
}

async fn events<B: GenerationBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = WatchStream::new(state.session.subscribe())
        .map(|snapshot| Event::default().event("snapshot").json_data(snapshot));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
