use crate::error::ChatError;
use crate::types::{ChatRequest, Turn, WireMessage};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// Status line and body of an outbound generation request.
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Option<ByteStream>,
}

/// The remote text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn open(&self, request: ChatRequest) -> Result<UpstreamResponse, ChatError>;
}

/// Builds the outbound request from the whole conversation so far.
pub fn build_request(turns: &[Turn], model: Option<&str>) -> ChatRequest {
    let messages = turns
        .iter()
        .map(|turn| WireMessage {
            role: turn.role,
            content: turn.content.clone(),
        })
        .collect();

    ChatRequest {
        model: model.map(str::to_string),
        messages,
    }
}

/// Generation service reached over HTTP, answering with an event stream.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn open(&self, request: ChatRequest) -> Result<UpstreamResponse, ChatError> {
        debug!("POST {} with {} messages", self.url, request.messages.len());

        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes_stream().map_err(ChatError::from).boxed();

        Ok(UpstreamResponse {
            status,
            body: Some(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use axum::{http::HeaderMap, http::StatusCode, response::IntoResponse, routing::post, Json, Router};

    fn turn(id: u64, role: Role, content: &str) -> Turn {
        Turn {
            id,
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_build_request_keeps_order_and_roles() {
        let turns = vec![
            turn(1, Role::User, "Salut"),
            turn(2, Role::Assistant, "Bonjour !"),
            turn(3, Role::User, "Ça va ?"),
        ];

        let request = build_request(&turns, None);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.messages[2].content, "Ça va ?");
        assert_eq!(request.model, None);
    }

    #[test]
    fn test_build_request_wire_format() {
        let request = build_request(&[turn(1, Role::User, "hi")], Some("gemini-flash"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gemini-flash",
                "messages": [{ "role": "user", "content": "hi" }]
            })
        );
    }

    const REPLY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"pong\"}}]}\n\ndata: [DONE]\n\n";

    /// Answers with the status named by the last message, after checking the headers.
    async fn fake_upstream(headers: HeaderMap, Json(request): Json<serde_json::Value>) -> axum::response::Response {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if headers.get("accept").and_then(|v| v.to_str().ok()) != Some("text/event-stream") {
            return StatusCode::NOT_ACCEPTABLE.into_response();
        }
        match request.pointer("/messages/0/content").and_then(|v| v.as_str()) {
            Some("limit") => StatusCode::TOO_MANY_REQUESTS.into_response(),
            Some("quota") => StatusCode::PAYMENT_REQUIRED.into_response(),
            _ => ([("content-type", "text/event-stream")], REPLY).into_response(),
        }
    }

    async fn serve_upstream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/chat", post(fake_upstream));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/chat", addr)
    }

    async fn collect(body: ByteStream) -> String {
        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        String::from_utf8(chunks.concat()).unwrap()
    }

    #[tokio::test]
    async fn test_http_backend_streams_body_with_bearer_auth() {
        let url = serve_upstream().await;
        let backend = HttpBackend::new(url, Some("sk-test".to_string()));

        let response = backend
            .open(build_request(&[turn(1, Role::User, "ping")], None))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(collect(response.body.unwrap()).await, REPLY);
    }

    #[tokio::test]
    async fn test_http_backend_passes_error_statuses_through() {
        let url = serve_upstream().await;
        let backend = HttpBackend::new(url.clone(), Some("sk-test".to_string()));

        let limited = backend
            .open(build_request(&[turn(1, Role::User, "limit")], None))
            .await
            .unwrap();
        assert_eq!(limited.status, 429);

        let quota = backend
            .open(build_request(&[turn(1, Role::User, "quota")], None))
            .await
            .unwrap();
        assert_eq!(quota.status, 402);

        let anonymous = HttpBackend::new(url, None)
            .open(build_request(&[turn(1, Role::User, "ping")], None))
            .await
            .unwrap();
        assert_eq!(anonymous.status, 401);
    }

    #[tokio::test]
    async fn test_http_backend_unreachable_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpBackend::new(format!("http://{}/chat", addr), None)
            .open(build_request(&[turn(1, Role::User, "ping")], None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Transport(_)));
    }
}
