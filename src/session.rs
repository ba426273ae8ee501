//! Chat session orchestration.
//!
//! A [`ChatSession`] owns one conversation, runs at most one generation at a
//! time and publishes every change through a `watch` channel so observers can
//! render the assistant turn while it grows.

use crate::decoder::StreamDecoder;
use crate::error::ChatError;
use crate::types::{Role, Turn, TurnId};
use crate::upstream::{build_request, GenerationBackend};
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Connectivity,
    Cancelled,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed(FailureReason),
    RateLimited,
    QuotaExceeded,
}

impl SessionState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionState::Sending | SessionState::Streaming)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    RateLimited,
    QuotaExceeded,
    Failure,
}

/// User-facing notification raised when a generation does not complete.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: &'static str,
    pub description: &'static str,
}

impl Notice {
    pub fn rate_limited() -> Self {
        Self {
            kind: NoticeKind::RateLimited,
            title: "Rate limit",
            description: "Too many requests, try again in a few moments.",
        }
    }

    pub fn quota_exceeded() -> Self {
        Self {
            kind: NoticeKind::QuotaExceeded,
            title: "Insufficient credits",
            description: "Top up your AI credits.",
        }
    }

    pub fn failure() -> Self {
        Self {
            kind: NoticeKind::Failure,
            title: "Error",
            description: "Unable to reach the AI.",
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: NoticeKind::Failure,
            title: "Cancelled",
            description: "The response was interrupted.",
        }
    }
}

/// Everything an observer needs to render the chat.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation: Vec<Turn>,
    pub is_loading: bool,
    pub state: SessionState,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Blank input, or a generation was already in flight.
    Ignored,
    Completed,
}

pub struct ChatSession<B> {
    backend: B,
    model: Option<String>,
    snapshot: watch::Sender<SessionSnapshot>,
    next_id: AtomicU64,
}

impl<B: GenerationBackend> ChatSession<B> {
    pub fn new(backend: B) -> Self {
        Self::with_history(backend, Vec::new())
    }

    /// Resumes a stored conversation; new turn ids continue after the largest restored one.
    pub fn with_history(backend: B, history: Vec<Turn>) -> Self {
        let next_id = history.iter().map(|t| t.id).max().map_or(1, |id| id + 1);
        let (snapshot, _) = watch::channel(SessionSnapshot {
            conversation: history,
            is_loading: false,
            state: SessionState::Idle,
            notice: None,
        });

        Self {
            backend,
            model: None,
            snapshot,
            next_id: AtomicU64::new(next_id),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Empties the conversation. Refused while a generation is in flight.
    pub fn clear(&self) -> bool {
        self.snapshot.send_if_modified(|s| {
            if s.state.is_in_flight() {
                return false;
            }
            s.conversation.clear();
            s.state = SessionState::Idle;
            s.notice = None;
            true
        })
    }

    /// Appends a user turn and streams the assistant's answer into the conversation.
    pub async fn submit(&self, text: &str, cancel: &CancellationToken) -> Result<Outcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Outcome::Ignored);
        }

        let mut request = None;
        self.snapshot.send_if_modified(|s| {
            if s.state.is_in_flight() {
                return false;
            }
            s.conversation.push(Turn {
                id: self.allocate_id(),
                role: Role::User,
                content: text.to_string(),
            });
            s.state = SessionState::Sending;
            s.is_loading = true;
            s.notice = None;
            request = Some(build_request(&s.conversation, self.model.as_deref()));
            true
        });

        let Some(request) = request else {
            debug!("Ignoring submission while a generation is in flight");
            return Ok(Outcome::Ignored);
        };

        let _guard = FlightGuard {
            snapshot: &self.snapshot,
        };
        let span = info_span!("generation", id = %format!("gen_{}", Uuid::new_v4().simple()));
        self.generate(request, cancel).instrument(span).await
    }

    async fn generate(
        &self,
        request: crate::types::ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ChatError> {
        info!("Sending {} messages", request.messages.len());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.fail(ChatError::Cancelled)),
            response = self.backend.open(request) => response,
        };
        let response = response.map_err(|e| self.fail(e))?;

        match response.status {
            429 => {
                warn!("Generation service rate limited the request");
                self.settle(SessionState::RateLimited, Some(Notice::rate_limited()));
                return Err(ChatError::RateLimited);
            }
            402 => {
                warn!("Generation quota exhausted");
                self.settle(SessionState::QuotaExceeded, Some(Notice::quota_exceeded()));
                return Err(ChatError::QuotaExceeded);
            }
            status if !(200..300).contains(&status) => {
                return Err(self.fail(ChatError::Status(status)));
            }
            _ => {}
        }

        let Some(mut body) = response.body else {
            return Err(self.fail(ChatError::MissingBody));
        };

        let assistant_id = self.allocate_id();
        self.snapshot.send_modify(|s| {
            s.conversation.push(Turn {
                id: assistant_id,
                role: Role::Assistant,
                content: String::new(),
            });
            s.state = SessionState::Streaming;
        });

        let mut decoder = StreamDecoder::new();
        let mut message = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancelled after {} bytes", message.len());
                    return Err(self.fail(ChatError::Cancelled));
                }
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let progress =
                        decoder.feed(&chunk, &mut message, |m| self.publish(assistant_id, m));
                    debug!("Chunk of {} bytes added {} bytes of text", chunk.len(), progress.grew);
                    if progress.terminated {
                        break;
                    }
                }
                Some(Err(e)) => return Err(self.fail(e)),
                None => {
                    decoder.finish(&mut message, |m| self.publish(assistant_id, m));
                    break;
                }
            }
        }

        if decoder.anomalies() > 0 {
            warn!("Discarded {} undecodable payloads", decoder.anomalies());
        }
        info!(
            terminated = decoder.is_terminated(),
            "Generation completed ({} bytes)",
            message.len()
        );
        self.settle(SessionState::Completed, None);
        Ok(Outcome::Completed)
    }

    fn allocate_id(&self) -> TurnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Brings the open assistant turn up to date with the decoded message.
    fn publish(&self, id: TurnId, message: &str) {
        self.snapshot.send_if_modified(|s| {
            let Some(turn) = s.conversation.last_mut().filter(|t| t.id == id) else {
                return false;
            };
            match message.get(turn.content.len()..) {
                Some(delta) if !delta.is_empty() => {
                    turn.content.push_str(delta);
                    true
                }
                _ => false,
            }
        });
    }

    fn settle(&self, state: SessionState, notice: Option<Notice>) {
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.is_loading = false;
            s.notice = notice;
        });
    }

    fn fail(&self, error: ChatError) -> ChatError {
        let (reason, notice) = match error {
            ChatError::Cancelled => (FailureReason::Cancelled, Notice::cancelled()),
            _ => (FailureReason::Connectivity, Notice::failure()),
        };
        warn!(transport = error.is_transport_failure(), "Generation failed: {}", error);
        self.settle(SessionState::Failed(reason), Some(notice));
        error
    }
}

/// Marks the session cancelled if a generation future is dropped mid-flight.
struct FlightGuard<'a> {
    snapshot: &'a watch::Sender<SessionSnapshot>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.snapshot.send_if_modified(|s| {
            if !s.state.is_in_flight() {
                return false;
            }
            s.state = SessionState::Failed(FailureReason::Cancelled);
            s.is_loading = false;
            s.notice = Some(Notice::cancelled());
            true
        });
    }
}
