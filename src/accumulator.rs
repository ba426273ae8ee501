use serde_json::Value;
use tracing::{debug, warn};

/// Result of offering one payload to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Content was appended; carries the number of bytes added.
    Grew(usize),
    /// Valid record without any text fragment.
    Unchanged,
    /// Payload did not parse; its line is held for recombination.
    Deferred,
    /// Payload still did not parse after recombination and was discarded.
    Dropped,
}

/// Whether a failed parse may still be deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retry,
}

/// Appends the `choices[0].delta.content` fragments of successive payloads
/// to the assistant message.
///
/// A payload that is not yet valid JSON keeps its whole line in `pending`;
/// the caller joins it with the next line and offers the result once more.
/// A second failure drops the fragment for good.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    pending: Option<String>,
    anomalies: usize,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(
        &mut self,
        line: &str,
        payload: &str,
        message: &mut String,
        attempt: Attempt,
    ) -> Applied {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                return match attempt {
                    Attempt::First => {
                        debug!("Deferring incomplete payload: {}", e);
                        self.pending = Some(line.to_string());
                        Applied::Deferred
                    }
                    Attempt::Retry => {
                        self.anomalies += 1;
                        warn!("Dropping payload that failed to parse after recombination: {}", e);
                        Applied::Dropped
                    }
                };
            }
        };

        // Only this path matters; sibling fields of any shape are ignored.
        match value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            Some(content) if !content.is_empty() => {
                message.push_str(content);
                Applied::Grew(content.len())
            }
            _ => Applied::Unchanged,
        }
    }

    /// Joins a held-back line with the line that follows it.
    pub fn recombine(&mut self, next_line: &str) -> Option<String> {
        self.pending
            .take()
            .map(|pending| format!("{}\n{}", pending, next_line))
    }

    /// Discards a held-back line that no further input can complete.
    pub fn abandon_pending(&mut self) -> bool {
        if let Some(pending) = self.pending.take() {
            self.anomalies += 1;
            warn!("Stream ended with an incomplete payload ({} bytes)", pending.len());
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn anomalies(&self) -> usize {
        self.anomalies
    }
}
