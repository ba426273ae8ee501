use crate::accumulator::{Applied, Attempt, DeltaAccumulator};
use crate::event::{classify, SseEvent};
use crate::sse_codec::FrameSplitter;
use tracing::debug;

/// What a call to [`StreamDecoder::feed`] did to the message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes appended to the message during this call.
    pub grew: usize,
    /// The `[DONE]` sentinel was seen; no further input is decoded.
    pub terminated: bool,
}

/// Per-stream decoding pipeline: bytes -> lines -> events -> message text.
///
/// Owns all carry-over state for exactly one response body. Construct one at
/// stream start and drop it when the stream ends.
pub struct StreamDecoder {
    splitter: FrameSplitter,
    accumulator: DeltaAccumulator,
    terminated: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            splitter: FrameSplitter::new(),
            accumulator: DeltaAccumulator::new(),
            terminated: false,
        }
    }

    /// Decodes one raw chunk into `message`, calling `on_growth` with the
    /// whole message after every payload that appended text.
    pub fn feed<F>(&mut self, chunk: &[u8], message: &mut String, mut on_growth: F) -> Progress
    where
        F: FnMut(&str),
    {
        let mut progress = Progress::default();
        if self.terminated {
            progress.terminated = true;
            return progress;
        }

        for line in self.splitter.feed(chunk) {
            self.process_line(&line, message, &mut progress, &mut on_growth);
            if progress.terminated {
                break;
            }
        }
        progress
    }

    /// Flushes the unterminated tail of the body and gives up on any payload
    /// still waiting for its continuation.
    pub fn finish<F>(&mut self, message: &mut String, mut on_growth: F) -> Progress
    where
        F: FnMut(&str),
    {
        let mut progress = Progress::default();
        if !self.terminated {
            if self.splitter.pending_len() > 0 {
                debug!("Flushing {} unterminated bytes", self.splitter.pending_len());
            }
            if let Some(line) = self.splitter.finish() {
                self.process_line(&line, message, &mut progress, &mut on_growth);
            }
        }
        self.accumulator.abandon_pending();
        progress.terminated = self.terminated;
        progress
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Payloads discarded because they never became valid JSON.
    pub fn anomalies(&self) -> usize {
        self.accumulator.anomalies()
    }

    fn process_line<F>(
        &mut self,
        line: &str,
        message: &mut String,
        progress: &mut Progress,
        on_growth: &mut F,
    ) where
        F: FnMut(&str),
    {
        if let Some(combined) = self.accumulator.recombine(line) {
            match self.decode(&combined, message, Attempt::Retry) {
                // The held fragment is gone; the new line gets its own turn below.
                Applied::Dropped => {}
                applied => {
                    self.record(applied, message, progress, on_growth);
                    return;
                }
            }
        }

        let applied = self.decode(line, message, Attempt::First);
        self.record(applied, message, progress, on_growth);
    }

    fn decode(&mut self, line: &str, message: &mut String, attempt: Attempt) -> Applied {
        match classify(line) {
            SseEvent::Terminator => {
                self.terminated = true;
                Applied::Unchanged
            }
            SseEvent::Ignore => Applied::Unchanged,
            SseEvent::Data(payload) => self.accumulator.apply(line, payload, message, attempt),
        }
    }

    fn record<F>(&self, applied: Applied, message: &str, progress: &mut Progress, on_growth: &mut F)
    where
        F: FnMut(&str),
    {
        if let Applied::Grew(n) = applied {
            progress.grew += n;
            on_growth(message);
        }
        progress.terminated = self.terminated;
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
