//! Classification of complete stream lines into events.

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseEvent<'a> {
    /// A `data: ` line; the payload is trimmed.
    Data(&'a str),
    /// `data: [DONE]`, normal end of stream.
    Terminator,
    /// Anything else (`event:`, `id:`, `retry:`, stray text).
    Ignore,
}

pub fn classify(line: &str) -> SseEvent<'_> {
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return SseEvent::Ignore;
    };

    let payload = rest.trim();
    if payload == DONE_SENTINEL {
        SseEvent::Terminator
    } else {
        SseEvent::Data(payload)
    }
}
