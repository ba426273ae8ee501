use bytes::{Buf, BytesMut};
use tracing::warn;

/// Splits an arbitrarily chunked response body into complete lines.
///
/// Bytes after the last newline stay buffered until the next `feed`. Blank
/// lines and `:` comment lines are dropped here so they never reach the
/// event decoder.
pub struct FrameSplitter {
    buffer: BytesMut,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes = self.buffer.split_to(i);
            self.buffer.advance(1); // skip newline

            if let Some(line) = Self::accept(&line_bytes) {
                lines.push(line);
            }
        }

        lines
    }

    /// Releases whatever is left once the body has ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Self::accept(&rest)
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn accept(line_bytes: &[u8]) -> Option<String> {
        // Handle \r if present (CRLF)
        let line_slice = line_bytes.strip_suffix(b"\r").unwrap_or(line_bytes);

        let line = match std::str::from_utf8(line_slice) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping non UTF-8 stream line: {}", e);
                return None;
            }
        };

        if line.trim().is_empty() || line.starts_with(':') {
            return None;
        }
        Some(line.to_string())
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splitter_fragmentation() {
        let mut splitter = FrameSplitter::new();

        let lines = splitter.feed(b"data: {\"foo\":");
        assert!(lines.is_empty());
        assert_eq!(splitter.pending_len(), 13);

        let lines = splitter.feed(b" \"bar\"}\n\ndata: [DO");
        assert_eq!(lines, vec!["data: {\"foo\": \"bar\"}"]);

        let lines = splitter.feed(b"NE]\n");
        assert_eq!(lines, vec!["data: [DONE]"]);
        assert_eq!(splitter.pending_len(), 0);
    }

    #[test]
    fn test_splitter_crlf() {
        let mut splitter = FrameSplitter::new();
        let lines = splitter.feed(b"data: foo\r\ndata: bar\r\n");
        assert_eq!(lines, vec!["data: foo", "data: bar"]);
    }

    #[test]
    fn test_splitter_drops_comments_and_blank_lines() {
        let mut splitter = FrameSplitter::new();
        let lines = splitter.feed(b": keep-alive\n\n   \r\n\r\ndata: x\n: OPENROUTER PROCESSING\n");
        assert_eq!(lines, vec!["data: x"]);
    }

    #[test]
    fn test_splitter_keeps_multibyte_char_split_across_chunks() {
        let mut splitter = FrameSplitter::new();
        let text = "data: café\n".as_bytes();
        // 'é' is two bytes; cut between them.
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(splitter.feed(&text[..cut]).is_empty());
        assert_eq!(splitter.feed(&text[cut..]), vec!["data: café"]);
    }

    #[test]
    fn test_splitter_finish_flushes_unterminated_line() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.feed(b"data: tail").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("data: tail"));
        assert_eq!(splitter.finish(), None);

        splitter.feed(b": comment only");
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_drops_invalid_utf8_line() {
        let mut splitter = FrameSplitter::new();
        let lines = splitter.feed(b"data: \xFF\xFE\ndata: ok\n");
        assert_eq!(lines, vec!["data: ok"]);
    }
}
