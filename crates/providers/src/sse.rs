//! Minimal line reassembly for server-sent-event and NDJSON bodies.
//!
//! HTTP chunk boundaries do not align with event boundaries, so clients feed
//! raw bytes in and drain complete lines out.

/// Accumulates bytes and yields complete `\n`-terminated lines with the
/// trailing `\r` stripped.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pop the next complete line, or `None` until more bytes arrive.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.find('\n')?;
        let line = self.buf[..end].trim_end_matches('\r').to_string();
        self.buf.drain(..=end);
        Some(line)
    }
}

/// Strip the SSE `data: ` prefix, if present.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_split_lines() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: {\"a\":");
        assert_eq!(buf.next_line(), None);
        buf.push(b"1}\r\ndata: [DONE]\n");
        assert_eq!(buf.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(buf.next_line().as_deref(), Some("data: [DONE]"));
        assert_eq!(buf.next_line(), None);
    }

    #[test]
    fn data_prefix() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("event: message_stop"), None);
        assert_eq!(sse_data(": keepalive"), None);
    }
}
