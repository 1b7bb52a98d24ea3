//! Minimal server-sent-events line parsing shared by the streaming
//! adapters.
//!
//! Vendors deliver `data: {...}` lines over a chunked body; chunk
//! boundaries do not respect line boundaries, so we buffer bytes and hand
//! out complete lines.

/// Accumulates raw bytes and yields complete lines (without terminators).
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        // Strip the trailing \n and any \r before it.
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Extract the payload of an SSE `data:` line. Returns `None` for blank
/// lines, comments, and other fields.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
