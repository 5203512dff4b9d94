//! Newline framing over byte streams that carry no message boundaries.
//!
//! Used for the JSON-RPC pipes of tool providers, the SSE body of the model
//! API and the outbound event stream. Bytes are kept (not text) until a full
//! line is available, so a multi-byte character split across reads is never
//! decoded in halves.

/// Accumulates raw bytes and hands back complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    start: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Remove and return the first complete line, without its `\n` or `\r\n`
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pending = &self.buf[self.start..];
        let newline = pending.iter().position(|b| *b == b'\n')?;
        let mut line = pending[..newline].to_vec();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        self.start += newline + 1;
        Some(line)
    }

    /// Take whatever is left once the source has closed, if anything
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        let mut rest = self.buf.split_off(self.start);
        self.buf.clear();
        self.start = 0;
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Number of buffered bytes not yet returned as a line
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}
