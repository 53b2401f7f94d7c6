//! Bounded output capture
//!
//! Streams are accumulated incrementally. Once a buffer holds more than
//! twice its cap it is cut back to the cap, so a noisy process cannot grow
//! memory without bound while it runs.

/// Text appended when captured output was cut
pub fn truncation_marker(limit: usize) -> String {
    format!("\n...[output truncated at {} bytes]", limit)
}

/// Incremental, size-bounded byte accumulator
#[derive(Debug)]
pub struct OutputBuffer {
    limit: usize,
    bytes: Vec<u8>,
    truncated: bool,
}

/// Final text of one captured stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        OutputBuffer {
            limit,
            bytes: Vec::new(),
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.limit.saturating_mul(2) {
            self.bytes.truncate(self.limit);
            self.truncated = true;
        }
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode, cap, and mark
    pub fn finish(self) -> CapturedOutput {
        let text = String::from_utf8_lossy(&self.bytes).into_owned();
        let (mut text, cut) = cap_text(text, self.limit);
        let truncated = cut || self.truncated;
        if truncated {
            text.push_str(&truncation_marker(self.limit));
        }
        CapturedOutput { text, truncated }
    }
}

/// Truncate `text` to at most `limit` bytes on a char boundary
pub fn cap_text(mut text: String, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text, false);
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    (text, true)
}
