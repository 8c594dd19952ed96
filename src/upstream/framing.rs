//! Incremental framing for the upstream event stream
//!
//! The transport delivers an unstructured byte stream; records are
//! newline-delimited `data: ` + JSON lines, and chunk boundaries never
//! align with record boundaries. The decoder owns a single growable buffer
//! carried between chunk arrivals: append, split on newline, keep the
//! trailing fragment for the next chunk.

use serde::Deserialize;

/// Record prefix on every event line
const DATA_PREFIX: &str = "data: ";

/// A decoded application-level event from the compute service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpstreamEvent {
    /// Incremental response text
    Token { content: String },
    /// Latest reasoning snapshot (overwrite, not accumulate)
    Thinking {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// One source citation
    Source { data: serde_json::Value },
    /// Advisory end-of-stream marker; the transport closing is the
    /// authoritative signal and this line may never arrive
    Complete {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Upstream-reported failure; fatal to the turn, not to the decoder
    Error {
        #[serde(default)]
        content: String,
    },
}

/// Stateful line-buffer decoder for the upstream stream
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    /// Create a decoder with an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed one transport chunk, returning every event completed by it.
    ///
    /// Unknown or malformed lines are logged and skipped; one corrupt line
    /// must never abort a long-running research stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<UpstreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = decode_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }

        events
    }

    /// Bytes still waiting for a terminating newline
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Decode one complete line, without its trailing newline
fn decode_line(line: &[u8]) -> Option<UpstreamEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.strip_suffix('\r').unwrap_or(&text);

    // Blank keep-alive lines and non-data fields are ignored
    let payload = text.strip_prefix(DATA_PREFIX)?;

    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream line");
            None
        }
    }
}
