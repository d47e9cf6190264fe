//! Application layer fed by a session's reconstructed byte stream.
//!
//! A session hands every newly accepted inbound byte to its [`Application`]
//! exactly once, in stream order, and queues whatever the application returns
//! on the same session's outbound stream.

/// Per-session consumer of the inbound byte stream.
pub trait Application: Send + 'static {
    /// Consume newly accepted bytes and return bytes to send back (possibly
    /// empty).
    fn on_data(&mut self, data: &[u8]) -> Vec<u8>;
}

/// Reverses each newline-terminated line.
///
/// Bytes after the last `\n` stay buffered until a later segment completes
/// the line.  Empty lines produce no output.  Reversal is byte-wise and
/// ignores any text encoding.
#[derive(Debug, Default)]
pub struct LineReverser {
    pending: Vec<u8>,
}

impl LineReverser {
    /// Reverser with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the current incomplete line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

impl Application for LineReverser {
    fn on_data(&mut self, data: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(data);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for line in self.pending[..last_newline].split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            out.extend(line.iter().rev());
            out.push(b'\n');
        }
        self.pending.drain(..=last_newline);
        out
    }
}
