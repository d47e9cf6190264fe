//! Session lifecycle states.
//!
//! ```text
//!  OPEN ──close / violation / timeout──▶ CLOSING ──close sent──▶ CLOSED
//! ```
//!
//! Transitions live in [`crate::session`].  A session in `Closing` has
//! emitted its final `close` and processes nothing further; `Closed` is
//! terminal and is reached once its event loop has stopped.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Exchanging data.
    #[default]
    Open,
    /// Teardown decided; the final `close` is being flushed.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// `true` while inbound messages are still processed.
    pub fn is_open(self) -> bool {
        self == SessionState::Open
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "OPEN",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
