//! Inbound cursor for one session.
//!
//! The [`Receiver`] tracks how much of the peer's byte stream has been
//! delivered contiguously.  LRCP has no out-of-order buffering: a segment
//! that starts beyond the cursor is dropped and the caller re-acknowledges
//! the cursor so the peer retransmits from there.  A segment that starts at
//! or before the cursor contributes only the bytes past the cursor, which
//! makes duplicate and overlapping retransmissions idempotent.
//!
//! The [`Receiver`] does **not** send acks itself; it provides the values
//! that [`crate::session::Session`] uses when building them.

use crate::message::MAX_NUMERIC;

/// Receive-side state for a single session.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Next expected byte offset from the peer.
    ///
    /// Never decreases.
    rcv_nxt: u32,
}

impl Receiver {
    /// Cursor at offset 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when a segment at `pos` would leave a gap after the cursor.
    pub fn is_ahead(&self, pos: u32) -> bool {
        pos > self.rcv_nxt
    }

    /// Accept an unescaped segment starting at `pos`.
    ///
    /// Returns the bytes of `data` that lie past the cursor (possibly empty
    /// for a pure duplicate) and advances the cursor over them.  Returns
    /// `None` without changing state if the segment starts ahead of the
    /// cursor, or if accepting it would push the cursor to a value that
    /// cannot be acknowledged on the wire.
    pub fn on_segment<'a>(&mut self, pos: u32, data: &'a [u8]) -> Option<&'a [u8]> {
        if self.is_ahead(pos) {
            return None;
        }
        let end = u64::from(pos) + data.len() as u64;
        if end >= u64::from(MAX_NUMERIC) {
            return None;
        }
        let skip = (self.rcv_nxt - pos) as usize;
        let fresh = data.get(skip..).unwrap_or(&[]);
        self.rcv_nxt += fresh.len() as u32;
        Some(fresh)
    }

    /// Offset to place in the next outbound ack.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }
}
