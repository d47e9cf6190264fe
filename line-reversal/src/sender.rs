//! Outbound stream state for stop-and-wait reliability.
//!
//! [`Sender`] owns every byte the application has queued but the peer has not
//! yet acknowledged, plus the single in-flight chunk.  It does **not** touch
//! the socket; [`crate::session::Session`] calls these methods and turns the
//! returned chunks into `data` messages.
//!
//! # Stop-and-Wait contract
//! - At most **one** chunk is in flight at any moment (`in_flight`).
//! - A new chunk is only cut once `in_flight` is `None`, always starting at
//!   the acked offset.
//! - On ack: advance `acked`, drop the acknowledged bytes, clear `in_flight`.
//! - On timeout: increment `tx_count`; resend the same bytes at the same offset.
//!
//! ```text
//!  acked            sent              queued
//!    │                │                  │
//!  ──┼────────────────┼──────────────────┼──▶ stream offset
//!    │ <─ in flight ─▶│ <── waiting ───▶ │
//! ```

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::message::escaped_len;

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A chunk that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Stream offset of the first byte in the chunk.
    pub pos: u32,
    /// Raw (unescaped) bytes of the chunk.
    pub payload: Vec<u8>,
    /// How many times this chunk has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

/// Result of feeding an ack length to [`Sender::on_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Length at or below the acked offset; nothing to do.
    Stale,
    /// The acked offset moved forward.
    Advanced,
    /// Length beyond anything ever sent: the peer is misbehaving.
    Invalid,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one session.
#[derive(Debug, Default)]
pub struct Sender {
    /// Bytes the peer has confirmed.
    acked: u32,

    /// Highest offset ever transmitted.
    sent: u32,

    /// Queued bytes from `acked` onwards.
    unacked: VecDeque<u8>,

    /// The in-flight chunk, or `None` when the sender is idle.
    in_flight: Option<InFlight>,
}

impl Sender {
    /// Idle sender with an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append application bytes to the logical outbound stream.
    pub fn push(&mut self, data: &[u8]) {
        self.unacked.extend(data.iter().copied());
    }

    /// Outbound-acked cursor.
    pub fn acked(&self) -> u32 {
        self.acked
    }

    /// Highest stream offset ever put on the wire.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Total bytes ever queued by the application.
    pub fn queued(&self) -> u64 {
        u64::from(self.acked) + self.unacked.len() as u64
    }

    /// The chunk awaiting acknowledgement, if any.
    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Cut the next chunk when the sender is idle and bytes are waiting.
    ///
    /// The chunk starts at the acked offset and holds as many bytes as fit in
    /// `max_escaped` once escaped (always at least one).  It becomes the
    /// in-flight chunk and a copy is returned for transmission.
    pub fn poll_transmit(&mut self, max_escaped: usize, now: Instant) -> Option<InFlight> {
        if self.in_flight.is_some() || self.unacked.is_empty() {
            return None;
        }

        let mut budget = 0usize;
        let take = self
            .unacked
            .iter()
            .take_while(|&&b| {
                budget += escaped_len(b);
                budget <= max_escaped
            })
            .count()
            .max(1);

        let payload: Vec<u8> = self.unacked.iter().take(take).copied().collect();
        let chunk = InFlight {
            pos: self.acked,
            tx_count: 1,
            sent_at: now,
            payload,
        };
        self.sent = self.sent.max(self.acked + chunk.payload.len() as u32);
        self.in_flight = Some(chunk.clone());
        Some(chunk)
    }

    /// Process a cumulative ack of `length` bytes.
    ///
    /// On [`AckOutcome::Advanced`] the acknowledged bytes are released and
    /// the in-flight slot is cleared, so the next [`poll_transmit`] resumes
    /// from `length`.
    ///
    /// [`poll_transmit`]: Sender::poll_transmit
    pub fn on_ack(&mut self, length: u32) -> AckOutcome {
        if length <= self.acked {
            return AckOutcome::Stale;
        }
        if length > self.sent {
            return AckOutcome::Invalid;
        }
        self.unacked.drain(..(length - self.acked) as usize);
        self.acked = length;
        self.in_flight = None;
        AckOutcome::Advanced
    }

    /// Mark the in-flight chunk as transmitted again and return a copy of it.
    pub fn on_retransmit(&mut self, now: Instant) -> Option<InFlight> {
        let entry = self.in_flight.as_mut()?;
        entry.tx_count += 1;
        entry.sent_at = now;
        Some(entry.clone())
    }

    /// Number of retransmissions of the in-flight chunk so far, or `0` if the
    /// sender is idle.
    pub fn retries(&self) -> u32 {
        self.in_flight
            .as_ref()
            .map_or(0, |e| e.tx_count.saturating_sub(1))
    }

    /// `true` when a chunk is waiting for an ack.
    pub fn has_unacked(&self) -> bool {
        self.in_flight.is_some()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
