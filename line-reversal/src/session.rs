//! Per-session state machine and its event loop.
//!
//! # Architecture
//!
//! ```text
//!  Registry ─Envelope─▶ mailbox ─┐
//!                                 │        event_loop task
//!          retransmit deadline ───┼──▶ ┌─────────────────────────┐
//!          idle deadline ─────────┘    │ Session                 │
//!                                      │  ├── Receiver (cursor)  │
//!                                      │  ├── Application        │
//!                                      │  └── Sender (in flight) │
//!                                      └───────────┬─────────────┘
//!                                                  │ outbox
//!                                                  ▼
//!                                        Arc<Socket>::send_to(peer)
//! ```
//!
//! [`Session`] is pure: every handler takes the current time and returns the
//! messages to put on the wire, so the protocol rules can be tested without
//! sockets or timers.  [`spawn`] wraps a session in a tokio task that owns it
//! exclusively; the registry talks to that task only through its mailbox.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::app::Application;
use crate::message::{unescape, Message, SessionId, MAX_PAYLOAD_LIMIT, MIN_PAYLOAD};
use crate::receiver::Receiver;
use crate::sender::{AckOutcome, InFlight, Sender};
use crate::socket::Socket;
use crate::state::SessionState;
use crate::timer::{IdleTimer, TimerConfig};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Protocol state for one LRCP session.
pub struct Session<A> {
    id: SessionId,
    state: SessionState,
    receiver: Receiver,
    sender: Sender,
    app: A,
    /// Escaped payload bound for outbound `data` messages.
    max_payload: usize,
}

impl<A: Application> Session<A> {
    /// Create an open session with empty streams.
    ///
    /// `max_payload` is clamped so every `data` message fits in one datagram.
    pub fn new(id: SessionId, app: A, max_payload: usize) -> Self {
        Self {
            id,
            state: SessionState::Open,
            receiver: Receiver::new(),
            sender: Sender::new(),
            app,
            max_payload: max_payload.clamp(MIN_PAYLOAD, MAX_PAYLOAD_LIMIT),
        }
    }

    /// Peer-chosen id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Inbound cursor.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Outbound queue and in-flight chunk.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// The application fed by this session.
    pub fn app(&self) -> &A {
        &self.app
    }

    /// Process one inbound message addressed to this session.
    ///
    /// Returns the messages to send to the peer, in order.  Once the session
    /// has left [`SessionState::Open`] every message is ignored.
    pub fn on_message(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        let mut out = Vec::new();
        if !self.state.is_open() {
            return out;
        }

        match msg {
            Message::Connect { .. } => out.push(self.ack(0)),
            Message::Data { pos, escaped, .. } => self.on_data(pos, &escaped, now, &mut out),
            Message::Ack { length, .. } => self.on_ack(length, now, &mut out),
            Message::Close { .. } => {
                log::info!("[session {}] closed by peer", self.id);
                self.teardown(&mut out);
            }
        }
        out
    }

    /// The in-flight chunk has gone unacknowledged for a full retransmission
    /// interval: resend it, or give up once `max_retries` resends are spent.
    pub fn on_retransmit_timeout(&mut self, max_retries: u32, now: Instant) -> Vec<Message> {
        let mut out = Vec::new();
        if !self.state.is_open() {
            return out;
        }

        if self.sender.retries() >= max_retries {
            log::warn!(
                "[session {}] no ack after {} retransmissions; abandoning",
                self.id,
                max_retries
            );
            self.teardown(&mut out);
        } else if let Some(chunk) = self.sender.on_retransmit(now) {
            log::debug!(
                "[session {}] timeout, retransmitting pos={} len={} (try {})",
                self.id,
                chunk.pos,
                chunk.payload.len(),
                chunk.tx_count
            );
            out.push(self.data(&chunk));
        }
        out
    }

    /// Nothing has arrived from the peer for the whole idle period.
    pub fn on_idle_timeout(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        if self.state.is_open() {
            log::warn!("[session {}] idle timeout", self.id);
            self.teardown(&mut out);
        }
        out
    }

    /// When the in-flight chunk is due for retransmission, if there is one.
    pub fn retransmit_deadline(&self, rto: Duration) -> Option<Instant> {
        self.sender.in_flight().map(|chunk| chunk.sent_at + rto)
    }

    /// Mark the session terminal once its final `close` has been flushed.
    pub fn finish(&mut self) {
        self.state = SessionState::Closed;
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    fn on_data(&mut self, pos: u32, escaped: &[u8], now: Instant, out: &mut Vec<Message>) {
        if self.receiver.is_ahead(pos) {
            log::debug!(
                "[session {}] gap: got pos={} want {}; re-acking",
                self.id,
                pos,
                self.receiver.ack_number()
            );
            out.push(self.ack(self.receiver.ack_number()));
            return;
        }

        let data = match unescape(escaped) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[session {}] {e} at pos={pos}", self.id);
                self.teardown(out);
                return;
            }
        };

        let Some(fresh) = self.receiver.on_segment(pos, &data) else {
            log::warn!("[session {}] inbound stream exceeds 2^31 bytes", self.id);
            self.teardown(out);
            return;
        };
        out.push(self.ack(self.receiver.ack_number()));

        if fresh.is_empty() {
            return;
        }
        let reply = self.app.on_data(fresh);
        if !reply.is_empty() {
            self.sender.push(&reply);
            self.pump(now, out);
        }
    }

    fn on_ack(&mut self, length: u32, now: Instant, out: &mut Vec<Message>) {
        match self.sender.on_ack(length) {
            AckOutcome::Stale => {}
            AckOutcome::Advanced => self.pump(now, out),
            AckOutcome::Invalid => {
                log::warn!(
                    "[session {}] ack {} beyond {} bytes sent",
                    self.id,
                    length,
                    self.sender.sent()
                );
                self.teardown(out);
            }
        }
    }

    /// Send the next chunk if the sender is idle and bytes are waiting.
    fn pump(&mut self, now: Instant, out: &mut Vec<Message>) {
        if let Some(chunk) = self.sender.poll_transmit(self.max_payload, now) {
            out.push(self.data(&chunk));
        }
    }

    fn teardown(&mut self, out: &mut Vec<Message>) {
        out.push(Message::Close { session: self.id });
        self.state = SessionState::Closing;
    }

    fn ack(&self, length: u32) -> Message {
        Message::Ack {
            session: self.id,
            length,
        }
    }

    fn data(&self, chunk: &InFlight) -> Message {
        Message::data(self.id, chunk.pos, &chunk.payload)
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// A decoded datagram and the address it came from.
pub type Envelope = (Message, SocketAddr);

/// Registry-side handle to a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    mailbox: mpsc::Sender<Envelope>,
}

impl SessionHandle {
    /// Id of the session this handle feeds.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue `msg`, received from `from`, for the session without waiting.
    ///
    /// Fails with [`TrySendError::Full`] when the session is backlogged and
    /// with [`TrySendError::Closed`] once the session task has stopped; both
    /// hand the envelope back.
    pub fn deliver(&self, msg: Message, from: SocketAddr) -> Result<(), TrySendError<Envelope>> {
        self.mailbox.try_send((msg, from))
    }

    /// `true` once the session task has stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Notice a session task sends to the registry once it has stopped.
#[derive(Debug)]
pub struct Reaped {
    /// Id of the stopped session.
    pub id: SessionId,
    /// Datagrams still queued when the session stopped, oldest first.
    pub leftovers: Vec<Envelope>,
}

/// Run `session` on its own task and return the handle that feeds it.
///
/// Every outbound message is sent to `peer` through the shared `socket`.
/// When the task stops it flushes its final `close`, closes its mailbox and
/// then sends a [`Reaped`] notice on `reap_tx`.  The registry can then tell
/// a finished session from a live one registered later under the same id,
/// and route the leftovers as it would any datagram for an unknown session.
pub fn spawn<A: Application>(
    session: Session<A>,
    socket: Arc<Socket>,
    peer: SocketAddr,
    timers: TimerConfig,
    mailbox_capacity: usize,
    reap_tx: mpsc::UnboundedSender<Reaped>,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let id = session.id();
    tokio::spawn(event_loop(session, socket, peer, timers, rx, reap_tx));
    SessionHandle { id, mailbox: tx }
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

async fn event_loop<A: Application>(
    mut session: Session<A>,
    socket: Arc<Socket>,
    peer: SocketAddr,
    timers: TimerConfig,
    mut mailbox: mpsc::Receiver<Envelope>,
    reap_tx: mpsc::UnboundedSender<Reaped>,
) {
    let id = session.id();
    let mut idle = IdleTimer::new(timers.idle_timeout, Instant::now());

    loop {
        let retransmit_at = session.retransmit_deadline(timers.retransmit_timeout);

        let outbox = tokio::select! {
            // ── Branch 1: next datagram for this session ─────────────────
            maybe_msg = mailbox.recv() => match maybe_msg {
                Some((msg, _from)) => {
                    let now = Instant::now();
                    idle.touch(now);
                    log::debug!("[session {id}] ← {msg}");
                    session.on_message(msg, now)
                }
                // Registry dropped the handle: the listener is shutting down.
                None => break,
            },

            // ── Branch 2: in-flight chunk unacknowledged ─────────────────
            _ = sleep_until_opt(retransmit_at) => {
                session.on_retransmit_timeout(timers.max_retries, Instant::now())
            }

            // ── Branch 3: peer silent for the idle period ────────────────
            _ = tokio::time::sleep_until(idle.deadline()) => session.on_idle_timeout(),
        };

        for msg in &outbox {
            log::debug!("[session {id}] → {msg}");
            if let Err(e) = socket.send_to(msg, peer).await {
                log::warn!("[session {id}] send to {peer} failed: {e}");
            }
        }

        if !session.state().is_open() {
            break;
        }
    }

    // The final close is already on the wire.  Anything queued after it goes
    // back to the registry, which now treats this id as unknown.
    mailbox.close();
    let mut leftovers = Vec::new();
    while let Ok(envelope) = mailbox.try_recv() {
        leftovers.push(envelope);
    }

    session.finish();
    log::info!(
        "[session {id}] {} ({} queued datagrams returned)",
        session.state(),
        leftovers.len()
    );
    let _ = reap_tx.send(Reaped { id, leftovers });
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::app::LineReverser;
    use crate::message::MAX_PAYLOAD;

    const ID: SessionId = 1234;

    fn reverser() -> Session<LineReverser> {
        Session::new(ID, LineReverser::new(), MAX_PAYLOAD)
    }

    fn data(pos: u32, raw: &[u8]) -> Message {
        Message::data(ID, pos, raw)
    }

    fn ack(length: u32) -> Message {
        Message::Ack {
            session: ID,
            length,
        }
    }

    fn close() -> Message {
        Message::Close { session: ID }
    }

    /// Records everything it is handed and never replies.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<u8>,
    }

    impl Application for Recorder {
        fn on_data(&mut self, data: &[u8]) -> Vec<u8> {
            self.seen.extend_from_slice(data);
            Vec::new()
        }
    }

    #[test]
    fn connect_is_acked_with_zero() {
        let mut s = reverser();
        let out = s.on_message(Message::Connect { session: ID }, Instant::now());
        assert_eq!(out, vec![ack(0)]);
        assert_eq!(s.state(), SessionState::Open);
    }

    #[test]
    fn repeated_connect_keeps_state() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(Message::Connect { session: ID }, now);
        s.on_message(data(0, b"partial"), now);

        let out = s.on_message(Message::Connect { session: ID }, now);
        assert_eq!(out, vec![ack(0)]);
        assert_eq!(s.receiver().ack_number(), 7);
        assert_eq!(s.app().pending(), b"partial");
    }

    #[test]
    fn hello_is_reversed() {
        let mut s = reverser();
        let out = s.on_message(data(0, b"hello\n"), Instant::now());
        assert_eq!(out, vec![ack(6), data(0, b"olleh\n")]);
    }

    #[test]
    fn lone_newline_only_acks() {
        let mut s = reverser();
        let out = s.on_message(data(0, b"\n"), Instant::now());
        assert_eq!(out, vec![ack(1)]);
        assert!(!s.sender().has_unacked());
    }

    #[test]
    fn line_split_across_messages() {
        let mut s = reverser();
        let now = Instant::now();
        assert_eq!(s.on_message(data(0, b"wor"), now), vec![ack(3)]);
        assert_eq!(
            s.on_message(data(3, b"ld\n"), now),
            vec![ack(6), data(0, b"dlrow\n")]
        );
    }

    #[test]
    fn data_ahead_of_cursor_is_reacked() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"abc"), now);

        let out = s.on_message(data(10, b"xyz\n"), now);
        assert_eq!(out, vec![ack(3)]);
        assert_eq!(s.receiver().ack_number(), 3);
        assert_eq!(s.app().pending(), b"abc");
    }

    #[test]
    fn duplicate_data_is_idempotent() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"abc"), now);
        assert_eq!(s.on_message(data(0, b"abc"), now), vec![ack(3)]);
        assert_eq!(s.on_message(data(1, b"bcd"), now), vec![ack(4)]);
        assert_eq!(s.app().pending(), b"abcd");
    }

    #[test]
    fn escaped_payload_is_unescaped_before_the_app() {
        let mut s = reverser();
        let out = s.on_message(data(0, b"a/b\\c\n"), Instant::now());
        assert_eq!(out, vec![ack(6), data(0, b"c\\b/a\n")]);
        assert_eq!(
            out[1].encode(),
            b"/data/1234/0/c\\\\b\\/a\n/".to_vec()
        );
    }

    #[test]
    fn bad_escape_tears_session_down() {
        let mut s = reverser();
        let msg = Message::Data {
            session: ID,
            pos: 0,
            escaped: b"bad\\escape".to_vec(),
        };
        assert_eq!(s.on_message(msg, Instant::now()), vec![close()]);
        assert_eq!(s.state(), SessionState::Closing);
    }

    #[test]
    fn bad_escape_ahead_of_cursor_is_only_reacked() {
        let mut s = reverser();
        let msg = Message::Data {
            session: ID,
            pos: 5,
            escaped: b"bad\\q".to_vec(),
        };
        assert_eq!(s.on_message(msg, Instant::now()), vec![ack(0)]);
        assert_eq!(s.state(), SessionState::Open);
    }

    #[test]
    fn long_reply_goes_out_one_chunk_at_a_time() {
        let mut s = Session::new(ID, LineReverser::new(), 4);
        let now = Instant::now();

        let out = s.on_message(data(0, b"abcdefgh\n"), now);
        assert_eq!(out, vec![ack(9), data(0, b"hgfe")]);

        assert_eq!(s.on_message(ack(4), now), vec![data(4, b"dcba")]);
        assert_eq!(s.on_message(ack(8), now), vec![data(8, b"\n")]);
        assert_eq!(s.on_message(ack(9), now), Vec::<Message>::new());
        assert_eq!(s.sender().acked(), 9);
        assert!(!s.sender().has_unacked());
    }

    #[test]
    fn oversized_payload_bound_is_clamped() {
        let mut s = Session::new(ID, LineReverser::new(), 5000);
        let line: Vec<u8> = std::iter::repeat(b'/').take(2000).chain([b'\n']).collect();

        let out = s.on_message(data(0, &line), Instant::now());
        match &out[1] {
            Message::Data { escaped, .. } => assert!(escaped.len() <= MAX_PAYLOAD_LIMIT),
            other => panic!("expected data, got {other}"),
        }
        assert!(out[1].encode().len() <= crate::message::MAX_DATAGRAM);
    }

    #[test]
    fn new_reply_waits_for_in_flight_chunk() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"ab\n"), now);

        // Second line is queued but not sent while "ba\n" is unacknowledged.
        assert_eq!(s.on_message(data(3, b"cd\n"), now), vec![ack(6)]);
        assert_eq!(s.on_message(ack(3), now), vec![data(3, b"dc\n")]);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"hello\n"), now);
        assert!(s.on_message(ack(0), now).is_empty());
        assert_eq!(s.on_message(ack(6), now), Vec::<Message>::new());
        assert!(s.on_message(ack(6), now).is_empty());
        assert_eq!(s.state(), SessionState::Open);
    }

    #[test]
    fn ack_beyond_sent_tears_session_down() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"hello\n"), now);
        assert_eq!(s.on_message(ack(7), now), vec![close()]);
        assert_eq!(s.state(), SessionState::Closing);

        // Nothing is processed after teardown.
        assert!(s.on_message(data(6, b"more\n"), now).is_empty());
    }

    #[test]
    fn ack_on_fresh_session_tears_it_down() {
        let mut s = reverser();
        assert_eq!(s.on_message(ack(1), Instant::now()), vec![close()]);
    }

    #[test]
    fn close_is_answered_and_ends_session() {
        let mut s = reverser();
        assert_eq!(s.on_message(close(), Instant::now()), vec![close()]);
        assert_eq!(s.state(), SessionState::Closing);
        s.finish();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.on_message(Message::Connect { session: ID }, Instant::now()).is_empty());
    }

    #[test]
    fn retransmits_then_abandons() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"hello\n"), now);

        assert_eq!(s.on_retransmit_timeout(2, now), vec![data(0, b"olleh\n")]);
        assert_eq!(s.on_retransmit_timeout(2, now), vec![data(0, b"olleh\n")]);
        assert_eq!(s.on_retransmit_timeout(2, now), vec![close()]);
        assert_eq!(s.state(), SessionState::Closing);
    }

    #[test]
    fn ack_resets_retry_budget() {
        let mut s = reverser();
        let now = Instant::now();
        s.on_message(data(0, b"ab\n"), now);
        s.on_message(data(3, b"cd\n"), now);
        s.on_retransmit_timeout(1, now);

        s.on_message(ack(3), now);
        assert_eq!(s.sender().retries(), 0);
        assert_eq!(s.on_retransmit_timeout(1, now), vec![data(3, b"dc\n")]);
    }

    #[test]
    fn retransmit_deadline_follows_in_flight_chunk() {
        let mut s = reverser();
        let rto = Duration::from_secs(3);
        let now = Instant::now();
        assert_eq!(s.retransmit_deadline(rto), None);

        s.on_message(data(0, b"x\n"), now);
        assert_eq!(s.retransmit_deadline(rto), Some(now + rto));

        s.on_message(ack(2), now);
        assert_eq!(s.retransmit_deadline(rto), None);
    }

    #[test]
    fn idle_timeout_closes() {
        let mut s = reverser();
        assert_eq!(s.on_idle_timeout(), vec![close()]);
        assert!(s.on_idle_timeout().is_empty());
    }

    #[test]
    fn any_delivery_order_reconstructs_stream_once() {
        const ALPHABET: &[u8] = b"abc/\\\nxyz";
        let mut rng = StdRng::seed_from_u64(0x4c52_4350);
        let stream: Vec<u8> = (0..2000)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
            .collect();

        // Random overlapping segments plus a partition so every offset is
        // reachable.
        let mut segments: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        while start < stream.len() {
            let end = (start + rng.gen_range(1..150)).min(stream.len());
            segments.push((start, end));
            start = end;
        }
        for _ in 0..30 {
            let a = rng.gen_range(0..stream.len());
            let b = (a + rng.gen_range(1..300)).min(stream.len());
            segments.push((a, b));
        }

        let mut s = Session::new(ID, Recorder::default(), MAX_PAYLOAD);
        let now = Instant::now();
        for _ in 0..100_000 {
            if s.receiver().ack_number() as usize == stream.len() {
                break;
            }
            let (a, b) = segments[rng.gen_range(0..segments.len())];
            let out = s.on_message(data(a as u32, &stream[a..b]), now);
            assert_eq!(out, vec![ack(s.receiver().ack_number())]);
        }

        assert_eq!(s.receiver().ack_number() as usize, stream.len());
        assert_eq!(s.app().seen, stream);
    }
}
