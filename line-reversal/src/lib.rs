//! `line-reversal` — the Line Reversal Control Protocol (LRCP) over UDP.
//!
//! LRCP turns lossy, duplicating, reordering UDP datagrams into ordered,
//! exactly-once byte streams ("sessions") using cumulative acks,
//! stop-and-wait retransmission, and a slash-delimited text wire format.
//! The application served on every session reverses each line it receives.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  Message   ┌──────────┐  mailbox   ┌─────────────────┐
//!  │   Listener   │───────────▶│ Registry │───────────▶│ Session task(s) │
//!  │ (recv loop)  │◀───────────│ (id map) │            │  Receiver       │
//!  └──────┬───────┘ reap notice└──────────┘            │  Application    │
//!         │                          ▲                 │  Sender         │
//!         │ raw UDP datagrams        └─ Reaped notice ─┴────────┬────────┘
//!  ┌──────▼──────┐                                              │
//!  │   Socket    │◀──────────── send_to(peer) ──────────────────┘
//!  └─────────────┘   (shared Arc, thin wrapper around tokio UdpSocket)
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]   — wire format (parse / serialise / escape)
//! - [`socket`]    — async UDP socket that speaks [`message::Message`]
//! - [`receiver`]  — inbound cursor and duplicate trimming
//! - [`sender`]    — outbound queue and the single in-flight chunk
//! - [`state`]     — session lifecycle states
//! - [`session`]   — per-session state machine and its event loop
//! - [`app`]       — application layer (line reversal)
//! - [`registry`]  — single-owner session map
//! - [`listener`]  — receive loop and the [`serve`] entry point
//! - [`timer`]     — retransmit and idle timer settings
//! - [`config`]    — service configuration

pub mod app;
pub mod config;
pub mod listener;
pub mod message;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod session;
pub mod socket;
pub mod state;
pub mod timer;

pub use app::{Application, LineReverser};
pub use config::Config;
pub use listener::{serve, Listener};
pub use message::{Message, MessageError, SessionId};
pub use socket::SocketError;
pub use timer::TimerConfig;
