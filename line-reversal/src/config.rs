//! Service configuration.

use std::net::{Ipv4Addr, SocketAddr};

use crate::message::MAX_PAYLOAD;
use crate::timer::TimerConfig;

/// Port the service listens on when none is given.
pub const DEFAULT_PORT: u16 = 4242;

/// Events a session mailbox holds before the listener starts dropping
/// datagrams for it.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Everything the listener needs to run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local address of the UDP socket.
    pub bind: SocketAddr,
    /// Retransmission and idle settings applied to every session.
    pub timers: TimerConfig,
    /// Bound on the escaped payload of one outbound `data` message.
    ///
    /// Sessions clamp it to what fits in one datagram.
    pub max_payload: usize,
    /// Per-session mailbox depth.
    pub mailbox_capacity: usize,
}

impl Config {
    /// Default configuration listening on all interfaces at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            timers: TimerConfig::default(),
            max_payload: MAX_PAYLOAD,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}
