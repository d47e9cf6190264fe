//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::message::Message`] instead of raw bytes.  All protocol logic
//! lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::message::{Message, MessageError, MAX_DATAGRAM};

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a valid message.
    #[error("malformed datagram: {0}")]
    Message(#[from] MessageError),
}

/// An async, message-oriented UDP socket.
///
/// All methods are `&self` so one socket can be shared by the listener and
/// every session task.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `message` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, message: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&message.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Message`].
    ///
    /// Returns `(message, sender_address)`.  A datagram that fails to decode
    /// is returned as [`SocketError::Message`]; the caller decides whether to
    /// keep reading.  A datagram longer than [`MAX_DATAGRAM`] is rejected
    /// whole with [`MessageError::Oversize`] rather than decoded truncated.
    pub async fn recv_from(&self) -> Result<(Message, SocketAddr), SocketError> {
        // One spare byte tells an oversized datagram from a full-size one.
        let mut buf = [0u8; MAX_DATAGRAM + 1];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        if n > MAX_DATAGRAM {
            return Err(MessageError::Oversize.into());
        }
        let message = Message::decode(&buf[..n])?;
        Ok((message, addr))
    }
}
