//! UDP receive loop.
//!
//! The [`Listener`] owns the socket's receive side and the [`Registry`].  It
//! waits on two things at once: the next datagram, and reap notices from
//! session tasks that have stopped.  Both are handled on this one task, which
//! is what keeps the registry single-writer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::app::{Application, LineReverser};
use crate::config::Config;
use crate::registry::Registry;
use crate::session::Reaped;
use crate::socket::{Socket, SocketError};

/// A bound LRCP endpoint serving application `A` on every session.
pub struct Listener<A = LineReverser> {
    socket: Arc<Socket>,
    registry: Registry<A>,
    reap_rx: mpsc::UnboundedReceiver<Reaped>,
}

impl<A: Application + Default> Listener<A> {
    /// Bind the UDP socket described by `config`.
    pub async fn bind(config: Config) -> Result<Self, SocketError> {
        let socket = Arc::new(Socket::bind(config.bind).await?);
        let (reap_tx, reap_rx) = mpsc::unbounded_channel();
        let registry = Registry::new(Arc::clone(&socket), config, reap_tx);
        Ok(Self {
            socket,
            registry,
            reap_rx,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Serve until the task is cancelled.
    ///
    /// Malformed datagrams and receive errors are logged and skipped; nothing
    /// a peer sends can stop the loop.
    pub async fn run(mut self) {
        log::info!("[listen] serving LRCP on {}", self.socket.local_addr);

        loop {
            tokio::select! {
                result = self.socket.recv_from() => match result {
                    Ok((msg, from)) => {
                        log::debug!("[listen] ← {msg} from {from}");
                        self.registry.dispatch(msg, from).await;
                    }
                    Err(SocketError::Message(e)) => {
                        log::debug!("[listen] dropping datagram: {e}");
                    }
                    Err(SocketError::Io(e)) => {
                        log::warn!("[listen] receive failed: {e}");
                    }
                },

                Some(notice) = self.reap_rx.recv() => {
                    self.registry.reap(notice).await;
                }
            }
        }
    }
}

/// Bind on `port` with default settings and serve line reversal forever.
pub async fn serve(port: u16) -> Result<(), SocketError> {
    Listener::<LineReverser>::bind(Config::with_port(port))
        .await?
        .run()
        .await;
    Ok(())
}
