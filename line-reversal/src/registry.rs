//! Session registry: the single owner of the id → session map.
//!
//! Only the listener loop holds a [`Registry`], so inserts, lookups and
//! removals are serialised without a lock.  Sessions never touch the map;
//! a session that stops on its own reports its id back to the listener,
//! which calls [`Registry::reap`].
//!
//! | Known? | Message   | Action                                          |
//! |--------|-----------|-------------------------------------------------|
//! | no     | `connect` | spawn a session, which replies `/ack/ID/0/`     |
//! | no     | other     | reply `/close/ID/`, create nothing              |
//! | yes    | any       | queue on the session's mailbox                  |
//!
//! A handle whose task has already stopped counts as unknown, so a stray
//! datagram for a torn-down session is never routed to stale state.  The same
//! goes for datagrams that were still queued when a session stopped: they come
//! back with its reap notice and are routed again from scratch.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::app::Application;
use crate::config::Config;
use crate::message::{Message, SessionId};
use crate::session::{self, Reaped, Session, SessionHandle};
use crate::socket::Socket;

/// Live sessions keyed by id.
pub struct Registry<A> {
    sessions: HashMap<SessionId, SessionHandle>,
    socket: Arc<Socket>,
    config: Config,
    reap_tx: mpsc::UnboundedSender<Reaped>,
    _app: PhantomData<fn() -> A>,
}

impl<A: Application + Default> Registry<A> {
    /// Create an empty registry.
    ///
    /// Sessions it spawns send through `socket` and report their id on
    /// `reap_tx` when they stop.
    pub fn new(
        socket: Arc<Socket>,
        config: Config,
        reap_tx: mpsc::UnboundedSender<Reaped>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            socket,
            config,
            reap_tx,
            _app: PhantomData,
        }
    }

    /// Route one decoded message received from `from`.
    pub async fn dispatch(&mut self, msg: Message, from: SocketAddr) {
        let id = msg.session();

        if let Some(handle) = self.sessions.get(&id) {
            match handle.deliver(msg, from) {
                Ok(()) => return,
                Err(TrySendError::Full((dropped, _))) => {
                    log::debug!("[registry] session {id} backlogged; dropping {dropped}");
                    return;
                }
                Err(TrySendError::Closed((returned, _))) => {
                    self.sessions.remove(&id);
                    log::debug!("[registry] session {id} already stopped");
                    return self.dispatch_unknown(returned, from).await;
                }
            }
        }

        self.dispatch_unknown(msg, from).await
    }

    /// Forget a stopped session and re-route whatever it left queued.
    ///
    /// Returns `true` when an entry was removed.  A notice that arrives after
    /// the id has been reused by a fresh session leaves the new one alone;
    /// its leftovers are then delivered to that session.
    pub async fn reap(&mut self, notice: Reaped) -> bool {
        let Reaped { id, leftovers } = notice;
        let removed = self.sessions.get(&id).is_some_and(SessionHandle::is_closed);
        if removed {
            self.sessions.remove(&id);
            log::debug!("[registry] session {id} removed ({} live)", self.sessions.len());
        }
        for (msg, from) in leftovers {
            self.dispatch(msg, from).await;
        }
        removed
    }

    /// `true` if `id` has an entry, live or not yet reaped.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    async fn dispatch_unknown(&mut self, msg: Message, from: SocketAddr) {
        let id = msg.session();
        match msg {
            Message::Connect { .. } => {
                let handle = self.open(id, from);
                if let Err(e) = handle.deliver(msg, from) {
                    log::warn!("[registry] session {id} refused its connect: {e}");
                }
            }
            other => {
                log::debug!("[registry] {other} for unknown session; closing");
                let reply = Message::Close { session: id };
                if let Err(e) = self.socket.send_to(&reply, from).await {
                    log::warn!("[registry] close to {from} failed: {e}");
                }
            }
        }
    }

    fn open(&mut self, id: SessionId, peer: SocketAddr) -> SessionHandle {
        let session = Session::new(id, A::default(), self.config.max_payload);
        let handle = session::spawn(
            session,
            Arc::clone(&self.socket),
            peer,
            self.config.timers,
            self.config.mailbox_capacity,
            self.reap_tx.clone(),
        );
        log::info!("[registry] session {id} opened by {peer}");
        self.sessions.insert(id, handle.clone());
        handle
    }
}
