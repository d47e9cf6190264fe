//! Shared helpers for the loopback integration tests.
//!
//! A [`Peer`] is a bare `tokio::net::UdpSocket` speaking raw wire text, so
//! the tests exercise exactly the bytes a real client would send.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use line_reversal::{Config, LineReverser, Listener, Message, TimerConfig};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long a test waits for a datagram it expects.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback configuration with the given timers.
pub fn loopback_config(timers: TimerConfig) -> Config {
    Config {
        bind: "127.0.0.1:0".parse().unwrap(),
        timers,
        ..Config::default()
    }
}

/// Run a line-reversal listener in the background.
pub async fn start(config: Config) -> (SocketAddr, JoinHandle<()>) {
    let listener = Listener::<LineReverser>::bind(config)
        .await
        .expect("bind listener");
    let addr = listener.local_addr();
    (addr, tokio::spawn(listener.run()))
}

/// Run a listener with default timers.
pub async fn start_default() -> (SocketAddr, JoinHandle<()>) {
    start(loopback_config(TimerConfig::default())).await
}

pub struct Peer {
    socket: UdpSocket,
    server: SocketAddr,
}

impl Peer {
    pub async fn new(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");
        Self { socket, server }
    }

    /// Send raw wire text.
    pub async fn send(&self, raw: &str) {
        self.send_bytes(raw.as_bytes()).await;
    }

    pub async fn send_bytes(&self, raw: &[u8]) {
        self.socket.send_to(raw, self.server).await.expect("send");
    }

    pub async fn send_msg(&self, msg: &Message) {
        self.send_bytes(&msg.encode()).await;
    }

    /// Next datagram as text; panics if none arrives in [`REPLY_TIMEOUT`].
    pub async fn recv(&self) -> String {
        self.recv_within(REPLY_TIMEOUT)
            .await
            .expect("timed out waiting for a reply")
    }

    /// Next datagram as a decoded message.
    pub async fn recv_msg(&self) -> Message {
        let text = self.recv().await;
        Message::decode(text.as_bytes()).expect("server sent a malformed message")
    }

    /// Next datagram within `wait`, if any.
    pub async fn recv_within(&self, wait: Duration) -> Option<String> {
        let mut buf = [0u8; 1024];
        match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => {
                assert!(n <= 1000, "server sent a {n}-byte datagram");
                Some(String::from_utf8_lossy(&buf[..n]).into_owned())
            }
            Ok(Err(e)) => panic!("peer receive failed: {e}"),
            Err(_elapsed) => None,
        }
    }

    /// Connect `session` and consume the ack.
    pub async fn connect(&self, session: u32) {
        self.send(&format!("/connect/{session}/")).await;
        assert_eq!(self.recv().await, format!("/ack/{session}/0/"));
    }
}
