//! Entry point for `line-reversal`.
//!
//! Parses CLI arguments and runs the LRCP listener.  All protocol work is
//! delegated to the library; `main.rs` owns only process setup (logging,
//! argument parsing).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use line_reversal::message::{MAX_PAYLOAD, MAX_PAYLOAD_LIMIT, MIN_PAYLOAD};
use line_reversal::{config, Config, LineReverser, Listener, TimerConfig};

/// Line reversal over the LRCP reliable-UDP protocol.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// UDP port to listen on.
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Local address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    host: IpAddr,

    /// Milliseconds before an unacknowledged chunk is resent.
    #[arg(long, default_value_t = 3000)]
    retransmit_ms: u64,

    /// Resends of one chunk before the session is abandoned.
    #[arg(long, default_value_t = 20)]
    max_retries: u32,

    /// Seconds of peer silence before a session is torn down.
    #[arg(long, default_value_t = 60)]
    idle_secs: u64,

    /// Bound on the escaped payload of one outbound data message.
    #[arg(long, default_value_t = MAX_PAYLOAD, value_parser = parse_max_payload)]
    max_payload: usize,
}

/// Accept only payload bounds that keep every datagram within 1000 bytes.
fn parse_max_payload(arg: &str) -> Result<usize, String> {
    let value: usize = arg.parse().map_err(|e| format!("{e}"))?;
    if (MIN_PAYLOAD..=MAX_PAYLOAD_LIMIT).contains(&value) {
        Ok(value)
    } else {
        Err(format!("must be between {MIN_PAYLOAD} and {MAX_PAYLOAD_LIMIT}"))
    }
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            bind: SocketAddr::new(self.host, self.port),
            timers: TimerConfig {
                retransmit_timeout: Duration::from_millis(self.retransmit_ms),
                max_retries: self.max_retries,
                idle_timeout: Duration::from_secs(self.idle_secs),
            },
            max_payload: self.max_payload,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let config = Cli::parse().into_config();
    log::info!("Starting server on {}", config.bind);

    let listener = Listener::<LineReverser>::bind(config).await?;
    listener.run().await;
    Ok(())
}
