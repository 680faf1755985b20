//! ifacewire-stdio: child-side host speaking the wire protocol over stdin/stdout.
//!
//! Frames are length-delimited JSON. Logs go to stderr so they never mix with frames.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ifacewire::{
    CallExecutor, ExecutorError, IncomingCall, PeerFilter, PeerId, RpcResponse, Wire, WireConfig,
    framed,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PEER: &str = "parent";

/// How long answers from in-flight calls may keep the process alive after the wire stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing with IFACEWIRE_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("IFACEWIRE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "ifacewire={level},ifacewire_stdio={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn parse_timeout(raw: Option<&str>) -> anyhow::Result<Option<Duration>> {
    match raw.map(str::trim) {
        None | Some("") | Some("0") => Ok(None),
        Some(secs) => {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid IFACEWIRE_CALL_TIMEOUT_SECS: {secs:?}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
    }
}

fn read_config() -> anyhow::Result<(PeerId, WireConfig)> {
    let peer = PeerId::new(std::env::var("IFACEWIRE_PEER").unwrap_or_else(|_| DEFAULT_PEER.to_string()));
    let timeout = parse_timeout(std::env::var("IFACEWIRE_CALL_TIMEOUT_SECS").ok().as_deref())?;

    let mut config = WireConfig::new(PeerFilter::exact(peer.clone())).with_label("stdio");
    if let Some(timeout) = timeout {
        config = config.with_call_timeout(timeout);
    }
    Ok((peer, config))
}

/// Answers `ping` and `echo`; anything else is refused.
struct EchoExecutor;

#[async_trait::async_trait]
impl CallExecutor for EchoExecutor {
    async fn execute(&self, call: IncomingCall) -> Result<RpcResponse, ExecutorError> {
        match call.call.request.as_str() {
            "ping" => Ok(RpcResponse::ok(serde_json::json!("pong"))),
            "echo" => Ok(RpcResponse::ok(call.call.payload)),
            other => Err(ExecutorError::new(format!("unknown request: {other}"))
                .with_details(serde_json::json!({ "request": other }))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let (peer, config) = read_config()?;

    info!(%peer, call_timeout = ?config.call_timeout, "Starting stdio wire");
    let (outbound, inbound) = framed(tokio::io::stdin(), tokio::io::stdout(), peer);
    let drained = outbound.drained();
    let wire = Wire::spawn(config, Arc::new(outbound), inbound, Arc::new(EchoExecutor));

    tokio::select! {
        _ = wire.closed() => {
            info!("Peer closed the channel");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
            wire.end();
            wire.closed().await;
        }
    }

    // Executor tasks still hold the outbound; their answers are written
    // before the writer exits.
    drop(wire);
    if tokio::time::timeout(DRAIN_TIMEOUT, drained).await.is_err() {
        warn!(timeout = ?DRAIN_TIMEOUT, "Gave up waiting for outbound frames to drain");
    }

    Ok(())
}
