mod config;

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use bridge_transfer::{InterruptHandle, SessionOutcome, TracingLogger, TransferServer};

use crate::config::ServerConfig;

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge=info,bridge_transfer=info".into()),
        )
        .init();

    // Config
    let config = ServerConfig::from_env(std::env::args().nth(1))?;
    let source = config.payload_source();

    let interrupt = InterruptHandle::new();
    spawn_signal_thread(interrupt.clone())?;

    let mut server = TransferServer::bind(config.session_config())
        .context("binding bridge listener")?
        .with_logger(Arc::new(TracingLogger));
    info!(
        "Bridge listening on {} ({:?} protocol, restart={})",
        server.local_addr(),
        config.protocol,
        config.restart
    );

    loop {
        info!("Waiting for device connection...");
        let report = match server.serve_once(source.as_ref(), &interrupt) {
            Ok(report) => report,
            Err(e) if config.restart => {
                warn!("Session failed: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("transfer session failed"),
        };

        match report.outcome {
            SessionOutcome::Interrupted => {
                info!("Session {} interrupted, connection closed", report.session);
                break;
            }
            SessionOutcome::Completed => {
                info!(
                    "Session {} complete: {} payloads ({} bytes), {} status messages",
                    report.session,
                    report.entries_sent,
                    report.bytes_sent,
                    report.statuses.len()
                );
            }
        }

        if !config.restart {
            break;
        }
    }

    Ok(())
}

/// Deliver Ctrl+C / SIGTERM to the blocking session from a side thread.
fn spawn_signal_thread(interrupt: InterruptHandle) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    thread::Builder::new()
        .name("bridge-signal".into())
        .spawn(move || {
            runtime.block_on(shutdown_signal());
            interrupt.trigger();
        })
        .context("spawning signal thread")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, closing connection..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, closing connection..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, closing connection...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, closing connection...");
    }
}
