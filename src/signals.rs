use anyhow::Result;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Completes when the process is told to stop by any of SIGINT, SIGTERM, SIGHUP or SIGQUIT
pub async fn shutdown_signal() -> Result<()> {
    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = int.recv() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(signal = name, "Received signal, shutting down");
    Ok(())
}
