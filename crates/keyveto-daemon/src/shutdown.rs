//! Signal handling for graceful shutdown

use anyhow::Context;
use crossbeam_channel::Receiver;
use tracing::{debug, warn};

/// Handles shutdown signals (Ctrl+C everywhere, SIGTERM on Unix)
pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Waits for a signal on a helper thread. The receiver yields once it fires.
    pub fn spawn() -> anyhow::Result<Receiver<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build signal runtime")?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::Builder::new()
            .name("keyveto-signal".to_string())
            .spawn(move || {
                runtime.block_on(wait());
                let _ = tx.send(());
            })
            .context("failed to spawn signal thread")?;
        Ok(rx)
    }
}

async fn wait() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => debug!("received SIGTERM"),
                    _ = ctrl_c() => {}
                }
                return;
            }
            Err(e) => warn!("failed to register SIGTERM handler: {}", e),
        }
    }
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("received Ctrl+C"),
        Err(e) => {
            // Without a handler the daemon runs until killed, as before.
            warn!("failed to register Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
