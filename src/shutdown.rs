//! Process shutdown signalling and supervision of the long-running tasks.

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Returns a token cancelled on SIGINT (Ctrl+C) or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(err) => {
                    warn!(?err, "failed to install SIGTERM handler; Ctrl+C only");
                    let _ = ctrl_c.await;
                    info!("received SIGINT, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, shutting down");
        }

        token_clone.cancel();
    });

    token
}

/// Drive `serve` while watching the delivery `worker`.
///
/// A worker that stops before shutdown was requested cancels `shutdown`, lets
/// the server drain, and is reported as an error so the process exits non-zero.
pub async fn supervise<F>(
    serve: F,
    mut worker: JoinHandle<()>,
    shutdown: CancellationToken,
) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(serve);

    let worker_exit = tokio::select! {
        served = &mut serve => {
            shutdown.cancel();
            if let Err(err) = worker.await {
                error!(?err, "delivery queue task failed");
            }
            return served.context("webhook server failed");
        }
        exit = &mut worker => exit,
    };

    let requested = shutdown.is_cancelled();
    shutdown.cancel();
    if let Err(err) = serve.await {
        error!(?err, "webhook server failed");
    }

    match worker_exit {
        Ok(()) if requested => Ok(()),
        Ok(()) => {
            error!("delivery queue stopped unexpectedly; shutting down");
            Err(anyhow!("delivery queue stopped unexpectedly"))
        }
        Err(err) => {
            error!(?err, "delivery queue task failed; shutting down");
            Err(anyhow!("delivery queue task failed: {err}"))
        }
    }
}
