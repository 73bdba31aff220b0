//! Signal handling for graceful shutdown

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancel `shutdown` on Ctrl+C or SIGTERM
pub fn setup_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    // Handle Ctrl+C (SIGINT)
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Ctrl+C signal received");
                    token.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl+C signal: {}", e),
            }
        }
    });

    // Handle SIGTERM (Unix only)
    #[cfg(unix)]
    {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown_flag))?;

        tokio::spawn(async move {
            // Poll for signal
            loop {
                if shutdown_flag.load(Ordering::Relaxed) {
                    info!("SIGTERM signal received");
                    shutdown.cancel();
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
        });
    }

    Ok(())
}

/// Wait for a component task, giving up after `limit`
pub async fn join_with_timeout<T, F>(name: &str, handle: F, limit: Duration) -> Option<T>
where
    F: Future<Output = Result<T, tokio::task::JoinError>>,
{
    match timeout(limit, handle).await {
        Ok(Ok(output)) => {
            info!("{} stopped gracefully", name);
            Some(output)
        }
        Ok(Err(e)) => {
            error!("{} task failed: {}", name, e);
            None
        }
        Err(_) => {
            warn!("{} did not stop within timeout, forcing shutdown", name);
            None
        }
    }
}

/// Graceful shutdown handler for tasks that only need to be awaited
pub async fn graceful_shutdown(
    shutdown: &CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    limit: Duration,
) {
    info!("Starting graceful shutdown...");
    shutdown.cancel();

    for (name, mut handle) in tasks {
        if join_with_timeout(&name, &mut handle, limit).await.is_none() {
            handle.abort();
        }
    }

    info!("Graceful shutdown complete");
}
