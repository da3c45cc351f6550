use crate::shutdown::ShutdownSignal;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Fire `shutdown` on Ctrl+C or SIGTERM. The task exits once the signal fires
/// for any reason.
pub fn setup_signal_shutdown_handler(shutdown: &ShutdownSignal) -> tokio::task::JoinHandle<()> {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", err);
                None
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
                () = shutdown.triggered() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, stopping.");
                    shutdown.trigger();
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    tracing::info!("SIGTERM received, stopping.");
                    shutdown.trigger();
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                () = shutdown.triggered() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, stopping.");
                    shutdown.trigger();
                }
            }
        }
    })
}
