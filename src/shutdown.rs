//! Provides a shutdown signal to cancel a running batch gracefully.
//!
//! See: [`signal`], [`cancel_on_signal`]

#![cfg(feature = "shutdown")]

use crate::static_lazy_lock;

use tokio::{signal, sync::broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

static_lazy_lock! {
    /// The broadcast sender to shut down the process.
    pub SHUTDOWN: broadcast::Sender<ShutdownAction> = {
        let (tx, _) = broadcast::channel::<ShutdownAction>(1);
        tx
    };
}

/// The action to perform when shutting down a process.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Lets in-flight steps finish, then stops every entry at its next step.
    Stop,
}

/// Asks every [`signal`] listener to shut down.
pub fn request_shutdown(action: ShutdownAction) {
    if SHUTDOWN.send(action).is_err() {
        warn!("shutdown requested, but nothing is listening");
    }
}

/// Waits until the process is asked to shut down, either by Ctrl + C or by [`request_shutdown`].
pub async fn signal() -> ShutdownAction {
    let mut shutdown = SHUTDOWN.subscribe();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl + C signal handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => ShutdownAction::Stop,
        result = shutdown.recv() => result.unwrap_or(ShutdownAction::Stop),
    }
}

/// Cancels `token` once a shutdown is signalled. The watcher ends on its own when `token` is
/// cancelled elsewhere.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            action = signal() => {
                info!("shutting down ({action:?}), finishing in-flight steps…");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
