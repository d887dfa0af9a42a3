use std::future::Future;
use std::io;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::future::{self, Shared};
use futures::FutureExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for `signal`, or forever when the listener could not be installed
async fn wait_or_pending<F>(name: &'static str, signal: io::Result<F>)
where
    F: Future,
{
    match signal {
        Ok(signal) => {
            signal.await;
        }
        Err(e) => {
            error!(signal = name, error = %e, "Failed to listen to shutdown signal");
            future::pending::<()>().await;
        }
    }
}

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            select! {
                _ = wait_or_pending("ctrl_c", ctrl_c().map(|mut s| async move { s.recv().await })) => (),
                _ = wait_or_pending("ctrl_close", ctrl_close().map(|mut s| async move { s.recv().await })) => (),
                _ = wait_or_pending("ctrl_shutdown", ctrl_shutdown().map(|mut s| async move { s.recv().await })) => (),
                _ = wait_or_pending("ctrl_logoff", ctrl_logoff().map(|mut s| async move { s.recv().await })) => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(name: &'static str, signal_kind: SignalKind) {
            let listener = signal(signal_kind).map(|mut s| async move { s.recv().await });
            wait_or_pending(name, listener).await
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal("SIGINT", SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal("SIGTERM", SignalKind::terminate()) => (),
                _ = unix_shutdown_signal("SIGHUP", SignalKind::hangup()) => (),
                _ = unix_shutdown_signal("SIGQUIT", SignalKind::quit()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves on the first shutdown signal received by the process
pub fn shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Attempting graceful shutdown...");
    }
    .boxed()
    .shared()
}

/// Returns a token cancelled when `signal` resolves.
///
/// Must be called from within a tokio runtime.
pub fn cancel_on<F>(signal: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        select! {
            _ = signal => cancel.cancel(),
            _ = cancel.cancelled() => (),
        }
    });
    token
}

/// Returns a token cancelled on the first shutdown signal
pub fn shutdown_token() -> CancellationToken {
    cancel_on(shutdown_signal())
}
