use std::future::Future;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::core::{Error, Result, RetryPolicy};
use super::{is_shutdown, sleep_or_shutdown, Backoff};

/// A long-running loop that owns one UDP socket
pub trait Worker: Send {
    /// Name used in log lines
    fn name(&self) -> &'static str;

    /// Produces the socket for the next run, binding a fresh one if needed
    fn bind(&mut self) -> Result<UdpSocket>;

    /// Runs until shutdown (`Ok`) or a fatal transport failure (`Err`)
    ///
    /// Non-fatal errors are handled inside the loop. The socket is dropped
    /// when this returns.
    fn serve(
        &mut self,
        socket: UdpSocket,
        shutdown: &mut watch::Receiver<bool>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Drives a worker until shutdown or until its restarts are exhausted
///
/// With a disabled policy the first fatal error ends the worker. The worker
/// is handed back so callers can inspect its final state.
pub async fn supervise<W: Worker>(
    mut worker: W,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> W {
    let mut backoff = Backoff::new(&policy);

    while !is_shutdown(&shutdown) {
        let result = match worker.bind() {
            Ok(socket) => worker.serve(socket, &mut shutdown).await,
            Err(err) => Err(err),
        };

        let err = match result {
            Ok(()) => {
                tracing::info!("{} stopped", worker.name());
                break;
            }
            Err(err) => err,
        };

        tracing::error!("{} failed: {}", worker.name(), err);
        match backoff.next_delay() {
            Some(wait) => {
                tracing::warn!(
                    "{} restarting in {:?} (attempt {}/{})",
                    worker.name(),
                    wait,
                    backoff.attempts(),
                    policy.max_retries
                );
                if sleep_or_shutdown(wait, &mut shutdown).await {
                    break;
                }
            }
            None => {
                tracing::error!("{} terminated", worker.name());
                break;
            }
        }
    }

    worker
}

/// Logs a datagram that was dropped without ending the loop
pub fn log_discarded(worker: &str, err: &Error) {
    match err {
        Error::IdMismatch { .. } => tracing::debug!("{}: dropped datagram: {}", worker, err),
        _ => tracing::warn!("{}: dropped datagram: {}", worker, err),
    }
}
