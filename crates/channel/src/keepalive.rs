//! Keep-alive scheduler.
//!
//! A background task sends a ping every interval while the session is
//! established, and closes the transport once nothing has been sent or
//! received for the disconnection interval.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// What the scheduler needs from a channel.
pub(crate) trait KeepAliveTarget: Send + Sync + 'static {
    fn is_established(&self) -> bool;

    /// Time since the last envelope sent or received.
    fn idle_time(&self) -> Duration;

    fn send_ping(&self) -> Result<()>;

    /// Closes the transport after the peer went silent.
    fn disconnect(&self);
}

/// Handle to a running keep-alive task. Dropping it stops the task.
#[derive(Debug)]
pub struct KeepAlive {
    shutdown: CancellationToken,
}

impl KeepAlive {
    /// Spawns the keep-alive task on the current tokio runtime.
    ///
    /// Returns `None` when `interval` is zero or no runtime is available.
    pub(crate) fn spawn<T: KeepAliveTarget>(
        target: Weak<T>,
        interval: Duration,
        disconnection: Duration,
    ) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime available, keep-alive disabled");
            return None;
        };

        let shutdown = CancellationToken::new();
        handle.spawn(run(target, interval, disconnection, shutdown.clone()));
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            disconnection_ms = disconnection.as_millis() as u64,
            "keep-alive started"
        );
        Some(Self { shutdown })
    }

    /// Stops the task. Stopping twice is harmless.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run<T: KeepAliveTarget>(
    target: Weak<T>,
    interval: Duration,
    disconnection: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else { break };

                if !disconnection.is_zero() && target.idle_time() >= disconnection {
                    tracing::warn!(
                        idle_ms = target.idle_time().as_millis() as u64,
                        "no activity within the disconnection interval, closing transport"
                    );
                    target.disconnect();
                    break;
                }

                if target.is_established() {
                    if let Err(e) = target.send_ping() {
                        tracing::debug!(error = %e, "keep-alive ping failed");
                    }
                }
            }
        }
    }

    shutdown.cancel();
    tracing::info!("keep-alive stopped");
}
