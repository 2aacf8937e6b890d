//! Periodic peer discovery
//!
//! While running, the loop asks the relay for current membership once per
//! interval and connects to anyone without a registry entry. At most one loop
//! runs per session; `start` while one is live is a no-op.

use crate::peer::ConnectionController;
use parking_lot::Mutex;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct DiscoveryTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DiscoveryTask {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

pub struct DiscoveryLoop {
    interval: Duration,
    task: Mutex<Option<DiscoveryTask>>,
}

impl DiscoveryLoop {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop unless one is already live. The first poll happens one
    /// interval after start. Returns whether a new loop was spawned.
    pub fn start(&self, controller: Weak<ConnectionController>, cancel: CancellationToken) -> bool {
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(DiscoveryTask::is_live) {
            return false;
        }

        let handle = tokio::spawn(run(controller, self.interval, cancel.clone()));
        *slot = Some(DiscoveryTask { cancel, handle });
        true
    }

    /// Stop the loop. A round that already started connecting finishes its
    /// connects, but no further poll is issued. Returns whether a live loop
    /// was stopped.
    pub fn stop(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        let was_live = task.is_live();
        task.cancel.cancel();
        was_live
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(DiscoveryTask::is_live)
    }
}

async fn run(controller: Weak<ConnectionController>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    // Rounds never overlap; a slow round pushes the next one back
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(controller) = controller.upgrade() else {
            break;
        };

        let polled = tokio::select! {
            () = cancel.cancelled() => break,
            r = controller.poll_peers() => r,
        };
        match polled {
            Ok(peers) => {
                let initiated = controller.connect_discovered(peers).await;
                if initiated > 0 {
                    debug!(initiated, "Discovery round connected new peers");
                }
            }
            Err(e) => warn!(error = %e, "Discovery poll failed"),
        }
    }

    debug!("Discovery loop exited");
}
