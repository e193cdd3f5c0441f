//! Per-session delivery poller.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::session::SubscriptionSession;

/// Cancels the poller task when cancelled or dropped.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        if !self.cancel.send_replace(true) {
            tracing::debug!("Cancelling subscription poller");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Poll `session` every `period`, first tick one period after spawning.
/// The delay is measured from the end of the previous tick.
pub fn spawn_poller(
    runtime: &Handle,
    session: Arc<SubscriptionSession>,
    period: Duration,
) -> PollerHandle {
    let (cancel, mut cancelled) = watch::channel(false);

    let task = runtime.spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = cancelled.changed() => {
                    if changed.is_err() || *cancelled.borrow() {
                        break;
                    }
                }
                _ = ticks.tick() => {
                    if let Err(e) = session.poll_once().await {
                        tracing::error!(error = %e, "Subscription poll failed");
                    }
                }
            }
        }
        tracing::debug!("Subscription poller stopped");
    });

    PollerHandle { cancel, task }
}
