//! Background mail check.
//!
//! Every [`POLL_INTERVAL`](crate::config::POLL_INTERVAL) the poller looks at
//! the session: when it is connected to the active account it asks for a
//! fetch, otherwise it asks for a connect to the active account, if there is
//! one. Requests that find work already in flight are simply dropped until
//! the next tick.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::orchestrator::{Dispatch, Orchestrator};
use crate::config::POLL_INTERVAL;
use crate::domain::Account;
use crate::providers::email::MailConnector;

/// Periodic trigger for connect and fetch.
pub struct Poller<C: MailConnector> {
    orchestrator: Orchestrator<C>,
    active: watch::Receiver<Option<Account>>,
    interval: Duration,
}

impl<C: MailConnector> Poller<C> {
    /// Creates a poller driven by the active-account channel.
    pub fn new(orchestrator: Orchestrator<C>, active: watch::Receiver<Option<Account>>) -> Self {
        Self {
            orchestrator,
            active,
            interval: POLL_INTERVAL,
        }
    }

    /// Runs one check.
    pub fn tick(&self) -> Option<Dispatch> {
        let active = self.active.borrow().clone();
        self.orchestrator.request_check(active.as_ref())
    }

    /// Spawns the polling loop on the orchestrator's task tracker. The loop
    /// ends when the orchestrator shuts down.
    pub fn start(self) {
        let tracker = self.orchestrator.tracker().clone();
        let cancel = self.orchestrator.cancellation();

        tracker.spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticks = tokio::time::interval_at(start, self.interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval = ?self.interval, "background polling started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        if let Some(dispatch) = self.tick() {
                            tracing::debug!(?dispatch, "poll");
                        }
                    }
                }
            }
            tracing::info!("background polling stopped");
        });
    }
}
