//! Periodic reads, one timer per parameter group.
//!
//! Each group's timer is single-shot and is only re-armed once the fetch it triggered has
//! finished, so a slow unit is never asked for the same group twice at once.

use crate::registers::{Cadence, Group, GroupSchedule};
use crate::settings::Settings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::trace;

pub struct Scheduler {
    token: CancellationToken,
    restart: Arc<Notify>,
    _tasks: Vec<AbortOnDropHandle<()>>,
}

fn period(cadence: Cadence, settings: &Settings) -> Duration {
    match cadence {
        Cadence::PollingInterval => *settings.polling_interval,
        Cadence::ReportInterval => *settings.report_interval,
        Cadence::Every(d) => d,
    }
}

async fn notified(notify: Option<&Notify>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

impl Scheduler {
    pub fn start<F, Fut>(schedule: &[GroupSchedule], settings: &Settings, fetch: F) -> Self
    where
        F: Fn(Group) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let restart = Arc::new(Notify::new());
        let tasks = schedule
            .iter()
            .map(|&entry| {
                let period = period(entry.cadence, settings);
                let token = token.clone();
                let restart = (entry.group == Group::Operation).then(|| Arc::clone(&restart));
                let fetch = fetch.clone();
                AbortOnDropHandle::new(tokio::spawn(async move {
                    let mut next = Instant::now() + entry.offset;
                    loop {
                        tokio::select! {
                            () = token.cancelled() => return,
                            () = tokio::time::sleep_until(next) => {}
                            () = notified(restart.as_deref()) => {
                                trace!(message = "re-arming after a write", group = %entry.group);
                                next = Instant::now() + period;
                                continue;
                            }
                        }
                        trace!(message = "fetching", group = %entry.group);
                        fetch(entry.group).await;
                        next = Instant::now() + period;
                    }
                }))
            })
            .collect();
        Self { token, restart, _tasks: tasks }
    }

    /// Push the next read of the operational group out by a full polling interval.
    pub fn restart_fast(&self) {
        self.restart.notify_one();
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
