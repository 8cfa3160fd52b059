use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::SyncError;
use crate::feed::FeedStore;
use crate::models::Preferences;
use crate::notice::{Notice, NoticeSink};

pub struct AutoRefreshHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl AutoRefreshHandle {
    pub async fn stop(self) -> Result<(), SyncError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(SyncError::from)
    }
}

/// Interval between background refreshes for `prefs`, or `None` when disabled.
pub fn refresh_period(prefs: &Preferences, min_interval: Duration) -> Option<Duration> {
    if !prefs.auto_refresh_enabled || prefs.refresh_interval == 0 {
        return None;
    }
    let requested = Duration::from_secs(u64::from(prefs.refresh_interval) * 60);
    Some(requested.max(min_interval))
}

/// Periodically asks the server to refresh every feed.
///
/// The schedule follows `prefs`: each change replaces the running interval, so there is
/// never more than one schedule. The first refresh happens one full period after start.
pub fn spawn_auto_refresh(
    feeds: FeedStore,
    mut prefs: watch::Receiver<Preferences>,
    min_interval: Duration,
    notices: Arc<dyn NoticeSink>,
) -> AutoRefreshHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut schedule = schedule_for(&prefs.borrow_and_update(), min_interval);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("auto-refresh shutdown requested");
                    break;
                }
                changed = prefs.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    schedule = schedule_for(&prefs.borrow_and_update(), min_interval);
                }
                _ = next_tick(&mut schedule) => {
                    match feeds.trigger_refresh_all().await {
                        Ok(_) => notices.notify(Notice::info("Feeds are refreshing in the background")),
                        Err(e) => warn!(error = %e, "scheduled refresh failed"),
                    }
                }
            }
        }
    });

    AutoRefreshHandle { cancel_tx, join }
}

fn schedule_for(prefs: &Preferences, min_interval: Duration) -> Option<Interval> {
    match refresh_period(prefs, min_interval) {
        Some(period) => {
            info!(minutes = period.as_secs() / 60, "auto-refresh scheduled");
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(ticker)
        }
        None => {
            info!("auto-refresh disabled");
            None
        }
    }
}

/// Waits for the next tick, or forever when there is no schedule.
pub(crate) async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_has_a_floor_and_can_be_disabled() {
        let min = Duration::from_secs(5 * 60);
        let mut prefs = Preferences {
            refresh_interval: 1,
            ..Preferences::default()
        };
        assert_eq!(refresh_period(&prefs, min), Some(min));

        prefs.refresh_interval = 30;
        assert_eq!(refresh_period(&prefs, min), Some(Duration::from_secs(1800)));

        prefs.auto_refresh_enabled = false;
        assert_eq!(refresh_period(&prefs, min), None);
    }
}
