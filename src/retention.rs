//! Retention Scheduler: daily deletion of captures past the horizon.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use tokio::task::JoinHandle;

use crate::captures::{now_ms, with_store, CaptureManager};
use crate::semantic::SemanticSearch;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Next occurrence of `hour`:00 strictly after `now`, in `now`'s time zone.
///
/// Today's slot is used while it is still ahead. Local times that do not
/// exist (DST gaps) fall back to the same slot one day later.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let today = now.date_naive();

    (0..=2u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|day| now.timezone().from_local_datetime(&day.and_time(time)).earliest())
        .find(|candidate| candidate > now)
}

/// Deletes every capture older than `retention_days`. Returns how many went.
pub async fn purge(store: &Arc<dyn CaptureManager>, retention_days: u32) -> anyhow::Result<usize> {
    let now = now_ms();
    let deleted = with_store(store, move |s| s.delete_older_than(retention_days, now)).await?;
    log::info!("retention purge removed {deleted} captures older than {retention_days} days");
    Ok(deleted)
}

/// Purges and drops the purged captures from the index.
pub async fn purge_and_prune(
    store: &Arc<dyn CaptureManager>,
    search: &SemanticSearch,
    retention_days: u32,
) -> anyhow::Result<usize> {
    let deleted = purge(store, retention_days).await?;
    if deleted > 0 {
        let live: Vec<u64> = with_store(store, |s| Ok(s.all()?.iter().map(|c| c.id).collect())).await?;
        search.prune(&live)?;
    }
    Ok(deleted)
}

/// Runs the purge at the next `cleanup_hour`:00 local time, then every 24 hours.
pub fn spawn_retention(
    store: Arc<dyn CaptureManager>,
    search: Arc<SemanticSearch>,
    retention_days: u32,
    cleanup_hour: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let now = Local::now();
        let first = next_run_after(&now, cleanup_hour)
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(DAY);

        log::info!(
            "retention: keeping {retention_days} days, first purge in {}m",
            first.as_secs() / 60
        );
        tokio::time::sleep(first).await;

        loop {
            if let Err(e) = purge_and_prune(&store, &search, retention_days).await {
                log::error!("retention purge failed: {e:#}");
            }
            tokio::time::sleep(DAY).await;
        }
    })
}
