use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::app::notifications::NotificationService;

/// Periodically deletes read notifications older than `retention`. Unread
/// notifications are kept no matter how old they are.
pub async fn run(
    notifications: NotificationService,
    retention: time::Duration,
    interval: Duration,
) -> Result<()> {
    info!(retention_days = retention.whole_days(), "notification cleanup started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match notifications.purge_read(retention).await {
            Ok(deleted) => info!(
                deleted,
                retention_days = retention.whole_days(),
                "purged read notifications"
            ),
            Err(err) => warn!(error = ?err, "notification cleanup failed"),
        }
    }
}
