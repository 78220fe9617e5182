use chrono::{DateTime, Utc};

use crate::model::{MonitoredTarget, Significance};

/// Which targets a batch covers and which results it alerts on.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Restrict the batch to one target.
    pub target_id: Option<i64>,
    /// Alert threshold; `None` alerts on every change.
    pub min_significance: Option<Significance>,
    /// Ignore due-ness (inactive targets are still skipped).
    pub force: bool,
}

/// Never crawled, or the frequency interval has elapsed.
pub fn is_due(target: &MonitoredTarget, now: DateTime<Utc>) -> bool {
    match target.last_crawled_at {
        None => true,
        Some(last) => now - last >= target.frequency.interval(),
    }
}

/// Active targets the batch should crawl, in input order.
pub fn select_due(
    targets: Vec<MonitoredTarget>,
    now: DateTime<Utc>,
    filter: &RunFilter,
) -> Vec<MonitoredTarget> {
    targets
        .into_iter()
        .filter(|t| t.active)
        .filter(|t| filter.target_id.map_or(true, |id| id == t.id))
        .filter(|t| filter.force || is_due(t, now))
        .collect()
}
