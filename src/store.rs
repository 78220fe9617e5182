//! Seams between the core and its persistence, target list and alerting.

use anyhow::Result;

use crate::model::{Alert, Category, CrawlAttempt, MonitoredTarget, Snapshot};

/// Append-only snapshot history with one "latest" pointer per
/// (target, category).
pub trait SnapshotStore: Send + Sync {
    fn find_latest(&self, target_id: i64, category: Category) -> Result<Option<Snapshot>>;

    /// Insert and move the latest pointer in one transaction. Returns the
    /// stored snapshot with its id set.
    fn save(&self, snapshot: Snapshot) -> Result<Snapshot>;

    /// Keep the newest `keep` snapshots of one pair; the latest one always
    /// survives. Returns the number of rows deleted.
    fn delete_older_than(&self, target_id: i64, category: Category, keep: usize) -> Result<usize>;

    /// Newest first.
    fn history(&self, target_id: i64, category: Category, limit: usize) -> Result<Vec<Snapshot>>;
}

pub trait TargetSource: Send + Sync {
    /// All targets, with `last_crawled_at` as of `category`.
    fn targets(&self, category: Category) -> Result<Vec<MonitoredTarget>>;

    /// Log the attempt. Successful outcomes advance the crawl timestamp for
    /// the attempt's category.
    fn record_crawl_attempt(&self, target_id: i64, attempt: &CrawlAttempt) -> Result<()>;
}

pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert) -> Result<()>;
}
