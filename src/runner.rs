use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Settings;
use crate::fetch::Fetch;
use crate::model::{
    Alert, Category, CrawlAttempt, CrawlOutcome, MonitoredTarget, Significance, Snapshot,
};
use crate::monitor::{CheckOutcome, Monitor, PairLocks};
use crate::parser::{Extractor, PortfolioExtractor, PricingExtractor, ServicesExtractor};
use crate::scheduler::select_due;
use crate::store::{AlertSink, SnapshotStore, TargetSource};

pub use crate::scheduler::RunFilter;

/// Batch stats returned after completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub baseline: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub no_data: usize,
    pub failed: usize,
    pub alerts: usize,
}

impl RunStats {
    fn count(&mut self, outcome: &CrawlOutcome) {
        self.total += 1;
        match outcome {
            CrawlOutcome::Baseline { .. } => self.baseline += 1,
            CrawlOutcome::Unchanged { .. } => self.unchanged += 1,
            CrawlOutcome::Changed { .. } => self.changed += 1,
            CrawlOutcome::NoData { .. } => self.no_data += 1,
            CrawlOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

struct TargetResult {
    target: MonitoredTarget,
    outcome: CrawlOutcome,
    snapshot: Option<Snapshot>,
}

/// Executes due batches. Owns the pair leases so overlapping batches in one
/// process stay serialized per (target, category).
pub struct Runner {
    fetcher: Arc<dyn Fetch>,
    snapshots: Arc<dyn SnapshotStore>,
    targets: Arc<dyn TargetSource>,
    sink: Arc<dyn AlertSink>,
    locks: Arc<PairLocks>,
    concurrency: usize,
    target_timeout: Duration,
    progress: bool,
}

impl Runner {
    pub fn new(
        settings: &Settings,
        fetcher: Arc<dyn Fetch>,
        snapshots: Arc<dyn SnapshotStore>,
        targets: Arc<dyn TargetSource>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            fetcher,
            snapshots,
            targets,
            sink,
            locks: Arc::new(PairLocks::new()),
            concurrency: settings.concurrency.max(1),
            target_timeout: settings.target_timeout(),
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run_due(&self, category: Category, filter: &RunFilter) -> Result<RunStats> {
        match category {
            Category::Portfolio => self.run_with(PortfolioExtractor, filter).await,
            Category::Pricing => self.run_with(PricingExtractor, filter).await,
            Category::Services => self.run_with(ServicesExtractor, filter).await,
        }
    }

    async fn run_with<E: Extractor>(&self, extractor: E, filter: &RunFilter) -> Result<RunStats> {
        let due = select_due(self.targets.targets(E::CATEGORY)?, Utc::now(), filter);
        if due.is_empty() {
            info!("No {} targets due", E::CATEGORY);
            return Ok(RunStats::default());
        }
        info!("Checking {} {} targets", due.len(), E::CATEGORY);

        let monitor = Arc::new(Monitor::new(
            extractor,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.locks),
        ));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pb = self.progress_bar(due.len())?;

        // Channel: workers send results, main loop records them
        let (tx, mut rx) = tokio::sync::mpsc::channel::<TargetResult>(self.concurrency * 2);

        for target in due {
            let monitor = Arc::clone(&monitor);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let deadline = self.target_timeout;

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let (outcome, snapshot) =
                    match tokio::time::timeout(deadline, monitor.check(&target)).await {
                        Ok(check) => outcome_of(check),
                        Err(_) => (
                            CrawlOutcome::Failed {
                                error: format!("timed out after {}s", deadline.as_secs()),
                            },
                            None,
                        ),
                    };
                let _ = tx
                    .send(TargetResult {
                        target,
                        outcome,
                        snapshot,
                    })
                    .await;
            });
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        let mut stats = RunStats::default();
        while let Some(result) = rx.recv().await {
            stats.count(&result.outcome);
            if let CrawlOutcome::Failed { error } = &result.outcome {
                warn!("{} {} failed: {}", result.target.domain, E::CATEGORY, error);
            }

            let attempt = CrawlAttempt {
                category: E::CATEGORY,
                at: Utc::now(),
                outcome: result.outcome,
            };
            if let Err(e) = self.targets.record_crawl_attempt(result.target.id, &attempt) {
                warn!("Could not record attempt for {}: {:#}", result.target.domain, e);
            }

            let alert = result
                .snapshot
                .and_then(|s| alert_for(&result.target, s, filter.min_significance));
            if let Some(alert) = alert {
                match self.sink.emit(&alert) {
                    Ok(()) => stats.alerts += 1,
                    Err(e) => warn!("Alert for {} not delivered: {:#}", alert.domain, e),
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!(
            "{}: {} checked ({} baseline, {} unchanged, {} changed, {} no data, {} failed), \
             {} alerts",
            E::CATEGORY,
            stats.total,
            stats.baseline,
            stats.unchanged,
            stats.changed,
            stats.no_data,
            stats.failed,
            stats.alerts
        );
        Ok(stats)
    }

    fn progress_bar(&self, len: usize) -> Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );
        Ok(pb)
    }
}

fn outcome_of(check: CheckOutcome) -> (CrawlOutcome, Option<Snapshot>) {
    match check {
        CheckOutcome::Snapshot(s) => {
            let snapshot_id = s.id.unwrap_or_default();
            let outcome = if s.previous_id.is_none() {
                CrawlOutcome::Baseline { snapshot_id }
            } else if s.changes.is_empty() {
                CrawlOutcome::Unchanged { snapshot_id }
            } else {
                CrawlOutcome::Changed {
                    snapshot_id,
                    significance: s.significance.unwrap_or(Significance::Medium),
                    changes: s.changes.len(),
                }
            };
            (outcome, Some(s))
        }
        CheckOutcome::NoPage => (
            CrawlOutcome::NoData {
                reason: "no page for this category".into(),
            },
            None,
        ),
        CheckOutcome::Empty { url } => (
            CrawlOutcome::NoData {
                reason: format!("nothing recognizable on {}", url),
            },
            None,
        ),
        CheckOutcome::Failed(e) => (CrawlOutcome::Failed { error: e.to_string() }, None),
    }
}

/// Alert for a snapshot that carries changes at or above `min`.
fn alert_for(
    target: &MonitoredTarget,
    snapshot: Snapshot,
    min: Option<Significance>,
) -> Option<Alert> {
    let significance = snapshot.significance?;
    if snapshot.changes.is_empty() || min.is_some_and(|m| significance < m) {
        return None;
    }
    Some(Alert {
        target_id: target.id,
        domain: target.domain.clone(),
        category: snapshot.category,
        significance,
        snapshot_id: snapshot.id?,
        changes: snapshot.changes,
    })
}
