use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use url::Url;

use crate::diff::{diff, overall_significance};
use crate::fetch::{Fetch, FetchError};
use crate::locator::PageLocator;
use crate::model::{Category, Change, FieldValue, MonitoredTarget, Significance, Snapshot};
use crate::parser::{Extractor, FieldMap, Page};
use crate::store::SnapshotStore;

/// SHA-256 hex of the serialized facts. Sets serialize sorted, lists keep
/// page order.
pub fn content_hash<T: Serialize>(facts: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(facts)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// One async lease per (target, category); holds read-previous/diff/write
/// together.
#[derive(Debug, Default)]
pub struct PairLocks {
    leases: Mutex<HashMap<(i64, Category), Arc<tokio::sync::Mutex<()>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lease(&self, target_id: i64, category: Category) -> OwnedMutexGuard<()> {
        let lock = {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(leases.entry((target_id, category)).or_default())
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not encode facts: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(anyhow::Error),
}

#[derive(Debug)]
pub enum CheckOutcome {
    /// Persisted; `changes` is empty for a baseline or an unchanged page.
    Snapshot(Snapshot),
    /// No resolvable URL, or no page for the category on this site.
    NoPage,
    /// The page exists but holds nothing recognizable. Nothing is stored.
    Empty { url: Url },
    /// Retryable; nothing is stored.
    Failed(MonitorError),
}

/// Runs one category's locate/fetch/extract/diff/persist cycle.
pub struct Monitor<E: Extractor> {
    extractor: E,
    fetcher: Arc<dyn Fetch>,
    locator: PageLocator,
    store: Arc<dyn SnapshotStore>,
    locks: Arc<PairLocks>,
}

impl<E: Extractor> Monitor<E> {
    pub fn new(
        extractor: E,
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn SnapshotStore>,
        locks: Arc<PairLocks>,
    ) -> Self {
        Self {
            extractor,
            locator: PageLocator::new(Arc::clone(&fetcher)),
            fetcher,
            store,
            locks,
        }
    }

    /// The stored snapshot, or `None` when nothing was persisted.
    pub async fn create_snapshot(&self, target: &MonitoredTarget) -> Option<Snapshot> {
        match self.check(target).await {
            CheckOutcome::Snapshot(s) => Some(s),
            CheckOutcome::Failed(e) => {
                warn!("{} {} failed: {}", target.domain, E::CATEGORY, e);
                None
            }
            CheckOutcome::NoPage | CheckOutcome::Empty { .. } => None,
        }
    }

    pub async fn check(&self, target: &MonitoredTarget) -> CheckOutcome {
        let Some(base) = target.base_url() else {
            warn!("{} has no usable URL", target.domain);
            return CheckOutcome::NoPage;
        };

        let located = self
            .locator
            .try_locate(&base, self.extractor.candidate_paths(), self.extractor.keywords())
            .await;
        let url = match located {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("{}: no {} page", target.domain, E::CATEGORY);
                return CheckOutcome::NoPage;
            }
            Err(e) => return CheckOutcome::Failed(e.into()),
        };

        let html = match self.fetcher.get(&url).await {
            Ok(html) => html,
            Err(e) => return CheckOutcome::Failed(e.into()),
        };
        let homepage = if self.extractor.wants_homepage() && url != base {
            // vocabulary on the homepage is a bonus; a failure here is not fatal
            self.fetcher.get(&base).await.ok()
        } else {
            None
        };

        let facts = self.extractor.extract(&Page {
            html: &html,
            url: &url,
            homepage: homepage.as_deref(),
        });
        if self.extractor.is_empty(&facts) {
            debug!("{}: nothing recognizable on {}", target.domain, url);
            return CheckOutcome::Empty { url };
        }

        match self.record(target, &url, &facts).await {
            Ok(snapshot) => CheckOutcome::Snapshot(snapshot),
            Err(e) => CheckOutcome::Failed(e),
        }
    }

    async fn record(
        &self,
        target: &MonitoredTarget,
        url: &Url,
        facts: &E::Facts,
    ) -> Result<Snapshot, MonitorError> {
        let hash = content_hash(facts)?;
        let facts_json = serde_json::to_value(facts)?;
        let metrics = self.extractor.metrics(facts);

        let _lease = self.locks.lease(target.id, E::CATEGORY).await;
        let previous = self
            .store
            .find_latest(target.id, E::CATEGORY)
            .map_err(MonitorError::Store)?;

        let changes = match &previous {
            None => Vec::new(),
            Some(prev) if prev.content_hash == hash => Vec::new(),
            Some(prev) => {
                let mut changes = diff(&self.previous_fields(prev), &self.extractor.fields(facts));
                if changes.is_empty() {
                    changes.push(Change {
                        field: "content_hash".into(),
                        before: FieldValue::Text(prev.content_hash.clone()),
                        after: FieldValue::Text(hash.clone()),
                        significance: Some(Significance::Low),
                    });
                }
                changes
            }
        };

        let snapshot = Snapshot {
            id: None,
            target_id: target.id,
            category: E::CATEGORY,
            content_hash: hash,
            facts: facts_json,
            metrics,
            significance: overall_significance(&changes),
            changes,
            source_url: url.to_string(),
            previous_id: previous.and_then(|p| p.id),
            created_at: Utc::now(),
        };
        self.store.save(snapshot).map_err(MonitorError::Store)
    }

    fn previous_fields(&self, prev: &Snapshot) -> FieldMap {
        match serde_json::from_value::<E::Facts>(prev.facts.clone()) {
            Ok(facts) => self.extractor.fields(&facts),
            Err(e) => {
                warn!(
                    snapshot = ?prev.id,
                    "stored {} facts no longer decode, diffing against nothing: {}",
                    E::CATEGORY,
                    e
                );
                FieldMap::new()
            }
        }
    }
}
