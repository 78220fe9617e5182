use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content tracked on a competitor site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Portfolio,
    Pricing,
    Services,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Portfolio, Category::Pricing, Category::Services];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Portfolio => "portfolio",
            Category::Pricing => "pricing",
            Category::Services => "services",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portfolio" => Ok(Category::Portfolio),
            "pricing" => Ok(Category::Pricing),
            "services" => Ok(Category::Services),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl Frequency {
    /// Minimum gap between two successful crawls.
    pub fn interval(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::days(7),
            Frequency::Biweekly => Duration::days(14),
            Frequency::Monthly => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

/// Ordinal severity of a detected change. HIGH and above is what alerting
/// policies usually act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Significance {
    Low,
    Medium,
    High,
    Critical,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Low => "LOW",
            Significance::Medium => "MEDIUM",
            Significance::High => "HIGH",
            Significance::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Significance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Significance::Low),
            "MEDIUM" => Ok(Significance::Medium),
            "HIGH" => Ok(Significance::High),
            "CRITICAL" => Ok(Significance::Critical),
            other => Err(format!("unknown significance '{}'", other)),
        }
    }
}

/// A competitor domain under monitoring. `last_crawled_at` is the last
/// successful crawl for the category the target was loaded for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: i64,
    pub domain: String,
    pub canonical_url: Option<String>,
    pub frequency: Frequency,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl MonitoredTarget {
    /// Canonical URL if set, otherwise the domain's https root.
    pub fn base_url(&self) -> Option<url::Url> {
        let raw = match self.canonical_url.as_deref().map(str::trim) {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => {
                let domain = self.domain.trim();
                if domain.is_empty() {
                    return None;
                }
                format!("https://{}/", domain)
            }
        };
        url::Url::parse(&raw)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
    }
}

/// Before/after value of a diffed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
    Set(BTreeSet<String>),
}

impl FieldValue {
    pub fn number(value: Option<f64>) -> Self {
        value.map(FieldValue::Number).unwrap_or(FieldValue::Null)
    }

    pub fn text(value: Option<&str>) -> Self {
        value
            .map(|s| FieldValue::Text(s.to_string()))
            .unwrap_or(FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("-"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(t) => f.write_str(t),
            FieldValue::List(items) => write!(f, "[{}]", items.join(", ")),
            FieldValue::Set(items) => {
                let items: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub before: FieldValue,
    pub after: FieldValue,
    /// `None` when the rule for the field could not compute a level.
    pub significance: Option<Significance>,
}

/// Scalar metric value, used for reporting only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

pub type Metrics = BTreeMap<String, Scalar>;

/// One stored (facts, hash, changes, significance) record for a
/// (target, category) pair. Snapshots are never mutated after `save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Option<i64>,
    pub target_id: i64,
    pub category: Category,
    pub content_hash: String,
    pub facts: serde_json::Value,
    pub metrics: Metrics,
    pub changes: Vec<Change>,
    pub significance: Option<Significance>,
    pub source_url: String,
    pub previous_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrawlOutcome {
    /// First snapshot for the pair.
    Baseline { snapshot_id: i64 },
    Unchanged { snapshot_id: i64 },
    Changed {
        snapshot_id: i64,
        significance: Significance,
        changes: usize,
    },
    /// No page located or nothing recognizable on it.
    NoData { reason: String },
    /// Retryable failure; the crawl timestamp is not advanced.
    Failed { error: String },
}

impl CrawlOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, CrawlOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            CrawlOutcome::Baseline { .. } => "baseline",
            CrawlOutcome::Unchanged { .. } => "unchanged",
            CrawlOutcome::Changed { .. } => "changed",
            CrawlOutcome::NoData { .. } => "no_data",
            CrawlOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlAttempt {
    pub category: Category,
    pub at: DateTime<Utc>,
    pub outcome: CrawlOutcome,
}

/// What a completed run hands to the alert sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub target_id: i64,
    pub domain: String,
    pub category: Category,
    pub significance: Significance,
    pub snapshot_id: i64,
    pub changes: Vec<Change>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(domain: &str, url: Option<&str>) -> MonitoredTarget {
        MonitoredTarget {
            id: 1,
            domain: domain.to_string(),
            canonical_url: url.map(str::to_string),
            frequency: Frequency::Weekly,
            last_crawled_at: None,
            active: true,
        }
    }

    #[test]
    fn significance_order() {
        assert!(Significance::Low < Significance::Medium);
        assert!(Significance::High < Significance::Critical);
        assert_eq!("high".parse::<Significance>(), Ok(Significance::High));
    }

    #[test]
    fn base_url_prefers_canonical() {
        let t = target("acme.cz", Some("https://www.acme.cz/en/"));
        assert_eq!(t.base_url().unwrap().as_str(), "https://www.acme.cz/en/");
    }

    #[test]
    fn base_url_from_domain() {
        let t = target("acme.cz", None);
        assert_eq!(t.base_url().unwrap().as_str(), "https://acme.cz/");
    }

    #[test]
    fn unresolvable_base_url() {
        assert!(target("", None).base_url().is_none());
        assert!(target("", Some("ftp://acme.cz")).base_url().is_none());
    }

    #[test]
    fn field_value_json_shape() {
        let v = serde_json::to_value(FieldValue::Number(1200.0)).unwrap();
        assert_eq!(v, serde_json::json!({ "type": "number", "value": 1200.0 }));
        let v = serde_json::to_value(FieldValue::Null).unwrap();
        assert_eq!(v, serde_json::json!({ "type": "null" }));
    }
}
