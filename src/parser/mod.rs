pub mod extract;
pub mod html;

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::model::{Category, FieldValue, Metrics};

pub use extract::portfolio::PortfolioExtractor;
pub use extract::pricing::PricingExtractor;
pub use extract::services::ServicesExtractor;

/// One fetched category page plus, when the extractor asks for it, the
/// site's homepage.
pub struct Page<'a> {
    pub html: &'a str,
    pub url: &'a Url,
    pub homepage: Option<&'a str>,
}

/// Per-category extraction strategy: where to look, what to pull out, and
/// how the result projects into diffable fields.
pub trait Extractor: Send + Sync + 'static {
    type Facts: Serialize + DeserializeOwned + Send + Sync;

    const CATEGORY: Category;

    /// Paths probed in priority order.
    fn candidate_paths(&self) -> &'static [&'static str];

    /// Link texts that identify the category page from the homepage.
    fn keywords(&self) -> &'static [&'static str];

    fn wants_homepage(&self) -> bool {
        false
    }

    /// Never fails; bad markup gives partial or empty facts.
    fn extract(&self, page: &Page<'_>) -> Self::Facts;

    fn is_empty(&self, facts: &Self::Facts) -> bool;

    /// Cheap aggregates for reporting. Not part of the hash.
    fn metrics(&self, facts: &Self::Facts) -> Metrics;

    /// Field projection the change classifier works on.
    fn fields(&self, facts: &Self::Facts) -> FieldMap;
}

/// How a field's change is classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Generic numeric thresholds (50/25/10).
    Numeric,
    /// Price thresholds (20/10).
    Price,
    /// Count of the given members; classified by the list rule over members.
    Membership(BTreeSet<String>),
    /// List/set rule on the value itself.
    Collection,
    /// Split into `<field>_added` / `<field>_removed`, count-only rule.
    NamedCollection,
    /// Normalized edit distance.
    Text,
    /// Any change is MEDIUM.
    Categorical,
    /// Any change is HIGH.
    HighImpact,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub value: FieldValue,
    pub rule: Rule,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(BTreeMap<String, Field>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue, rule: Rule) {
        self.0.insert(name.into(), Field { value, rule });
    }

    pub fn number(&mut self, name: impl Into<String>, value: Option<f64>, rule: Rule) {
        self.insert(name, FieldValue::number(value), rule);
    }

    pub fn set(&mut self, name: impl Into<String>, items: &BTreeSet<String>, rule: Rule) {
        self.insert(name, FieldValue::Set(items.clone()), rule);
    }

    pub fn list(&mut self, name: impl Into<String>, items: Vec<String>, rule: Rule) {
        self.insert(name, FieldValue::List(items), rule);
    }

    /// Count field whose significance comes from its member names.
    pub fn count_of(&mut self, name: impl Into<String>, members: &[String]) {
        let set: BTreeSet<String> = members.iter().cloned().collect();
        self.insert(name, FieldValue::Number(members.len() as f64), Rule::Membership(set));
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.0.get(name)
    }

    /// Names present in either map, sorted.
    pub fn union_names<'a>(&'a self, other: &'a FieldMap) -> BTreeSet<&'a str> {
        self.0
            .keys()
            .chain(other.0.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Make names unique by suffixing repeats: "Basic", "Basic (2)", ...
pub(crate) fn unique_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    names
        .map(|n| {
            let count = seen.entry(n.to_string()).or_insert(0);
            *count += 1;
            if *count == 1 {
                n.to_string()
            } else {
                format!("{} ({})", n, count)
            }
        })
        .collect()
}
