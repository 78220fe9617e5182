//! Field-by-field diff of two fact projections with significance rules.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::warn;

use crate::model::{Change, FieldValue, Significance};
use crate::parser::{Field, FieldMap, Rule};

const NUMERIC_CRITICAL_PCT: f64 = 50.0;
const NUMERIC_HIGH_PCT: f64 = 25.0;
const NUMERIC_MEDIUM_PCT: f64 = 10.0;

const PRICE_HIGH_PCT: f64 = 20.0;
const PRICE_MEDIUM_PCT: f64 = 10.0;

const LIST_HIGH_PCT: f64 = 50.0;
const LIST_HIGH_COUNT: usize = 5;
const LIST_MEDIUM_PCT: f64 = 20.0;
const LIST_MEDIUM_COUNT: usize = 3;

const NAMED_HIGH_COUNT: usize = 3;

const TEXT_HIGH_PCT: f64 = 50.0;
const TEXT_MEDIUM_PCT: f64 = 20.0;

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    #[error("field {field}: {value} does not fit the {rule} rule")]
    Shape {
        field: String,
        rule: &'static str,
        value: String,
    },
}

/// Diff two field maps. Fields whose values do not fit their rule are
/// logged and skipped.
pub fn diff(before: &FieldMap, after: &FieldMap) -> Vec<Change> {
    let mut changes = Vec::new();
    for name in before.union_names(after) {
        match classify(name, before.get(name), after.get(name)) {
            Ok(mut found) => changes.append(&mut found),
            Err(e) => warn!(error = %e, "skipping field"),
        }
    }
    changes
}

/// Highest significance among `changes`; MEDIUM when none was computable.
pub fn overall_significance(changes: &[Change]) -> Option<Significance> {
    if changes.is_empty() {
        return None;
    }
    changes
        .iter()
        .filter_map(|c| c.significance)
        .max()
        .or(Some(Significance::Medium))
}

fn classify(
    name: &str,
    before: Option<&Field>,
    after: Option<&Field>,
) -> Result<Vec<Change>, ClassifierError> {
    let Some(rule) = after.or(before).map(|f| &f.rule) else {
        return Ok(Vec::new());
    };
    let old = before.map_or(&FieldValue::Null, |f| &f.value);
    let new = after.map_or(&FieldValue::Null, |f| &f.value);
    if old == new {
        return Ok(Vec::new());
    }

    let single = |significance: Option<Significance>| {
        vec![Change {
            field: name.to_string(),
            before: old.clone(),
            after: new.clone(),
            significance,
        }]
    };

    let changes = match rule {
        Rule::Numeric => single(
            numbers(name, "numeric", old, new)?
                .map(|(a, b)| numeric_significance(a, b)),
        ),
        Rule::Price => single(
            numbers(name, "price", old, new)?.map(|(a, b)| price_significance(a, b)),
        ),
        Rule::Membership(_) => {
            // shape check only; the members decide significance
            numbers(name, "count", old, new)?;
            let sig = list_significance(&membership(before), &membership(after));
            single(Some(sig))
        }
        Rule::Collection => {
            let sig = list_significance(&members(name, old)?, &members(name, new)?);
            single(Some(sig))
        }
        Rule::NamedCollection => named(name, &members(name, old)?, &members(name, new)?),
        Rule::Text => single(Some(text_significance(text(name, old)?, text(name, new)?))),
        Rule::Categorical => single(Some(Significance::Medium)),
        Rule::HighImpact => single(Some(Significance::High)),
    };
    Ok(changes)
}

// ── Rules ──

fn pct_change(before: f64, after: f64) -> f64 {
    if before == 0.0 {
        100.0
    } else {
        (after - before).abs() * 100.0 / before.abs()
    }
}

fn numeric_significance(before: f64, after: f64) -> Significance {
    let pct = pct_change(before, after);
    if pct >= NUMERIC_CRITICAL_PCT {
        Significance::Critical
    } else if pct >= NUMERIC_HIGH_PCT {
        Significance::High
    } else if pct >= NUMERIC_MEDIUM_PCT {
        Significance::Medium
    } else {
        Significance::Low
    }
}

fn price_significance(before: f64, after: f64) -> Significance {
    let pct = pct_change(before, after);
    if pct >= PRICE_HIGH_PCT {
        Significance::High
    } else if pct >= PRICE_MEDIUM_PCT {
        Significance::Medium
    } else {
        Significance::Low
    }
}

fn list_significance(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Significance {
    let count = after.difference(before).count() + before.difference(after).count();
    let size = before.len().max(after.len()).max(1);
    let pct = count as f64 * 100.0 / size as f64;
    if pct >= LIST_HIGH_PCT || count >= LIST_HIGH_COUNT {
        Significance::High
    } else if pct >= LIST_MEDIUM_PCT || count >= LIST_MEDIUM_COUNT {
        Significance::Medium
    } else {
        Significance::Low
    }
}

fn named(name: &str, before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<Change> {
    let significance = |n: usize| {
        Some(if n >= NAMED_HIGH_COUNT {
            Significance::High
        } else {
            Significance::Medium
        })
    };

    let added: BTreeSet<String> = after.difference(before).cloned().collect();
    let removed: BTreeSet<String> = before.difference(after).cloned().collect();
    let mut changes = Vec::new();
    if !added.is_empty() {
        changes.push(Change {
            field: format!("{}_added", name),
            before: FieldValue::Null,
            significance: significance(added.len()),
            after: FieldValue::Set(added),
        });
    }
    if !removed.is_empty() {
        changes.push(Change {
            field: format!("{}_removed", name),
            significance: significance(removed.len()),
            before: FieldValue::Set(removed),
            after: FieldValue::Null,
        });
    }
    changes
}

fn text_significance(before: &str, after: &str) -> Significance {
    let longest = before.chars().count().max(after.chars().count());
    if longest == 0 {
        return Significance::Low;
    }
    let pct = strsim::levenshtein(before, after) as f64 * 100.0 / longest as f64;
    if pct >= TEXT_HIGH_PCT {
        Significance::High
    } else if pct >= TEXT_MEDIUM_PCT {
        Significance::Medium
    } else {
        Significance::Low
    }
}

// ── Value shapes ──

fn shape_error(field: &str, rule: &'static str, value: &FieldValue) -> ClassifierError {
    ClassifierError::Shape {
        field: field.to_string(),
        rule,
        value: value.to_string(),
    }
}

/// Both sides as numbers; `None` when either side is null.
fn numbers(
    field: &str,
    rule: &'static str,
    before: &FieldValue,
    after: &FieldValue,
) -> Result<Option<(f64, f64)>, ClassifierError> {
    let side = |v: &FieldValue| match v {
        FieldValue::Number(n) => Ok(Some(*n)),
        FieldValue::Null => Ok(None),
        other => Err(shape_error(field, rule, other)),
    };
    Ok(side(before)?.zip(side(after)?))
}

fn members(field: &str, value: &FieldValue) -> Result<BTreeSet<String>, ClassifierError> {
    match value {
        FieldValue::Set(s) => Ok(s.clone()),
        FieldValue::List(l) => Ok(l.iter().cloned().collect()),
        FieldValue::Null => Ok(BTreeSet::new()),
        other => Err(shape_error(field, "collection", other)),
    }
}

fn membership(field: Option<&Field>) -> BTreeSet<String> {
    match field.map(|f| &f.rule) {
        Some(Rule::Membership(m)) => m.clone(),
        _ => BTreeSet::new(),
    }
}

fn text<'a>(field: &str, value: &'a FieldValue) -> Result<&'a str, ClassifierError> {
    match value {
        FieldValue::Text(t) => Ok(t.as_str()),
        FieldValue::Null => Ok(""),
        other => Err(shape_error(field, "text", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn one(name: &str, before: FieldValue, after: FieldValue, rule: Rule) -> Vec<Change> {
        let mut a = FieldMap::new();
        a.insert(name, before, rule.clone());
        let mut b = FieldMap::new();
        b.insert(name, after, rule);
        diff(&a, &b)
    }

    fn sig(before: f64, after: f64, rule: Rule) -> Option<Significance> {
        let changes = one("x", FieldValue::Number(before), FieldValue::Number(after), rule);
        assert_eq!(changes.len(), 1);
        changes[0].significance
    }

    #[test]
    fn numeric_thresholds() {
        assert_eq!(sig(100.0, 151.0, Rule::Numeric), Some(Significance::Critical));
        assert_eq!(sig(100.0, 149.0, Rule::Numeric), Some(Significance::High));
        assert_eq!(sig(100.0, 125.0, Rule::Numeric), Some(Significance::High));
        assert_eq!(sig(100.0, 90.0, Rule::Numeric), Some(Significance::Medium));
        assert_eq!(sig(100.0, 105.0, Rule::Numeric), Some(Significance::Low));
        assert_eq!(sig(0.0, 3.0, Rule::Numeric), Some(Significance::Critical));
    }

    #[test]
    fn price_thresholds() {
        assert_eq!(sig(1000.0, 1510.0, Rule::Price), Some(Significance::High));
        assert_eq!(sig(1000.0, 1490.0, Rule::Price), Some(Significance::High));
        assert_eq!(sig(1000.0, 1200.0, Rule::Price), Some(Significance::High));
        assert_eq!(sig(1000.0, 1190.0, Rule::Price), Some(Significance::Medium));
        assert_eq!(sig(1000.0, 950.0, Rule::Price), Some(Significance::Low));
    }

    #[test]
    fn significance_grows_with_delta() {
        for rule in [Rule::Numeric, Rule::Price] {
            let mut last = Significance::Low;
            for after in 101..=300 {
                let s = sig(100.0, after as f64, rule.clone()).unwrap();
                assert!(s >= last, "{:?} dropped at {}", rule, after);
                last = s;
            }
        }
    }

    #[test]
    fn null_side_has_no_significance() {
        let changes = one("p", FieldValue::Null, FieldValue::Number(990.0), Rule::Price);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].significance, None);
        assert_eq!(overall_significance(&changes), Some(Significance::Medium));
    }

    #[test]
    fn equal_maps_have_no_changes() {
        let mut a = FieldMap::new();
        a.count_of("items_count", &["A".into(), "B".into()]);
        a.insert("layout_type", FieldValue::Text("grid".into()), Rule::Categorical);
        assert!(diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn package_added_and_repriced() {
        let mut before = FieldMap::new();
        before.count_of("packages_count", &["Basic".into(), "Pro".into()]);
        before.number("package_price_Basic", Some(1000.0), Rule::Price);
        let mut after = FieldMap::new();
        after.count_of("packages_count", &["Basic".into(), "Pro".into(), "Premium".into()]);
        after.number("package_price_Basic", Some(1200.0), Rule::Price);

        let changes = diff(&before, &after);
        let count = changes.iter().find(|c| c.field == "packages_count").unwrap();
        assert_eq!(count.before, FieldValue::Number(2.0));
        assert_eq!(count.after, FieldValue::Number(3.0));
        assert_eq!(count.significance, Some(Significance::Medium));
        let price = changes.iter().find(|c| c.field == "package_price_Basic").unwrap();
        assert_eq!(price.significance, Some(Significance::High));
        assert_eq!(overall_significance(&changes), Some(Significance::High));
    }

    #[test]
    fn rename_keeps_count_unchanged() {
        let mut before = FieldMap::new();
        before.count_of("packages_count", &["Basic".into(), "Pro".into()]);
        let mut after = FieldMap::new();
        after.count_of("packages_count", &["Starter".into(), "Pro".into()]);
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn list_rule_counts() {
        let big = |n: usize| FieldValue::Set((0..n).map(|i| format!("t{}", i)).collect());
        let mut grown = (0..20).map(|i| format!("t{}", i)).collect::<BTreeSet<_>>();
        grown.insert("new".into());
        let changes = one("categories", big(20), FieldValue::Set(grown), Rule::Collection);
        assert_eq!(changes[0].significance, Some(Significance::Low));

        let changes = one("categories", big(2), big(3), Rule::Collection);
        assert_eq!(changes[0].significance, Some(Significance::Medium));

        let changes = one("categories", big(20), big(25), Rule::Collection);
        assert_eq!(changes[0].significance, Some(Significance::High));
    }

    #[test]
    fn list_order_change_is_low() {
        let a = FieldValue::List(vec!["A".into(), "B".into()]);
        let b = FieldValue::List(vec!["B".into(), "A".into()]);
        let changes = one("item_titles", a, b, Rule::Collection);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].significance, Some(Significance::Low));
    }

    #[test]
    fn named_collection_split() {
        let changes = one(
            "clients",
            FieldValue::Set(set(&["A", "B"])),
            FieldValue::Set(set(&["B", "C", "D", "E"])),
            Rule::NamedCollection,
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "clients_added");
        assert_eq!(changes[0].after, FieldValue::Set(set(&["C", "D", "E"])));
        assert_eq!(changes[0].significance, Some(Significance::High));
        assert_eq!(changes[1].field, "clients_removed");
        assert_eq!(changes[1].before, FieldValue::Set(set(&["A"])));
        assert_eq!(changes[1].significance, Some(Significance::Medium));
    }

    #[test]
    fn named_collection_only_additions() {
        let changes = one(
            "technologies",
            FieldValue::Set(set(&["PHP"])),
            FieldValue::Set(set(&["PHP", "Rust"])),
            Rule::NamedCollection,
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "technologies_added");
    }

    #[test]
    fn text_distance() {
        let t = |s: &str| FieldValue::Text(s.into());
        let changes = one("d", t("Tvorba webů"), t("Tvorba webu"), Rule::Text);
        assert_eq!(changes[0].significance, Some(Significance::Low));
        let changes = one("d", t("abcde"), t("abxye"), Rule::Text);
        assert_eq!(changes[0].significance, Some(Significance::Medium));
        let changes = one("d", t("Weby"), t("Mobilní aplikace"), Rule::Text);
        assert_eq!(changes[0].significance, Some(Significance::High));
    }

    #[test]
    fn categorical_and_high_impact() {
        let t = |s: &str| FieldValue::Text(s.into());
        let changes = one("layout_type", t("grid"), t("list"), Rule::Categorical);
        assert_eq!(changes[0].significance, Some(Significance::Medium));
        let changes = one("pricing_model", t("tiered"), t("hourly"), Rule::HighImpact);
        assert_eq!(changes[0].significance, Some(Significance::High));
    }

    #[test]
    fn bad_shape_skips_only_that_field() {
        let mut before = FieldMap::new();
        before.insert("min_price", FieldValue::Text("cheap".into()), Rule::Price);
        before.insert("currency", FieldValue::Text("CZK".into()), Rule::Categorical);
        let mut after = FieldMap::new();
        after.number("min_price", Some(500.0), Rule::Price);
        after.insert("currency", FieldValue::Text("EUR".into()), Rule::Categorical);

        let changes = diff(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "currency");
    }

    #[test]
    fn shape_error_message() {
        let err = numbers("x", "price", &FieldValue::Bool(true), &FieldValue::Null).unwrap_err();
        assert!(matches!(err, ClassifierError::Shape { rule: "price", .. }));
        assert_eq!(err.to_string(), "field x: true does not fit the price rule");
    }

    #[test]
    fn rollup() {
        assert_eq!(overall_significance(&[]), None);
        let c = |s| Change {
            field: "f".into(),
            before: FieldValue::Null,
            after: FieldValue::Null,
            significance: s,
        };
        let changes = [c(Some(Significance::Low)), c(None), c(Some(Significance::Critical))];
        assert_eq!(overall_significance(&changes), Some(Significance::Critical));
    }

    #[test]
    fn field_removed_entirely() {
        let mut before = FieldMap::new();
        before.number("package_price_Pro", Some(2000.0), Rule::Price);
        let changes = diff(&before, &FieldMap::new());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].after, FieldValue::Null);
        assert_eq!(changes[0].significance, None);
    }
}
