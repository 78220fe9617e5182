use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::fold;

/// A money amount with a currency marker on either side. Matched against
/// original (unfolded) text.
pub static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?:€|\$|£|eur|usd|gbp|czk|pln)\s?\d[\d\s.,]*|\d[\d\s.,]*\s?(?:kč|kc|czk|€|eur|\$|usd|zł|zl|pln|£|gbp|,-|\.-))",
    )
    .unwrap()
});

static HOURLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(/\s*(h|hod|hodinu|hour|hr)\b|za hodinu|per hour|hodinov|hourly|\bna hodinu)")
        .unwrap()
});
static MONTHLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(/\s*(mes|mesic|month|mo|mies|miesiac)\b|mesicne|monthly|per month|za mesic|miesiecznie)",
    )
    .unwrap()
});
static YEARLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(/\s*(rok|year|yr)\b|rocne|yearly|annually|per year|za rok|rocznie)").unwrap()
});
static ONE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(jednoraz|one-time|one time|jednorazow)").unwrap());
static PROJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(za projekt|per project|cena projektu|projekt od|za zakazku)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Hourly,
    Monthly,
    Yearly,
    OneTime,
    Project,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Hourly => "hourly",
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
            BillingPeriod::OneTime => "one_time",
            BillingPeriod::Project => "project",
        }
    }
}

/// Parse a price out of free text.
///
/// Keeps only `[0-9,.]`, then reads a trailing group of one or two digits
/// after `,` or `.` as decimals and three-digit groups as thousands.
/// Returns `None` when nothing numeric survives; never substitutes zero.
pub fn parse_price(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let kept = kept.trim_matches(|c| c == ',' || c == '.');
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let unified = kept.replace(',', ".");
    let groups: Vec<&str> = unified.split('.').collect();
    if groups.iter().any(|g| g.is_empty()) {
        return None;
    }
    let number = match groups.as_slice() {
        [whole] => whole.to_string(),
        [head @ .., last] if last.len() == 3 => format!("{}{}", head.concat(), last),
        [head @ .., last] => format!("{}.{}", head.concat(), last),
        [] => return None,
    };
    number.parse::<f64>().ok()
}

/// First money amount in `text`, falling back to the whole text when it is a
/// bare number.
pub fn find_price(text: &str) -> Option<f64> {
    if let Some(m) = PRICE_RE.find(text) {
        return parse_price(m.as_str());
    }
    let trimmed = text.trim();
    let bare = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || c == ',' || c == '.');
    if bare {
        parse_price(trimmed)
    } else {
        None
    }
}

pub fn billing_period(text: &str) -> Option<BillingPeriod> {
    let t = fold(text);
    if HOURLY_RE.is_match(&t) {
        Some(BillingPeriod::Hourly)
    } else if MONTHLY_RE.is_match(&t) {
        Some(BillingPeriod::Monthly)
    } else if YEARLY_RE.is_match(&t) {
        Some(BillingPeriod::Yearly)
    } else if PROJECT_RE.is_match(&t) {
        Some(BillingPeriod::Project)
    } else if ONE_TIME_RE.is_match(&t) {
        Some(BillingPeriod::OneTime)
    } else {
        None
    }
}

pub fn mentions_project_pricing(folded: &str) -> bool {
    PROJECT_RE.is_match(folded)
}

pub fn mentions_hourly_rate(folded: &str) -> bool {
    HOURLY_RE.is_match(folded)
        || folded.contains("hodinova sazba")
        || folded.contains("hourly rate")
}

const CURRENCIES: &[(&str, &[&str])] = &[
    ("CZK", &["kč", "czk", ",-"]),
    ("EUR", &["€", "eur"]),
    ("USD", &["$", "usd"]),
    ("PLN", &["zł", "pln"]),
    ("GBP", &["£", "gbp"]),
];

/// Most frequently marked currency across the matched price strings.
pub fn guess_currency<'a>(prices: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts = [0usize; 5];
    for p in prices {
        let lower = p.to_lowercase();
        for (i, (_, markers)) in CURRENCIES.iter().enumerate() {
            if markers.iter().any(|m| lower.contains(m)) {
                counts[i] += 1;
            }
        }
    }
    counts
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0)
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| CURRENCIES[i].0.to_string())
}
