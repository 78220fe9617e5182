use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::price::{
    billing_period, find_price, guess_currency, mentions_hourly_rate, mentions_project_pricing,
    BillingPeriod, PRICE_RE,
};
use crate::model::{Category, FieldValue, Metrics, Scalar};
use crate::parser::html::{
    dedup_keep_order, first_text, innermost, own_text, page_text, selector, text_of, within,
};
use crate::parser::{unique_names, Extractor, FieldMap, Page, Rule};
use crate::text::{contains_any, fold};

static PLAN: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        ".pricing-table, .price-table, .pricing-plan, .pricing-card, .pricing-item, .pricing-box, \
         .price-box, .plan-card, .plan, .package, .tarif, .cenik-item, .cenik-box, \
         [class*='pricing-plan'], [class*='pricing-card'], [class*='price-card']",
    )
});
static PLAN_NAME: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        ".plan-name, .package-name, .pricing-title, .plan-title, h1, h2, h3, h4, h5, .title, .name",
    )
});
static PLAN_PRICE: LazyLock<Selector> =
    LazyLock::new(|| selector(".price, .amount, .cost, .cena, [class*='price']"));
static PLAN_PERIOD: LazyLock<Selector> =
    LazyLock::new(|| selector(".period, .billing, .per, .interval, .duration"));
static FEATURE: LazyLock<Selector> = LazyLock::new(|| selector("li"));
static TABLE_ROW: LazyLock<Selector> = LazyLock::new(|| selector("table tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td, th"));

const CUSTOM_QUOTE: &[&str] = &[
    "na míru",
    "na dotaz",
    "individuální nabídk",
    "individuální cen",
    "cena dohodou",
    "dle dohody",
    "na vyžádání",
    "custom quote",
    "request a quote",
    "contact us for pricing",
    "on request",
    "wycena indywidualna",
    "na zapytanie",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub price: Option<f64>,
    pub billing_period: Option<BillingPeriod>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    Tiered,
    Hourly,
    Project,
    Fixed,
    Unknown,
}

impl PricingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingModel::Tiered => "tiered",
            PricingModel::Hourly => "hourly",
            PricingModel::Project => "project",
            PricingModel::Fixed => "fixed",
            PricingModel::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingFacts {
    /// Page order is meaningful.
    pub packages: Vec<Package>,
    pub pricing_model: PricingModel,
    pub currency: Option<String>,
    pub has_custom_quote: bool,
}

impl PricingFacts {
    fn prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.packages.iter().filter_map(|p| p.price)
    }

    pub fn min_price(&self) -> Option<f64> {
        self.prices().reduce(f64::min)
    }

    pub fn max_price(&self) -> Option<f64> {
        self.prices().reduce(f64::max)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PricingExtractor;

impl Extractor for PricingExtractor {
    type Facts = PricingFacts;

    const CATEGORY: Category = Category::Pricing;

    fn candidate_paths(&self) -> &'static [&'static str] {
        &[
            "/cenik",
            "/ceny",
            "/pricing",
            "/cennik",
            "/ceny-sluzeb",
            "/prices",
            "/tarify",
            "/en/pricing",
        ]
    }

    fn keywords(&self) -> &'static [&'static str] {
        &[
            "ceník",
            "ceny",
            "cennik",
            "pricing",
            "prices",
            "price list",
            "tarify",
            "balíčky",
            "plans",
        ]
    }

    fn extract(&self, page: &Page<'_>) -> PricingFacts {
        let doc = Html::parse_document(page.html);
        let packages = extract_packages(&doc);
        let text = page_text(&doc);
        let folded = fold(&text);

        let currency = guess_currency(PRICE_RE.find_iter(&text).map(|m| m.as_str()));
        let has_custom_quote = contains_any(&text, CUSTOM_QUOTE);
        let pricing_model = classify_model(&packages, &folded);

        PricingFacts {
            packages,
            pricing_model,
            currency,
            has_custom_quote,
        }
    }

    fn is_empty(&self, facts: &PricingFacts) -> bool {
        facts.packages.is_empty()
            && !facts.has_custom_quote
            && facts.pricing_model == PricingModel::Unknown
    }

    fn metrics(&self, facts: &PricingFacts) -> Metrics {
        let priced: Vec<f64> = facts.prices().collect();
        let avg = (!priced.is_empty()).then(|| priced.iter().sum::<f64>() / priced.len() as f64);
        let num = |v: Option<f64>| v.map(Scalar::Number).unwrap_or(Scalar::Null);

        let mut m = Metrics::new();
        m.insert("packages_count".into(), Scalar::Number(facts.packages.len() as f64));
        m.insert("priced_packages".into(), Scalar::Number(priced.len() as f64));
        m.insert("pricing_model".into(), Scalar::Text(facts.pricing_model.as_str().into()));
        m.insert(
            "currency".into(),
            facts.currency.clone().map(Scalar::Text).unwrap_or(Scalar::Null),
        );
        m.insert("has_custom_quote".into(), Scalar::Bool(facts.has_custom_quote));
        m.insert("min_price".into(), num(facts.min_price()));
        m.insert("max_price".into(), num(facts.max_price()));
        m.insert("avg_price".into(), num(avg));
        m
    }

    fn fields(&self, facts: &PricingFacts) -> FieldMap {
        let names = unique_names(facts.packages.iter().map(|p| p.name.as_str()));
        let mut f = FieldMap::new();
        f.count_of("packages_count", &names);
        for (name, package) in names.iter().zip(&facts.packages) {
            f.number(format!("package_price_{}", name), package.price, Rule::Price);
            f.insert(
                format!("package_billing_{}", name),
                FieldValue::text(package.billing_period.map(|b| b.as_str())),
                Rule::Categorical,
            );
            f.list(
                format!("package_features_{}", name),
                package.features.clone(),
                Rule::Collection,
            );
        }
        f.insert(
            "pricing_model",
            FieldValue::Text(facts.pricing_model.as_str().into()),
            Rule::HighImpact,
        );
        f.insert("currency", FieldValue::text(facts.currency.as_deref()), Rule::Categorical);
        f.insert("has_custom_quote", FieldValue::Bool(facts.has_custom_quote), Rule::Categorical);
        f.number("min_price", facts.min_price(), Rule::Price);
        f.number("max_price", facts.max_price(), Rule::Price);
        f
    }
}

/// Plan containers first, then price tables, then loose prices under
/// headings. The first stage that finds anything wins.
fn extract_packages(doc: &Html) -> Vec<Package> {
    let plans = from_plan_containers(doc);
    if !plans.is_empty() {
        return plans;
    }
    let rows = from_tables(doc);
    if !rows.is_empty() {
        return rows;
    }
    from_loose_prices(doc)
}

fn from_plan_containers(doc: &Html) -> Vec<Package> {
    let containers = innermost(doc.select(&PLAN).collect());
    containers
        .into_iter()
        .enumerate()
        .filter_map(|(i, el)| package_from_container(el, i))
        .collect()
}

fn package_from_container(el: ElementRef<'_>, index: usize) -> Option<Package> {
    let name = first_text(el, &PLAN_NAME);
    let price_text = first_text(el, &PLAN_PRICE);
    let price = price_text
        .as_deref()
        .and_then(find_price)
        .or_else(|| PRICE_RE.find(&text_of(el)).and_then(|m| find_price(m.as_str())));
    if name.is_none() && price.is_none() {
        return None;
    }

    let period_text = first_text(el, &PLAN_PERIOD).unwrap_or_default();
    let billing = billing_period(&format!(
        "{} {}",
        price_text.as_deref().unwrap_or(""),
        period_text
    ));
    let features = dedup_keep_order(within(el, &FEATURE).map(text_of));

    Some(Package {
        name: name.unwrap_or_else(|| format!("Package {}", index + 1)),
        price,
        billing_period: billing,
        features,
    })
}

fn from_tables(doc: &Html) -> Vec<Package> {
    let mut packages = Vec::new();
    for row in doc.select(&TABLE_ROW) {
        let cells: Vec<String> = row.select(&CELL).map(text_of).collect();
        let Some(price_idx) = cells.iter().position(|c| PRICE_RE.is_match(c)) else {
            continue;
        };
        let Some(name) = cells
            .iter()
            .enumerate()
            .find(|(i, c)| *i != price_idx && !c.is_empty())
            .map(|(_, c)| c.clone())
        else {
            continue;
        };
        let price_cell = &cells[price_idx];
        let features = cells
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != price_idx && **c != name && !c.is_empty())
            .map(|(_, c)| c.clone())
            .collect();
        packages.push(Package {
            name,
            price: find_price(price_cell),
            billing_period: billing_period(price_cell),
            features,
        });
    }
    packages
}

/// Walk the document in order, remembering the last heading; the first
/// element whose own text carries a price under each heading becomes a
/// package named after that heading.
fn from_loose_prices(doc: &Html) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut heading: Option<String> = None;
    let mut heading_used = false;

    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else { continue };
        let tag = el.value().name();
        if matches!(tag, "script" | "style" | "noscript") {
            continue;
        }
        if matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") {
            let text = text_of(el);
            if !text.is_empty() && !PRICE_RE.is_match(&text) {
                heading = Some(text);
                heading_used = false;
                continue;
            }
        }
        let own = own_text(el);
        let Some(m) = PRICE_RE.find(&own) else { continue };
        if heading_used {
            continue;
        }
        let name = match &heading {
            Some(h) => {
                heading_used = true;
                h.clone()
            }
            None => format!("Package {}", packages.len() + 1),
        };
        packages.push(Package {
            name,
            price: find_price(m.as_str()),
            billing_period: billing_period(&own),
            features: Vec::new(),
        });
    }
    packages
}

fn classify_model(packages: &[Package], folded_text: &str) -> PricingModel {
    let priced = packages.iter().filter(|p| p.price.is_some()).count();
    let any_billing = |b: BillingPeriod| packages.iter().any(|p| p.billing_period == Some(b));

    if any_billing(BillingPeriod::Hourly) || (priced == 0 && mentions_hourly_rate(folded_text)) {
        PricingModel::Hourly
    } else if priced >= 2 {
        PricingModel::Tiered
    } else if any_billing(BillingPeriod::Project) || mentions_project_pricing(folded_text) {
        PricingModel::Project
    } else if priced == 1 {
        PricingModel::Fixed
    } else {
        PricingModel::Unknown
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn extract(html: &str) -> PricingFacts {
        let url = Url::parse("https://acme.cz/cenik").unwrap();
        PricingExtractor.extract(&Page {
            html,
            url: &url,
            homepage: None,
        })
    }

    const PLANS: &str = r#"
        <section class="pricing">
          <div class="pricing-table">
            <div class="pricing-plan">
              <h3>Basic</h3>
              <div class="price">1 000 Kč <span class="period">/ měsíc</span></div>
              <ul><li>5 stránek</li><li>SSL</li></ul>
            </div>
            <div class="pricing-plan">
              <h3>Pro</h3>
              <div class="price">2 000 Kč <span class="period">/ měsíc</span></div>
              <ul><li>20 stránek</li><li>SSL</li><li>E-shop</li></ul>
            </div>
          </div>
        </section>
        <p>Jednorázová konzultace 500 Kč</p>
    "#;

    #[test]
    fn plan_containers() {
        let f = extract(PLANS);
        assert_eq!(f.packages.len(), 2);
        assert_eq!(f.packages[0].name, "Basic");
        assert_eq!(f.packages[0].price, Some(1000.0));
        assert_eq!(f.packages[0].billing_period, Some(BillingPeriod::Monthly));
        assert_eq!(f.packages[1].features, vec!["20 stránek", "SSL", "E-shop"]);
        assert_eq!(f.pricing_model, PricingModel::Tiered);
        assert_eq!(f.currency.as_deref(), Some("CZK"));
        assert_eq!(f.min_price(), Some(1000.0));
        assert_eq!(f.max_price(), Some(2000.0));
    }

    #[test]
    fn structured_plans_suppress_loose_prices() {
        // the consultation price outside the plans must not become a package
        let f = extract(PLANS);
        assert!(f.packages.iter().all(|p| p.price != Some(500.0)));
    }

    #[test]
    fn table_rows() {
        let html = r#"
            <h2>Ceník</h2>
            <table>
              <tr><th>Služba</th><th>Cena</th></tr>
              <tr><td>Web na míru</td><td>od 25 000 Kč</td></tr>
              <tr><td>Správa</td><td>900 Kč / hod</td></tr>
            </table>"#;
        let f = extract(html);
        assert_eq!(f.packages.len(), 2);
        assert_eq!(f.packages[0].name, "Web na míru");
        assert_eq!(f.packages[0].price, Some(25000.0));
        assert_eq!(f.packages[1].billing_period, Some(BillingPeriod::Hourly));
        assert_eq!(f.pricing_model, PricingModel::Hourly);
        assert!(f.has_custom_quote);
    }

    #[test]
    fn loose_prices_under_headings() {
        let html = r#"
            <h2>Landing page</h2><p>Cena: 9 900 Kč</p><p>Sleva 1 000 Kč</p>
            <h2>Firemní web</h2><div><span>29 900 Kč</span></div>"#;
        let f = extract(html);
        let names: Vec<&str> = f.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Landing page", "Firemní web"]);
        assert_eq!(f.packages[1].price, Some(29900.0));
    }

    #[test]
    fn single_price_is_fixed() {
        let f =
            extract(r#"<div class="package"><h3>Start</h3><p class="price">4 990 Kč</p></div>"#);
        assert_eq!(f.pricing_model, PricingModel::Fixed);
    }

    #[test]
    fn quote_only_page() {
        let f = extract("<h1>Ceník</h1><p>Cena projektu je vždy na míru.</p>");
        assert!(f.packages.is_empty());
        assert!(f.has_custom_quote);
        assert_eq!(f.pricing_model, PricingModel::Project);
        assert!(!PricingExtractor.is_empty(&f));
    }

    #[test]
    fn nothing_recognizable() {
        let f = extract("<html><body><p>Kontaktujte nás</p></body></html>");
        assert!(PricingExtractor.is_empty(&f));
    }

    #[test]
    fn malformed_markup_degrades() {
        let f = extract(r#"<div class="pricing-plan"><h3>Basic<div class="price">abc"#);
        assert_eq!(f.packages.len(), 1);
        assert_eq!(f.packages[0].price, None);
    }

    #[test]
    fn fields_and_metrics() {
        let f = extract(PLANS);
        let fields = PricingExtractor.fields(&f);
        assert_eq!(fields.get("package_price_Basic").unwrap().value, FieldValue::Number(1000.0));
        assert_eq!(fields.get("packages_count").unwrap().value, FieldValue::Number(2.0));
        assert_eq!(fields.get("pricing_model").unwrap().rule, Rule::HighImpact);
        let m = PricingExtractor.metrics(&f);
        assert_eq!(m["avg_price"], Scalar::Number(1500.0));
    }
}
