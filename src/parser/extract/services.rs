use std::collections::BTreeSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::model::{Category, FieldValue, Metrics, Scalar};
use crate::parser::html::{first_text, has_marked_ancestor, innermost, page_text, selector, text_of};
use crate::parser::{unique_names, Extractor, FieldMap, Page, Rule};
use crate::text::match_vocabulary;

static CARD: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        ".service, .service-item, .services-item, .service-box, .sluzba, .sluzby-item, \
         .uslugi-item, [class*='service-card'], [class*='sluzba-']",
    )
});
static CARD_NAME: LazyLock<Selector> =
    LazyLock::new(|| selector("h2, h3, h4, h5, .title, .name, .service-title, strong"));
static CARD_DESC: LazyLock<Selector> =
    LazyLock::new(|| selector("p, .description, .desc, .text, .excerpt"));
static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("li"));
static LIST_NAME: LazyLock<Selector> = LazyLock::new(|| selector("strong, b, h3, h4"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h3"));

const SECTION_MARKERS: &[&str] = &["service", "sluzb", "uslug", "leistung"];
const CHROME: &[&str] = &["nav", "header", "footer"];
const MAX_NAME_CHARS: usize = 120;

/// `(term, tag)`; several spellings may share a tag.
const TECHNOLOGIES: &[(&str, &str)] = &[
    ("wordpress", "WordPress"),
    ("woocommerce", "WooCommerce"),
    ("shopify", "Shopify"),
    ("shoptet", "Shoptet"),
    ("magento", "Magento"),
    ("prestashop", "PrestaShop"),
    ("drupal", "Drupal"),
    ("joomla", "Joomla"),
    ("webflow", "Webflow"),
    ("react", "React"),
    ("react native", "React Native"),
    ("next.js", "Next.js"),
    ("nextjs", "Next.js"),
    ("vue", "Vue.js"),
    ("vue.js", "Vue.js"),
    ("nuxt", "Nuxt"),
    ("angular", "Angular"),
    ("svelte", "Svelte"),
    ("javascript", "JavaScript"),
    ("typescript", "TypeScript"),
    ("node.js", "Node.js"),
    ("nodejs", "Node.js"),
    ("php", "PHP"),
    ("laravel", "Laravel"),
    ("symfony", "Symfony"),
    ("nette", "Nette"),
    ("python", "Python"),
    ("django", "Django"),
    ("java", "Java"),
    ("kotlin", "Kotlin"),
    ("swift", "Swift"),
    ("flutter", "Flutter"),
    ("asp.net", ".NET"),
    ("dotnet", ".NET"),
    ("figma", "Figma"),
    ("docker", "Docker"),
    ("kubernetes", "Kubernetes"),
    ("aws", "AWS"),
    ("azure", "Azure"),
    ("google cloud", "Google Cloud"),
];

const METHODOLOGIES: &[(&str, &str)] = &[
    ("agile", "Agile"),
    ("agilni", "Agile"),
    ("agilne", "Agile"),
    ("agilnim", "Agile"),
    ("scrum", "Scrum"),
    ("kanban", "Kanban"),
    ("lean", "Lean"),
    ("design thinking", "Design thinking"),
    ("devops", "DevOps"),
    ("ci/cd", "CI/CD"),
    ("mvp", "MVP"),
    ("ux research", "UX research"),
    ("uzivatelsky vyzkum", "UX research"),
    ("a/b test", "A/B testing"),
    ("a/b testovani", "A/B testing"),
    ("waterfall", "Waterfall"),
];

const INDUSTRIES: &[(&str, &str)] = &[
    ("e-commerce", "E-commerce"),
    ("ecommerce", "E-commerce"),
    ("finance", "Finance"),
    ("fintech", "Finance"),
    ("banking", "Finance"),
    ("bankovnictvi", "Finance"),
    ("healthcare", "Healthcare"),
    ("zdravotnictvi", "Healthcare"),
    ("automotive", "Automotive"),
    ("real estate", "Real estate"),
    ("reality", "Real estate"),
    ("nemovitosti", "Real estate"),
    ("gastro", "Gastronomy"),
    ("gastronomie", "Gastronomy"),
    ("restaurace", "Gastronomy"),
    ("education", "Education"),
    ("vzdelavani", "Education"),
    ("skolstvi", "Education"),
    ("retail", "Retail"),
    ("maloobchod", "Retail"),
    ("logistics", "Logistics"),
    ("logistika", "Logistics"),
    ("energy", "Energy"),
    ("energetika", "Energy"),
    ("tourism", "Tourism"),
    ("cestovni ruch", "Tourism"),
    ("manufacturing", "Manufacturing"),
    ("prumysl", "Manufacturing"),
    ("vyroba", "Manufacturing"),
    ("construction", "Construction"),
    ("stavebnictvi", "Construction"),
    ("non-profit", "Non-profit"),
    ("neziskove organizace", "Non-profit"),
];

const CERTIFICATIONS: &[(&str, &str)] = &[
    ("iso 9001", "ISO 9001"),
    ("iso 27001", "ISO 27001"),
    ("iso/iec 27001", "ISO 27001"),
    ("google partner", "Google Partner"),
    ("google premier partner", "Google Premier Partner"),
    ("meta business partner", "Meta Business Partner"),
    ("facebook marketing partner", "Meta Business Partner"),
    ("sklik partner", "Sklik Partner"),
    ("shopify partner", "Shopify Partner"),
    ("shoptet partner", "Shoptet Partner"),
    ("microsoft partner", "Microsoft Partner"),
    ("aws partner", "AWS Partner"),
    ("hubspot partner", "HubSpot Partner"),
    ("pci dss", "PCI DSS"),
    ("wcag", "WCAG"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicesFacts {
    pub services: Vec<Service>,
    pub technologies: BTreeSet<String>,
    pub methodologies: BTreeSet<String>,
    pub industries: BTreeSet<String>,
    pub certifications: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServicesExtractor;

impl Extractor for ServicesExtractor {
    type Facts = ServicesFacts;

    const CATEGORY: Category = Category::Services;

    fn candidate_paths(&self) -> &'static [&'static str] {
        &[
            "/sluzby",
            "/services",
            "/nase-sluzby",
            "/uslugi",
            "/co-delame",
            "/what-we-do",
            "/en/services",
        ]
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["služby", "services", "usługi", "co děláme", "what we do", "nabídka"]
    }

    fn wants_homepage(&self) -> bool {
        true
    }

    fn extract(&self, page: &Page<'_>) -> ServicesFacts {
        let doc = Html::parse_document(page.html);
        let services = extract_services(&doc);

        let text = page_text(&doc);
        let home = page.homepage.map(|h| page_text(&Html::parse_document(h)));
        let mut texts = vec![text.as_str()];
        if let Some(home) = home.as_deref() {
            texts.push(home);
        }

        ServicesFacts {
            services,
            technologies: match_vocabulary(&texts, TECHNOLOGIES),
            methodologies: match_vocabulary(&texts, METHODOLOGIES),
            industries: match_vocabulary(&texts, INDUSTRIES),
            certifications: match_vocabulary(&texts, CERTIFICATIONS),
        }
    }

    fn is_empty(&self, facts: &ServicesFacts) -> bool {
        facts.services.is_empty()
            && facts.technologies.is_empty()
            && facts.methodologies.is_empty()
            && facts.industries.is_empty()
            && facts.certifications.is_empty()
    }

    fn metrics(&self, facts: &ServicesFacts) -> Metrics {
        let described = facts.services.iter().filter(|s| s.description.is_some()).count();
        let mut m = Metrics::new();
        m.insert("services_count".into(), Scalar::Number(facts.services.len() as f64));
        m.insert("described_services".into(), Scalar::Number(described as f64));
        m.insert("technologies_count".into(), Scalar::Number(facts.technologies.len() as f64));
        m.insert("methodologies_count".into(), Scalar::Number(facts.methodologies.len() as f64));
        m.insert("industries_count".into(), Scalar::Number(facts.industries.len() as f64));
        m.insert(
            "certifications_count".into(),
            Scalar::Number(facts.certifications.len() as f64),
        );
        m
    }

    fn fields(&self, facts: &ServicesFacts) -> FieldMap {
        let names = unique_names(facts.services.iter().map(|s| s.name.as_str()));
        let mut f = FieldMap::new();
        f.count_of("services_count", &names);
        f.set("services", &names.iter().cloned().collect(), Rule::NamedCollection);
        for (name, service) in names.iter().zip(&facts.services) {
            f.insert(
                format!("service_description_{}", name),
                FieldValue::text(service.description.as_deref()),
                Rule::Text,
            );
        }
        f.set("technologies", &facts.technologies, Rule::NamedCollection);
        f.set("certifications", &facts.certifications, Rule::NamedCollection);
        f.set("methodologies", &facts.methodologies, Rule::Collection);
        f.set("industries", &facts.industries, Rule::Collection);
        f
    }
}

/// Service cards, then list items inside a services section, then `h3`
/// headings with the paragraph that follows.
fn extract_services(doc: &Html) -> Vec<Service> {
    let cards: Vec<Service> = innermost(doc.select(&CARD).collect())
        .into_iter()
        .filter_map(card)
        .collect();
    if !cards.is_empty() {
        return cards;
    }

    let listed: Vec<Service> = doc
        .select(&LIST_ITEM)
        .filter(|li| !in_chrome(*li) && has_marked_ancestor(*li, SECTION_MARKERS))
        .filter_map(list_item)
        .collect();
    if !listed.is_empty() {
        return listed;
    }

    doc.select(&HEADING)
        .filter(|h| !in_chrome(*h))
        .filter_map(|h| {
            let name = text_of(h);
            usable_name(&name).then(|| Service {
                description: following_paragraph(h),
                name,
            })
        })
        .collect()
}

fn card(el: ElementRef<'_>) -> Option<Service> {
    let name = first_text(el, &CARD_NAME)?;
    let description = first_text(el, &CARD_DESC).filter(|d| *d != name);
    usable_name(&name).then_some(Service { name, description })
}

/// `<li><strong>Name</strong> description</li>` or plain `<li>Name</li>`.
fn list_item(li: ElementRef<'_>) -> Option<Service> {
    let full = text_of(li);
    let (name, description) = match first_text(li, &LIST_NAME) {
        Some(name) => {
            let rest = full
                .strip_prefix(name.as_str())
                .map(|r| r.trim_start_matches([' ', '-', '–', ':']).trim().to_string())
                .filter(|r| !r.is_empty());
            (name, rest)
        }
        None => (full, None),
    };
    usable_name(&name).then_some(Service { name, description })
}

fn following_paragraph(heading: ElementRef<'_>) -> Option<String> {
    let next = heading.next_siblings().find_map(ElementRef::wrap)?;
    (next.value().name() == "p")
        .then(|| text_of(next))
        .filter(|t| !t.is_empty())
}

fn in_chrome(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| CHROME.contains(&a.value().name()))
}

fn usable_name(name: &str) -> bool {
    !name.is_empty() && name.chars().count() <= MAX_NAME_CHARS
}
