use std::collections::BTreeSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{Category, FieldValue, Metrics, Scalar};
use crate::parser::html::{
    attr, class_and_id, first_text, has_marked_ancestor, image_src, innermost, page_text,
    resolve, selector, text_of, within,
};
use crate::parser::{unique_names, Extractor, FieldMap, Page, Rule};
use crate::text::{collapse_ws, contains_any, fold};

static ITEM: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        ".portfolio-item, .project-item, .reference-item, .work-item, .case-study, \
         .portfolio__item, .realizace-item, [class*='portfolio-item'], [class*='project-card'], \
         [class*='reference-item']",
    )
});
static ARTICLE: LazyLock<Selector> = LazyLock::new(|| selector("article"));
static FIGURE: LazyLock<Selector> = LazyLock::new(|| selector("figure"));
static FIGCAPTION: LazyLock<Selector> = LazyLock::new(|| selector("figcaption"));
static IMAGE_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| {
    selector("h2, h3, h4, h5, .title, .name, .project-title, .item-title, figcaption")
});
static CLIENT: LazyLock<Selector> =
    LazyLock::new(|| selector(".client, .klient, [class*='client-name'], [class*='klient']"));
static ITEM_CATEGORY: LazyLock<Selector> =
    LazyLock::new(|| selector(".category, .kategorie, .tag, [class*='category']"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));
static CLIENT_LOGO: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        ".clients img, .client-logos img, .klienti img, [class*='client'] img, \
         [class*='klient'] img",
    )
});
static FILTER: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        "[data-filter], .filters, .portfolio-filter, .portfolio-filters, .isotope-filters, \
         [class*='filter-button'], [class*='filter-list']",
    )
});
static FILTER_LABEL: LazyLock<Selector> = LazyLock::new(|| selector("[data-filter]"));

const SECTION_MARKERS: &[&str] =
    &["portfolio", "reference", "project", "projekt", "work", "realizac"];
const ALL_LABELS: &[&str] = &["vse", "vsechny", "vsechno", "all", "wszystkie", "*"];
const CASE_STUDY: &[&str] = &[
    "case study",
    "case studies",
    "případová studie",
    "případové studie",
    "studium przypadku",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub title: String,
    pub client: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Grid,
    Masonry,
    Carousel,
    List,
    Unknown,
}

impl LayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutKind::Grid => "grid",
            LayoutKind::Masonry => "masonry",
            LayoutKind::Carousel => "carousel",
            LayoutKind::List => "list",
            LayoutKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioFacts {
    /// Page order is meaningful.
    pub items: Vec<PortfolioItem>,
    pub clients: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub layout: LayoutKind,
    pub has_filters: bool,
    pub has_case_studies: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PortfolioExtractor;

impl Extractor for PortfolioExtractor {
    type Facts = PortfolioFacts;

    const CATEGORY: Category = Category::Portfolio;

    fn candidate_paths(&self) -> &'static [&'static str] {
        &[
            "/portfolio",
            "/reference",
            "/references",
            "/realizace",
            "/projekty",
            "/projects",
            "/nase-prace",
            "/work",
            "/case-studies",
            "/en/portfolio",
        ]
    }

    fn keywords(&self) -> &'static [&'static str] {
        &[
            "portfolio",
            "reference",
            "realizace",
            "realizacje",
            "projekty",
            "projects",
            "naše práce",
            "our work",
            "case studies",
        ]
    }

    fn extract(&self, page: &Page<'_>) -> PortfolioFacts {
        let doc = Html::parse_document(page.html);
        let (items, layout) = extract_items(&doc, page.url);

        let mut clients: BTreeSet<String> = items.iter().filter_map(|i| i.client.clone()).collect();
        clients.extend(client_logos(&doc));

        let mut categories: BTreeSet<String> =
            items.iter().filter_map(|i| i.category.clone()).collect();
        categories.extend(filter_labels(&doc));

        let has_filters = doc.select(&FILTER).next().is_some();
        let has_case_studies = contains_any(&page_text(&doc), CASE_STUDY)
            || doc.select(&LINK).any(|a| {
                a.value()
                    .attr("href")
                    .map(|h| h.to_ascii_lowercase())
                    .is_some_and(|h| h.contains("case-stud") || h.contains("pripadov"))
            });

        PortfolioFacts {
            items,
            clients,
            categories,
            layout,
            has_filters,
            has_case_studies,
        }
    }

    fn is_empty(&self, facts: &PortfolioFacts) -> bool {
        facts.items.is_empty() && facts.clients.is_empty()
    }

    fn metrics(&self, facts: &PortfolioFacts) -> Metrics {
        let with_images = facts.items.iter().filter(|i| i.image.is_some()).count();
        let mut m = Metrics::new();
        m.insert("items_count".into(), Scalar::Number(facts.items.len() as f64));
        m.insert("clients_count".into(), Scalar::Number(facts.clients.len() as f64));
        m.insert("categories_count".into(), Scalar::Number(facts.categories.len() as f64));
        m.insert("items_with_images".into(), Scalar::Number(with_images as f64));
        m.insert("layout_type".into(), Scalar::Text(facts.layout.as_str().into()));
        m.insert("has_filters".into(), Scalar::Bool(facts.has_filters));
        m.insert("has_case_studies".into(), Scalar::Bool(facts.has_case_studies));
        m
    }

    fn fields(&self, facts: &PortfolioFacts) -> FieldMap {
        let titles = unique_names(facts.items.iter().map(|i| i.title.as_str()));
        let mut f = FieldMap::new();
        f.count_of("items_count", &titles);
        f.list("item_titles", titles, Rule::Collection);
        f.set("clients", &facts.clients, Rule::NamedCollection);
        f.set("categories", &facts.categories, Rule::Collection);
        f.insert("layout_type", FieldValue::Text(facts.layout.as_str().into()), Rule::Categorical);
        f.insert("has_filters", FieldValue::Bool(facts.has_filters), Rule::Categorical);
        f.insert("has_case_studies", FieldValue::Bool(facts.has_case_studies), Rule::Categorical);
        f
    }
}

/// Item containers, then articles in a portfolio section, then captioned
/// figures, then any link wrapping a described image. The first stage that
/// yields items wins.
fn extract_items(doc: &Html, base: &Url) -> (Vec<PortfolioItem>, LayoutKind) {
    for stage in 0..4 {
        let elements = stage_elements(doc, stage);
        let items: Vec<PortfolioItem> = elements
            .iter()
            .filter_map(|el| {
                if stage == 3 {
                    image_link_item(*el, base)
                } else {
                    container_item(*el, base)
                }
            })
            .collect();
        if !items.is_empty() {
            let layout = elements.first().map_or(LayoutKind::Unknown, |el| layout_of(*el));
            return (items, layout);
        }
    }
    (Vec::new(), LayoutKind::Unknown)
}

fn stage_elements(doc: &Html, stage: usize) -> Vec<ElementRef<'_>> {
    match stage {
        0 => innermost(doc.select(&ITEM).collect()),
        1 => doc
            .select(&ARTICLE)
            .filter(|a| has_marked_ancestor(*a, SECTION_MARKERS))
            .collect(),
        2 => doc
            .select(&FIGURE)
            .filter(|f| within(*f, &FIGCAPTION).next().is_some())
            .collect(),
        _ => doc
            .select(&IMAGE_LINK)
            .filter(|a| within(*a, &IMG).any(|img| described(img).is_some()))
            .collect(),
    }
}

fn container_item(el: ElementRef<'_>, base: &Url) -> Option<PortfolioItem> {
    let img = within(el, &IMG).next();
    let link = if el.value().name() == "a" {
        Some(el)
    } else {
        within(el, &LINK).next()
    };

    let title = first_text(el, &TITLE)
        .or_else(|| img.and_then(described))
        .or_else(|| link.map(text_of).filter(|t| !t.is_empty()))?;

    Some(PortfolioItem {
        title,
        client: first_text(el, &CLIENT).or_else(|| attr(el, "data-client")),
        url: link.and_then(|a| a.value().attr("href")).and_then(|h| resolve(base, h)),
        category: first_text(el, &ITEM_CATEGORY).or_else(|| attr(el, "data-category")),
        image: img.and_then(|i| image_src(i, base)),
    })
}

fn image_link_item(a: ElementRef<'_>, base: &Url) -> Option<PortfolioItem> {
    let img = within(a, &IMG).find(|i| described(*i).is_some())?;
    Some(PortfolioItem {
        title: described(img).or_else(|| attr(a, "title"))?,
        client: None,
        url: a.value().attr("href").and_then(|h| resolve(base, h)),
        category: None,
        image: image_src(img, base),
    })
}

/// Alt or title text of an image.
fn described(img: ElementRef<'_>) -> Option<String> {
    attr(img, "alt")
        .or_else(|| attr(img, "title"))
        .map(|t| collapse_ws(&t))
        .filter(|t| !t.is_empty())
}

fn client_logos(doc: &Html) -> Vec<String> {
    doc.select(&CLIENT_LOGO)
        .filter_map(described)
        .map(|alt| strip_logo_word(&alt))
        .filter(|name| !name.is_empty())
        .collect()
}

fn strip_logo_word(alt: &str) -> String {
    let words: Vec<&str> = alt
        .split_whitespace()
        .filter(|w| !w.eq_ignore_ascii_case("logo"))
        .collect();
    words.join(" ")
}

fn filter_labels(doc: &Html) -> Vec<String> {
    doc.select(&FILTER_LABEL)
        .map(text_of)
        .filter(|t| {
            !t.is_empty() && !ALL_LABELS.contains(&fold(t).as_str()) && t.chars().count() <= 40
        })
        .collect()
}

/// Classify the layout from the item's wrapper classes, nearest first.
fn layout_of(item: ElementRef<'_>) -> LayoutKind {
    for ancestor in item.ancestors().filter_map(ElementRef::wrap).take(4) {
        let ci = class_and_id(ancestor);
        if ci.contains("masonry") || ci.contains("isotope") {
            return LayoutKind::Masonry;
        }
        if ["slider", "carousel", "swiper", "slick"].iter().any(|m| ci.contains(m)) {
            return LayoutKind::Carousel;
        }
        if ci.contains("grid") || ci.contains("columns") || ci.contains("row") {
            return LayoutKind::Grid;
        }
        if ci.contains("list") {
            return LayoutKind::List;
        }
    }
    LayoutKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> PortfolioFacts {
        let url = Url::parse("https://acme.cz/reference/").unwrap();
        PortfolioExtractor.extract(&Page {
            html,
            url: &url,
            homepage: None,
        })
    }

    const ITEMS: &str = r#"
        <div class="filters"><button data-filter="*">Vše</button>
          <button data-filter=".web">Weby</button><button data-filter=".eshop">E-shopy</button></div>
        <div class="portfolio-grid">
          <div class="portfolio-item" data-category="Weby">
            <a href="/reference/skoda"><img src="/img/skoda.jpg" alt="Škoda web"></a>
            <h3>Nový web Škoda</h3><span class="client">Škoda Auto</span>
          </div>
          <div class="portfolio-item">
            <a href="eshop-alza"><img data-src="/img/alza.jpg" alt="Alza"></a>
            <h3>E-shop Alza</h3><span class="client">Alza.cz</span><span class="category">E-shopy</span>
          </div>
        </div>
        <a href="/blog"><img src="/img/banner.jpg" alt="Blog banner"></a>
        <div class="clients"><img src="/l/kb.png" alt="Logo Komerční banka"></div>
        <p>Přečtěte si naše případové studie.</p>
    "#;

    #[test]
    fn item_containers() {
        let f = extract(ITEMS);
        assert_eq!(f.items.len(), 2);
        let first = &f.items[0];
        assert_eq!(first.title, "Nový web Škoda");
        assert_eq!(first.client.as_deref(), Some("Škoda Auto"));
        assert_eq!(first.url.as_deref(), Some("https://acme.cz/reference/skoda"));
        assert_eq!(first.category.as_deref(), Some("Weby"));
        assert_eq!(first.image.as_deref(), Some("https://acme.cz/img/skoda.jpg"));
        assert_eq!(f.items[1].url.as_deref(), Some("https://acme.cz/reference/eshop-alza"));
        assert_eq!(f.items[1].image.as_deref(), Some("https://acme.cz/img/alza.jpg"));
    }

    #[test]
    fn containers_suppress_image_link_fallback() {
        let f = extract(ITEMS);
        assert!(f.items.iter().all(|i| i.title != "Blog banner"));
    }

    #[test]
    fn derived_sets_and_flags() {
        let f = extract(ITEMS);
        let clients: Vec<&str> = f.clients.iter().map(String::as_str).collect();
        assert_eq!(clients, vec!["Alza.cz", "Komerční banka", "Škoda Auto"]);
        assert!(f.categories.contains("Weby"));
        assert!(f.categories.contains("E-shopy"));
        assert!(!f.categories.contains("Vše"));
        assert!(f.has_filters);
        assert!(f.has_case_studies);
        assert_eq!(f.layout, LayoutKind::Grid);
    }

    #[test]
    fn articles_in_reference_section() {
        let html = r#"
            <article><h2>Blog post</h2></article>
            <section id="reference" class="slider">
              <article><h3>Web pro Kofolu</h3><a href="/r/kofola">detail</a></article>
              <article><h3>Aplikace Rohlík</h3></article>
            </section>"#;
        let f = extract(html);
        let titles: Vec<&str> = f.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Web pro Kofolu", "Aplikace Rohlík"]);
        assert_eq!(f.layout, LayoutKind::Carousel);
    }

    #[test]
    fn captioned_figures() {
        let html = r#"<figure><img src="/a.jpg"><figcaption>Rebranding Plzeň</figcaption></figure>
                      <figure><img src="/b.jpg"></figure>"#;
        let f = extract(html);
        assert_eq!(f.items.len(), 1);
        assert_eq!(f.items[0].title, "Rebranding Plzeň");
    }

    #[test]
    fn generic_image_links() {
        let html = r#"<a href="/p/1"><img src="/1.jpg" alt="Projekt Jedna"></a>
                      <a href="/p/2"><img src="/2.jpg"></a>
                      <a href="/p/3" title="x"><img src="/3.jpg" title="Projekt Tři"></a>"#;
        let f = extract(html);
        let titles: Vec<&str> = f.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Projekt Jedna", "Projekt Tři"]);
        assert_eq!(f.items[0].url.as_deref(), Some("https://acme.cz/p/1"));
    }

    #[test]
    fn empty_page() {
        let f = extract("<p>Připravujeme</p>");
        assert!(PortfolioExtractor.is_empty(&f));
        assert_eq!(f.layout, LayoutKind::Unknown);
    }

    #[test]
    fn fields_projection() {
        let f = extract(ITEMS);
        let fields = PortfolioExtractor.fields(&f);
        assert_eq!(fields.get("items_count").unwrap().value, FieldValue::Number(2.0));
        assert_eq!(fields.get("clients").unwrap().rule, Rule::NamedCollection);
        assert!(matches!(
            &fields.get("item_titles").unwrap().value,
            FieldValue::List(t)
                if t == &vec!["Nový web Škoda".to_string(), "E-shop Alza".to_string()]
        ));
    }
}
