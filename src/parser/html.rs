//! Small helpers over `scraper` shared by the extractors.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::text::collapse_ws;

/// Parse a selector list; extractor selectors are static strings.
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("bad selector {:?}: {:?}", css, e))
}

/// Visible text of an element, whitespace-collapsed. Script and style
/// contents are skipped.
pub fn text_of(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        if let Node::Text(t) = node.value() {
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
            if !hidden {
                parts.push(&**t);
            }
        }
    }
    collapse_ws(&parts.join(" "))
}

/// Text directly inside `el`, excluding child elements.
pub fn own_text(el: ElementRef<'_>) -> String {
    let parts: Vec<&str> = el
        .children()
        .filter_map(|c| match c.value() {
            Node::Text(t) => Some(&**t),
            _ => None,
        })
        .collect();
    collapse_ws(&parts.join(" "))
}

/// Whole-document visible text.
pub fn page_text(doc: &Html) -> String {
    text_of(doc.root_element())
}

/// Matches of `sel` strictly below `el`; `ElementRef::select` can yield the
/// scope element itself.
pub fn within<'a, 'b>(
    el: ElementRef<'a>,
    sel: &'b Selector,
) -> impl Iterator<Item = ElementRef<'a>> + 'b
where
    'a: 'b,
{
    let scope = el.id();
    el.select(sel).filter(move |e| e.id() != scope)
}

/// Text of the first match of `sel` under `el`, if non-empty.
pub fn first_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    within(el, sel).map(text_of).find(|t| !t.is_empty())
}

/// Keep only the innermost matches: drop any element that contains another
/// element of the same list.
pub fn innermost(matches: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    let ids: std::collections::HashSet<_> = matches.iter().map(|e| e.id()).collect();
    let outer: std::collections::HashSet<_> = matches
        .iter()
        .flat_map(|e| e.ancestors().map(|a| a.id()))
        .filter(|id| ids.contains(id))
        .collect();
    matches.into_iter().filter(|e| !outer.contains(&e.id())).collect()
}

/// Attribute value, trimmed and non-empty.
pub fn attr(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve an href/src against the page URL. Non-web schemes give `None`.
pub fn resolve(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.starts_with("javascript:") {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Image source, honouring the usual lazy-loading attributes.
pub fn image_src(img: ElementRef<'_>, base: &Url) -> Option<String> {
    ["data-src", "data-lazy-src", "src"]
        .iter()
        .filter_map(|a| attr(img, a))
        .find(|v| !v.starts_with("data:"))
        .and_then(|v| resolve(base, &v))
}

/// Class attribute plus id, lowercased, for substring checks.
pub fn class_and_id(el: ElementRef<'_>) -> String {
    let class = el.value().attr("class").unwrap_or("");
    let id = el.value().attr("id").unwrap_or("");
    format!("{} {}", class, id).to_ascii_lowercase()
}

/// True when some ancestor's class or id mentions one of `markers`.
pub fn has_marked_ancestor(el: ElementRef<'_>, markers: &[&str]) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| {
            let ci = class_and_id(a);
            markers.iter().any(|m| ci.contains(m))
        })
}

/// Drop empty strings and repeats while keeping order.
pub fn dedup_keep_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_skips_scripts() {
        let doc = Html::parse_document(
            "<body><p>Hello <b>world</b></p><script>var x = 1;</script><style>p{}</style></body>",
        );
        assert_eq!(page_text(&doc), "Hello world");
    }

    #[test]
    fn own_text_excludes_children() {
        let doc = Html::parse_fragment("<div>1 200 Kč <span>/ měsíc</span></div>");
        let div = doc.select(&selector("div")).next().unwrap();
        assert_eq!(own_text(div), "1 200 Kč");
    }

    #[test]
    fn innermost_drops_wrappers() {
        let doc = Html::parse_fragment(
            r#"<div class="package"><div class="package">A</div><div class="package">B</div></div>"#,
        );
        let all: Vec<_> = doc.select(&selector(".package")).collect();
        assert_eq!(all.len(), 3);
        let inner = innermost(all);
        assert_eq!(inner.iter().map(|e| text_of(*e)).collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn within_excludes_scope() {
        let doc =
            Html::parse_fragment(r#"<div class="price">x<span class="price">9 Kč</span></div>"#);
        let sel = selector(".price");
        let outer = doc.select(&sel).next().unwrap();
        assert_eq!(first_text(outer, &sel).as_deref(), Some("9 Kč"));
    }

    #[test]
    fn resolves_relative_urls() {
        let base = Url::parse("https://acme.cz/reference/").unwrap();
        assert_eq!(resolve(&base, "eshop-x").as_deref(), Some("https://acme.cz/reference/eshop-x"));
        assert_eq!(resolve(&base, "/img/a.png").as_deref(), Some("https://acme.cz/img/a.png"));
        assert!(resolve(&base, "mailto:x@acme.cz").is_none());
        assert!(resolve(&base, "#top").is_none());
    }

    #[test]
    fn lazy_image_source() {
        let base = Url::parse("https://acme.cz/").unwrap();
        let doc =
            Html::parse_fragment(r#"<img src="data:image/gif;base64,R0l" data-src="/a.jpg">"#);
        let img = doc.select(&selector("img")).next().unwrap();
        assert_eq!(image_src(img, &base).as_deref(), Some("https://acme.cz/a.jpg"));
    }
}
