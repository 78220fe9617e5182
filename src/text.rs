//! Text normalization shared by the locator and the extractors.

use std::collections::BTreeSet;

/// Collapse runs of whitespace (including nbsp) into single spaces and trim.
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and strip the Central European diacritics the monitored sites use.
pub fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase) {
        match c {
            'á' | 'à' | 'â' | 'ä' | 'ą' | 'ã' | 'å' => out.push('a'),
            'č' | 'ć' | 'ç' => out.push('c'),
            'ď' => out.push('d'),
            'é' | 'è' | 'ê' | 'ë' | 'ě' | 'ę' => out.push('e'),
            'í' | 'ì' | 'î' | 'ï' => out.push('i'),
            'ĺ' | 'ľ' | 'ł' => out.push('l'),
            'ň' | 'ń' | 'ñ' => out.push('n'),
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ő' => out.push('o'),
            'ŕ' | 'ř' => out.push('r'),
            'š' | 'ś' => out.push('s'),
            'ť' => out.push('t'),
            'ú' | 'ù' | 'û' | 'ü' | 'ů' | 'ű' => out.push('u'),
            'ý' | 'ÿ' => out.push('y'),
            'ž' | 'ź' | 'ż' => out.push('z'),
            'ß' => out.push_str("ss"),
            '\u{a0}' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// True when folded `haystack` contains any folded keyword.
pub fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    let hay = fold(haystack);
    keywords.iter().any(|k| hay.contains(&fold(k)))
}

/// Substring match that refuses hits glued to a neighbouring letter or digit,
/// so "java" does not fire inside "javascript".
pub fn contains_term(folded_haystack: &str, folded_term: &str) -> bool {
    if folded_term.is_empty() {
        return false;
    }
    let bytes = folded_haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = folded_haystack[from..].find(folded_term) {
        let start = from + pos;
        let end = start + folded_term.len();
        let before_ok = folded_haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = folded_haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        // advance past the first char of this hit
        from = start + folded_haystack[start..].chars().next().map_or(1, char::len_utf8);
        if from >= bytes.len() {
            break;
        }
    }
    false
}

/// Vocabulary entries found in any of `texts`. Entries are `(term, label)`
/// so several spellings can map to one canonical tag.
pub fn match_vocabulary(texts: &[&str], vocabulary: &[(&str, &str)]) -> BTreeSet<String> {
    let folded: Vec<String> = texts.iter().map(|t| fold(t)).collect();
    vocabulary
        .iter()
        .filter(|(term, _)| {
            let term = fold(term);
            folded.iter().any(|hay| contains_term(hay, &term))
        })
        .map(|(_, label)| label.to_string())
        .collect()
}
