//! Link extraction from generated text.
//!
//! Feedback is given per link, so callers need the links present in the
//! output. Bare `www.` hosts are promoted to `https://`.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

static LINK_RE: OnceLock<Regex> = OnceLock::new();

fn link_regex() -> &'static Regex {
    LINK_RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>\[\]"'`]+"#)
            .unwrap_or_else(|e| panic!("link pattern is invalid: {e}"))
    })
}

/// Strip trailing punctuation and any `)` without a matching `(`, so
/// `(see https://a.example/x).` and `[t](https://a.example/x)` both yield
/// the bare link while `https://a.example/Foo_(bar)` stays whole.
fn trim_tail(raw: &str) -> &str {
    let mut link = raw;
    loop {
        link = link.trim_end_matches(['.', ',', ';', ':', '!', '?', '*']);
        let unbalanced = link.matches(')').count() > link.matches('(').count();
        match link.strip_suffix(')') {
            Some(shorter) if unbalanced => link = shorter,
            _ => return link,
        }
    }
}

/// Links in order of first appearance, de-duplicated.
pub fn extract_links(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for m in link_regex().find_iter(text) {
        // Don't promote the tail of an e-mail address like "me@www.host"
        if m.start() > 0 && text.as_bytes()[m.start() - 1] == b'@' {
            continue;
        }

        let raw = trim_tail(m.as_str());
        let candidate = if raw.len() >= 4 && raw[..4].eq_ignore_ascii_case("www.") {
            format!("https://{raw}")
        } else {
            raw.to_string()
        };

        match Url::parse(&candidate) {
            Ok(url) if url.host_str().is_some() => {
                if seen.insert(candidate.clone()) {
                    links.push(candidate);
                }
            }
            _ => log::trace!("Skipping unparseable link candidate {candidate:?}"),
        }
    }

    links
}
