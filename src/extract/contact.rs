//! Baseline regex extractor for phone numbers and email addresses.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::{ExtractionOutcome, Extractor};
use crate::dedup::keys::{normalize_email, normalize_phone};
use crate::learning::LearnedPatterns;
use crate::models::{FetchTarget, Lead};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
});

/// International (`+`, `00`) or trunk-prefixed (`0`) numbers with common separators.
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+|\b00|\b0)\d[\d \-/().]{5,18}\d").unwrap()
});

const MAX_PHONE_DIGITS: usize = 15;

/// Finds emails and phone numbers in page text, `mailto:`/`tel:` links and
/// anything the learned pattern set matches.
pub struct ContactExtractor {
    learned: LearnedPatterns,
}

impl ContactExtractor {
    pub fn new(learned: LearnedPatterns) -> Self {
        Self { learned }
    }

    fn phones(&self, text: &str, links: &[String]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut keys: Vec<String> = Vec::new();
        let candidates = links
            .iter()
            .filter_map(|l| l.strip_prefix("tel:").map(|s| s.to_string()))
            .chain(PHONE.find_iter(text).map(|m| m.as_str().to_string()))
            .chain(self.learned.find_all(text));

        for candidate in candidates {
            let candidate = candidate.trim().to_string();
            let digit_count = candidate.chars().filter(|c| c.is_ascii_digit()).count();
            if digit_count > MAX_PHONE_DIGITS {
                continue;
            }
            if let Some(key) = normalize_phone(&candidate) {
                if !keys.contains(&key) {
                    keys.push(key);
                    found.push(candidate);
                }
            }
        }
        found
    }

    fn emails(&self, text: &str, links: &[String]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let candidates = links
            .iter()
            .filter_map(|l| l.strip_prefix("mailto:"))
            .map(|s| s.split('?').next().unwrap_or_default().to_string())
            .chain(EMAIL.find_iter(text).map(|m| m.as_str().to_string()));
        for candidate in candidates {
            if let Some(email) = normalize_email(&candidate) {
                if !found.contains(&email) {
                    found.push(email);
                }
            }
        }
        found
    }
}

struct Document {
    text: String,
    title: Option<String>,
    links: Vec<String>,
}

fn parse_document(body: &str) -> Document {
    let html = Html::parse_document(body);
    let text = html
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let title = Selector::parse("title").ok().and_then(|sel| {
        html.select(&sel)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    let links = Selector::parse("a[href]")
        .map(|sel| {
            html.select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .filter(|h| h.starts_with("tel:") || h.starts_with("mailto:"))
                .map(|h| urlencoding::decode(h).map(|s| s.into_owned()).unwrap_or_else(|_| h.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Document { text, title, links }
}

impl Extractor for ContactExtractor {
    fn extract(&self, body: &str, target: &FetchTarget) -> ExtractionOutcome {
        if body.trim().is_empty() {
            return ExtractionOutcome::NotFound;
        }
        let doc = parse_document(body);
        let phones = self.phones(&doc.text, &doc.links);
        let emails = self.emails(&doc.text, &doc.links);
        if phones.is_empty() && emails.is_empty() {
            return ExtractionOutcome::NotFound;
        }

        // Pair contacts in page order; leftovers become single-field leads.
        let count = phones.len().max(emails.len());
        let leads: Vec<Lead> = (0..count)
            .filter_map(|i| {
                let mut lead = Lead::new(&target.url);
                lead.title = doc.title.clone();
                lead.phone = phones.get(i).cloned();
                lead.email = emails.get(i).cloned();
                lead.score = match (&lead.phone, &lead.email) {
                    (Some(_), Some(_)) => 1.0,
                    (Some(_), None) => 0.7,
                    _ => 0.4,
                };
                lead.validate().ok()
            })
            .collect();

        if leads.is_empty() {
            ExtractionOutcome::NotFound
        } else {
            ExtractionOutcome::Found(leads)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> FetchTarget {
        FetchTarget::new("https://example.com/kontakt", None).unwrap()
    }

    #[test]
    fn finds_phone_and_email_in_html() {
        let extractor = ContactExtractor::new(LearnedPatterns::new());
        let body = r#"<html><head><title>Malerbetrieb Schmidt</title></head>
            <body><p>Rufen Sie an: 030 / 123 45 67</p>
            <a href="mailto:info@schmidt-maler.de?subject=Anfrage">Mail</a></body></html>"#;

        let outcome = extractor.extract(body, &target());
        let leads = outcome.leads();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].phone.as_deref(), Some("030 / 123 45 67"));
        assert_eq!(leads[0].email.as_deref(), Some("info@schmidt-maler.de"));
        assert_eq!(leads[0].title.as_deref(), Some("Malerbetrieb Schmidt"));
        assert_eq!(leads[0].source_url, "https://example.com/kontakt");
        assert_eq!(leads[0].score, 1.0);
    }

    #[test]
    fn tel_links_and_duplicates() {
        let extractor = ContactExtractor::new(LearnedPatterns::new());
        let body = r#"<a href="tel:+49301234567">+49 30 1234567</a> oder +49 30 1234567"#;
        let outcome = extractor.extract(body, &target());
        assert_eq!(outcome.leads().len(), 1);
        assert!(outcome.leads()[0].has_phone());
    }

    #[test]
    fn nothing_found() {
        let extractor = ContactExtractor::new(LearnedPatterns::new());
        assert_eq!(
            extractor.extract("<p>Keine Kontaktdaten</p>", &target()),
            ExtractionOutcome::NotFound
        );
        assert_eq!(extractor.extract("   ", &target()), ExtractionOutcome::NotFound);
    }

    #[test]
    fn learned_patterns_extend_matching() {
        let learned = LearnedPatterns::new();
        let extractor = ContactExtractor::new(learned.clone());
        // No leading 0 or +, so the baseline regex misses it.
        let body = "Hotline 555.123.4567";
        assert_eq!(extractor.extract(body, &target()), ExtractionOutcome::NotFound);

        learned.insert("XXX.XXX.XXXX", r"\d{3}\.\d{3}\.\d{4}");
        let outcome = extractor.extract(body, &target());
        assert_eq!(outcome.leads()[0].phone.as_deref(), Some("555.123.4567"));
    }

    #[test]
    fn snippet_text_works_without_markup() {
        let extractor = ContactExtractor::new(LearnedPatterns::new());
        let outcome = extractor.extract("Elektro Meier Köln - kontakt@meier.de", &target());
        assert_eq!(outcome.leads()[0].email.as_deref(), Some("kontakt@meier.de"));
        assert_eq!(outcome.leads()[0].score, 0.4);
    }
}
