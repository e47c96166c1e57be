//! Dedup key derivation.

use sha2::{Digest, Sha256};

use crate::models::Lead;

/// Minimum similarity for two name+city strings to count as the same lead.
pub const NAME_CITY_SIMILARITY: f64 = 0.85;

/// Fuzzy candidates must share this many leading characters of the city.
pub const CITY_PREFIX_LEN: usize = 3;

const PHONE_KEY_DIGITS: usize = 10;
const PHONE_MIN_DIGITS: usize = 7;

/// Phone key: the last 10 digits. `None` if the value has too few digits
/// to be a phone number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < PHONE_MIN_DIGITS {
        return None;
    }
    let start = digits.len().saturating_sub(PHONE_KEY_DIGITS);
    Some(digits[start..].iter().collect())
}

/// Email key: trimmed and lowercased. `None` without an `@`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.len() < 3 || !email.contains('@') {
        return None;
    }
    Some(email)
}

/// Lowercase, keep letters and digits, collapse whitespace.
pub fn normalize_text(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn city_prefix(city_norm: &str) -> String {
    city_norm.chars().take(CITY_PREFIX_LEN).collect()
}

/// Similarity in `[0, 1]` between two normalized name+city strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Normalized name and city with their exact-match hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCityKey {
    pub hash: String,
    pub name_norm: String,
    pub city_norm: String,
    pub city_prefix: String,
}

impl NameCityKey {
    pub fn new(name: &str, city: &str) -> Option<Self> {
        let name_norm = normalize_text(name);
        let city_norm = normalize_text(city);
        if name_norm.is_empty() || city_norm.is_empty() {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(name_norm.as_bytes());
        hasher.update(b"|");
        hasher.update(city_norm.as_bytes());
        Some(Self {
            hash: hex::encode(hasher.finalize()),
            city_prefix: city_prefix(&city_norm),
            name_norm,
            city_norm,
        })
    }

    /// The string compared during fuzzy matching.
    pub fn combined(&self) -> String {
        format!("{} {}", self.name_norm, self.city_norm)
    }
}

/// Every dedup key a lead can be indexed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadKeys {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name_city: Option<NameCityKey>,
}

impl LeadKeys {
    pub fn from_lead(lead: &Lead) -> Self {
        let name_city = match (lead.name.as_deref(), lead.city.as_deref()) {
            (Some(name), Some(city)) => NameCityKey::new(name, city),
            _ => None,
        };
        Self {
            phone: lead.phone.as_deref().and_then(normalize_phone),
            email: lead.email.as_deref().and_then(normalize_email),
            name_city,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.name_city.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_keeps_last_ten_digits() {
        assert_eq!(normalize_phone("+49 30 1234567").as_deref(), Some("9301234567"));
        assert_eq!(normalize_phone("(030) 123-4567").as_deref(), Some("0301234567"));
        assert_eq!(
            normalize_phone("+49 (0) 30 1234567"),
            normalize_phone("0049 030 1234567")
        );
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("call me"), None);
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM ").as_deref(),
            Some("jane.doe@example.com")
        );
        assert_eq!(normalize_email("not-an-email"), None);
    }

    #[test]
    fn text_normalization() {
        assert_eq!(normalize_text("  Müller-Lüdenscheidt,  GmbH "), "müller lüdenscheidt gmbh");
        assert_eq!(city_prefix("münchen"), "mün");
        assert_eq!(city_prefix("ab"), "ab");
    }

    #[test]
    fn name_city_key_requires_both() {
        assert!(NameCityKey::new("Jane", "").is_none());
        assert!(NameCityKey::new("", "Berlin").is_none());

        let a = NameCityKey::new("Jane Doe", "Berlin").unwrap();
        let b = NameCityKey::new(" jane   DOE ", "berlin").unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.city_prefix, "ber");
        assert_eq!(a.combined(), "jane doe berlin");
    }

    #[test]
    fn similarity_threshold() {
        let a = NameCityKey::new("Jonathan Miller", "Hamburg").unwrap();
        let b = NameCityKey::new("Jonathon Miller", "Hamburg").unwrap();
        let c = NameCityKey::new("Sarah Connor", "Hamburg").unwrap();
        assert!(similarity(&a.combined(), &b.combined()) >= NAME_CITY_SIMILARITY);
        assert!(similarity(&a.combined(), &c.combined()) < NAME_CITY_SIMILARITY);
    }

    #[test]
    fn lead_keys() {
        let lead = Lead::new("u")
            .with_phone("030 1234567")
            .with_email("A@B.de")
            .with_name("Jane")
            .with_city("Köln");
        let keys = LeadKeys::from_lead(&lead);
        assert_eq!(keys.phone.as_deref(), Some("0301234567"));
        assert_eq!(keys.email.as_deref(), Some("a@b.de"));
        assert!(keys.name_city.is_some());
        assert!(LeadKeys::from_lead(&Lead::new("u").with_name("Jane")).is_empty());
    }
}
