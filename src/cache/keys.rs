//! Cache key construction and key matching.
//!
//! Keys have the shape `programmatic:{type}:{slug}` with `:{filterHash}`
//! appended when a non-empty filter object is supplied. The filter hash is
//! derived from the filters sorted by name, so key order never matters.

use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::page::PageType;

/// Prefix shared by every programmatic page key.
pub const KEY_PREFIX: &str = "programmatic";

const FILTER_HASH_LEN: usize = 16;

/// Build the deterministic cache key for `(type, slug, filters)`.
///
/// Filters that are not a JSON object cannot be canonicalized; they are treated
/// as an empty filter set and a warning is logged.
pub fn cache_key(page_type: PageType, slug: &str, filters: Option<&Value>) -> String {
    let base = format!("{KEY_PREFIX}:{page_type}:{slug}");
    match canonical_filters(page_type, slug, filters) {
        Some(map) => match filter_hash(map) {
            Some(hash) => format!("{base}:{hash}"),
            None => base,
        },
        None => base,
    }
}

/// Hash a filter object into a short, stable hex digest.
///
/// Returns `None` for an empty object.
pub fn filter_hash(filters: &Map<String, Value>) -> Option<String> {
    if filters.is_empty() {
        return None;
    }

    let mut names: Vec<&String> = filters.keys().collect();
    names.sort();

    let serialized = names
        .into_iter()
        .map(|name| format!("{name}:{}", render_filter_value(&filters[name.as_str()])))
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FILTER_HASH_LEN);
    Some(digest)
}

fn canonical_filters<'a>(
    page_type: PageType,
    slug: &str,
    filters: Option<&'a Value>,
) -> Option<&'a Map<String, Value>> {
    match filters {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            warn!(
                page_type = %page_type,
                slug,
                filters_kind = value_kind(other),
                "Malformed page filters treated as empty filter set"
            );
            None
        }
    }
}

fn render_filter_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A key selector for [`PageCache::invalidate`](super::PageCache::invalidate).
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Matches keys containing the text.
    Substring(String),
    /// Matches keys the expression finds a match in.
    Regex(Regex),
}

impl KeyPattern {
    pub fn substring(text: impl Into<String>) -> Self {
        Self::Substring(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    /// Glob pattern over the whole key where `*` matches any run of characters.
    ///
    /// `programmatic:*` selects every page key.
    pub fn glob(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Self::regex(&format!("^{body}$"))
    }

    /// Category and SEO pages for one slug, with or without a filter hash.
    pub fn category_slug(slug: &str) -> Result<Self, regex::Error> {
        Self::regex(&format!(
            "^{KEY_PREFIX}:(category|seo):{}(:|$)",
            regex::escape(slug)
        ))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Substring(text) => key.contains(text.as_str()),
            KeyPattern::Regex(regex) => regex.is_match(key),
        }
    }
}

impl From<Regex> for KeyPattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Substring(text) => write!(f, "contains({text})"),
            KeyPattern::Regex(regex) => write!(f, "regex({})", regex.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_without_filters_has_no_hash() {
        assert_eq!(
            cache_key(PageType::Category, "ecn-brokers", None),
            "programmatic:category:ecn-brokers"
        );
        assert_eq!(
            cache_key(PageType::Country, "uk", Some(&json!({}))),
            "programmatic:country:uk"
        );
        assert_eq!(
            cache_key(PageType::Country, "uk", Some(&Value::Null)),
            "programmatic:country:uk"
        );
    }

    #[test]
    fn filter_order_does_not_change_key() {
        let a = json!({"country": "uk", "minDeposit": 100, "platforms": ["mt4", "mt5"]});
        let b = json!({"platforms": ["mt4", "mt5"], "minDeposit": 100, "country": "uk"});

        let key_a = cache_key(PageType::Seo, "best-brokers", Some(&a));
        let key_b = cache_key(PageType::Seo, "best-brokers", Some(&b));

        assert_eq!(key_a, key_b);
        let hash = key_a.rsplit(':').next().unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_filters_produce_different_keys() {
        let uk = cache_key(PageType::Category, "low-deposit", Some(&json!({"country": "uk"})));
        let de = cache_key(PageType::Category, "low-deposit", Some(&json!({"country": "de"})));
        assert_ne!(uk, de);
    }

    #[test]
    fn malformed_filters_fall_back_to_base_key() {
        let key = cache_key(PageType::Category, "copy-trading", Some(&json!(["uk", "de"])));
        assert_eq!(key, "programmatic:category:copy-trading");

        let key = cache_key(PageType::Category, "copy-trading", Some(&json!("uk")));
        assert_eq!(key, "programmatic:category:copy-trading");
    }

    #[test]
    fn glob_matches_whole_key() {
        let pattern = KeyPattern::glob("programmatic:*").unwrap();
        assert!(pattern.matches("programmatic:category:ecn-brokers"));
        assert!(!pattern.matches("legacy:programmatic:category"));

        let pattern = KeyPattern::glob("programmatic:country:*").unwrap();
        assert!(pattern.matches("programmatic:country:uk"));
        assert!(!pattern.matches("programmatic:seo:uk"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let pattern = KeyPattern::glob("programmatic:seo:a.b*").unwrap();
        assert!(pattern.matches("programmatic:seo:a.b-c"));
        assert!(!pattern.matches("programmatic:seo:axb-c"));
    }

    #[test]
    fn category_slug_pattern_respects_slug_boundary() {
        let pattern = KeyPattern::category_slug("low-deposit").unwrap();
        assert!(pattern.matches("programmatic:category:low-deposit"));
        assert!(pattern.matches("programmatic:seo:low-deposit:0123456789abcdef"));
        assert!(!pattern.matches("programmatic:category:low-deposit-europe"));
        assert!(!pattern.matches("programmatic:country:low-deposit"));
    }

    #[test]
    fn substring_pattern_matches_anywhere() {
        let pattern = KeyPattern::substring("country:uk");
        assert!(pattern.matches("programmatic:country:uk"));
        assert!(pattern.matches("programmatic:country:uk:abcdef"));
        assert!(!pattern.matches("programmatic:country:us"));
    }
}
