//! Field → category slug mapping used by the category scope.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

/// Which category pages list brokers by a given broker field.
///
/// Registering a new category only needs a new entry here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CategoryImpactMap {
    fields: BTreeMap<String, Vec<String>>,
}

impl CategoryImpactMap {
    pub fn new(fields: BTreeMap<String, Vec<String>>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Add slugs affected by `field`, keeping any already registered.
    pub fn register<I, S>(&mut self, field: impl Into<String>, slugs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.fields.entry(field.into()).or_default();
        for slug in slugs {
            let slug = slug.into();
            if !entry.contains(&slug) {
                entry.push(slug);
            }
        }
    }

    /// Slugs affected by any of `fields`, deduplicated and sorted.
    pub fn slugs_for<S: AsRef<str>>(&self, fields: &[S]) -> BTreeSet<String> {
        fields
            .iter()
            .filter_map(|field| self.fields.get(field.as_ref()))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for CategoryImpactMap {
    fn default() -> Self {
        let mut map = Self::empty();
        map.register(
            "regulation",
            ["ecn-brokers", "stp-brokers", "usa-traders", "uk-fca-regulated"],
        );
        map.register(
            "minDeposit",
            ["no-minimum-deposit", "low-deposit", "100-deposit"],
        );
        map.register(
            "platforms",
            ["metatrader4-mt4", "metatrader5-mt5", "ctrader"],
        );
        map.register("islamicAccount", ["islamic-swap-free"]);
        map.register("copyTrading", ["copy-trading"]);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_covers_listing_fields() {
        let map = CategoryImpactMap::default();
        assert_eq!(map.len(), 5);

        let slugs = map.slugs_for(&["regulation"]);
        assert!(slugs.contains("ecn-brokers"));
        assert!(slugs.contains("usa-traders"));
        assert_eq!(slugs.len(), 4);
    }

    #[test]
    fn slugs_are_deduplicated_across_fields() {
        let mut map = CategoryImpactMap::default();
        map.register("spreads", ["ecn-brokers"]);

        let slugs = map.slugs_for(&["regulation", "spreads", "unknownField"]);
        assert_eq!(slugs.len(), 4);
    }

    #[test]
    fn unmapped_fields_affect_nothing() {
        let map = CategoryImpactMap::default();
        assert!(map.slugs_for(&["logo", "description"]).is_empty());
    }

    #[test]
    fn register_extends_without_duplicates() {
        let mut map = CategoryImpactMap::empty();
        map.register("platforms", ["ctrader"]);
        map.register("platforms", ["ctrader", "tradingview"]);
        assert_eq!(
            map.slugs_for(&["platforms"]).into_iter().collect::<Vec<_>>(),
            vec!["ctrader", "tradingview"]
        );
    }
}
