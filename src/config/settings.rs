//! Key/value settings and the merge that produces the effective configuration.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
}

/// Ordered set of string settings with case-insensitive keys.
///
/// Keys are normalized to lowercase for lookup and ordering; the spelling used
/// by the last writer is kept for iteration and display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    entries: BTreeMap<String, Entry>,
}

impl Configuration {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by key (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&normalize(key))
            .map(|entry| entry.value.as_str())
    }

    /// Interpret a value as a boolean.
    ///
    /// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case. Returns
    /// `None` when the key is absent or the value is not boolean-like.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    /// Set a value, replacing any existing value for the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        self.entries.insert(
            normalize(&key),
            Entry {
                key,
                value: value.into(),
            },
        );
        self
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&normalize(key)).map(|entry| entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    /// Iterate over `(key, value)` pairs in normalized key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|entry| (entry.key.as_str(), entry.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every setting of `other` on top of this configuration.
    pub fn extend_from(&mut self, other: &Configuration) -> &mut Self {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
        self
    }
}

impl<K, V> FromIterator<(K, V)> for Configuration
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut configuration = Configuration::new();
        configuration.extend(iter);
        configuration
    }
}

impl<K, V> Extend<(K, V)> for Configuration
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

/// Merge the three configuration layers into the effective configuration.
///
/// Precedence: `settings` > `external` > `base`. Keys present in only one
/// layer pass through unchanged.
pub fn merge(
    base: &Configuration,
    external: Option<&Configuration>,
    settings: &Configuration,
) -> Configuration {
    let mut effective = base.clone();
    if let Some(external) = external {
        effective.extend_from(external);
    }
    effective.extend_from(settings);
    effective
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut config = Configuration::new();
        config.set("Server.Urls", "http://a");
        assert_eq!(config.get("server.urls"), Some("http://a"));

        config.set("SERVER.URLS", "http://b");
        assert_eq!(config.len(), 1);
        assert_eq!(config.iter().next(), Some(("SERVER.URLS", "http://b")));
    }

    #[test]
    fn merge_precedence() {
        let base: Configuration = [("environment", "base"), ("only_base", "1")]
            .into_iter()
            .collect();
        let external: Configuration = [("environment", "external"), ("only_external", "2")]
            .into_iter()
            .collect();
        let settings: Configuration = [("Environment", "explicit")].into_iter().collect();

        let merged = merge(&base, Some(&external), &settings);
        assert_eq!(merged.get("environment"), Some("explicit"));
        assert_eq!(merged.get("only_base"), Some("1"));
        assert_eq!(merged.get("only_external"), Some("2"));

        let merged = merge(&base, Some(&external), &Configuration::new());
        assert_eq!(merged.get("environment"), Some("external"));

        let merged = merge(&base, None, &Configuration::new());
        assert_eq!(merged.get("environment"), Some("base"));
    }

    #[test]
    fn merge_of_empty_inputs_is_empty() {
        let merged = merge(&Configuration::new(), None, &Configuration::new());
        assert!(merged.is_empty());
    }

    #[test]
    fn boolean_like_values() {
        let config: Configuration = [("a", "TRUE"), ("b", "0"), ("c", "maybe")]
            .into_iter()
            .collect();
        assert_eq!(config.get_bool("a"), Some(true));
        assert_eq!(config.get_bool("b"), Some(false));
        assert_eq!(config.get_bool("c"), None);
        assert_eq!(config.get_bool("missing"), None);
    }
}
