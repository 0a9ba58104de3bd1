use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalize a header name the way every lookup and insert does
pub fn normalize_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Immutable, case-insensitive header bag
///
/// Header names are trimmed and lowercased on every read and write, so
/// `"X-Test"` and `" x-test "` address the same entry. Every operation that
/// changes the contents returns a new `Metadata`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    /// Create an empty header bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `name` set to `value`, replacing any previous value
    pub fn with_header(&self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(normalize_key(name.as_ref()), value.into());
        Self { entries }
    }

    /// Return a copy without `name`
    pub fn without_header(&self, name: impl AsRef<str>) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(&normalize_key(name.as_ref()));
        Self { entries }
    }

    /// Look up a header, ignoring case and surrounding whitespace in `name`
    pub fn get_header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.entries
            .get(&normalize_key(name.as_ref()))
            .map(String::as_str)
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.entries.contains_key(&normalize_key(name.as_ref()))
    }

    /// Combine two bags; entries of `other` win on conflicting names
    pub fn merge(&self, other: &Metadata) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(
            other
                .entries
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(normalized name, value)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(name, value)| (normalize_key(name.as_ref()), value.into()))
            .collect();
        Self { entries }
    }
}

// Keys arriving off the wire are not trusted to be normalized.
impl From<BTreeMap<String, String>> for Metadata {
    fn from(entries: BTreeMap<String, String>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Metadata> for BTreeMap<String, String> {
    fn from(metadata: Metadata) -> Self {
        metadata.entries
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
