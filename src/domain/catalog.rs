//! Attribute catalogs mapping human attribute names to SenML short keys.

use crate::error::{ExportError, Result};

/// Attributes of raw data points.
const DATA_ATTRIBUTES: &[(&str, &str)] = &[
    ("name", "n"),
    ("time", "t"),
    ("value", "v"),
    ("unit", "u"),
];

/// Attributes of aggregated points. The aggregation's operators are added per
/// aggregation, see [`crate::domain::job`].
const AGGR_ATTRIBUTES: &[(&str, &str)] = &[("name", "n"), ("starttime", "ts"), ("endtime", "te")];

/// Short keys that carry epoch-second timestamps in data responses.
pub const DATA_TIME_KEYS: &[&str] = &["t"];

/// Short keys that carry epoch-second timestamps in aggregation responses.
pub const AGGR_TIME_KEYS: &[&str] = &["ts", "te"];

/// Ordered projection of wire keys. Position in the list is the output column.
pub type Projection = Vec<String>;

/// Immutable mapping `name -> wire key`.
///
/// Names are case-sensitive and matched exactly. Every wire key is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCatalog {
    entries: Vec<(String, String)>,
}

impl AttributeCatalog {
    /// Catalog for raw data exports.
    pub fn data() -> Self {
        Self::from_static(DATA_ATTRIBUTES)
    }

    /// Catalog for aggregation exports.
    pub fn aggregation() -> Self {
        Self::from_static(AGGR_ATTRIBUTES)
    }

    fn from_static(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(name, key)| (name.to_string(), key.to_string()))
                .collect(),
        }
    }

    /// Build a catalog from arbitrary entries, rejecting duplicate names or wire keys.
    pub fn from_entries<I, N, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, K)>,
        N: Into<String>,
        K: Into<String>,
    {
        let mut catalog = Self { entries: Vec::new() };
        for (name, key) in entries {
            let (name, key) = (name.into(), key.into());
            if catalog.key_of(&name).is_some() || catalog.entries.iter().any(|(_, k)| *k == key) {
                return Err(anyhow::anyhow!("duplicate catalog entry {name} -> {key}").into());
            }
            catalog.entries.push((name, key));
        }
        Ok(catalog)
    }

    /// Wire key for an attribute name.
    pub fn key_of(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| k.as_str())
    }

    /// Attribute names in catalog order; this is the default selection.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Resolve requested names into a projection, preserving the caller's order.
    ///
    /// The whole request is rejected on the first unknown name.
    pub fn validate<S: AsRef<str>>(&self, requested: &[S]) -> Result<Projection> {
        requested
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.key_of(name)
                    .map(str::to_string)
                    .ok_or_else(|| ExportError::InvalidAttribute(name.to_string()))
            })
            .collect()
    }
}

/// Split a comma separated attribute list after removing all whitespace.
///
/// `"name, time ,value"` yields `["name", "time", "value"]`; an empty or blank
/// string yields an empty list.
pub fn parse_attribute_list(raw: &str) -> Vec<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Vec::new();
    }
    compact.split(',').map(str::to_string).collect()
}
