//! Aggregation descriptors and their grouping across data sources.
//!
//! The registry attaches a list of aggregations to every data source. The same
//! aggregation (same id) is usually configured on several sources, and an
//! aggregation export runs it for each of them. Grouping folds the per-source
//! lists into one [`AggregationGroup`] per id, remembering which sources carry it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Retention text shown when sources disagree on the retention of one aggregation.
pub const MULTIPLE_DURATIONS: &str = "multiple durations";

/// An aggregation configured on one data source, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationDescriptor {
    pub id: String,
    /// Operators computed on each interval (e.g. `mean`, `max`)
    #[serde(rename = "aggregates", default)]
    pub operators: Vec<String>,
    pub interval: String,
    /// Retention duration; empty means infinite
    #[serde(default)]
    pub retention: String,
}

/// Retention of a group of aggregations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    Infinite,
    Duration(String),
    /// Contributing sources disagree. Never reverts once reached.
    Multiple,
}

impl Retention {
    fn from_descriptor(raw: &str) -> Self {
        if raw.is_empty() {
            Retention::Infinite
        } else {
            Retention::Duration(raw.to_string())
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retention::Infinite => write!(f, "∞"),
            Retention::Duration(d) => write!(f, "{d}"),
            Retention::Multiple => write!(f, "{MULTIPLE_DURATIONS}"),
        }
    }
}

/// One aggregation id and every selected source that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationGroup {
    pub id: String,
    pub operators: Vec<String>,
    pub interval: String,
    pub retention: Retention,
    /// Sources in the order they were visited
    pub sources: Vec<String>,
}

impl AggregationGroup {
    fn new(descriptor: &AggregationDescriptor, source_id: &str) -> Self {
        Self {
            id: descriptor.id.clone(),
            operators: descriptor.operators.clone(),
            interval: descriptor.interval.clone(),
            retention: Retention::from_descriptor(&descriptor.retention),
            sources: vec![source_id.to_string()],
        }
    }

    fn absorb(&mut self, descriptor: &AggregationDescriptor, source_id: &str) -> Result<()> {
        let field = if descriptor.operators != self.operators {
            Some("operators")
        } else if descriptor.interval != self.interval {
            Some("interval")
        } else {
            None
        };
        if let Some(field) = field {
            tracing::warn!(
                aggregation = %self.id,
                source = %source_id,
                field,
                "Aggregation descriptor disagrees with first-seen descriptor"
            );
            return Err(ExportError::InconsistentAggregation {
                id: self.id.clone(),
                source_id: source_id.to_string(),
                field,
            });
        }

        self.sources.push(source_id.to_string());
        if self.retention != Retention::from_descriptor(&descriptor.retention) {
            self.retention = Retention::Multiple;
        }
        Ok(())
    }

    /// Human readable summary, e.g. `mean, max every 1h. Retention: ∞ (3 sources)`.
    pub fn summary(&self) -> String {
        format!(
            "{} every {}. Retention: {} ({} sources)",
            self.operators.join(", "),
            self.interval,
            self.retention,
            self.sources.len()
        )
    }
}

/// Aggregation groups in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationGroups {
    groups: Vec<AggregationGroup>,
}

impl AggregationGroups {
    /// Fold per-source descriptor lists into groups.
    ///
    /// Sources are visited in the given order. The first descriptor seen for an id
    /// defines operators and interval; a later descriptor for the same id that
    /// disagrees on either fails with [`ExportError::InconsistentAggregation`].
    pub fn group<'a, I>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [AggregationDescriptor])>,
    {
        let mut groups = Self::default();
        for (source_id, descriptors) in sources {
            for descriptor in descriptors {
                match groups.groups.iter_mut().find(|g| g.id == descriptor.id) {
                    Some(group) => group.absorb(descriptor, source_id)?,
                    None => groups.groups.push(AggregationGroup::new(descriptor, source_id)),
                }
            }
        }
        tracing::debug!(groups = groups.groups.len(), "Grouped aggregations");
        Ok(groups)
    }

    pub fn get(&self, id: &str) -> Option<&AggregationGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregationGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
