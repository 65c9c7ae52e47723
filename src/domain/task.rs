//! Fetch tasks: one entity to retrieve through all of its result pages.

use std::fmt;

use serde::Serialize;

use super::catalog::{AGGR_TIME_KEYS, DATA_TIME_KEYS, Projection};

/// The unit of one fetch task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum EntityKey {
    /// Raw data of one source
    Source(String),
    /// One aggregation of one source
    Aggregation {
        aggregation_id: String,
        source_id: String,
    },
}

impl EntityKey {
    /// Wire endpoint path for this entity.
    pub fn path(&self) -> String {
        match self {
            EntityKey::Source(id) => format!("/data/{id}"),
            EntityKey::Aggregation {
                aggregation_id,
                source_id,
            } => format!("/aggr/{aggregation_id}/{source_id}"),
        }
    }

    /// Short keys whose values are epoch-second timestamps.
    pub fn time_keys(&self) -> &'static [&'static str] {
        match self {
            EntityKey::Source(_) => DATA_TIME_KEYS,
            EntityKey::Aggregation { .. } => AGGR_TIME_KEYS,
        }
    }

    pub fn aggregation_id(&self) -> Option<&str> {
        match self {
            EntityKey::Source(_) => None,
            EntityKey::Aggregation { aggregation_id, .. } => Some(aggregation_id),
        }
    }
}

/// `<sourceId>` or `<aggregationId>_<sourceId>`; also the archive member stem.
impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Source(id) => write!(f, "{id}"),
            EntityKey::Aggregation {
                aggregation_id,
                source_id,
            } => write!(f, "{aggregation_id}_{source_id}"),
        }
    }
}

/// One entity to fetch with its attribute projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchTask {
    pub entity: EntityKey,
    pub attributes: Projection,
}

impl FetchTask {
    pub fn source(id: impl Into<String>, attributes: Projection) -> Self {
        Self {
            entity: EntityKey::Source(id.into()),
            attributes,
        }
    }

    pub fn aggregation(
        aggregation_id: impl Into<String>,
        source_id: impl Into<String>,
        attributes: Projection,
    ) -> Self {
        Self {
            entity: EntityKey::Aggregation {
                aggregation_id: aggregation_id.into(),
                source_id: source_id.into(),
            },
            attributes,
        }
    }
}
