//! Export jobs: validated, immutable export requests.
//!
//! A job is built from the raw user selection (comma separated attribute lists
//! and date picker strings). Validation happens here, before any network call:
//! an unknown attribute rejects the whole job.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::aggregation::{AggregationGroup, AggregationGroups};
use super::catalog::{AttributeCatalog, Projection, parse_attribute_list};
use super::task::FetchTask;
use crate::error::{ExportError, Result};

/// Date picker format of the start/end inputs; a `Z` is appended on submit.
const PICKER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// What kind of data a job exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    Raw,
    Aggregation,
}

/// Layout of the produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// All rows of all entities concatenated into `export.csv`
    #[default]
    SingleFile,
    /// One `<entity>.csv` per entity inside `export.zip`
    PerEntityZip,
    /// One `<aggregationId>.csv` per aggregation inside `export.zip`, merging its sources
    PerAggregationZip,
}

/// How timestamp fields are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    /// The wire value passes through unchanged
    #[default]
    EpochSeconds,
    /// `2021-01-01T00:00:00.000Z`
    Iso8601,
}

/// Inclusive time range. An absent bound is sent as an empty query value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TimeRange {
    /// Parse date picker values (`YYYY-MM-DDTHH:MM:SS`, optionally already ending in `Z`).
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = parse_bound(start)?;
        let end = parse_bound(end)?;
        if let (Some((s, _)), Some((e, _))) = (&start, &end)
            && s > e
        {
            return Err(ExportError::InvalidTimeRange(format!(
                "start {s} is after end {e}"
            )));
        }
        Ok(Self {
            start: start.map(|(_, text)| text),
            end: end.map(|(_, text)| text),
        })
    }

    pub fn start_param(&self) -> &str {
        self.start.as_deref().unwrap_or("")
    }

    pub fn end_param(&self) -> &str {
        self.end.as_deref().unwrap_or("")
    }
}

fn parse_bound(raw: &str) -> Result<Option<(NaiveDateTime, String)>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let bare = raw.strip_suffix('Z').unwrap_or(raw);
    let parsed = NaiveDateTime::parse_from_str(bare, PICKER_FORMAT)
        .map_err(|e| ExportError::InvalidTimeRange(format!("{raw}: {e}")))?;
    Ok(Some((parsed, format!("{bare}Z"))))
}

/// Raw selection for a data export, as entered by the user.
#[derive(Debug, Clone, Default)]
pub struct DataSelection {
    /// Comma separated attribute names
    pub attributes: String,
    pub start: String,
    pub end: String,
    pub output: OutputMode,
    pub time_format: TimeFormat,
    /// Sources to export, already filtered and ordered by the caller
    pub sources: Vec<String>,
}

/// One checked aggregation with its comma separated attribute list.
#[derive(Debug, Clone)]
pub struct AggregationChoice {
    pub aggregation_id: String,
    pub attributes: String,
}

/// Raw selection for an aggregation export.
#[derive(Debug, Clone, Default)]
pub struct AggregationSelection {
    pub choices: Vec<AggregationChoice>,
    pub start: String,
    pub end: String,
    pub output: OutputMode,
    pub time_format: TimeFormat,
}

/// Projection for one aggregation and the sources to run it on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationProjection {
    pub aggregation_id: String,
    pub sources: Vec<String>,
    pub attributes: Projection,
}

/// The entities to export and how to project them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExportTarget {
    Raw {
        sources: Vec<String>,
        attributes: Projection,
    },
    Aggregation {
        aggregations: Vec<AggregationProjection>,
    },
}

/// A validated export request. Immutable once fetching starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportJob {
    pub target: ExportTarget,
    pub time_range: TimeRange,
    pub output_mode: OutputMode,
    pub time_format: TimeFormat,
}

impl ExportJob {
    pub fn mode(&self) -> ExportMode {
        match self.target {
            ExportTarget::Raw { .. } => ExportMode::Raw,
            ExportTarget::Aggregation { .. } => ExportMode::Aggregation,
        }
    }

    /// Expand the job into its FIFO task queue.
    ///
    /// Raw jobs yield one task per source. Aggregation jobs yield one task per
    /// (aggregation, source) pair, aggregations in grouping order and sources in
    /// group order.
    pub fn tasks(&self) -> Vec<FetchTask> {
        match &self.target {
            ExportTarget::Raw {
                sources,
                attributes,
            } => sources
                .iter()
                .map(|id| FetchTask::source(id.clone(), attributes.clone()))
                .collect(),
            ExportTarget::Aggregation { aggregations } => aggregations
                .iter()
                .flat_map(|aggr| {
                    aggr.sources.iter().map(|source| {
                        FetchTask::aggregation(
                            aggr.aggregation_id.clone(),
                            source.clone(),
                            aggr.attributes.clone(),
                        )
                    })
                })
                .collect(),
        }
    }
}

/// Validate a data export selection.
pub fn build_data_job(selection: DataSelection) -> Result<ExportJob> {
    if selection.output == OutputMode::PerAggregationZip {
        return Err(ExportError::InvalidConfig(
            "one file per aggregation requires an aggregation export".to_string(),
        ));
    }
    let names = parse_attribute_list(&selection.attributes);
    if names.is_empty() {
        return Err(ExportError::InvalidAttribute(String::new()));
    }
    let attributes = AttributeCatalog::data().validate(&names)?;
    let time_range = TimeRange::parse(&selection.start, &selection.end)?;

    Ok(ExportJob {
        target: ExportTarget::Raw {
            sources: selection.sources,
            attributes,
        },
        time_range,
        output_mode: selection.output,
        time_format: selection.time_format,
    })
}

/// Validate an aggregation export selection against the grouped aggregations.
///
/// Aggregations keep their grouping order regardless of the order of choices.
pub fn build_aggregation_job(
    selection: AggregationSelection,
    groups: &AggregationGroups,
) -> Result<ExportJob> {
    if selection.choices.is_empty() {
        return Err(ExportError::NoAggregationsSelected);
    }
    if let Some(unknown) = selection
        .choices
        .iter()
        .find(|c| groups.get(&c.aggregation_id).is_none())
    {
        return Err(ExportError::UnknownAggregation(unknown.aggregation_id.clone()));
    }

    let catalog = AttributeCatalog::aggregation();
    let mut aggregations = Vec::new();
    for group in groups.iter() {
        let Some(choice) = selection
            .choices
            .iter()
            .find(|c| c.aggregation_id == group.id)
        else {
            continue;
        };
        aggregations.push(AggregationProjection {
            aggregation_id: group.id.clone(),
            sources: group.sources.clone(),
            attributes: resolve_aggregation_attributes(&catalog, group, &choice.attributes)?,
        });
    }
    let time_range = TimeRange::parse(&selection.start, &selection.end)?;

    Ok(ExportJob {
        target: ExportTarget::Aggregation { aggregations },
        time_range,
        output_mode: selection.output,
        time_format: selection.time_format,
    })
}

/// Catalog names map to their short key; the group's operators map to themselves.
fn resolve_aggregation_attributes(
    catalog: &AttributeCatalog,
    group: &AggregationGroup,
    raw: &str,
) -> Result<Projection> {
    let names = parse_attribute_list(raw);
    if names.first().is_none_or(|n| n.is_empty()) {
        return Err(ExportError::NoAttributes {
            aggregation: group.id.clone(),
        });
    }
    names
        .into_iter()
        .map(|name| match catalog.key_of(&name) {
            Some(key) => Ok(key.to_string()),
            None if group.operators.contains(&name) => Ok(name),
            None => Err(ExportError::InvalidAttribute(name)),
        })
        .collect()
}

/// Default attribute list for an aggregation: catalog names then its operators.
pub fn default_aggregation_attributes(group: &AggregationGroup) -> String {
    let catalog = AttributeCatalog::aggregation();
    catalog
        .names()
        .into_iter()
        .map(str::to_string)
        .chain(group.operators.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregation::AggregationDescriptor;

    fn groups() -> AggregationGroups {
        let descriptor = |id: &str, ops: &[&str]| AggregationDescriptor {
            id: id.to_string(),
            operators: ops.iter().map(|s| s.to_string()).collect(),
            interval: "1h".to_string(),
            retention: String::new(),
        };
        let a = vec![descriptor("agg1", &["mean", "max"]), descriptor("agg2", &["sum"])];
        let b = vec![descriptor("agg1", &["mean", "max"])];
        AggregationGroups::group([("A", a.as_slice()), ("B", b.as_slice())]).unwrap()
    }

    #[test]
    fn test_time_range_appends_z() {
        let range = TimeRange::parse("2021-01-01T00:00:00", "").unwrap();
        assert_eq!(range.start.as_deref(), Some("2021-01-01T00:00:00Z"));
        assert_eq!(range.end, None);
        assert_eq!(range.end_param(), "");

        let range = TimeRange::parse("2021-01-01T00:00:00Z", "2021-01-02T00:00:00").unwrap();
        assert_eq!(range.start_param(), "2021-01-01T00:00:00Z");
        assert_eq!(range.end_param(), "2021-01-02T00:00:00Z");
    }

    #[test]
    fn test_time_range_rejects_bad_input() {
        assert!(matches!(
            TimeRange::parse("yesterday", ""),
            Err(ExportError::InvalidTimeRange(_))
        ));
        assert!(matches!(
            TimeRange::parse("2021-01-02T00:00:00", "2021-01-01T00:00:00"),
            Err(ExportError::InvalidTimeRange(_))
        ));
    }

    #[test]
    fn test_build_data_job() {
        let job = build_data_job(DataSelection {
            attributes: "value, time".to_string(),
            sources: vec!["s1".to_string(), "s2".to_string()],
            time_format: TimeFormat::Iso8601,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(job.mode(), ExportMode::Raw);
        let tasks = job.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0], FetchTask::source("s1", vec!["v".into(), "t".into()]));
        assert_eq!(tasks[1].entity.to_string(), "s2");
    }

    #[test]
    fn test_build_data_job_rejects_invalid_attribute() {
        let err = build_data_job(DataSelection {
            attributes: "name,bogus".to_string(),
            sources: vec!["s1".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ExportError::InvalidAttribute(name) if name == "bogus"));
    }

    #[test]
    fn test_build_data_job_rejects_per_aggregation_output() {
        let err = build_data_job(DataSelection {
            attributes: "name".to_string(),
            output: OutputMode::PerAggregationZip,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ExportError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_aggregation_job_resolves_operators() {
        let groups = groups();
        let job = build_aggregation_job(
            AggregationSelection {
                choices: vec![
                    AggregationChoice {
                        aggregation_id: "agg2".to_string(),
                        attributes: "name,sum".to_string(),
                    },
                    AggregationChoice {
                        aggregation_id: "agg1".to_string(),
                        attributes: "starttime, max, endtime".to_string(),
                    },
                ],
                ..Default::default()
            },
            &groups,
        )
        .unwrap();

        assert_eq!(job.mode(), ExportMode::Aggregation);
        let tasks = job.tasks();
        let names: Vec<_> = tasks.iter().map(|t| t.entity.to_string()).collect();
        assert_eq!(names, vec!["agg1_A", "agg1_B", "agg2_A"]);
        assert_eq!(tasks[0].attributes, vec!["ts", "max", "te"]);
        assert_eq!(tasks[2].attributes, vec!["n", "sum"]);
    }

    #[test]
    fn test_build_aggregation_job_errors() {
        let groups = groups();
        let choice = |id: &str, attrs: &str| AggregationSelection {
            choices: vec![AggregationChoice {
                aggregation_id: id.to_string(),
                attributes: attrs.to_string(),
            }],
            ..Default::default()
        };

        assert!(matches!(
            build_aggregation_job(AggregationSelection::default(), &groups),
            Err(ExportError::NoAggregationsSelected)
        ));
        assert!(matches!(
            build_aggregation_job(choice("agg1", " "), &groups),
            Err(ExportError::NoAttributes { aggregation }) if aggregation == "agg1"
        ));
        // `sum` belongs to agg2, not agg1
        assert!(matches!(
            build_aggregation_job(choice("agg1", "name,sum"), &groups),
            Err(ExportError::InvalidAttribute(name)) if name == "sum"
        ));
        assert!(matches!(
            build_aggregation_job(choice("nope", "name"), &groups),
            Err(ExportError::UnknownAggregation(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_default_aggregation_attributes() {
        let groups = groups();
        assert_eq!(
            default_aggregation_attributes(groups.get("agg1").unwrap()),
            "name,starttime,endtime,mean,max"
        );
    }
}
