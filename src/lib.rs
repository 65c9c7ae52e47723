//! Bulk export of historical datastore records.
//!
//! This crate turns a user selection (data sources or shared aggregations,
//! attribute lists, a time window and an output layout) into a validated
//! [`ExportJob`], pages every entity of the job through the datastore API one
//! request at a time, and serializes the collected rows into a CSV file or a
//! ZIP archive of CSV files.
//!
//! Exports are cancellable through an [`AbortHandle`] and report advisory
//! progress through a callback.

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod fetch;
pub mod http;
pub mod registry;
pub mod session;

// Re-export commonly used types
pub use client::ApiClient;
pub use config::ExportConfig;
pub use domain::aggregation::{AggregationDescriptor, AggregationGroup, AggregationGroups};
pub use domain::catalog::{AttributeCatalog, Projection, parse_attribute_list};
pub use domain::job::{
    AggregationChoice, AggregationSelection, DataSelection, ExportJob, ExportMode, ExportTarget,
    OutputMode, TimeFormat, TimeRange, build_aggregation_job, build_data_job,
    default_aggregation_attributes,
};
pub use domain::task::{EntityKey, FetchTask};
pub use error::{ExportError, Result};
pub use export::{Artifact, ArtifactSink, DirectorySink, serialize};
pub use fetch::{AbortHandle, Exporter, Progress, ProgressFn, RowAccumulator};
pub use http::{HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use registry::{DataSource, RegistryClient, group_aggregations};
pub use session::{Session, StaticSession};
