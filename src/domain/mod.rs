//! Core domain types for the export pipeline.
//!
//! This module contains pure domain types with no network dependencies:
//! - Attribute catalogs and projections
//! - Aggregation descriptors and grouping
//! - Export jobs and their validation
//! - Fetch tasks and entity keys

pub mod aggregation;
pub mod catalog;
pub mod job;
pub mod task;
