//! Fetch task state types using the typestate pattern.
//!
//! Each task progresses through distinct states, enforced at compile time:
//!
//! ```text
//! TaskRun<Idle> ──start()──> TaskRun<FetchingPage> ──fetch_page()──> TaskRun<FetchingPage>  (more pages)
//!                                                   └─fetch_page()──> TaskRun<Done>
//!                                                   └─fetch_page()──> TaskRun<Failed>
//!                                                   └─fetch_page()──> TaskRun<Aborted>
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::task::{EntityKey, FetchTask};
use crate::error::ExportError;

/// Marker trait for valid task states.
pub trait TaskState: Send + Sync {}

/// A fetch task in the state `T`.
#[derive(Debug)]
pub struct TaskRun<T: TaskState> {
    pub task: FetchTask,
    pub state: T,
}

/// One output row: values positioned by projection index. `Null` is an empty cell.
pub type Row = Vec<Value>;

// ============================================================================
// Task States
// ============================================================================

/// Task is queued and has not issued a request yet.
#[derive(Debug, Clone, Default)]
pub struct Idle;

impl TaskState for Idle {}

/// Task is walking through result pages.
#[derive(Debug, Clone)]
pub struct FetchingPage {
    pub cursor: PageCursor,
    /// Rows of all pages fetched so far, in response order
    pub rows: Vec<Row>,
}

impl TaskState for FetchingPage {}

/// All pages were fetched; rows are ready to be committed.
#[derive(Debug, Clone)]
pub struct Done {
    pub rows: Vec<Row>,
    pub pages: u64,
    pub total: u64,
}

impl TaskState for Done {}

/// A page request failed; the job fails with `error`.
#[derive(Debug)]
pub struct Failed {
    pub error: ExportError,
    pub page: u64,
}

impl TaskState for Failed {}

/// Cancellation was observed before `page` was requested or acted upon.
#[derive(Debug, Clone)]
pub struct Aborted {
    pub page: u64,
    /// Uncommitted rows thrown away
    pub discarded_rows: usize,
}

impl TaskState for Aborted {}

/// Result of fetching one page.
#[derive(Debug)]
pub enum PageOutcome {
    NextPage(TaskRun<FetchingPage>),
    Done(TaskRun<Done>),
    Failed(TaskRun<Failed>),
    Aborted(TaskRun<Aborted>),
}

// ============================================================================
// Pagination
// ============================================================================

/// Position within one task's result pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based page number of the next (or current) request
    pub page: u64,
    pub per_page: u64,
    /// Grand total reported by the last response
    pub total: Option<u64>,
}

impl PageCursor {
    pub fn new(per_page: u64) -> Self {
        Self {
            page: 1,
            per_page,
            total: None,
        }
    }

    /// Whether another page must be requested after the current one.
    pub fn has_more(&self) -> bool {
        self.total
            .is_some_and(|total| total > self.page.saturating_mul(self.per_page))
    }

    pub fn advance(&mut self) {
        self.page += 1;
    }

    /// Fraction of the total covered once the current page is in. 1.0 when nothing matched.
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(0) => 1.0,
            Some(total) => (self.page.saturating_mul(self.per_page) as f64 / total as f64).min(1.0),
            None => 0.0,
        }
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// One page of the data or aggregation API.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PageResponse {
    pub total: u64,
    #[serde(default)]
    pub data: Option<PageData>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PageData {
    /// SenML records: short key -> value
    #[serde(default)]
    pub e: Vec<Map<String, Value>>,
}

impl PageResponse {
    pub fn records(&self) -> &[Map<String, Value>] {
        self.data.as_ref().map(|d| d.e.as_slice()).unwrap_or(&[])
    }
}

/// Rows committed per entity, in commit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowAccumulator {
    entries: Vec<(EntityKey, Vec<Row>)>,
}

impl RowAccumulator {
    /// Commit the rows of a finished task. Committing an entity twice replaces its
    /// rows but keeps its original position.
    pub fn commit(&mut self, entity: EntityKey, rows: Vec<Row>) {
        match self.entries.iter_mut().find(|(key, _)| *key == entity) {
            Some((_, existing)) => *existing = rows,
            None => self.entries.push((entity, rows)),
        }
    }

    pub fn get(&self, entity: &EntityKey) -> Option<&[Row]> {
        self.entries
            .iter()
            .find(|(key, _)| key == entity)
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &[Row])> {
        self.entries.iter().map(|(key, rows)| (key, rows.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.entries.iter().map(|(_, rows)| rows.len()).sum()
    }
}

/// Snapshot passed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Progress {
    /// `1 - tasks_remaining / total_tasks`, updated when a task starts
    pub main: f64,
    /// `page * per_page / total` of the active task, updated on every page
    pub sub: f64,
}
