//! Paginated fetch engine.
//!
//! Runs the tasks of one export job strictly one after another, each task
//! through all of its pages, with at most one request in flight for the whole
//! job. Rows of a finished task are committed to the job's [`RowAccumulator`].
//! Any failure or cancellation rejects the whole job; partial results are never
//! returned.
use std::collections::VecDeque;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::config::ExportConfig;
use crate::domain::job::ExportJob;
use crate::domain::task::{EntityKey, FetchTask};
use crate::error::{ExportError, Result};
use crate::export::{Artifact, serialize};
use crate::http::HttpClient;
use crate::session::Session;

pub mod projection;
pub mod transitions;
pub mod types;

pub use transitions::PageContext;
pub use types::{
    Aborted, Done, Failed, FetchingPage, Idle, PageCursor, PageOutcome, Progress, Row,
    RowAccumulator, TaskRun, TaskState,
};

/// Callback receiving progress snapshots. Advisory only.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Tracks the current [`Progress`] and forwards every change to the callback.
#[derive(Default)]
pub struct ProgressReporter {
    current: Mutex<Progress>,
    callback: Option<ProgressFn>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressFn>) -> Self {
        Self {
            current: Mutex::new(Progress::default()),
            callback,
        }
    }

    pub fn set_main(&self, fraction: f64) {
        self.update(|p| p.main = fraction.clamp(0.0, 1.0));
    }

    pub fn set_sub(&self, fraction: f64) {
        self.update(|p| p.sub = fraction.clamp(0.0, 1.0));
    }

    pub fn current(&self) -> Progress {
        *self.current.lock()
    }

    fn update(&self, apply: impl FnOnce(&mut Progress)) {
        let snapshot = {
            let mut current = self.current.lock();
            apply(&mut current);
            *current
        };
        if let Some(callback) = &self.callback {
            callback(snapshot);
        }
    }
}

/// Cancels the export it was taken from.
#[derive(Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Request cooperative cancellation. Takes effect at the next page boundary.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Drives a single export job through the fetch engine and the serializer.
///
/// One `Exporter` serves one job; once aborted it stays aborted.
pub struct Exporter<H: HttpClient> {
    client: ApiClient<H>,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl<H: HttpClient> Exporter<H> {
    pub fn new(http_client: Arc<H>, session: Arc<dyn Session>, config: ExportConfig) -> Self {
        Self::with_client(ApiClient::new(http_client, session, config))
    }

    pub fn with_client(client: ApiClient<H>) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
            progress: ProgressReporter::default(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressFn) -> Self {
        self.progress = ProgressReporter::new(Some(callback));
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress.current()
    }

    /// Fetch every task of `job` and serialize the rows per the job's output mode.
    pub async fn run_export(&self, job: &ExportJob) -> Result<Artifact> {
        self.run_tasks(job, job.tasks()).await
    }

    /// Like [`Exporter::run_export`] with an explicit task queue.
    pub async fn run_tasks(&self, job: &ExportJob, tasks: Vec<FetchTask>) -> Result<Artifact> {
        let rows = self.fetch(job, tasks).await?;
        serialize(&rows, job.output_mode)
    }

    /// Run all tasks in FIFO order and return the committed rows.
    #[tracing::instrument(skip_all, fields(mode = ?job.mode(), tasks = tasks.len()))]
    pub async fn fetch(&self, job: &ExportJob, tasks: Vec<FetchTask>) -> Result<RowAccumulator> {
        let result = self.fetch_inner(job, tasks).await;
        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) if e.is_abort() => "aborted",
            Err(_) => "failed",
        };
        counter!("hds_export_jobs_total", "outcome" => outcome).increment(1);
        result
    }

    async fn fetch_inner(&self, job: &ExportJob, tasks: Vec<FetchTask>) -> Result<RowAccumulator> {
        // A zero page size would never satisfy the continuation check.
        self.client.config().validate()?;

        let total_tasks = tasks.len();
        let mut queue: VecDeque<FetchTask> = tasks.into();
        let mut accumulator = RowAccumulator::default();

        let ctx = PageContext {
            client: &self.client,
            time_range: &job.time_range,
            time_format: job.time_format,
            cancel: &self.cancel,
            progress: &self.progress,
        };

        tracing::info!(tasks = total_tasks, "Starting export");

        loop {
            let main = match total_tasks {
                0 => 1.0,
                n => 1.0 - queue.len() as f64 / n as f64,
            };
            self.progress.set_main(main);

            let Some(task) = queue.pop_front() else {
                break;
            };

            let per_page = self.per_page(&task.entity);
            let mut run = TaskRun::new(task).start(per_page);
            let done = loop {
                match run.fetch_page(&ctx).await {
                    PageOutcome::NextPage(next) => run = next,
                    PageOutcome::Done(done) => break done,
                    PageOutcome::Failed(failed) => {
                        tracing::warn!(
                            entity = %failed.task.entity,
                            page = failed.state.page,
                            error = %failed.state.error,
                            committed_entities = accumulator.len(),
                            "Export failed"
                        );
                        return Err(failed.state.error);
                    }
                    PageOutcome::Aborted(aborted) => {
                        tracing::info!(
                            entity = %aborted.task.entity,
                            page = aborted.state.page,
                            committed_entities = accumulator.len(),
                            "Export aborted"
                        );
                        return Err(ExportError::Aborted);
                    }
                }
            };

            tracing::info!(
                entity = %done.task.entity,
                pages = done.state.pages,
                total = done.state.total,
                rows = done.state.rows.len(),
                "Task completed"
            );
            counter!("hds_export_tasks_completed_total").increment(1);
            accumulator.commit(done.task.entity, done.state.rows);
        }

        tracing::info!(
            entities = accumulator.len(),
            rows = accumulator.row_count(),
            "Export fetched all tasks"
        );
        Ok(accumulator)
    }

    fn per_page(&self, entity: &EntityKey) -> u64 {
        let config = self.client.config();
        match entity {
            EntityKey::Source(_) => config.data_per_page,
            EntityKey::Aggregation { .. } => config.aggr_per_page,
        }
    }
}
