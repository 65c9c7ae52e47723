//! State transitions for fetch tasks.
//!
//! `fetch_page` is the only suspension point: it issues exactly one request.
//! Cancellation is checked before the request is sent and again when the
//! response arrives, so a late response after an abort is discarded.

use metrics::counter;
use tokio_util::sync::CancellationToken;

use super::ProgressReporter;
use super::projection::project_record;
use super::types::{
    Aborted, Done, Failed, FetchingPage, Idle, PageCursor, PageOutcome, PageResponse, TaskRun,
};
use crate::client::{ApiClient, page_query};
use crate::domain::job::{TimeFormat, TimeRange};
use crate::domain::task::FetchTask;
use crate::error::ExportError;
use crate::http::HttpClient;

/// Everything a task needs to fetch its pages.
pub struct PageContext<'a, H: HttpClient> {
    pub client: &'a ApiClient<H>,
    pub time_range: &'a TimeRange,
    pub time_format: TimeFormat,
    pub cancel: &'a CancellationToken,
    pub progress: &'a ProgressReporter,
}

impl TaskRun<Idle> {
    pub fn new(task: FetchTask) -> Self {
        TaskRun { task, state: Idle }
    }

    /// Idle -> FetchingPage with the page counter at 1.
    pub fn start(self, per_page: u64) -> TaskRun<FetchingPage> {
        TaskRun {
            task: self.task,
            state: FetchingPage {
                cursor: PageCursor::new(per_page),
                rows: Vec::new(),
            },
        }
    }
}

impl TaskRun<FetchingPage> {
    fn abort(self) -> PageOutcome {
        tracing::info!(
            entity = %self.task.entity,
            page = self.state.cursor.page,
            discarded_rows = self.state.rows.len(),
            "Export aborted, discarding uncommitted rows"
        );
        PageOutcome::Aborted(TaskRun {
            state: Aborted {
                page: self.state.cursor.page,
                discarded_rows: self.state.rows.len(),
            },
            task: self.task,
        })
    }

    fn fail(self, error: ExportError) -> PageOutcome {
        PageOutcome::Failed(TaskRun {
            state: Failed {
                error,
                page: self.state.cursor.page,
            },
            task: self.task,
        })
    }

    /// Fetch the page under the cursor and decide the next state.
    ///
    /// Rows are appended in response order. The task continues while the
    /// reported total exceeds `page * per_page`.
    pub async fn fetch_page<H: HttpClient>(mut self, ctx: &PageContext<'_, H>) -> PageOutcome {
        if ctx.cancel.is_cancelled() {
            return self.abort();
        }

        let path = self.task.entity.path();
        let query = page_query(
            &[
                ("start", ctx.time_range.start_param()),
                ("end", ctx.time_range.end_param()),
            ],
            self.state.cursor.per_page,
            self.state.cursor.page,
        );
        tracing::debug!(entity = %self.task.entity, page = self.state.cursor.page, "Fetching page");

        let body = match ctx.client.get(&path, query).await {
            Ok(body) => body,
            Err(error) => return self.fail(error),
        };

        if ctx.cancel.is_cancelled() {
            return self.abort();
        }

        let response: PageResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(entity = %self.task.entity, error = %error, "Malformed page response");
                return self.fail(error.into());
            }
        };

        let kind = match self.task.entity.aggregation_id() {
            Some(_) => "aggregation",
            None => "data",
        };
        counter!("hds_export_pages_fetched_total", "kind" => kind).increment(1);

        self.state.cursor.total = Some(response.total);
        ctx.progress.set_sub(self.state.cursor.fraction());

        if response.total != 0 {
            let time_keys = self.task.entity.time_keys();
            self.state.rows.extend(response.records().iter().map(|record| {
                project_record(record, &self.task.attributes, time_keys, ctx.time_format)
            }));
        }

        tracing::debug!(
            entity = %self.task.entity,
            page = self.state.cursor.page,
            total = response.total,
            records = response.records().len(),
            "Page received"
        );

        if self.state.cursor.has_more() {
            self.state.cursor.advance();
            return PageOutcome::NextPage(self);
        }

        PageOutcome::Done(TaskRun {
            state: Done {
                pages: self.state.cursor.page,
                total: response.total,
                rows: self.state.rows,
            },
            task: self.task,
        })
    }
}
