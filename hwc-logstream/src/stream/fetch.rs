//! The fetch loop: query, emit, checkpoint, repeat.

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::state::StreamState;
use crate::checkpoint::CheckpointStore;
use crate::output::{LogRecord, RecordSink};
use crate::position;
use crate::provider::{ListEntriesRequest, ListEntriesResponse, LogServiceClient};
use crate::{Error, Result};

/// Windows narrower than this are left for the next pass.
const MIN_WINDOW: TimeDelta = TimeDelta::seconds(1);

/// Collaborators of one fetch loop run.
#[derive(Clone, Copy)]
pub struct FetchContext<'a> {
    pub client: &'a dyn LogServiceClient,
    pub checkpoints: &'a dyn CheckpointStore,
    pub sink: &'a dyn RecordSink,
    /// Maximum entries per query.
    pub page_size: u32,
    pub cancel: &'a CancellationToken,
}

/// Why a fetch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowEnd {
    /// Less than a second of the window remains.
    #[default]
    Exhausted,
    /// The stream was retired by a sync.
    Terminated,
    /// Shutdown was requested.
    Cancelled,
    /// The checkpoint could not be saved; the page will be re-read next window.
    PersistFailed,
    /// A page did not move the cursor forward.
    Stalled,
}

/// Outcome of one fetch loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchSummary {
    pub pages: usize,
    pub emitted: usize,
    pub end: WindowEnd,
}

impl StreamState {
    /// Read the stream up to `target_end`, one page at a time.
    ///
    /// Every page is emitted and checkpointed before the next one is
    /// requested, so a crash re-emits at most one page. A provider error
    /// aborts the loop and is returned to the caller.
    pub async fn stream(
        &mut self,
        ctx: &FetchContext<'_>,
        target_end: DateTime<Utc>,
    ) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();

        loop {
            if self.is_terminated() {
                summary.end = WindowEnd::Terminated;
                break;
            }
            if ctx.cancel.is_cancelled() {
                summary.end = WindowEnd::Cancelled;
                break;
            }
            if target_end - self.cursor_start <= MIN_WINDOW {
                summary.end = WindowEnd::Exhausted;
                break;
            }

            let request = self.next_request(target_end, ctx.page_size);
            trace!(
                stream = %self,
                start = request.start_millis,
                end = request.end_millis,
                "Fetching page"
            );

            let response = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    summary.end = WindowEnd::Cancelled;
                    break;
                }
                result = ctx.client.list_entries(&request) => {
                    result.map_err(|e| e.context(format!("fetch {} ({})", self, self.identity())))?
                }
            };

            let previous_start = self.cursor_start;
            self.cursor_last = self.page_high_water(&response, target_end)?;
            summary.pages += 1;
            summary.emitted += self.emit_page(ctx.sink, response);

            let persisted = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    summary.end = WindowEnd::Cancelled;
                    break;
                }
                result = self.persist_checkpoint(ctx.checkpoints) => result,
            };
            if let Err(e) = persisted {
                warn!(stream = %self, error = %e, "Failed to save position using tags");
                summary.end = WindowEnd::PersistFailed;
                break;
            }

            if self.cursor_start <= previous_start {
                debug!(
                    stream = %self,
                    cursor = %self.cursor_start,
                    "Page did not advance the cursor"
                );
                summary.end = WindowEnd::Stalled;
                break;
            }
        }

        Ok(summary)
    }

    fn next_request(&self, target_end: DateTime<Utc>, limit: u32) -> ListEntriesRequest {
        let identity = self.identity();
        ListEntriesRequest {
            group_id: identity.group_id.clone(),
            stream_id: identity.stream_id.clone(),
            start_millis: position::millis(self.cursor_start),
            end_millis: position::millis(target_end),
            line_num: Some(position::encode(self.cursor_start)),
            limit,
        }
    }

    /// Position reached by a page: the last entry carrying a token, or the
    /// window end when the page holds none. Clamped to
    /// `[cursor_start, target_end]`.
    fn page_high_water(
        &self,
        response: &ListEntriesResponse,
        target_end: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let reached = match response
            .entries
            .iter()
            .rev()
            .find_map(|entry| entry.line_num.as_deref())
        {
            Some(token) => position::decode(token).map_err(|e| {
                Error::provider(format!("decode position of {}", self.identity()), e)
            })?,
            None => target_end,
        };

        Ok(reached.clamp(self.cursor_start, target_end))
    }

    fn emit_page(&self, sink: &dyn RecordSink, response: ListEntriesResponse) -> usize {
        let tags = self.entry().display_tags();
        let mut emitted = 0;

        for entry in response.entries {
            let timestamp = entry
                .line_num
                .as_deref()
                .and_then(|token| position::decode(token).ok());
            sink.emit(&LogRecord {
                message: entry.content,
                labels: entry.labels,
                tags: tags.clone(),
                timestamp,
            });
            emitted += 1;
        }

        emitted
    }
}
