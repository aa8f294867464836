//! Delay queue feeding the worker pool.
//!
//! Streams are submitted with a delay and handed to the workers once it
//! elapses, through a single-slot channel. One task owns all pending timers,
//! so re-enqueueing never spawns a task per stream.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, trace};

use crate::stream::StreamState;

/// A stream waiting to be offered to the workers.
#[derive(Debug)]
pub(crate) struct Scheduled {
    pub state: StreamState,
    pub delay: Duration,
}

/// Run the delay queue until cancelled or every sender is gone and nothing is pending.
///
/// The pending set holds at most one state per tracked stream, since a state
/// is only resubmitted by the worker that finished it.
pub(crate) async fn run(
    mut submissions: mpsc::UnboundedReceiver<Scheduled>,
    ready: mpsc::Sender<StreamState>,
    cancel: CancellationToken,
) {
    let mut pending: DelayQueue<StreamState> = DelayQueue::new();
    let mut accepting = true;

    loop {
        if !accepting && pending.is_empty() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            submission = submissions.recv(), if accepting => match submission {
                Some(Scheduled { state, delay }) => {
                    trace!(stream = %state, ?delay, "Stream scheduled");
                    pending.insert(state, delay);
                }
                None => accepting = false,
            },
            Some(expired) = pending.next(), if !pending.is_empty() => {
                let state = expired.into_inner();
                if state.is_terminated() {
                    debug!(stream = %state, "Dropping retired stream from queue");
                    continue;
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = ready.send(state) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!(pending = pending.len(), "Stream scheduler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::*;
    use crate::provider::{LogGroup, LogStream};
    use crate::stream::{StreamEntry, TagPolicy};

    fn state(id: &str) -> StreamState {
        let entry = Arc::new(StreamEntry::new(
            &TagPolicy::new("pos", "exclude"),
            &LogGroup {
                id: "g1".to_string(),
                ..Default::default()
            },
            &LogStream {
                id: id.to_string(),
                ..Default::default()
            },
        ));
        StreamState::with_cursor(entry, DateTime::from_timestamp(0, 0).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_in_delay_order() {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(submit_rx, ready_tx, cancel.clone()));

        submit_tx
            .send(Scheduled {
                state: state("slow"),
                delay: Duration::from_secs(60),
            })
            .unwrap();
        submit_tx
            .send(Scheduled {
                state: state("fast"),
                delay: Duration::from_secs(5),
            })
            .unwrap();

        let first = ready_rx.recv().await.unwrap();
        assert_eq!(first.identity().stream_id, "fast");
        let second = ready_rx.recv().await.unwrap();
        assert_eq!(second.identity().stream_id, "slow");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_terminated_streams() {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(submit_rx, ready_tx, cancel.clone()));

        let retired = state("retired");
        retired.entry().mark_terminated();
        submit_tx
            .send(Scheduled {
                state: retired,
                delay: Duration::ZERO,
            })
            .unwrap();
        submit_tx
            .send(Scheduled {
                state: state("live"),
                delay: Duration::from_secs(1),
            })
            .unwrap();

        let next = ready_rx.recv().await.unwrap();
        assert_eq!(next.identity().stream_id, "live");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_promptly() {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (ready_tx, _ready_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(submit_rx, ready_tx, cancel.clone()));

        submit_tx
            .send(Scheduled {
                state: state("s1"),
                delay: Duration::from_secs(3600),
            })
            .unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
