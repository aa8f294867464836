//! Fetch workers.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::StreamManager;
use crate::stream::{FetchContext, FetchSummary, StreamState};

/// Take ready streams off the shared channel until shutdown.
pub(super) async fn run(
    id: usize,
    manager: Arc<StreamManager>,
    ready: Arc<Mutex<mpsc::Receiver<StreamState>>>,
    cancel: CancellationToken,
) {
    debug!("Fetch worker {} started", id);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            state = async { ready.lock().await.recv().await } => state,
        };
        let Some(state) = next else {
            break;
        };

        process(&manager, state, &cancel).await;
    }

    debug!("Fetch worker {} shutting down", id);
}

/// Run one fetch window for `state` and enqueue it again.
///
/// States whose entry was retired or replaced since they were queued are
/// dropped without touching the provider.
pub(super) async fn process(
    manager: &StreamManager,
    mut state: StreamState,
    cancel: &CancellationToken,
) {
    if state.is_terminated() || !manager.registry.is_current(state.entry()) {
        debug!(stream = %state, "Discarding stream that is no longer tracked");
        return;
    }

    let window = &manager.config.window;
    let now = Utc::now();
    state.skip_to_catch_up(window.max_lag, now);
    let target_end = window.target_end(state.cursor_start(), now);

    let ctx = FetchContext {
        client: manager.client.as_ref(),
        checkpoints: manager.checkpoints.as_ref(),
        sink: manager.sink.as_ref(),
        page_size: manager.config.page_size,
        cancel,
    };

    match state.stream(&ctx, target_end).await {
        Ok(FetchSummary { pages, emitted, end }) => {
            trace!(stream = %state, pages, emitted, ?end, "Window finished");
        }
        Err(e) => {
            warn!(stream = %state, error = %e, "Failed to read stream");
        }
    }

    if cancel.is_cancelled() {
        return;
    }
    manager.enqueue(state);
}
