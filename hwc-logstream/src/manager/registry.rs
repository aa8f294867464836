//! Map of tracked streams.
//!
//! Only the sync path writes (insert, refresh, retire); workers read to check
//! that a dequeued stream is still current. Lock guards never live across an
//! `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::provider::{LogGroup, LogStream};
use crate::stream::{StreamEntry, StreamIdentity, StreamState, TagPolicy};

/// Fully listed inventory of one sync pass, ready to apply.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Streams already tracked, with their fresh metadata.
    pub(crate) refreshed: Vec<(LogGroup, LogStream)>,
    /// Newly discovered streams with their seeded cursors.
    pub(crate) discovered: Vec<StreamState>,
    /// Streams skipped because of the exclusion tag.
    pub(crate) excluded: usize,
}

/// Counts of what a sync changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub retired: usize,
    pub excluded: usize,
}

/// Registry of tracked streams.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<StreamIdentity, Arc<StreamEntry>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn contains(&self, identity: &StreamIdentity) -> bool {
        self.streams.read().contains_key(identity)
    }

    pub fn get(&self, identity: &StreamIdentity) -> Option<Arc<StreamEntry>> {
        self.streams.read().get(identity).cloned()
    }

    /// Whether `entry` is the live registration of its identity.
    ///
    /// A stream that was retired and later rediscovered gets a new entry, so
    /// comparing identities alone would accept a stale cursor.
    pub fn is_current(&self, entry: &Arc<StreamEntry>) -> bool {
        self.streams
            .read()
            .get(entry.identity())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    pub fn identities(&self) -> Vec<StreamIdentity> {
        let mut ids: Vec<_> = self.streams.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply a sync plan atomically.
    ///
    /// Tracked streams absent from the plan are marked terminated and removed.
    /// Returns the report and the states of new streams, to be enqueued by
    /// the caller.
    pub(crate) fn apply(
        &self,
        policy: &TagPolicy,
        plan: SyncPlan,
    ) -> (SyncReport, Vec<StreamState>) {
        let mut report = SyncReport {
            excluded: plan.excluded,
            ..Default::default()
        };
        let mut seen: HashSet<StreamIdentity> = HashSet::new();
        let mut fresh = Vec::with_capacity(plan.discovered.len());

        let mut streams = self.streams.write();

        for (group, stream) in &plan.refreshed {
            let identity = StreamIdentity::new(&group.id, &stream.id);
            if let Some(entry) = streams.get(&identity) {
                entry.update_tags(policy, group, stream);
                report.updated += 1;
                seen.insert(identity);
            }
        }

        for state in plan.discovered {
            let identity = state.identity().clone();
            if streams.contains_key(&identity) {
                // Registered since staging; keep the existing cursor.
                seen.insert(identity);
                continue;
            }
            debug!(stream = %state, cursor = %state.cursor_start(), "Tracking new stream");
            streams.insert(identity.clone(), state.entry().clone());
            seen.insert(identity);
            report.added += 1;
            fresh.push(state);
        }

        streams.retain(|identity, entry| {
            if seen.contains(identity) {
                return true;
            }
            info!(stream = %entry, id = %identity, "Stream no longer listed, retiring");
            entry.mark_terminated();
            report.retired += 1;
            false
        });

        (report, fresh)
    }
}
