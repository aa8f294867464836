//! Stream identity, tag view and cursor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::Result;
use crate::checkpoint::{CheckpointStore, CheckpointTarget};
use crate::position;
use crate::provider::{LogGroup, LogStream, Tags};

/// Prefix of provider-internal tag keys, never shown as user tags.
const INTERNAL_TAG_PREFIX: &str = "_";

/// Composite key of a stream for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamIdentity {
    pub group_id: String,
    pub stream_id: String,
}

impl StreamIdentity {
    pub fn new(group_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            stream_id: stream_id.into(),
        }
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.stream_id)
    }
}

/// Which tag keys carry engine meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPolicy {
    /// Key under which the checkpoint token is persisted.
    pub position_tag: String,
    /// Key whose presence on a stream removes it from consideration.
    pub exclusion_tag: String,
}

impl TagPolicy {
    pub fn new(position_tag: impl Into<String>, exclusion_tag: impl Into<String>) -> Self {
        Self {
            position_tag: position_tag.into(),
            exclusion_tag: exclusion_tag.into(),
        }
    }

    /// Whether the stream opted out of tailing.
    pub fn is_excluded(&self, stream: &LogStream) -> bool {
        stream.tags.contains_key(&self.exclusion_tag)
    }

    /// Group tags overlaid with stream tags, minus internal, exclusion and
    /// position keys.
    pub fn display_tags(&self, group: &LogGroup, stream: &LogStream) -> Tags {
        group
            .tags
            .iter()
            .chain(stream.tags.iter())
            .filter(|(k, _)| self.is_user_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn is_user_key(&self, key: &str) -> bool {
        !key.starts_with(INTERNAL_TAG_PREFIX)
            && key != self.exclusion_tag
            && key != self.position_tag
    }
}

#[derive(Debug, Clone)]
struct StreamMeta {
    group_name: String,
    stream_name: String,
    display_tags: Tags,
    merged_tags: Tags,
    resource_tags: Tags,
}

impl StreamMeta {
    fn new(policy: &TagPolicy, group: &LogGroup, stream: &LogStream) -> Self {
        Self {
            group_name: group.name.clone(),
            stream_name: stream.name.clone(),
            display_tags: policy.display_tags(group, stream),
            merged_tags: group
                .tags
                .iter()
                .chain(stream.tags.iter())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            resource_tags: stream.tags.clone(),
        }
    }
}

/// Registry-owned half of a tracked stream.
#[derive(Debug)]
pub struct StreamEntry {
    identity: StreamIdentity,
    meta: RwLock<StreamMeta>,
    terminated: AtomicBool,
}

impl StreamEntry {
    pub fn new(policy: &TagPolicy, group: &LogGroup, stream: &LogStream) -> Self {
        Self {
            identity: StreamIdentity::new(&group.id, &stream.id),
            meta: RwLock::new(StreamMeta::new(policy, group, stream)),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Filtered user tags attached to every emitted record.
    pub fn display_tags(&self) -> Tags {
        self.meta.read().display_tags.clone()
    }

    /// Group tags overlaid with stream tags, unfiltered.
    pub fn merged_tags(&self) -> Tags {
        self.meta.read().merged_tags.clone()
    }

    /// Tags stored on the stream resource, as last reported by the provider.
    pub fn resource_tags(&self) -> Tags {
        self.meta.read().resource_tags.clone()
    }

    /// Recompute the tag view from fresh provider metadata.
    ///
    /// The position tag never reaches the view, so a provider listing that
    /// still carries an older checkpoint cannot overwrite the tracked cursor.
    pub fn update_tags(&self, policy: &TagPolicy, group: &LogGroup, stream: &LogStream) {
        *self.meta.write() = StreamMeta::new(policy, group, stream);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}

impl fmt::Display for StreamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta.read();
        write!(f, "{}:{}", meta.group_name, meta.stream_name)
    }
}

/// Read cursor of one stream.
///
/// Invariant: `cursor_start <= cursor_last`.
#[derive(Debug)]
pub struct StreamState {
    entry: Arc<StreamEntry>,
    /// Inclusive lower bound of the next fetch window.
    pub(super) cursor_start: DateTime<Utc>,
    /// High-water mark of the last fetch; the value checkpointed.
    pub(super) cursor_last: DateTime<Utc>,
}

impl StreamState {
    /// Build the state of a newly discovered stream, seeding the cursor from
    /// its persisted checkpoint or from `now`.
    ///
    /// A malformed checkpoint is reported and treated as absent.
    pub async fn create(
        store: &dyn CheckpointStore,
        entry: Arc<StreamEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let merged_tags = entry.merged_tags();
        let target = CheckpointTarget {
            identity: entry.identity(),
            tags: &merged_tags,
        };

        let start = match store.load(&target).await {
            Some(token) => match position::decode(&token) {
                Ok(t) if t > now => {
                    warn!(
                        stream = %entry,
                        checkpoint = %t,
                        "Stored position is in the future, starting from now"
                    );
                    now
                }
                Ok(t) => {
                    debug!(stream = %entry, checkpoint = %t, "Resuming from stored position");
                    t
                }
                Err(e) => {
                    warn!(stream = %entry, error = %e, "Failed to load stored position");
                    now
                }
            },
            None => now,
        };

        Self::with_cursor(entry, start)
    }

    /// State with both cursors at `start`.
    pub fn with_cursor(entry: Arc<StreamEntry>, start: DateTime<Utc>) -> Self {
        Self {
            entry,
            cursor_start: start,
            cursor_last: start,
        }
    }

    pub fn entry(&self) -> &Arc<StreamEntry> {
        &self.entry
    }

    pub fn identity(&self) -> &StreamIdentity {
        self.entry.identity()
    }

    pub fn is_terminated(&self) -> bool {
        self.entry.is_terminated()
    }

    pub fn cursor_start(&self) -> DateTime<Utc> {
        self.cursor_start
    }

    pub fn cursor_last(&self) -> DateTime<Utc> {
        self.cursor_last
    }

    /// Fast-forward a stream that fell more than `max_lag` behind `now`.
    ///
    /// Skipped history is dropped. Returns whether the cursor moved.
    pub fn skip_to_catch_up(&mut self, max_lag: TimeDelta, now: DateTime<Utc>) -> bool {
        let floor = now - max_lag;
        if self.cursor_start >= floor {
            return false;
        }

        warn!(
            stream = %self.entry,
            from = %self.cursor_start,
            to = %floor,
            "Stream lags behind, skipping backlog"
        );
        self.cursor_start = floor;
        if self.cursor_last < floor {
            self.cursor_last = floor;
        }
        true
    }

    /// Persist `cursor_last` and, on success, commit it as the next window start.
    ///
    /// On failure the cursor is left untouched, so the next successful save
    /// simply writes a newer value.
    pub async fn persist_checkpoint(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        let token = position::encode(self.cursor_last);
        let resource_tags = self.entry.resource_tags();
        let target = CheckpointTarget {
            identity: self.entry.identity(),
            tags: &resource_tags,
        };

        store.save(&target, &token).await?;
        self.cursor_start = self.cursor_last;
        Ok(())
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.entry, f)
    }
}
