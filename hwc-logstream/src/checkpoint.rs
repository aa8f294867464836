//! Checkpoint persistence.
//!
//! A stream's read position is not stored locally. The production store
//! keeps it as a tag on the stream resource itself, so a restarted process
//! resumes where the previous one stopped. The scheduling core only sees the
//! [`CheckpointStore`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::Result;
use crate::provider::{LogServiceClient, ResourceType, TagAction, Tags, UpsertTagsRequest};
use crate::stream::StreamIdentity;

/// The stream a checkpoint belongs to.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointTarget<'a> {
    pub identity: &'a StreamIdentity,
    /// Tags visible on the stream. Loads see group tags overlaid with the
    /// stream's own; saves get the stream's own tags, which are written back
    /// together with the position.
    pub tags: &'a Tags,
}

/// Load and save position tokens for streams.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last persisted token, if any.
    async fn load(&self, target: &CheckpointTarget<'_>) -> Option<String>;

    /// Persist `token`. Saving is idempotent: a later save overwrites an earlier one.
    async fn save(&self, target: &CheckpointTarget<'_>, token: &str) -> Result<()>;
}

/// Stores checkpoints as a tag on the stream resource.
pub struct TagCheckpointStore {
    client: Arc<dyn LogServiceClient>,
    position_tag: String,
}

impl TagCheckpointStore {
    pub fn new(client: Arc<dyn LogServiceClient>, position_tag: impl Into<String>) -> Self {
        Self {
            client,
            position_tag: position_tag.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for TagCheckpointStore {
    async fn load(&self, target: &CheckpointTarget<'_>) -> Option<String> {
        target.tags.get(&self.position_tag).cloned()
    }

    async fn save(&self, target: &CheckpointTarget<'_>, token: &str) -> Result<()> {
        let mut tags = target.tags.clone();
        tags.insert(self.position_tag.clone(), token.to_string());

        let request = UpsertTagsRequest {
            resource_type: ResourceType::Topics,
            resource_id: target.identity.stream_id.clone(),
            group_id: Some(target.identity.group_id.clone()),
            tags,
            action: TagAction::Create,
        };
        self.client
            .upsert_tags(&request)
            .await
            .map_err(|e| e.context(format!("save position of {}", target.identity)))
    }
}

/// Keeps checkpoints in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    tokens: DashMap<StreamIdentity, String>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, identity: StreamIdentity, token: impl Into<String>) {
        self.tokens.insert(identity, token.into());
    }

    pub fn get(&self, identity: &StreamIdentity) -> Option<String> {
        self.tokens.get(identity).map(|t| t.value().clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, target: &CheckpointTarget<'_>) -> Option<String> {
        self.get(target.identity)
    }

    async fn save(&self, target: &CheckpointTarget<'_>, token: &str) -> Result<()> {
        self.set(target.identity.clone(), token);
        Ok(())
    }
}
