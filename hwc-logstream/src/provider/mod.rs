//! Remote log service contracts.
//!
//! The tailing engine only needs four calls from the provider: list groups,
//! list the streams of a group, query a window of entries, and write tags on
//! a resource. [`LogServiceClient`] captures those; [`lts`] talks to the real
//! Huawei Cloud LTS API and [`memory`] is a scripted stand-in for tests.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::Result;

pub mod lts;
pub mod memory;

pub use lts::{LtsClient, LtsConfig};
pub use memory::{MemoryLogService, Operation};

/// Resource metadata (tags) as reported by the provider.
pub type Tags = BTreeMap<String, String>;

/// Structured labels attached to a single log entry.
pub type Labels = BTreeMap<String, String>;

/// A log group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogGroup {
    pub id: String,
    pub name: String,
    pub tags: Tags,
}

/// A log stream inside a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStream {
    pub id: String,
    pub name: String,
    pub tags: Tags,
}

/// A single log entry returned by a window query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub content: String,
    pub labels: Labels,
    /// The entry's line-sequence token, see [`crate::position`].
    pub line_num: Option<String>,
}

/// Query for the entries of one stream inside `[start_millis, end_millis]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntriesRequest {
    pub group_id: String,
    pub stream_id: String,
    pub start_millis: i64,
    pub end_millis: i64,
    /// Position hint; the provider returns entries after this token.
    pub line_num: Option<String>,
    pub limit: u32,
}

/// Result of a window query, in provider (chronological) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListEntriesResponse {
    pub entries: Vec<LogEntry>,
}

/// Kind of resource a tag operation targets. Only streams carry positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A log stream (LTS calls streams "topics" in the tag API).
    Topics,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Topics => "topics",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagAction {
    /// Create or overwrite the given keys.
    Create,
}

impl TagAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagAction::Create => "create",
        }
    }
}

impl fmt::Display for TagAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write tags on a group or stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertTagsRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Group the resource belongs to. Not part of the wire request; lets
    /// implementations that key streams by group locate the resource.
    pub group_id: Option<String>,
    pub tags: Tags,
    pub action: TagAction,
}

/// The calls the tailing engine makes against the remote log service.
#[async_trait]
pub trait LogServiceClient: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<LogGroup>>;
    async fn list_streams(&self, group_id: &str) -> Result<Vec<LogStream>>;
    async fn list_entries(&self, request: &ListEntriesRequest) -> Result<ListEntriesResponse>;
    async fn upsert_tags(&self, request: &UpsertTagsRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_wire_names() {
        assert_eq!(ResourceType::Topics.to_string(), "topics");
    }

    #[test]
    fn test_tag_action_wire_names() {
        assert_eq!(TagAction::Create.to_string(), "create");
    }
}
