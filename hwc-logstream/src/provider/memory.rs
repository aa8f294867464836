//! Scripted in-memory log service.
//!
//! Serves a mutable group/stream inventory and per-stream queues of result
//! pages, records every request, and can be told to fail operations. Tag
//! writes are applied to the inventory so later listings observe them, the
//! same way the real service behaves.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ListEntriesRequest, ListEntriesResponse, LogEntry, LogGroup, LogServiceClient, LogStream,
    ResourceType, TagAction, Tags, UpsertTagsRequest,
};
use crate::{Error, Result};

/// Provider operation, used to script failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListGroups,
    ListStreams,
    ListEntries,
    UpsertTags,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::ListGroups => "ListLogGroups",
            Operation::ListStreams => "ListLogStream",
            Operation::ListEntries => "ListLogs",
            Operation::UpsertTags => "CreateTags",
        }
    }
}

#[derive(Debug, Default)]
struct Inventory {
    groups: Vec<(LogGroup, Vec<LogStream>)>,
}

impl Inventory {
    fn group_mut(&mut self, group_id: &str) -> Option<&mut (LogGroup, Vec<LogStream>)> {
        self.groups.iter_mut().find(|(g, _)| g.id == group_id)
    }

    fn stream_mut(&mut self, group_id: Option<&str>, stream_id: &str) -> Option<&mut LogStream> {
        self.groups
            .iter_mut()
            .filter(|(g, _)| group_id.is_none_or(|id| g.id == id))
            .flat_map(|(_, streams)| streams.iter_mut())
            .find(|s| s.id == stream_id)
    }
}

/// In-memory [`LogServiceClient`].
#[derive(Debug, Default)]
pub struct MemoryLogService {
    inventory: Mutex<Inventory>,
    pages: Mutex<HashMap<(String, String), VecDeque<Vec<LogEntry>>>>,
    failures: Mutex<HashMap<Operation, u32>>,
    failing_groups: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<Operation, usize>>,
    entry_requests: Mutex<Vec<ListEntriesRequest>>,
    tag_writes: Mutex<Vec<UpsertTagsRequest>>,
}

impl MemoryLogService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a group with no streams.
    pub fn add_group(&self, group: LogGroup) {
        let mut inventory = self.inventory.lock();
        if let Some(existing) = inventory.group_mut(&group.id) {
            existing.0 = group;
        } else {
            inventory.groups.push((group, Vec::new()));
        }
    }

    /// Add (or replace) a stream in an existing group.
    pub fn add_stream(&self, group_id: &str, stream: LogStream) {
        let mut inventory = self.inventory.lock();
        if let Some((_, streams)) = inventory.group_mut(group_id) {
            match streams.iter_mut().find(|s| s.id == stream.id) {
                Some(existing) => *existing = stream,
                None => streams.push(stream),
            }
        }
    }

    /// Remove a stream from the inventory.
    pub fn remove_stream(&self, group_id: &str, stream_id: &str) {
        let mut inventory = self.inventory.lock();
        if let Some((_, streams)) = inventory.group_mut(group_id) {
            streams.retain(|s| s.id != stream_id);
        }
    }

    /// Current provider-side tags of a stream.
    pub fn stream_tags(&self, group_id: &str, stream_id: &str) -> Option<Tags> {
        self.inventory
            .lock()
            .stream_mut(Some(group_id), stream_id)
            .map(|s| s.tags.clone())
    }

    /// Queue a result page for the next window query of a stream.
    pub fn push_page(&self, group_id: &str, stream_id: &str, entries: Vec<LogEntry>) {
        self.pages
            .lock()
            .entry((group_id.to_string(), stream_id.to_string()))
            .or_default()
            .push_back(entries);
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: Operation, times: u32) {
        *self.failures.lock().entry(op).or_default() += times;
    }

    /// Make every stream listing of `group_id` fail until cleared.
    pub fn fail_streams_of(&self, group_id: &str) {
        self.failing_groups.lock().insert(group_id.to_string());
    }

    pub fn clear_stream_failures(&self) {
        self.failing_groups.lock().clear();
    }

    /// Number of calls made to `op`, failed ones included.
    pub fn call_count(&self, op: Operation) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn entry_requests(&self) -> Vec<ListEntriesRequest> {
        self.entry_requests.lock().clone()
    }

    pub fn tag_writes(&self) -> Vec<UpsertTagsRequest> {
        self.tag_writes.lock().clone()
    }

    fn begin(&self, op: Operation) -> Result<()> {
        *self.calls.lock().entry(op).or_default() += 1;

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::provider(op.name(), "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl LogServiceClient for MemoryLogService {
    async fn list_groups(&self) -> Result<Vec<LogGroup>> {
        self.begin(Operation::ListGroups)?;
        Ok(self
            .inventory
            .lock()
            .groups
            .iter()
            .map(|(g, _)| g.clone())
            .collect())
    }

    async fn list_streams(&self, group_id: &str) -> Result<Vec<LogStream>> {
        self.begin(Operation::ListStreams)?;
        if self.failing_groups.lock().contains(group_id) {
            return Err(Error::provider(
                Operation::ListStreams.name(),
                format!("group {} unavailable", group_id),
            ));
        }

        let mut inventory = self.inventory.lock();
        inventory
            .group_mut(group_id)
            .map(|(_, streams)| streams.clone())
            .ok_or_else(|| {
                Error::provider(
                    Operation::ListStreams.name(),
                    format!("group {} not found", group_id),
                )
            })
    }

    async fn list_entries(&self, request: &ListEntriesRequest) -> Result<ListEntriesResponse> {
        self.entry_requests.lock().push(request.clone());
        self.begin(Operation::ListEntries)?;

        let entries = self
            .pages
            .lock()
            .get_mut(&(request.group_id.clone(), request.stream_id.clone()))
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        Ok(ListEntriesResponse { entries })
    }

    async fn upsert_tags(&self, request: &UpsertTagsRequest) -> Result<()> {
        self.tag_writes.lock().push(request.clone());
        self.begin(Operation::UpsertTags)?;

        let mut inventory = self.inventory.lock();
        let tags = match request.resource_type {
            ResourceType::Topics => inventory
                .stream_mut(request.group_id.as_deref(), &request.resource_id)
                .map(|s| &mut s.tags),
        };
        let Some(tags) = tags else {
            return Err(Error::provider(
                Operation::UpsertTags.name(),
                format!("{} {} not found", request.resource_type, request.resource_id),
            ));
        };

        match request.action {
            TagAction::Create => {
                tags.extend(request.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str) -> LogGroup {
        LogGroup {
            id: id.to_string(),
            name: format!("{id}-name"),
            tags: Tags::new(),
        }
    }

    fn stream(id: &str) -> LogStream {
        LogStream {
            id: id.to_string(),
            name: format!("{id}-name"),
            tags: Tags::new(),
        }
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let svc = MemoryLogService::new();
        svc.add_group(group("g1"));
        svc.fail_next(Operation::ListGroups, 1);

        assert!(svc.list_groups().await.is_err());
        assert_eq!(svc.list_groups().await.unwrap().len(), 1);
        assert_eq!(svc.call_count(Operation::ListGroups), 2);
    }

    #[tokio::test]
    async fn test_pages_are_served_in_order_then_empty() {
        let svc = MemoryLogService::new();
        let entry = |c: &str| LogEntry {
            content: c.to_string(),
            ..Default::default()
        };
        svc.push_page("g1", "s1", vec![entry("a")]);
        svc.push_page("g1", "s1", vec![entry("b")]);

        let req = ListEntriesRequest {
            group_id: "g1".to_string(),
            stream_id: "s1".to_string(),
            start_millis: 0,
            end_millis: 1,
            line_num: None,
            limit: 100,
        };
        assert_eq!(svc.list_entries(&req).await.unwrap().entries[0].content, "a");
        assert_eq!(svc.list_entries(&req).await.unwrap().entries[0].content, "b");
        assert!(svc.list_entries(&req).await.unwrap().entries.is_empty());
        assert_eq!(svc.entry_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_tag_writes_update_inventory() {
        let svc = MemoryLogService::new();
        svc.add_group(group("g1"));
        svc.add_stream("g1", stream("s1"));

        let mut tags = Tags::new();
        tags.insert("pos".to_string(), "42".to_string());
        svc.upsert_tags(&UpsertTagsRequest {
            resource_type: ResourceType::Topics,
            resource_id: "s1".to_string(),
            group_id: Some("g1".to_string()),
            tags,
            action: TagAction::Create,
        })
        .await
        .unwrap();

        let listed = svc.list_streams("g1").await.unwrap();
        assert_eq!(listed[0].tags.get("pos").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn test_failing_group_listing() {
        let svc = MemoryLogService::new();
        svc.add_group(group("g1"));
        svc.fail_streams_of("g1");
        assert!(svc.list_streams("g1").await.is_err());
        svc.clear_stream_failures();
        assert!(svc.list_streams("g1").await.unwrap().is_empty());
    }
}
