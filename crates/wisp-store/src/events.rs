use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use wisp_core::events::EventKind;
use wisp_core::ids::{ChatId, EventId};

use crate::backend::StorageBackend;
use crate::blob;
use crate::error::StoreError;
use crate::StoreStats;

pub const MAX_EVENTS: usize = 5000;
const COMPRESS_KEEP_RECENT: usize = 2500;
const DATA_KEEP: usize = 128;
const STORE_KEY: &str = "wisp.events";

/// One appended telemetry record. Immutable after the write, except for
/// in-place lossy payload compression during quota recovery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub chat_id: Option<ChatId>,
    pub limit: Option<usize>,
}

#[derive(Default, Serialize, Deserialize)]
struct EventBlob {
    events: Vec<EventRecord>,
}

/// Append-only bounded event log persisted as one blob under a fixed key.
pub struct EventLog {
    backend: Arc<dyn StorageBackend>,
    state: Mutex<EventBlob>,
}

impl EventLog {
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        let state = blob::load_or_default(&backend, STORE_KEY)?;
        Ok(Self {
            backend,
            state: Mutex::new(state),
        })
    }

    /// Append an event, assigning id and timestamp. The payload must already
    /// be sanitized: no credentials, no full wire bodies.
    #[instrument(skip(self, data), fields(kind = %kind))]
    pub fn append(
        &self,
        kind: EventKind,
        chat_id: Option<ChatId>,
        data: serde_json::Value,
    ) -> Result<EventRecord, StoreError> {
        let event = EventRecord {
            id: EventId::new(),
            kind,
            chat_id,
            timestamp: Utc::now(),
            data,
        };

        let mut state = self.state.lock();
        state.events.push(event.clone());
        if state.events.len() > MAX_EVENTS {
            let excess = state.events.len() - MAX_EVENTS;
            state.events.drain(..excess);
        }
        self.persist(&mut state)?;
        Ok(event)
    }

    /// List events in append order, oldest first.
    pub fn list(&self, filter: &EventFilter) -> Vec<EventRecord> {
        let state = self.state.lock();
        let mut events: Vec<EventRecord> = state
            .events
            .iter()
            .filter(|e| filter.kind.map_or(true, |k| e.kind == k))
            .filter(|e| {
                filter
                    .chat_id
                    .as_ref()
                    .map_or(true, |c| e.chat_id.as_ref() == Some(c))
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        events
    }

    pub fn count(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.events.clear();
        self.persist(&mut state)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            count: state.events.len(),
            bytes_used: blob::serialized_size(&*state),
            capacity: MAX_EVENTS,
        }
    }

    fn persist(&self, state: &mut EventBlob) -> Result<(), StoreError> {
        blob::persist_with_recovery(&self.backend, STORE_KEY, state, compress_oldest)
    }
}

/// Lossy pass over events older than the compression threshold: the payload
/// collapses to a derived summary under a `compressed` key. Ids, kinds, and
/// count are untouched.
fn compress_oldest(state: &mut EventBlob) -> bool {
    let len = state.events.len();
    if len <= COMPRESS_KEEP_RECENT {
        return false;
    }
    let cutoff = len - COMPRESS_KEEP_RECENT;
    let mut changed = false;
    for event in &mut state.events[..cutoff] {
        if event.data.get("compressed").is_some() {
            continue;
        }
        let raw = event.data.to_string();
        if let Some(summary) = blob::summarize(&raw, DATA_KEEP) {
            event.data = serde_json::json!({ "compressed": summary });
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn log() -> EventLog {
        EventLog::open(Arc::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn append_assigns_id_and_timestamp() {
        let log = log();
        let event = log
            .append(EventKind::UserMessage, None, json!({"chars": 4}))
            .unwrap();
        assert!(event.id.as_str().starts_with("evt_"));
        assert_eq!(event.kind, EventKind::UserMessage);
    }

    #[test]
    fn list_preserves_append_order() {
        let log = log();
        for i in 0..5 {
            log.append(EventKind::ApiRequest, None, json!({"n": i})).unwrap();
        }
        let all = log.list(&EventFilter::default());
        assert_eq!(all.len(), 5);
        for (i, event) in all.iter().enumerate() {
            assert_eq!(event.data["n"], i);
        }
    }

    #[test]
    fn list_filters_by_kind_and_chat() {
        let log = log();
        let chat = ChatId::new();
        log.append(EventKind::ApiRequest, Some(chat.clone()), json!({}))
            .unwrap();
        log.append(EventKind::ApiResponse, Some(chat.clone()), json!({}))
            .unwrap();
        log.append(EventKind::ApiRequest, None, json!({})).unwrap();

        let requests = log.list(&EventFilter {
            kind: Some(EventKind::ApiRequest),
            ..EventFilter::default()
        });
        assert_eq!(requests.len(), 2);

        let for_chat = log.list(&EventFilter {
            chat_id: Some(chat),
            ..EventFilter::default()
        });
        assert_eq!(for_chat.len(), 2);
    }

    #[test]
    fn cap_trims_oldest_first() {
        // Seed a full blob rather than appending MAX_EVENTS times.
        let now = Utc::now();
        let events: Vec<EventRecord> = (0..MAX_EVENTS)
            .map(|i| EventRecord {
                id: EventId::new(),
                kind: EventKind::SystemError,
                chat_id: None,
                timestamp: now,
                data: json!({"n": i}),
            })
            .collect();
        let raw = serde_json::to_string(&serde_json::json!({ "events": events })).unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        backend.set(STORE_KEY, &raw).unwrap();

        let log = EventLog::open(backend).unwrap();
        assert_eq!(log.count(), MAX_EVENTS);

        log.append(EventKind::SystemError, None, json!({"n": "over"}))
            .unwrap();
        assert_eq!(log.count(), MAX_EVENTS);
        let all = log.list(&EventFilter::default());
        assert_eq!(all[0].data["n"], 1, "oldest record should have been trimmed");
        assert_eq!(all[MAX_EVENTS - 1].data["n"], "over");
    }

    #[test]
    fn clear_empties_the_log() {
        let log = log();
        log.append(EventKind::ChatCreated, None, json!({})).unwrap();
        log.clear().unwrap();
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn reopen_recovers_events() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        {
            let log = EventLog::open(backend.clone()).unwrap();
            log.append(EventKind::StreamStarted, None, json!({})).unwrap();
        }
        let reopened = EventLog::open(backend).unwrap();
        assert_eq!(reopened.count(), 1);
    }

    /// Quota recovery compresses the payloads of the oldest records in place,
    /// preserving ids and count while strictly shrinking the blob.
    #[test]
    fn quota_failure_compresses_oldest_payloads() {
        let now = Utc::now();
        let events: Vec<EventRecord> = (0..COMPRESS_KEEP_RECENT + 30)
            .map(|i| EventRecord {
                id: EventId::new(),
                kind: EventKind::ToolCallCompleted,
                chat_id: None,
                timestamp: now,
                data: json!({"n": i, "output": "o".repeat(400)}),
            })
            .collect();
        let ids: Vec<EventId> = events.iter().map(|e| e.id.clone()).collect();
        let raw = serde_json::to_string(&serde_json::json!({ "events": events })).unwrap();

        let backend: Arc<dyn StorageBackend> =
            Arc::new(MemoryBackend::with_quota(raw.len() + STORE_KEY.len() + 64));
        backend.set(STORE_KEY, &raw).unwrap();

        let log = EventLog::open(backend).unwrap();
        let before = log.stats().bytes_used;

        log.append(
            EventKind::ToolCallCompleted,
            None,
            json!({"output": "o".repeat(400)}),
        )
        .unwrap();

        let after = log.stats();
        assert_eq!(after.count, COMPRESS_KEEP_RECENT + 31);
        assert!(after.bytes_used < before);

        let all = log.list(&EventFilter::default());
        for id in &ids {
            assert!(all.iter().any(|e| &e.id == id), "lost event {id}");
        }
        // Oldest payload compressed, newest untouched
        assert!(all[0].data.get("compressed").is_some());
        assert!(all[COMPRESS_KEEP_RECENT + 29].data.get("output").is_some());
    }
}
