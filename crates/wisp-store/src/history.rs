use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use wisp_core::ids::ChatId;
use wisp_core::messages::Message;

use crate::backend::StorageBackend;
use crate::blob;
use crate::error::StoreError;
use crate::StoreStats;

pub const MAX_CONVERSATIONS: usize = 50;
pub const MAX_MESSAGES_PER_CHAT: usize = 100;
/// The newest this-many messages of each conversation keep their full content
/// through a compression pass.
const COMPRESS_KEEP_RECENT: usize = 20;
const CONTENT_KEEP: usize = 96;
const STORE_KEY: &str = "wisp.chats";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// One conversation: the ordered message list plus bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    pub messages: Vec<Message>,
    pub metadata: ChatMetadata,
}

#[derive(Default, Serialize, Deserialize)]
struct HistoryBlob {
    chats: HashMap<String, ChatRecord>,
}

/// Bounded per-chat message history persisted as one blob under a fixed key.
///
/// Capacity is two-dimensional: at most `MAX_CONVERSATIONS` conversations,
/// each holding at most `MAX_MESSAGES_PER_CHAT` messages. A new conversation
/// arriving at the conversation cap evicts the least-recently-updated one
/// before the write.
pub struct ChatHistoryStore {
    backend: Arc<dyn StorageBackend>,
    state: Mutex<HistoryBlob>,
}

impl ChatHistoryStore {
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        let state = blob::load_or_default(&backend, STORE_KEY)?;
        Ok(Self {
            backend,
            state: Mutex::new(state),
        })
    }

    /// Append a message to a conversation, creating the conversation on first
    /// use. Returns whether the conversation was created.
    #[instrument(skip(self, message), fields(chat_id = %chat_id))]
    pub fn append_message(&self, chat_id: &ChatId, message: Message) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let created = !state.chats.contains_key(chat_id.as_str());

        if created && state.chats.len() >= MAX_CONVERSATIONS {
            let evict = state
                .chats
                .values()
                .min_by_key(|c| c.metadata.updated_at)
                .map(|c| c.chat_id.as_str().to_string());
            if let Some(key) = evict {
                state.chats.remove(&key);
            }
        }

        let now = Utc::now();
        let record = state
            .chats
            .entry(chat_id.as_str().to_string())
            .or_insert_with(|| ChatRecord {
                chat_id: chat_id.clone(),
                messages: Vec::new(),
                metadata: ChatMetadata {
                    created_at: now,
                    updated_at: now,
                    message_count: 0,
                },
            });

        record.messages.push(message);
        if record.messages.len() > MAX_MESSAGES_PER_CHAT {
            let excess = record.messages.len() - MAX_MESSAGES_PER_CHAT;
            record.messages.drain(..excess);
        }
        record.metadata.updated_at = now;
        record.metadata.message_count = record.messages.len();

        self.persist(&mut state)?;
        Ok(created)
    }

    /// The last `max_messages` messages of a conversation, in order, with all
    /// protocol fields intact. This is the exact payload handed to the
    /// provider. `None` returns everything stored.
    pub fn context_window(&self, chat_id: &ChatId, max_messages: Option<usize>) -> Vec<Message> {
        let state = self.state.lock();
        match state.chats.get(chat_id.as_str()) {
            Some(record) => {
                let start = max_messages
                    .map(|n| record.messages.len().saturating_sub(n))
                    .unwrap_or(0);
                record.messages[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<ChatRecord> {
        self.state.lock().chats.get(chat_id.as_str()).cloned()
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.state.lock().chats.contains_key(chat_id.as_str())
    }

    /// All conversations, most recently updated first.
    pub fn list(&self) -> Vec<ChatRecord> {
        let state = self.state.lock();
        let mut chats: Vec<ChatRecord> = state.chats.values().cloned().collect();
        chats.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
        chats
    }

    /// Explicit clear of one conversation. Returns whether it existed.
    #[instrument(skip(self), fields(chat_id = %chat_id))]
    pub fn clear_chat(&self, chat_id: &ChatId) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let existed = state.chats.remove(chat_id.as_str()).is_some();
        if existed {
            self.persist(&mut state)?;
        }
        Ok(existed)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.chats.clear();
        self.persist(&mut state)
    }

    /// Number of stored conversations.
    pub fn count(&self) -> usize {
        self.state.lock().chats.len()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            count: state.chats.len(),
            bytes_used: blob::serialized_size(&*state),
            capacity: MAX_CONVERSATIONS,
        }
    }

    fn persist(&self, state: &mut HistoryBlob) -> Result<(), StoreError> {
        blob::persist_with_recovery(&self.backend, STORE_KEY, state, compress_oldest)
    }
}

/// Lossy pass over every conversation: message content outside the newest
/// `COMPRESS_KEEP_RECENT` collapses to a derived summary. Roles, tool-call
/// ids, ordering, and counts are untouched.
fn compress_oldest(state: &mut HistoryBlob) -> bool {
    let mut changed = false;
    for record in state.chats.values_mut() {
        let len = record.messages.len();
        if len <= COMPRESS_KEEP_RECENT {
            continue;
        }
        let cutoff = len - COMPRESS_KEEP_RECENT;
        for message in &mut record.messages[..cutoff] {
            if let Some(content) = &message.content {
                if let Some(summary) = blob::summarize(content, CONTENT_KEEP) {
                    message.content = Some(summary);
                    changed = true;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use wisp_core::ids::ToolCallId;
    use wisp_core::tools::{ToolArguments, ToolCallRequest};

    fn store() -> ChatHistoryStore {
        ChatHistoryStore::open(Arc::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn first_append_creates_conversation() {
        let store = store();
        let chat = ChatId::new();
        let created = store.append_message(&chat, Message::user("hi")).unwrap();
        assert!(created);
        let again = store.append_message(&chat, Message::assistant("hello")).unwrap();
        assert!(!again);

        let record = store.get(&chat).unwrap();
        assert_eq!(record.metadata.message_count, 2);
        assert!(record.metadata.updated_at >= record.metadata.created_at);
    }

    #[test]
    fn context_window_roundtrips_order_and_protocol_fields() {
        let store = store();
        let chat = ChatId::new();
        let call = ToolCallRequest {
            id: ToolCallId::new(),
            name: "calculator".into(),
            arguments: ToolArguments::structured(serde_json::json!({"expr": "2+2"})),
        };

        store.append_message(&chat, Message::user("2+2?")).unwrap();
        store
            .append_message(
                &chat,
                Message::assistant_with_tool_calls(None, vec![call.clone()]),
            )
            .unwrap();
        store
            .append_message(&chat, Message::tool(call.id.clone(), r#"{"result":4}"#))
            .unwrap();
        store.append_message(&chat, Message::assistant("4")).unwrap();

        let window = store.context_window(&chat, None);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].text(), "2+2?");
        assert_eq!(window[1].tool_calls[0].name, "calculator");
        assert_eq!(window[2].tool_call_id.as_ref().unwrap(), &call.id);
        assert_eq!(window[3].text(), "4");
    }

    #[test]
    fn context_window_takes_the_tail() {
        let store = store();
        let chat = ChatId::new();
        for i in 0..10 {
            store
                .append_message(&chat, Message::user(format!("message {i}")))
                .unwrap();
        }
        let window = store.context_window(&chat, Some(3));
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].text(), "message 7");
        assert_eq!(window[2].text(), "message 9");
    }

    #[test]
    fn context_window_for_unknown_chat_is_empty() {
        let store = store();
        assert!(store.context_window(&ChatId::new(), None).is_empty());
    }

    #[test]
    fn per_chat_cap_trims_oldest_messages() {
        let store = store();
        let chat = ChatId::new();
        for i in 0..MAX_MESSAGES_PER_CHAT + 5 {
            store
                .append_message(&chat, Message::user(format!("message {i}")))
                .unwrap();
        }
        let record = store.get(&chat).unwrap();
        assert_eq!(record.messages.len(), MAX_MESSAGES_PER_CHAT);
        assert_eq!(record.metadata.message_count, MAX_MESSAGES_PER_CHAT);
        assert_eq!(record.messages[0].text(), "message 5");
    }

    /// At the conversation cap, a new conversation evicts the
    /// least-recently-updated one before the write.
    #[test]
    fn conversation_cap_evicts_least_recently_updated() {
        let store = store();
        let chats: Vec<ChatId> = (0..MAX_CONVERSATIONS).map(|_| ChatId::new()).collect();
        for chat in &chats {
            store.append_message(chat, Message::user("hello")).unwrap();
        }
        assert_eq!(store.count(), MAX_CONVERSATIONS);

        // Touch the first chat so the second becomes least recently updated.
        store.append_message(&chats[0], Message::user("again")).unwrap();

        let newcomer = ChatId::new();
        store.append_message(&newcomer, Message::user("hi")).unwrap();

        assert_eq!(store.count(), MAX_CONVERSATIONS);
        assert!(store.contains(&newcomer));
        assert!(store.contains(&chats[0]));
        assert!(!store.contains(&chats[1]), "LRU conversation should be evicted");
    }

    #[test]
    fn clear_chat_removes_only_that_conversation() {
        let store = store();
        let a = ChatId::new();
        let b = ChatId::new();
        store.append_message(&a, Message::user("a")).unwrap();
        store.append_message(&b, Message::user("b")).unwrap();

        assert!(store.clear_chat(&a).unwrap());
        assert!(!store.clear_chat(&a).unwrap());
        assert!(store.contains(&b));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn reopen_recovers_conversations() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let chat = ChatId::new();
        {
            let store = ChatHistoryStore::open(backend.clone()).unwrap();
            store.append_message(&chat, Message::user("durable")).unwrap();
        }
        let reopened = ChatHistoryStore::open(backend).unwrap();
        assert_eq!(reopened.context_window(&chat, None)[0].text(), "durable");
    }

    #[test]
    fn list_sorts_most_recent_first() {
        let store = store();
        let a = ChatId::new();
        let b = ChatId::new();
        store.append_message(&a, Message::user("a")).unwrap();
        store.append_message(&b, Message::user("b")).unwrap();
        store.append_message(&a, Message::user("a again")).unwrap();

        let listed = store.list();
        assert_eq!(listed[0].chat_id, a);
        assert_eq!(listed[1].chat_id, b);
    }

    /// Quota recovery compresses older message content in place; the newest
    /// messages and all protocol fields survive intact.
    #[test]
    fn quota_failure_compresses_older_message_content() {
        let chat = ChatId::new();
        let now = Utc::now();
        let messages: Vec<Message> = (0..60)
            .map(|i| Message::user(format!("{i:03} {}", "m".repeat(400))))
            .collect();
        let record = ChatRecord {
            chat_id: chat.clone(),
            messages,
            metadata: ChatMetadata {
                created_at: now,
                updated_at: now,
                message_count: 60,
            },
        };
        let mut chats = HashMap::new();
        chats.insert(chat.as_str().to_string(), record);
        let raw = serde_json::to_string(&serde_json::json!({ "chats": chats })).unwrap();

        let backend: Arc<dyn StorageBackend> =
            Arc::new(MemoryBackend::with_quota(raw.len() + STORE_KEY.len() + 64));
        backend.set(STORE_KEY, &raw).unwrap();

        let store = ChatHistoryStore::open(backend).unwrap();
        let before = store.stats().bytes_used;

        store
            .append_message(&chat, Message::user("n".repeat(400)))
            .unwrap();

        let after = store.stats();
        assert!(after.bytes_used < before);

        let window = store.context_window(&chat, None);
        assert_eq!(window.len(), 61);
        // Oldest content compressed, newest intact
        assert!(window[0].text().contains("[+"));
        assert!(!window[60].text().contains("[+"));
        assert_eq!(window[59].text().len(), 404);
    }
}
