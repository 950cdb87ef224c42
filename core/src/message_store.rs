/// Message persistence: per-conversation message logs in the `messages` collection.
///
/// Store queries are scoped by participant; narrowing to one conversation
/// happens client-side on every applied change.
use crate::models::{CallType, ConversationKey, MediaRef, Message, MessageType, ReadStatus, ReplyRef};
use crate::store::{patch, DocumentChange, DocumentStore, Query, StoreError, Subscription, MESSAGES};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Cannot message yourself")]
    SelfMessage,

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Not a participant of message {0}")]
    NotParticipant(String),
}

/// Everything needed to send one message
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub content: String,
    pub kind: MessageType,
    pub media: Option<MediaRef>,
    pub reply_to: Option<ReplyRef>,
    pub call_type: Option<CallType>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn media(content: impl Into<String>, media: MediaRef) -> Self {
        let kind = match media {
            MediaRef::Audio { .. } => MessageType::Audio,
            MediaRef::Image { .. } => MessageType::Image,
            MediaRef::File { .. } => MessageType::File,
        };
        Self {
            content: content.into(),
            kind,
            media: Some(media),
            ..Default::default()
        }
    }

    /// Call-log entry appended when a call finishes
    pub fn call_log(call_type: CallType, answered: bool) -> Self {
        let content = match (call_type, answered) {
            (CallType::Voice, true) => "Voice call",
            (CallType::Video, true) => "Video call",
            (CallType::Voice, false) => "Missed voice call",
            (CallType::Video, false) => "Missed video call",
        };
        Self {
            content: content.to_string(),
            call_type: Some(call_type),
            ..Default::default()
        }
    }

    pub fn replying_to(mut self, reply: ReplyRef) -> Self {
        self.reply_to = Some(reply);
        self
    }
}

/// Message operations performed as one signed-in user
#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn DocumentStore>,
    self_id: String,
}

impl MessageStore {
    pub fn new(store: Arc<dyn DocumentStore>, self_id: &str) -> Self {
        Self {
            store,
            self_id: self_id.to_string(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    fn participant_query(&self) -> Query {
        Query::collection(MESSAGES).array_contains("participants", self.self_id.as_str())
    }

    /// Live feed of the conversation between self and `peer_id`
    pub fn subscribe(&self, peer_id: &str) -> Result<ConversationFeed, ChatError> {
        let key = ConversationKey::new(&self.self_id, peer_id);
        let subscription = self.store.subscribe(self.participant_query())?;
        debug!("Subscribed to conversation {}", key.id());
        Ok(ConversationFeed::new(self.self_id.clone(), Some(key), subscription))
    }

    /// Live feed of every message involving self
    pub fn subscribe_inbox(&self) -> Result<ConversationFeed, ChatError> {
        let subscription = self.store.subscribe(self.participant_query())?;
        Ok(ConversationFeed::new(self.self_id.clone(), None, subscription))
    }

    /// Append a message to the conversation with `peer_id`. The timestamp is
    /// assigned by the store and the read status stays unset until delivery.
    pub fn send(&self, peer_id: &str, draft: MessageDraft) -> Result<Message, ChatError> {
        if peer_id == self.self_id {
            return Err(ChatError::SelfMessage);
        }
        if draft.content.trim().is_empty() && draft.media.is_none() && draft.call_type.is_none() {
            return Err(ChatError::EmptyMessage);
        }

        let key = ConversationKey::new(&self.self_id, peer_id);
        let (audio_url, image_url, file_url, file_name) = match draft.media {
            Some(MediaRef::Audio { url }) => (Some(url), None, None, None),
            Some(MediaRef::Image { url }) => (None, Some(url), None, None),
            Some(MediaRef::File { url, name }) => (None, None, Some(url), Some(name)),
            None => (None, None, None, None),
        };

        let message = Message {
            id: String::new(),
            sender_id: self.self_id.clone(),
            recipient_id: peer_id.to_string(),
            participants: key.participants().to_vec(),
            content: draft.content,
            timestamp: self.store.server_time(),
            read_status: None,
            kind: draft.kind,
            audio_url,
            image_url,
            file_url,
            file_name,
            reply_to: draft.reply_to,
            call_type: draft.call_type,
            deleted_by_sender: false,
            deleted_by_recipient: false,
        };

        let mut data = serde_json::to_value(&message)
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        if let Some(obj) = data.as_object_mut() {
            obj.remove("id");
        }

        let doc = self.store.create(MESSAGES, data).map_err(|e| {
            warn!("Failed to send message to {}: {}", peer_id, e);
            e
        })?;
        debug!("Sent message {} in {}", doc.id, key.id());
        Ok(doc.decode()?)
    }

    /// Soft-delete a message on the caller's side; the record stays
    pub fn delete(&self, message_id: &str) -> Result<(), ChatError> {
        let doc = self
            .store
            .get(MESSAGES, message_id)?
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        let message: Message = doc.decode()?;

        let field = if message.sender_id == self.self_id {
            "deletedBySender"
        } else if message.recipient_id == self.self_id {
            "deletedByRecipient"
        } else {
            return Err(ChatError::NotParticipant(message_id.to_string()));
        };

        let mut flag = Map::new();
        flag.insert(field.to_string(), Value::Bool(true));
        self.store.update(MESSAGES, message_id, flag)?;
        Ok(())
    }

    /// Mark every message from `peer_id` to self as read. Returns how many changed.
    pub fn mark_read(&self, peer_id: &str) -> Result<usize, ChatError> {
        let query = self
            .participant_query()
            .where_eq("senderId", peer_id)
            .where_eq("recipientId", self.self_id.as_str());
        let mut changed = 0;
        for doc in self.store.query(&query)? {
            let message: Message = doc.decode()?;
            if message.read_status == Some(ReadStatus::Read) {
                continue;
            }
            self.store
                .update(MESSAGES, &doc.id, patch(json!({ "readStatus": ReadStatus::Read })))?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Delivery receipt for a message addressed to self. Only a message with
    /// no status yet is marked; returns whether anything changed.
    pub fn mark_delivered(&self, message_id: &str) -> Result<bool, ChatError> {
        let message: Message = self
            .store
            .get(MESSAGES, message_id)?
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?
            .decode()?;
        if message.recipient_id != self.self_id || message.read_status.is_some() {
            return Ok(false);
        }
        self.store.update(
            MESSAGES,
            message_id,
            patch(json!({ "readStatus": ReadStatus::Delivered })),
        )?;
        Ok(true)
    }

    /// Every message involving self, across conversations
    pub fn inbox(&self) -> Result<Vec<Message>, ChatError> {
        let mut messages = Vec::new();
        for doc in self.store.query(&self.participant_query())? {
            messages.push(doc.decode()?);
        }
        sort_messages(&mut messages);
        Ok(messages)
    }

    /// Current ordered history with `peer_id`, without subscribing
    pub fn history(&self, peer_id: &str) -> Result<Vec<Message>, ChatError> {
        let key = ConversationKey::new(&self.self_id, peer_id);
        let mut messages = Vec::new();
        for doc in self.store.query(&self.participant_query())? {
            let message: Message = doc.decode()?;
            if message.conversation_key() == key {
                messages.push(message);
            }
        }
        sort_messages(&mut messages);
        Ok(messages)
    }
}

fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// Local cache of one live message query, kept current by applying diffs
pub struct ConversationFeed {
    viewer: String,
    /// `None` means every conversation of `viewer`
    key: Option<ConversationKey>,
    subscription: Subscription,
    cache: HashMap<String, Message>,
}

impl ConversationFeed {
    fn new(viewer: String, key: Option<ConversationKey>, subscription: Subscription) -> Self {
        Self {
            viewer,
            key,
            subscription,
            cache: HashMap::new(),
        }
    }

    pub fn key(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    /// The other participant, for single-conversation feeds
    pub fn peer(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| k.other(&self.viewer))
    }

    /// Apply every pending push. Returns the messages that were added or
    /// modified, in delivery order.
    pub fn poll(&mut self) -> Vec<Message> {
        let mut touched = Vec::new();
        for change in self.subscription.drain() {
            match change {
                DocumentChange::Added(doc) | DocumentChange::Modified(doc) => {
                    let message: Message = match doc.decode() {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("Skipping malformed message {}: {}", doc.id, e);
                            continue;
                        }
                    };
                    if let Some(key) = &self.key {
                        if &message.conversation_key() != key {
                            continue;
                        }
                    }
                    self.cache.insert(message.id.clone(), message.clone());
                    touched.push(message);
                }
                DocumentChange::Removed(id) => {
                    self.cache.remove(&id);
                }
            }
        }
        touched
    }

    /// All messages in timestamp order
    pub fn messages(&self) -> Vec<Message> {
        let mut out: Vec<Message> = self.cache.values().cloned().collect();
        sort_messages(&mut out);
        out
    }

    /// Messages the viewer has not soft-deleted
    pub fn visible(&self) -> Vec<Message> {
        self.messages()
            .into_iter()
            .filter(|m| !m.is_deleted_for(&self.viewer))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
