/// Shared domain types: contacts, messages, call sessions, marketing content
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of the team roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Online state of a contact. Serialized as `"online"` or the last-seen text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Online,
    LastSeen(String),
}

impl Default for Presence {
    fn default() -> Self {
        Presence::LastSeen("offline".to_string())
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Online => write!(f, "online"),
            Presence::LastSeen(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for Presence {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Presence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if s == "online" {
            Presence::Online
        } else {
            Presence::LastSeen(s)
        })
    }
}

/// A reachable peer as shown in the contact list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub role: String,
    pub status: Presence,
    pub last_message: String,
    pub last_message_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_read_status: Option<ReadStatus>,
}

impl Contact {
    pub fn from_member(member: &TeamMember) -> Self {
        Self {
            id: member.id.clone(),
            name: member.name.clone(),
            role: member.role.clone(),
            status: Presence::default(),
            last_message: String::new(),
            last_message_time: String::new(),
            unread_count: None,
            last_message_read_status: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Audio,
    Image,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallType::Voice => write!(f, "voice"),
            CallType::Video => write!(f, "video"),
        }
    }
}

/// Quoted message a reply points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub message_id: String,
    pub sender_id: String,
    pub content: String,
}

/// Attached media for non-text messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    Audio { url: String },
    Image { url: String },
    File { url: String, name: String },
}

/// Unordered pair of participant ids identifying a message thread
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { low: a.to_string(), high: b.to_string() }
        } else {
            Self { low: b.to_string(), high: a.to_string() }
        }
    }

    /// Canonical id: "dm:{min_id}:{max_id}"
    pub fn id(&self) -> String {
        format!("dm:{}:{}", self.low, self.high)
    }

    pub fn participants(&self) -> [String; 2] {
        [self.low.clone(), self.high.clone()]
    }

    pub fn contains(&self, id: &str) -> bool {
        self.low == id || self.high == id
    }

    /// The participant that is not `id`, if `id` is one of the pair
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.low == id {
            Some(&self.high)
        } else if self.high == id {
            Some(&self.low)
        } else {
            None
        }
    }
}

/// A chat message as stored in the `messages` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    /// Sorted participant pair, used to scope store queries
    pub participants: Vec<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_status: Option<ReadStatus>,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<CallType>,
    #[serde(default)]
    pub deleted_by_sender: bool,
    #[serde(default)]
    pub deleted_by_recipient: bool,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.recipient_id)
    }

    /// Whether the message is hidden for `viewer` after a soft delete
    pub fn is_deleted_for(&self, viewer: &str) -> bool {
        (viewer == self.sender_id && self.deleted_by_sender)
            || (viewer == self.recipient_id && self.deleted_by_recipient)
    }

    /// Short text for contact list previews
    pub fn preview(&self) -> String {
        if let Some(call) = self.call_type {
            return match call {
                CallType::Voice => "Voice call".to_string(),
                CallType::Video => "Video call".to_string(),
            };
        }
        match self.kind {
            MessageType::Text => self.content.clone(),
            MessageType::Audio => "Voice message".to_string(),
            MessageType::Image => "Photo".to_string(),
            MessageType::File => self
                .file_name
                .clone()
                .unwrap_or_else(|| "File".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Accepted,
    Declined,
    Ended,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Declined | CallStatus::Ended)
    }

    /// Status transitions only move forward; terminal states never change
    pub fn can_advance_to(self, next: CallStatus) -> bool {
        match (self, next) {
            (CallStatus::Ringing, CallStatus::Accepted)
            | (CallStatus::Ringing, CallStatus::Declined)
            | (CallStatus::Ringing, CallStatus::Ended)
            | (CallStatus::Accepted, CallStatus::Ended) => true,
            _ => false,
        }
    }
}

/// The single in-flight voice/video call, as mirrored in the `calls` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: String,
    pub caller_id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub status: CallStatus,
    pub participant_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(caller_id: &str, recipient_id: &str, call_type: CallType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            caller_id: caller_id.to_string(),
            recipient_id: recipient_id.to_string(),
            call_type,
            status: CallStatus::Ringing,
            participant_ids: vec![caller_id.to_string(), recipient_id.to_string()],
            created_at: Utc::now(),
        }
    }

    /// The participant that is not `id`
    pub fn other_party(&self, id: &str) -> &str {
        if self.caller_id == id {
            &self.recipient_id
        } else {
            &self.caller_id
        }
    }
}

/// LLM-generated marketing bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketingContent {
    pub blog_title: String,
    pub blog_outline: String,
    pub social_media_post: String,
    pub email_subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Generated content waiting for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSuggestion {
    pub id: String,
    pub content: MarketingContent,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContentSuggestion {
    pub fn new(content: MarketingContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            status: ApprovalStatus::Pending,
            reviewed_by: None,
            created_at: Utc::now(),
        }
    }

    /// Approve or reject. Only pending suggestions can be reviewed.
    pub fn review(&mut self, reviewer: &str, approve: bool) -> bool {
        if self.status != ApprovalStatus::Pending {
            return false;
        }
        self.status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.reviewed_by = Some(reviewer.to_string());
        true
    }
}
