/// Real-time events streamed over SSE (/events endpoint)
use crate::models::{CallSession, Message};
use crate::store::PermissionContext;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was appended to a conversation
    NewMessage { message: Message },
    /// A participant soft-deleted a message on their side
    MessageDeleted { message_id: String, by: String },
    /// A call session document changed status
    CallUpdated { call: CallSession },
    /// The store refused an operation
    StoreError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<PermissionContext>,
    },
}
