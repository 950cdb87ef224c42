/// Chat UI controller: contact list, open conversation and call dialog for one
/// signed-in user, driven by store pushes applied on `pump()`.
use crate::call::{
    AudioOutput, CallFeed, CallMachine, CallPhase, CallSignal, CallSignaling, Direction,
    EndedCall, HeadlessMedia, MediaDevices, Playback, Sound,
};
use crate::contact_directory::{ContactDirectory, PresenceRecord, Roster};
use crate::events::ServerEvent;
use crate::message_store::{ChatError, ConversationFeed, MessageDraft, MessageStore};
use crate::models::{CallSession, CallStatus, CallType, Contact, Message, Presence, ReadStatus};
use crate::store::{DocumentChange, DocumentStore, Query, StoreError, Subscription, PRESENCE};
use crate::utils::telemetry::Telemetry;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a controller talks to, built once at boot
#[derive(Clone)]
pub struct ChatServices {
    /// Store session authenticated as the controller's user
    pub store: Arc<dyn DocumentStore>,
    pub roster: Roster,
    pub devices: Arc<dyn MediaDevices>,
    pub audio: Arc<dyn AudioOutput>,
    pub telemetry: Option<Telemetry>,
}

impl ChatServices {
    /// Services for an environment without media devices
    pub fn headless(store: Arc<dyn DocumentStore>, roster: Roster) -> Self {
        Self {
            store,
            roster,
            devices: Arc::new(HeadlessMedia),
            audio: Arc::new(HeadlessMedia),
            telemetry: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Error,
    Info,
}

/// Transient notification shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub description: String,
}

/// What the call dialog shows
#[derive(Debug, Clone, PartialEq)]
pub struct CallDialog {
    pub phase: CallPhase,
    pub call_type: CallType,
    pub contact: Option<Contact>,
    pub degraded: bool,
}

pub struct ChatController {
    self_id: String,
    store: Arc<dyn DocumentStore>,
    audio: Arc<dyn AudioOutput>,
    telemetry: Option<Telemetry>,
    directory: ContactDirectory,
    messages: MessageStore,
    signaling: CallSignaling,
    calls: CallMachine,
    inbox: Option<ConversationFeed>,
    conversation: Option<ConversationFeed>,
    call_feed: Option<CallFeed>,
    presence_feed: Option<Subscription>,
    selected: Option<String>,
    notification: Option<Playback>,
    toasts: Vec<Toast>,
}

impl ChatController {
    /// Sign in as `self_id`: subscribe to inbox, calls and presence and
    /// announce ourselves online. Subscription failures become toasts.
    pub fn start(self_id: &str, services: ChatServices) -> Self {
        let messages = MessageStore::new(services.store.clone(), self_id);
        let signaling = CallSignaling::new(services.store.clone(), self_id);
        let calls = CallMachine::new(self_id, services.devices.clone(), services.audio.clone());

        let mut controller = Self {
            self_id: self_id.to_string(),
            store: services.store,
            audio: services.audio,
            telemetry: services.telemetry,
            directory: ContactDirectory::new(services.roster),
            messages,
            signaling,
            calls,
            inbox: None,
            conversation: None,
            call_feed: None,
            presence_feed: None,
            selected: None,
            notification: None,
            toasts: Vec::new(),
        };

        match controller.messages.subscribe_inbox() {
            Ok(feed) => controller.inbox = Some(feed),
            Err(e) => controller.report_chat("Could not load messages", e),
        }
        match controller.signaling.subscribe() {
            Ok(feed) => controller.call_feed = Some(feed),
            Err(e) => controller.report_store("Could not listen for calls", e),
        }
        match controller.store.subscribe(Query::collection(PRESENCE)) {
            Ok(sub) => controller.presence_feed = Some(sub),
            Err(e) => controller.report_store("Could not load presence", e),
        }
        controller.announce_presence(true);

        info!("Chat controller started for {}", self_id);
        controller.pump();
        controller
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    // --- error surfacing ---

    fn toast(&mut self, kind: ToastKind, title: &str, description: impl Display) {
        self.toasts.push(Toast {
            kind,
            title: title.to_string(),
            description: description.to_string(),
        });
    }

    fn report_store(&mut self, title: &str, err: StoreError) {
        warn!("{}: {}", title, err);
        if let Some(t) = &self.telemetry {
            t.store_error(&err);
        }
        self.toast(ToastKind::Error, title, err);
    }

    fn report_chat(&mut self, title: &str, err: ChatError) {
        match err {
            ChatError::Store(e) => self.report_store(title, e),
            other => {
                debug!("{}: {}", title, other);
                self.toast(ToastKind::Error, title, other);
            }
        }
    }

    pub fn take_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }

    // --- contacts & conversation ---

    pub fn contacts(&self) -> Vec<Contact> {
        self.directory.list_contacts(&self.self_id)
    }

    pub fn selected_contact(&self) -> Option<Contact> {
        self.selected
            .as_deref()
            .and_then(|id| self.directory.find_contact(id))
    }

    /// Open the conversation with `contact_id` and clear its unread count
    pub fn select_contact(&mut self, contact_id: &str) -> bool {
        if contact_id == self.self_id || self.directory.find_contact(contact_id).is_none() {
            self.toast(ToastKind::Error, "Unknown contact", contact_id);
            return false;
        }

        match self.messages.subscribe(contact_id) {
            Ok(feed) => self.conversation = Some(feed),
            Err(e) => {
                self.report_chat("Could not open conversation", e);
                return false;
            }
        }
        self.selected = Some(contact_id.to_string());
        self.directory.clear_unread(contact_id);
        if let Err(e) = self.messages.mark_read(contact_id) {
            self.report_chat("Could not update read status", e);
        }
        self.pump();
        true
    }

    /// Visible messages of the open conversation, oldest first
    pub fn conversation(&self) -> Vec<Message> {
        self.conversation
            .as_ref()
            .map(|feed| feed.visible())
            .unwrap_or_default()
    }

    pub fn send_text(&mut self, content: &str) -> Option<Message> {
        self.send(MessageDraft::text(content))
    }

    /// Send to the selected contact. Failures become a toast.
    pub fn send(&mut self, draft: MessageDraft) -> Option<Message> {
        let Some(peer) = self.selected.clone() else {
            self.toast(ToastKind::Error, "Failed to send message", "No conversation selected");
            return None;
        };
        self.send_to(&peer, draft)
    }

    fn send_to(&mut self, peer: &str, draft: MessageDraft) -> Option<Message> {
        match self.messages.send(peer, draft) {
            Ok(message) => {
                self.directory
                    .record_message(&message, &self.self_id, self.selected.as_deref());
                if let Some(t) = &self.telemetry {
                    t.emit(ServerEvent::NewMessage {
                        message: message.clone(),
                    });
                }
                Some(message)
            }
            Err(e) => {
                self.report_chat("Failed to send message", e);
                None
            }
        }
    }

    pub fn delete_message(&mut self, message_id: &str) -> bool {
        match self.messages.delete(message_id) {
            Ok(()) => {
                if let Some(t) = &self.telemetry {
                    t.emit(ServerEvent::MessageDeleted {
                        message_id: message_id.to_string(),
                        by: self.self_id.clone(),
                    });
                }
                self.pump();
                true
            }
            Err(e) => {
                self.report_chat("Failed to delete message", e);
                false
            }
        }
    }

    // --- calls ---

    pub fn call_phase(&self) -> CallPhase {
        self.calls.phase()
    }

    pub fn calls(&self) -> &CallMachine {
        &self.calls
    }

    pub fn call_contact(&self) -> Option<Contact> {
        let selected = self.selected_contact();
        self.calls.resolve_contact(&self.contacts(), selected.as_ref())
    }

    pub fn call_dialog(&self) -> Option<CallDialog> {
        let session = self.calls.session()?;
        Some(CallDialog {
            phase: self.calls.phase(),
            call_type: session.call_type,
            contact: self.call_contact(),
            degraded: self.calls.media_degraded(),
        })
    }

    /// Call the selected contact
    pub fn start_call(&mut self, call_type: CallType) -> bool {
        let Some(peer) = self.selected.clone() else {
            self.toast(ToastKind::Error, "Cannot start call", "No contact selected");
            return false;
        };
        let session = match self.calls.initiate(&peer, call_type) {
            Ok(session) => session.clone(),
            Err(e) => {
                self.toast(ToastKind::Error, "Cannot start call", e);
                return false;
            }
        };
        if let Err(e) = self.signaling.publish(&session) {
            // Nobody was rung; drop the local session and its media
            self.calls.hang_up();
            self.report_store("Failed to start call", e);
            return false;
        }
        self.emit_call(&session);
        true
    }

    pub fn accept_call(&mut self) -> bool {
        let session = match self.calls.accept() {
            Ok(session) => session.clone(),
            Err(e) => {
                self.toast(ToastKind::Error, "Cannot accept call", e);
                return false;
            }
        };
        match self.signaling.update_status(&session.id, CallStatus::Accepted) {
            Ok(CallStatus::Accepted) => {}
            Ok(status) => {
                // The caller gave up before we picked up
                info!("Call {} was already {:?} when accepted", session.id, status);
                if let Some(ended) = self.calls.remote_ended(status) {
                    self.finish_call(ended, false);
                }
                self.toast(ToastKind::Info, "Call ended", "The caller hung up");
                return false;
            }
            Err(e) => self.report_store("Failed to accept call", e),
        }
        self.emit_call(&session);
        true
    }

    pub fn decline_call(&mut self) {
        if let Some(ended) = self.calls.decline() {
            self.finish_call(ended, true);
        }
    }

    pub fn hang_up(&mut self) {
        if let Some(ended) = self.calls.hang_up() {
            self.finish_call(ended, true);
        }
    }

    pub fn close_call_dialog(&mut self) {
        if let Some(ended) = self.calls.close_dialog() {
            self.finish_call(ended, true);
        }
    }

    fn emit_call(&self, session: &CallSession) {
        if let Some(t) = &self.telemetry {
            t.emit(ServerEvent::CallUpdated {
                call: session.clone(),
            });
        }
    }

    fn finish_call(&mut self, ended: EndedCall, notify_remote: bool) {
        if notify_remote {
            if let Err(e) = self
                .signaling
                .update_status(&ended.session.id, ended.session.status)
            {
                self.report_store("Failed to end call", e);
            }
        }
        self.emit_call(&ended.session);

        if ended.direction == Direction::Outgoing {
            let peer = ended.session.recipient_id.clone();
            let draft = MessageDraft::call_log(ended.session.call_type, ended.answered);
            self.send_to(&peer, draft);
        }
    }

    fn handle_call_signal(&mut self, signal: CallSignal) {
        match signal {
            CallSignal::IncomingRing(session) => {
                let caller = self.directory.find_contact(&session.caller_id);
                if let Err(e) = self.calls.receive_ring(session.clone(), caller) {
                    info!("Declining call {} from {}: {}", session.id, session.caller_id, e);
                    if let Err(e) = self.signaling.update_status(&session.id, CallStatus::Declined) {
                        self.report_store("Failed to decline call", e);
                    }
                }
            }
            CallSignal::StatusChanged(session) => {
                let current = self.calls.session().map(|s| s.id == session.id).unwrap_or(false);
                if !current {
                    return;
                }
                match session.status {
                    CallStatus::Accepted => {
                        if self.calls.phase() == CallPhase::Ringing(Direction::Outgoing) {
                            if let Err(e) = self.calls.remote_accepted() {
                                warn!("Ignoring remote accept: {}", e);
                            }
                        }
                    }
                    CallStatus::Declined | CallStatus::Ended => {
                        if let Some(ended) = self.calls.remote_ended(session.status) {
                            self.finish_call(ended, false);
                        }
                    }
                    CallStatus::Ringing => {}
                }
            }
        }
    }

    // --- presence ---

    fn announce_presence(&mut self, online: bool) {
        let doc = PresenceRecord {
            online,
            last_seen: self.store.server_time(),
        };
        let data = match serde_json::to_value(&doc) {
            Ok(v) => v,
            Err(e) => {
                warn!("Could not encode presence: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(PRESENCE, &self.self_id, data) {
            self.report_store("Could not update presence", e);
        }
    }

    fn apply_presence(&mut self, changes: Vec<DocumentChange>) {
        for change in changes {
            match change {
                DocumentChange::Added(doc) | DocumentChange::Modified(doc) => {
                    match doc.decode::<PresenceRecord>() {
                        Ok(p) => self.directory.set_presence(&doc.id, p.presence()),
                        Err(e) => warn!("Skipping malformed presence {}: {}", doc.id, e),
                    }
                }
                DocumentChange::Removed(id) => self.directory.set_presence(&id, Presence::default()),
            }
        }
    }

    /// Sign out: end any call and go offline
    pub fn sign_out(&mut self) {
        self.hang_up();
        self.announce_presence(false);
    }

    // --- event loop ---

    /// Apply every pending push from the store
    pub fn pump(&mut self) {
        let touched = self
            .inbox
            .as_mut()
            .map(|feed| feed.poll())
            .unwrap_or_default();
        let mut delivered = Vec::new();
        let mut read_from_selected = false;
        for message in &touched {
            self.directory
                .record_message(message, &self.self_id, self.selected.as_deref());
            let incoming = message.recipient_id == self.self_id && !message.is_deleted_for(&self.self_id);
            if !incoming || message.read_status.is_some() {
                continue;
            }
            if self.selected.as_deref() == Some(message.sender_id.as_str()) {
                read_from_selected = true;
            } else {
                delivered.push(message.id.clone());
            }
        }

        if !delivered.is_empty() {
            match self.audio.play(Sound::Notification, false) {
                Ok(p) => self.notification = Some(p),
                Err(e) => debug!("No notification sound: {}", e),
            }
        }
        for id in delivered {
            if let Err(e) = self.messages.mark_delivered(&id) {
                self.report_chat("Could not confirm delivery", e);
            }
        }
        if read_from_selected {
            if let Some(peer) = self.selected.clone() {
                if let Err(e) = self.messages.mark_read(&peer) {
                    self.report_chat("Could not update read status", e);
                }
            }
        }

        if let Some(feed) = self.conversation.as_mut() {
            feed.poll();
        }

        let signals = self
            .call_feed
            .as_mut()
            .map(|feed| feed.poll())
            .unwrap_or_default();
        for signal in signals {
            self.handle_call_signal(signal);
        }

        let presence = self
            .presence_feed
            .as_mut()
            .map(|sub| sub.drain())
            .unwrap_or_default();
        self.apply_presence(presence);

        // Receipts written above come back as pushes
        if let Some(feed) = self.inbox.as_mut() {
            for message in feed.poll() {
                self.directory
                    .record_message(&message, &self.self_id, self.selected.as_deref());
            }
        }
        if let Some(feed) = self.conversation.as_mut() {
            feed.poll();
        }
    }

    /// Read status of our last message to the selected contact
    pub fn last_read_status(&self) -> Option<ReadStatus> {
        self.conversation()
            .iter()
            .rev()
            .find(|m| m.sender_id == self.self_id)
            .and_then(|m| m.read_status)
    }
}
