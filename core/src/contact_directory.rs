/// Contact directory: the team roster projected into reachable contacts,
/// decorated with presence and last-message previews.
use crate::error::{GoalError, Result};
use crate::models::{Contact, Message, Presence, ReadStatus, TeamMember};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

const ROSTER_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RosterFileV1 {
    version: u8,
    members: Vec<TeamMember>,
}

/// Body of a `presence/{userId}` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn presence(&self) -> Presence {
        if self.online {
            Presence::Online
        } else {
            Presence::LastSeen(format!("last seen {}", self.last_seen.format("%H:%M")))
        }
    }
}

/// Static team roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    members: Vec<TeamMember>,
}

impl Roster {
    pub fn new(members: Vec<TeamMember>) -> Self {
        Self { members }
    }

    /// Roster shipped with the dashboard when no roster file is configured
    pub fn builtin() -> Self {
        let member = |id: &str, name: &str, role: &str| TeamMember {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            email: Some(format!("{}@goalleader.app", id)),
        };
        Self::new(vec![
            member("patrick", "Patrick Achitabwino", "Team Lead"),
            member("liam", "Liam Gallagher", "Frontend Developer"),
            member("olivia", "Olivia Martin", "Backend Developer"),
            member("ava", "Ava Johnson", "UI/UX Designer"),
            member("noah", "Noah Brown", "Marketing Specialist"),
            member("emma", "Emma Wilson", "QA Engineer"),
        ])
    }

    /// Load a roster file (`{"version":1,"members":[...]}`)
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(GoalError::Io)?;
        let parsed: RosterFileV1 = serde_json::from_str(&raw).map_err(GoalError::Serialization)?;
        if parsed.version != ROSTER_VERSION {
            return Err(GoalError::Config(format!(
                "Unsupported roster file version: {}",
                parsed.version
            )));
        }

        let mut seen = HashSet::new();
        for m in &parsed.members {
            if !seen.insert(m.id.as_str()) {
                return Err(GoalError::Config(format!("Duplicate roster id: {}", m.id)));
            }
        }
        Ok(Self::new(parsed.members))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(GoalError::Io)?;
        }
        let file = RosterFileV1 {
            version: ROSTER_VERSION,
            members: self.members.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(GoalError::Serialization)?;
        fs::write(path, json).map_err(GoalError::Io)?;
        Ok(())
    }

    pub fn members(&self) -> &[TeamMember] {
        &self.members
    }

    pub fn get(&self, id: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.id == id)
    }
}

#[derive(Debug, Clone)]
struct Preview {
    text: String,
    time: DateTime<Utc>,
    read_status: Option<ReadStatus>,
}

pub struct ContactDirectory {
    roster: Roster,
    presence: HashMap<String, Presence>,
    previews: HashMap<String, Preview>,
    /// Unread incoming message ids per peer
    unread: HashMap<String, HashSet<String>>,
}

impl ContactDirectory {
    pub fn new(roster: Roster) -> Self {
        Self {
            roster,
            presence: HashMap::new(),
            previews: HashMap::new(),
            unread: HashMap::new(),
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Everyone on the roster except `self_id`, in roster order
    pub fn list_contacts(&self, self_id: &str) -> Vec<Contact> {
        self.roster
            .members()
            .iter()
            .filter(|m| m.id != self_id)
            .map(|m| self.project(m))
            .collect()
    }

    pub fn find_contact(&self, id: &str) -> Option<Contact> {
        self.roster.get(id).map(|m| self.project(m))
    }

    fn project(&self, member: &TeamMember) -> Contact {
        let mut contact = Contact::from_member(member);
        if let Some(p) = self.presence.get(&member.id) {
            contact.status = p.clone();
        }
        if let Some(preview) = self.previews.get(&member.id) {
            contact.last_message = preview.text.clone();
            contact.last_message_time = preview.time.format("%H:%M").to_string();
            contact.last_message_read_status = preview.read_status;
        }
        contact.unread_count = self
            .unread
            .get(&member.id)
            .map(|ids| ids.len() as u32)
            .filter(|n| *n > 0);
        contact
    }

    pub fn set_presence(&mut self, id: &str, presence: Presence) {
        self.presence.insert(id.to_string(), presence);
    }

    /// Fold a message added or modified in one of our conversations into the
    /// previews. Incoming unread messages outside `active_peer` count as unread.
    pub fn record_message(&mut self, msg: &Message, self_id: &str, active_peer: Option<&str>) {
        let key = msg.conversation_key();
        let Some(peer) = key.other(self_id) else {
            return;
        };
        let peer = peer.to_string();

        if msg.is_deleted_for(self_id) {
            self.forget_unread(&peer, &msg.id);
            return;
        }

        let newer = self
            .previews
            .get(&peer)
            .map(|p| msg.timestamp >= p.time)
            .unwrap_or(true);
        if newer {
            self.previews.insert(
                peer.clone(),
                Preview {
                    text: msg.preview(),
                    time: msg.timestamp,
                    read_status: msg.read_status,
                },
            );
        }

        let incoming_unread = msg.recipient_id == self_id && msg.read_status != Some(ReadStatus::Read);
        if incoming_unread && active_peer != Some(peer.as_str()) {
            self.unread.entry(peer).or_default().insert(msg.id.clone());
        } else {
            self.forget_unread(&peer, &msg.id);
        }
    }

    fn forget_unread(&mut self, peer: &str, message_id: &str) {
        if let Some(ids) = self.unread.get_mut(peer) {
            ids.remove(message_id);
        }
    }

    pub fn clear_unread(&mut self, peer: &str) {
        self.unread.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use tempfile::TempDir;

    fn msg(id: &str, from: &str, to: &str, content: &str) -> Message {
        let mut participants = vec![from.to_string(), to.to_string()];
        participants.sort();
        Message {
            id: id.to_string(),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            participants,
            content: content.to_string(),
            timestamp: Utc::now(),
            read_status: None,
            kind: MessageType::Text,
            audio_url: None,
            image_url: None,
            file_url: None,
            file_name: None,
            reply_to: None,
            call_type: None,
            deleted_by_sender: false,
            deleted_by_recipient: false,
        }
    }

    #[test]
    fn test_list_excludes_self() {
        let dir = ContactDirectory::new(Roster::builtin());
        let contacts = dir.list_contacts("patrick");
        assert_eq!(contacts.len(), Roster::builtin().members().len() - 1);
        assert!(contacts.iter().all(|c| c.id != "patrick"));
    }

    #[test]
    fn test_find_contact() {
        let dir = ContactDirectory::new(Roster::builtin());
        assert_eq!(dir.find_contact("liam").unwrap().name, "Liam Gallagher");
        assert!(dir.find_contact("nobody").is_none());
    }

    #[test]
    fn test_unread_and_preview() {
        let mut dir = ContactDirectory::new(Roster::builtin());
        dir.record_message(&msg("m1", "liam", "patrick", "hi"), "patrick", None);
        dir.record_message(&msg("m1", "liam", "patrick", "hi"), "patrick", None);
        dir.record_message(&msg("m2", "liam", "patrick", "there"), "patrick", None);

        let liam = dir.find_contact("liam").unwrap();
        assert_eq!(liam.unread_count, Some(2));
        assert_eq!(liam.last_message, "there");

        dir.clear_unread("liam");
        assert_eq!(dir.find_contact("liam").unwrap().unread_count, None);

        // Messages in the open conversation never count as unread
        dir.record_message(&msg("m3", "liam", "patrick", "again"), "patrick", Some("liam"));
        assert_eq!(dir.find_contact("liam").unwrap().unread_count, None);
    }

    #[test]
    fn test_presence() {
        let mut dir = ContactDirectory::new(Roster::builtin());
        dir.set_presence("ava", Presence::Online);
        assert_eq!(dir.find_contact("ava").unwrap().status, Presence::Online);
    }

    #[test]
    fn test_presence_record_last_seen() {
        let seen = DateTime::parse_from_rfc3339("2024-03-01T09:41:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let offline = PresenceRecord {
            online: false,
            last_seen: seen,
        };
        assert_eq!(offline.presence(), Presence::LastSeen("last seen 09:41".to_string()));
        let online = PresenceRecord {
            online: true,
            last_seen: seen,
        };
        assert_eq!(online.presence(), Presence::Online);
    }

    #[test]
    fn test_roster_file_roundtrip_and_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roster.json");
        Roster::builtin().save(&path).unwrap();
        assert_eq!(Roster::load(&path).unwrap(), Roster::builtin());

        fs::write(&path, r#"{"version":2,"members":[]}"#).unwrap();
        assert!(matches!(Roster::load(&path), Err(GoalError::Config(_))));
    }
}
