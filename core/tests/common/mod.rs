//! Shared fakes for integration tests
#![allow(dead_code)]

use goalleader_core::call::{
    AudioOutput, MediaConstraints, MediaDevices, MediaError, MediaStream, Playback, Sound,
};
use goalleader_core::chat_controller::{ChatController, ChatServices};
use goalleader_core::contact_directory::Roster;
use goalleader_core::models::TeamMember;
use goalleader_core::store::{AuthorizedStore, MemoryStore, TeamRules};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Counters {
    pub streams_acquired: AtomicUsize,
    pub streams_released: AtomicUsize,
    pub rings_started: AtomicUsize,
    pub rings_stopped: AtomicUsize,
}

impl Counters {
    pub fn live_streams(&self) -> usize {
        self.streams_acquired.load(Ordering::SeqCst) - self.streams_released.load(Ordering::SeqCst)
    }

    pub fn ringing(&self) -> bool {
        self.rings_started.load(Ordering::SeqCst) > self.rings_stopped.load(Ordering::SeqCst)
    }
}

/// Media devices and speakers that count every acquire and release
#[derive(Clone)]
pub struct RecordingMedia {
    pub counters: Arc<Counters>,
    pub camera: bool,
}

impl RecordingMedia {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            camera: true,
        }
    }

    pub fn without_camera() -> Self {
        Self {
            camera: false,
            ..Self::new()
        }
    }
}

impl MediaDevices for RecordingMedia {
    fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if constraints.video && !self.camera {
            return Err(MediaError::NotFound("camera".to_string()));
        }
        let n = self.counters.streams_acquired.fetch_add(1, Ordering::SeqCst);
        let counters = self.counters.clone();
        Ok(MediaStream::new(format!("stream-{}", n), constraints, move || {
            counters.streams_released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

impl AudioOutput for RecordingMedia {
    fn play(&self, sound: Sound, _looping: bool) -> Result<Playback, MediaError> {
        if sound != Sound::Ringtone {
            return Ok(Playback::new(sound, || {}));
        }
        self.counters.rings_started.fetch_add(1, Ordering::SeqCst);
        let counters = self.counters.clone();
        Ok(Playback::new(sound, move || {
            counters.rings_stopped.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Small roster used by the scenarios
pub fn team() -> Roster {
    let member = |id: &str, name: &str| TeamMember {
        id: id.to_string(),
        name: name.to_string(),
        role: "Engineer".to_string(),
        email: None,
    };
    Roster::new(vec![
        member("alice", "Alice Moreau"),
        member("bob", "Bob Okafor"),
        member("carol", "Carol Lindqvist"),
    ])
}

/// Sign `uid` in on a shared backend with team rules and recording media
pub fn login(backend: &MemoryStore, uid: &str, media: &RecordingMedia) -> ChatController {
    let store = AuthorizedStore::new(
        Arc::new(backend.clone()),
        Some(uid.to_string()),
        Arc::new(TeamRules),
    );
    let services = ChatServices {
        store: Arc::new(store),
        roster: team(),
        devices: Arc::new(media.clone()),
        audio: Arc::new(media.clone()),
        telemetry: None,
    };
    ChatController::start(uid, services)
}
