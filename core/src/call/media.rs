/// Media resources held by a call: capture streams and sound playback.
///
/// Both are scoped guards. The device callback runs exactly once, either on
/// an explicit `stop()` or when the guard is dropped, whichever comes first.
use crate::models::CallType;
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Requested device not found: {0}")]
    NotFound(String),

    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    #[error("Device is busy: {0}")]
    Busy(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub const AUDIO: Self = Self { audio: true, video: false };
    pub const AUDIO_VIDEO: Self = Self { audio: true, video: true };

    pub fn for_call(call_type: CallType) -> Self {
        match call_type {
            CallType::Voice => Self::AUDIO,
            CallType::Video => Self::AUDIO_VIDEO,
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Camera and/or microphone capture handle
pub struct MediaStream {
    id: String,
    constraints: MediaConstraints,
    release: Option<ReleaseFn>,
}

impl MediaStream {
    pub fn new(
        id: impl Into<String>,
        constraints: MediaConstraints,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            constraints,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_video(&self) -> bool {
        self.constraints.video
    }

    pub fn has_audio(&self) -> bool {
        self.constraints.audio
    }

    /// Stop all tracks now
    pub fn stop(mut self) {
        self.release_tracks();
    }

    fn release_tracks(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.release_tracks();
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("constraints", &self.constraints)
            .field("live", &self.release.is_some())
            .finish()
    }
}

/// Capture device access
pub trait MediaDevices: Send + Sync {
    fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sound {
    Ringtone,
    Notification,
}

/// Playing sound; stops when stopped or dropped
pub struct Playback {
    sound: Sound,
    stop: Option<ReleaseFn>,
}

impl Playback {
    pub fn new(sound: Sound, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            sound,
            stop: Some(Box::new(stop)),
        }
    }

    pub fn sound(&self) -> Sound {
        self.sound
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.halt();
    }
}

impl fmt::Debug for Playback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Playback")
            .field("sound", &self.sound)
            .field("playing", &self.stop.is_some())
            .finish()
    }
}

pub trait AudioOutput: Send + Sync {
    fn play(&self, sound: Sound, looping: bool) -> Result<Playback, MediaError>;
}

/// Environment without capture or playback devices (servers, CI)
pub struct HeadlessMedia;

impl MediaDevices for HeadlessMedia {
    fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        Err(MediaError::NotFound(format!(
            "no capture device (audio={}, video={})",
            constraints.audio, constraints.video
        )))
    }
}

impl AudioOutput for HeadlessMedia {
    fn play(&self, sound: Sound, _looping: bool) -> Result<Playback, MediaError> {
        Err(MediaError::NotFound(format!("no audio output for {:?}", sound)))
    }
}

/// Local media of a call, after any degradation
#[derive(Debug, Default)]
pub struct CallMedia {
    pub stream: Option<MediaStream>,
    /// Fewer tracks than the call type asks for
    pub degraded: bool,
}

impl CallMedia {
    /// Acquire media for `call_type`, stepping down video → audio-only → none.
    /// Failures are logged; the call goes on with whatever was obtained.
    pub fn acquire(devices: &dyn MediaDevices, call_type: CallType) -> Self {
        let wanted = MediaConstraints::for_call(call_type);
        match devices.get_user_media(wanted) {
            Ok(stream) => {
                return Self {
                    stream: Some(stream),
                    degraded: false,
                }
            }
            Err(e) => warn!("Could not acquire {:?} for {} call: {}", wanted, call_type, e),
        }

        if wanted.video {
            match devices.get_user_media(MediaConstraints::AUDIO) {
                Ok(stream) => {
                    return Self {
                        stream: Some(stream),
                        degraded: true,
                    }
                }
                Err(e) => warn!("Audio-only fallback failed: {}", e),
            }
        }

        Self {
            stream: None,
            degraded: true,
        }
    }

    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct AudioOnlyDevices {
        released: Arc<AtomicUsize>,
    }

    impl MediaDevices for AudioOnlyDevices {
        fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
            if constraints.video {
                return Err(MediaError::NotFound("camera".to_string()));
            }
            let released = self.released.clone();
            Ok(MediaStream::new("mic", constraints, move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    #[test]
    fn test_stream_released_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let stream = MediaStream::new("s1", MediaConstraints::AUDIO, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        stream.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = count.clone();
        let stream = MediaStream::new("s2", MediaConstraints::AUDIO, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(stream);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_video_degrades_to_audio() {
        let released = Arc::new(AtomicUsize::new(0));
        let devices = AudioOnlyDevices {
            released: released.clone(),
        };
        let mut media = CallMedia::acquire(&devices, CallType::Video);
        assert!(media.degraded);
        let stream = media.stream.as_ref().unwrap();
        assert!(stream.has_audio());
        assert!(!stream.has_video());

        media.release();
        media.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_headless_proceeds_without_media() {
        let media = CallMedia::acquire(&HeadlessMedia, CallType::Voice);
        assert!(media.stream.is_none());
        assert!(media.degraded);
        assert!(HeadlessMedia.play(Sound::Ringtone, true).is_err());
    }
}
