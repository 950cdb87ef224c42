/// Call session state machine: at most one voice/video call per client.
///
/// Idle → Ringing(outgoing) → Accepted → Idle
/// Idle → Ringing(incoming) → Accepted | Declined → Idle
///
/// Every media resource a state holds (ringtone, capture streams) lives in
/// that state, so leaving the state by any path releases it.
use super::media::{AudioOutput, CallMedia, MediaDevices, Playback, Sound};
use crate::models::{CallSession, CallStatus, CallType, Contact};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("A call is already active")]
    Busy,

    #[error("No incoming call is ringing")]
    NotRinging,

    #[error("No outgoing call is waiting for an answer")]
    NotDialing,

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("Call {0} is not addressed to this client")]
    NotRecipient(String),

    #[error("Invalid call transition from {from:?} to {to:?}")]
    InvalidTransition { from: CallStatus, to: CallStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Resource-free view of the machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Ringing(Direction),
    Accepted,
}

enum CallState {
    Idle,
    Ringing {
        session: CallSession,
        direction: Direction,
        ringtone: Option<Playback>,
        /// Local preview for outgoing calls
        media: CallMedia,
    },
    Accepted {
        session: CallSession,
        direction: Direction,
        media: CallMedia,
    },
}

/// A session that just left the machine
#[derive(Debug, Clone, PartialEq)]
pub struct EndedCall {
    pub session: CallSession,
    pub direction: Direction,
    pub answered: bool,
}

fn advance(session: &mut CallSession, next: CallStatus) -> Result<(), CallError> {
    if !session.status.can_advance_to(next) {
        return Err(CallError::InvalidTransition {
            from: session.status,
            to: next,
        });
    }
    session.status = next;
    Ok(())
}

pub struct CallMachine {
    self_id: String,
    devices: Arc<dyn MediaDevices>,
    audio: Arc<dyn AudioOutput>,
    state: CallState,
    accepted_contact: Option<Contact>,
    incoming_caller: Option<Contact>,
}

impl CallMachine {
    pub fn new(self_id: &str, devices: Arc<dyn MediaDevices>, audio: Arc<dyn AudioOutput>) -> Self {
        Self {
            self_id: self_id.to_string(),
            devices,
            audio,
            state: CallState::Idle,
            accepted_contact: None,
            incoming_caller: None,
        }
    }

    pub fn phase(&self) -> CallPhase {
        match &self.state {
            CallState::Idle => CallPhase::Idle,
            CallState::Ringing { direction, .. } => CallPhase::Ringing(*direction),
            CallState::Accepted { .. } => CallPhase::Accepted,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, CallState::Idle)
    }

    pub fn session(&self) -> Option<&CallSession> {
        match &self.state {
            CallState::Idle => None,
            CallState::Ringing { session, .. } | CallState::Accepted { session, .. } => Some(session),
        }
    }

    pub fn ringtone_playing(&self) -> bool {
        matches!(&self.state, CallState::Ringing { ringtone: Some(_), .. })
    }

    fn media(&self) -> Option<&CallMedia> {
        match &self.state {
            CallState::Idle => None,
            CallState::Ringing { media, .. } | CallState::Accepted { media, .. } => Some(media),
        }
    }

    pub fn has_local_media(&self) -> bool {
        self.media().map(|m| m.stream.is_some()).unwrap_or(false)
    }

    pub fn media_degraded(&self) -> bool {
        self.media().map(|m| m.degraded).unwrap_or(false)
    }

    /// Idle → Ringing(outgoing). Rejected while any call is active.
    pub fn initiate(&mut self, peer_id: &str, call_type: CallType) -> Result<&CallSession, CallError> {
        if self.is_active() {
            return Err(CallError::Busy);
        }
        if peer_id == self.self_id {
            return Err(CallError::SelfCall);
        }

        let session = CallSession::new(&self.self_id, peer_id, call_type);
        info!("Calling {} ({} call {})", peer_id, call_type, session.id);
        let media = CallMedia::acquire(self.devices.as_ref(), call_type);
        self.state = CallState::Ringing {
            session,
            direction: Direction::Outgoing,
            ringtone: None,
            media,
        };
        self.session().ok_or(CallError::NotDialing)
    }

    /// Idle → Ringing(incoming); starts the looping ringtone
    pub fn receive_ring(&mut self, session: CallSession, caller: Option<Contact>) -> Result<(), CallError> {
        if self.is_active() {
            return Err(CallError::Busy);
        }
        if session.recipient_id != self.self_id {
            return Err(CallError::NotRecipient(session.id));
        }
        if session.status != CallStatus::Ringing {
            return Err(CallError::InvalidTransition {
                from: session.status,
                to: CallStatus::Ringing,
            });
        }

        let ringtone = match self.audio.play(Sound::Ringtone, true) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Ringtone unavailable: {}", e);
                None
            }
        };
        info!("Incoming {} call from {}", session.call_type, session.caller_id);
        self.incoming_caller = caller;
        self.state = CallState::Ringing {
            session,
            direction: Direction::Incoming,
            ringtone,
            media: CallMedia::default(),
        };
        Ok(())
    }

    /// Ringing(incoming) → Accepted: stops the ringtone and opens media
    pub fn accept(&mut self) -> Result<&CallSession, CallError> {
        if !matches!(
            self.state,
            CallState::Ringing { direction: Direction::Incoming, .. }
        ) {
            return Err(CallError::NotRinging);
        }
        let CallState::Ringing { mut session, ringtone, .. } =
            std::mem::replace(&mut self.state, CallState::Idle)
        else {
            return Err(CallError::NotRinging);
        };

        if let Some(ringtone) = ringtone {
            ringtone.stop();
        }
        advance(&mut session, CallStatus::Accepted)?;
        let media = CallMedia::acquire(self.devices.as_ref(), session.call_type);
        self.accepted_contact = self.incoming_caller.clone();
        self.state = CallState::Accepted {
            session,
            direction: Direction::Incoming,
            media,
        };
        self.session().ok_or(CallError::NotRinging)
    }

    /// Ringing(outgoing) → Accepted once the recipient picks up
    pub fn remote_accepted(&mut self) -> Result<&CallSession, CallError> {
        if !matches!(
            self.state,
            CallState::Ringing { direction: Direction::Outgoing, .. }
        ) {
            return Err(CallError::NotDialing);
        }
        let CallState::Ringing { mut session, media, .. } =
            std::mem::replace(&mut self.state, CallState::Idle)
        else {
            return Err(CallError::NotDialing);
        };

        advance(&mut session, CallStatus::Accepted)?;
        info!("Call {} accepted by {}", session.id, session.recipient_id);
        self.state = CallState::Accepted {
            session,
            direction: Direction::Outgoing,
            media,
        };
        self.session().ok_or(CallError::NotDialing)
    }

    /// Refuse a ringing call, or end any other; always leaves the machine Idle
    pub fn decline(&mut self) -> Option<EndedCall> {
        let status = match self.phase() {
            CallPhase::Ringing(_) => CallStatus::Declined,
            _ => CallStatus::Ended,
        };
        self.finish(status)
    }

    /// End the call in whatever state it is; always leaves the machine Idle
    pub fn hang_up(&mut self) -> Option<EndedCall> {
        self.finish(CallStatus::Ended)
    }

    /// Closing the call dialog ends the call the way the dialog's button would
    pub fn close_dialog(&mut self) -> Option<EndedCall> {
        match self.phase() {
            CallPhase::Ringing(Direction::Incoming) => self.decline(),
            _ => self.hang_up(),
        }
    }

    /// The other side moved the session to a terminal status
    pub fn remote_ended(&mut self, status: CallStatus) -> Option<EndedCall> {
        if !status.is_terminal() {
            return None;
        }
        self.finish(status)
    }

    fn finish(&mut self, status: CallStatus) -> Option<EndedCall> {
        let previous = std::mem::replace(&mut self.state, CallState::Idle);
        self.accepted_contact = None;
        self.incoming_caller = None;

        let (mut session, direction, answered) = match previous {
            CallState::Idle => return None,
            CallState::Ringing {
                session,
                direction,
                ringtone,
                mut media,
            } => {
                if let Some(ringtone) = ringtone {
                    ringtone.stop();
                }
                media.release();
                (session, direction, false)
            }
            CallState::Accepted {
                session,
                direction,
                mut media,
            } => {
                media.release();
                (session, direction, true)
            }
        };

        if let Err(e) = advance(&mut session, status) {
            // Declined is only reachable from ringing
            warn!("{}; ending call {} instead", e, session.id);
            let _ = advance(&mut session, CallStatus::Ended);
        }
        info!("Call {} finished as {:?}", session.id, session.status);
        Some(EndedCall {
            session,
            direction,
            answered,
        })
    }

    /// Who the call UI shows: the accepted contact, else the incoming caller,
    /// else the other party of an outgoing call, else the selected contact.
    pub fn resolve_contact(&self, contacts: &[Contact], selected: Option<&Contact>) -> Option<Contact> {
        if let Some(c) = &self.accepted_contact {
            return Some(c.clone());
        }
        if let Some(c) = &self.incoming_caller {
            return Some(c.clone());
        }
        if let Some(session) = self.session() {
            if session.caller_id == self.self_id {
                let other = session.other_party(&self.self_id);
                if let Some(c) = contacts.iter().find(|c| c.id == other) {
                    return Some(c.clone());
                }
            }
        }
        selected.cloned()
    }
}
