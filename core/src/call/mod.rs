pub mod media;
pub mod session;
pub mod signaling;

pub use media::{AudioOutput, CallMedia, HeadlessMedia, MediaConstraints, MediaDevices, MediaError, MediaStream, Playback, Sound};
pub use session::{CallError, CallMachine, CallPhase, Direction, EndedCall};
pub use signaling::{CallFeed, CallSignal, CallSignaling};
