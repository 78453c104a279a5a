//! In-memory doubles for driving the engine without a host

mod media;
mod recorder;
mod session;

pub use media::{AutoPlayback, MediaCall, SimulatedMedia};
pub use recorder::EventRecorder;
pub use session::{RecordingSession, SessionCall};
