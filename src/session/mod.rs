//! Session control: state machine, observer events, and the controller
//! that ties capture, playback, video and transport together.

pub mod controller;
pub mod observer;
pub mod state;

pub use controller::{MediaBackends, SessionController, SessionStats, SessionStatus};
pub use observer::{EventRelay, SessionEvent, SessionObserver, SpeakingIndicator};
pub use state::{SessionState, StateMachine, Trigger};
