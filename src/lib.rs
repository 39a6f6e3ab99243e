//! hotword_listener - listen on a microphone until a configured hotword is heard
//!
//! `SessionCoordinator` is the entry point: it runs at most one
//! `ListeningSession` at a time on a dedicated capture thread, publishes
//! `idle`/`listening` status and fires a `hotword_detected` event on a match.

pub mod audio;
pub mod config;
pub mod control_bridge;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod session;
pub mod status;

pub use config::HotwordConfig;
pub use coordinator::{ListenHandle, NativeBackend, SessionBackend, SessionCoordinator};
pub use error::{ConfigError, ListenError};
pub use session::{ListenOutcome, ListeningSession, SessionReport, SessionState, StopReason};
pub use status::{EntityState, HotwordEvent, ListenerStatus};
