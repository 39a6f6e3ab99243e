//! audio - Microphone capture for the listening loop
//!
//! The loop only depends on the `AudioSource` capability; the ALSA adapter
//! is the production backend on Linux.

#[cfg(feature = "alsa")]
mod alsa_device;
mod source;

#[cfg(feature = "alsa")]
pub use alsa_device::{AlsaSource, DEFAULT_DEVICE};
pub use source::{AudioSource, Capture};
