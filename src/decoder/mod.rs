//! decoder - Keyword spotting capability consumed by the listening loop
//!
//! The acoustic model lives behind `KeywordDecoder`; anything that can turn a
//! stream of raw PCM into "the phrase I think I heard" can drive a session.

#[cfg(feature = "rustpotter")]
mod rustpotter_kws;

#[cfg(feature = "rustpotter")]
pub use rustpotter_kws::RustpotterDecoder;

use crate::error::ListenError;

/// Incremental keyword spotter.
///
/// Moves between `NoUtterance` and `InUtterance`. Frames are only accepted
/// inside an utterance and every `begin_utterance` is paired with exactly one
/// `end_utterance`.
pub trait KeywordDecoder: Send {
    /// Reset recognition state and start a new utterance.
    fn begin_utterance(&mut self) -> Result<(), ListenError>;

    /// Feed raw S16LE PCM. Called once per captured frame, so implementations
    /// must not accumulate state beyond the current utterance.
    fn process_frame(&mut self, frame: &[u8]) -> Result<(), ListenError>;

    /// Best recognition so far in this utterance. Cheap and non-blocking.
    fn current_hypothesis(&self) -> Option<String>;

    /// Finalize and flush the current utterance.
    fn end_utterance(&mut self);
}

/// An utterance in progress. Ends itself on drop unless already ended.
pub struct Utterance<'a> {
    decoder: &'a mut dyn KeywordDecoder,
    active: bool,
}

impl<'a> Utterance<'a> {
    pub fn begin(decoder: &'a mut dyn KeywordDecoder) -> Result<Self, ListenError> {
        decoder.begin_utterance()?;
        Ok(Self {
            decoder,
            active: true,
        })
    }

    pub fn process_frame(&mut self, frame: &[u8]) -> Result<(), ListenError> {
        if !self.active {
            return Err(ListenError::DecoderFault(
                "frame submitted outside an utterance".into(),
            ));
        }
        self.decoder.process_frame(frame)
    }

    pub fn hypothesis(&self) -> Option<String> {
        self.decoder.current_hypothesis()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn end(&mut self) {
        if self.active {
            self.active = false;
            self.decoder.end_utterance();
        }
    }

    /// Start a fresh utterance after `end`.
    pub fn restart(&mut self) -> Result<(), ListenError> {
        if !self.active {
            self.decoder.begin_utterance()?;
            self.active = true;
        }
        Ok(())
    }
}

impl Drop for Utterance<'_> {
    fn drop(&mut self) {
        self.end();
    }
}
