//! Keyword spotting with rustpotter wakeword models.

use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

use super::KeywordDecoder;
use crate::config::HotwordConfig;
use crate::error::ListenError;

/// rustpotter detector with the configured hotword registered as its only
/// wakeword. `acoustic_model` points at the `.rpw` wakeword file.
pub struct RustpotterDecoder {
    detector: Rustpotter,
    bytes_per_frame: usize,
    // Bytes waiting for a full detector frame
    pending: Vec<u8>,
    hypothesis: Option<String>,
    in_utterance: bool,
}

impl RustpotterDecoder {
    pub fn new(config: &HotwordConfig) -> Result<Self, ListenError> {
        let mut rp_config = RustpotterConfig::default();
        rp_config.fmt.sample_rate = config.sample_rate as usize;
        rp_config.fmt.channels = 1;
        rp_config.fmt.sample_format = SampleFormat::I16;
        rp_config.detector.threshold = config.score_threshold;

        let mut detector = Rustpotter::new(&rp_config)
            .map_err(|e| ListenError::DecoderFault(format!("failed to create detector: {}", e)))?;

        let model = config.acoustic_model.to_string_lossy();
        detector
            .add_wakeword_from_file(&config.hotword, &model)
            .map_err(|e| {
                ListenError::DecoderFault(format!("failed to load wakeword model {}: {}", model, e))
            })?;

        log::info!(
            "rustpotter loaded '{}' from {} (score threshold {})",
            config.hotword,
            model,
            config.score_threshold
        );
        log::debug!(
            "dictionary {} is not used by wakeword models",
            config.dictionary.display()
        );

        let bytes_per_frame = detector.get_bytes_per_frame();
        Ok(Self {
            detector,
            bytes_per_frame,
            pending: Vec::with_capacity(bytes_per_frame * 2),
            hypothesis: None,
            in_utterance: false,
        })
    }
}

impl KeywordDecoder for RustpotterDecoder {
    fn begin_utterance(&mut self) -> Result<(), ListenError> {
        if self.in_utterance {
            return Err(ListenError::DecoderFault("utterance already started".into()));
        }
        self.detector.reset();
        self.pending.clear();
        self.hypothesis = None;
        self.in_utterance = true;
        Ok(())
    }

    fn process_frame(&mut self, frame: &[u8]) -> Result<(), ListenError> {
        if !self.in_utterance {
            return Err(ListenError::DecoderFault("no utterance in progress".into()));
        }
        self.pending.extend_from_slice(frame);

        // Feed complete detector frames, keep the remainder for the next call
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.bytes_per_frame {
            let chunk = &self.pending[consumed..consumed + self.bytes_per_frame];
            if let Some(detection) = self.detector.process_bytes(chunk) {
                log::debug!("rustpotter detection: {:?}", detection.name);
                self.hypothesis.get_or_insert(detection.name);
            }
            consumed += self.bytes_per_frame;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    fn current_hypothesis(&self) -> Option<String> {
        self.hypothesis.clone()
    }

    fn end_utterance(&mut self) {
        self.pending.clear();
        self.hypothesis = None;
        self.in_utterance = false;
    }
}
