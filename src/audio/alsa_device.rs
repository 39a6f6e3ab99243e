//! ALSA capture backend.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::source::AudioSource;
use crate::error::ListenError;

/// Used when the configuration leaves the device unset.
pub const DEFAULT_DEVICE: &str = "default";

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Period size in frames (one frame = one mono S16LE sample)
    pub period_size: usize,
}

/// Open a PCM device for mono S16LE capture.
pub fn open_capture(device: &str, sample_rate: u32) -> Result<(PCM, AlsaParams), alsa::Error> {
    let pcm = PCM::new(device, Direction::Capture, false)?;

    {
        let hwp = HwParams::any(&pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(1)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA Capture: device={}, rate={}, period_size={}",
        device,
        params.sample_rate,
        params.period_size,
    );
    if params.sample_rate != sample_rate {
        log::warn!(
            "ALSA negotiated {}Hz instead of the requested {}Hz",
            params.sample_rate,
            sample_rate
        );
    }

    Ok((pcm, params))
}

/// Microphone read through ALSA as interleaved little-endian 16-bit mono.
#[derive(Default)]
pub struct AlsaSource {
    pcm: Option<PCM>,
    samples: Vec<i16>,
}

impl AlsaSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSource for AlsaSource {
    fn open(&mut self, device: Option<&str>, sample_rate: u32) -> Result<(), ListenError> {
        if self.pcm.is_some() {
            return Ok(());
        }
        let name = device.unwrap_or(DEFAULT_DEVICE);
        let (pcm, _params) = open_capture(name, sample_rate).map_err(|e| {
            ListenError::DeviceUnavailable(format!("failed to open '{}' for capture: {}", name, e))
        })?;
        self.pcm = Some(pcm);
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ListenError> {
        let pcm = self.pcm.as_ref().ok_or(ListenError::StreamClosed)?;

        let wanted = buf.len() / 2;
        self.samples.resize(wanted, 0);

        let io = pcm
            .io_i16()
            .map_err(|e| ListenError::ReadError(e.to_string()))?;

        match io.readi(&mut self.samples) {
            Ok(frames) => {
                for (chunk, sample) in buf.chunks_exact_mut(2).zip(&self.samples[..frames]) {
                    chunk.copy_from_slice(&sample.to_le_bytes());
                }
                Ok(frames * 2)
            }
            Err(e) => {
                // Overrun: drop this frame and keep the stream alive if possible
                log::warn!("ALSA capture error: {}, recovering...", e);
                match pcm.prepare() {
                    Ok(()) => Ok(0),
                    Err(e2) => {
                        log::error!("Failed to recover PCM capture: {}", e2);
                        Err(ListenError::ReadError(e.to_string()))
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            if let Err(e) = PCM::drop(&pcm) {
                log::debug!("ALSA drop on close failed: {}", e);
            }
            log::info!("ALSA capture closed");
        }
    }

    fn is_open(&self) -> bool {
        self.pcm.is_some()
    }
}

impl Drop for AlsaSource {
    fn drop(&mut self) {
        self.close();
    }
}
