//! Capture device capability and its scoped acquisition guard.

use crate::error::ListenError;

/// A microphone that hands out raw PCM bytes.
///
/// Implementations own one device handle and move between `Closed` and `Open`.
/// Reads are only valid while open; `close` may be called any number of times.
pub trait AudioSource: Send {
    /// Claim the device. `None` selects the system default.
    fn open(&mut self, device: Option<&str>, sample_rate: u32) -> Result<(), ListenError>;

    /// Fill `buf` with up to `buf.len()` bytes, blocking until the device
    /// delivers them. Any error ends the caller's read loop.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ListenError>;

    /// Release the device handle. No effect when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// An open capture device. Closing happens on drop, so every exit path of
/// the holder releases the handle exactly once.
pub struct Capture<'a> {
    source: &'a mut dyn AudioSource,
}

impl<'a> Capture<'a> {
    pub fn open(
        source: &'a mut dyn AudioSource,
        device: Option<&str>,
        sample_rate: u32,
    ) -> Result<Self, ListenError> {
        source.open(device, sample_rate)?;
        Ok(Self { source })
    }

    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ListenError> {
        self.source.read_frame(buf)
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        self.source.close();
    }
}
