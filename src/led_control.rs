//! Strip output with per-channel brightness

use smart_leds::{RGB8, SmartLedsWrite};

use crate::BoardError;

/// Scales one channel; a brightness of 255 leaves it unchanged
fn scale_channel(value: u8, brightness: u8) -> u8 {
    ((value as u16 * (brightness as u16 + 1)) >> 8) as u8
}

/// Applies per-channel brightness to a pixel
pub fn scale(px: RGB8, brightness: RGB8) -> RGB8 {
    RGB8::new(
        scale_channel(px.r, brightness.r),
        scale_channel(px.g, brightness.g),
        scale_channel(px.b, brightness.b),
    )
}

/// LED strip output stage
pub struct LedController<W> {
    strip: W,
}

impl<W> LedController<W>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    pub fn new(strip: W) -> Self {
        Self { strip }
    }

    /// Writes `frame` with `brightness` applied
    pub fn write_frame(&mut self, frame: &[RGB8], brightness: RGB8) -> Result<(), BoardError> {
        self.strip
            .write(frame.iter().map(|&px| scale(px, brightness)))
            .map_err(|_| BoardError::LedError)
    }
}
