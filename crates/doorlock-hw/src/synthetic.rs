//! Synthetic frame source for bench runs without a camera.

use crate::frame::{Frame, PixelLayout};
use crate::source::{CaptureError, FrameSource};

/// Moving diagonal RGB gradient. Each read advances the pattern by one step.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    sequence: u32,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequence: 0,
            closed: false,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }

        let shift = self.sequence;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let v = x.wrapping_add(y).wrapping_add(shift) as u8;
                data.extend_from_slice(&[v, v.wrapping_add(85), v.wrapping_add(170)]);
            }
        }

        let frame = Frame::new(data, self.width, self.height, PixelLayout::Rgb24, self.sequence)
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
