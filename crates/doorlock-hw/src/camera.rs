//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelLayout};
use crate::source::{CaptureError, FrameSource};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, converted to RGB).
    Yuyv,
    /// Packed RGB24 (3 bytes/pixel, used as-is).
    Rgb3,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Yuyv => 2,
            Self::Rgb3 => 3,
            Self::Grey => 1,
        }
    }

    /// Map a negotiated FourCC to a supported format.
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb3),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// V4L2 camera with a persistent mmap capture stream.
pub struct V4l2Camera {
    // Field order matters: the stream must drop before the device.
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    /// Bytes per line as reported by the driver; may exceed the packed row.
    stride: u32,
}

impl V4l2Camera {
    /// Open `/dev/video{index}`.
    pub fn open_index(index: u32) -> Result<Self, CaptureError> {
        Self::open(&format!("/dev/video{index}"))
    }

    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CaptureError::DeviceBusy
            } else {
                CaptureError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::StreamingNotSupported);
        }

        // Ask for YUYV; drivers may answer with RGB3 or GREY instead.
        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or GREY)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            stride = negotiated.stride,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            stride: negotiated.stride,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for V4l2Camera {
    fn describe(&self) -> String {
        format!(
            "v4l2 {} {}x{} {:?}",
            self.device_path, self.width, self.height, self.pixel_format
        )
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Closed)?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        decode_buffer(
            self.pixel_format,
            self.width,
            self.height,
            self.stride,
            buf,
            meta.sequence,
        )
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.device_path, "camera closed");
        }
        self.device = None;
    }
}

/// Convert a dequeued buffer into a frame, dropping any per-line padding.
fn decode_buffer(
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
    buf: &[u8],
    sequence: u32,
) -> Result<Frame, CaptureError> {
    let row_bytes = width as usize * format.bytes_per_pixel();
    let packed = frame::pack_rows(buf, row_bytes, stride as usize, height as usize)
        .map_err(|e| CaptureError::CaptureFailed(format!("{format:?} buffer: {e}")))?;

    let (data, layout) = match format {
        PixelFormat::Yuyv => {
            let rgb = frame::yuyv_to_rgb(&packed, width, height).map_err(|e| {
                CaptureError::CaptureFailed(format!("YUYV conversion failed: {e}"))
            })?;
            (rgb, PixelLayout::Rgb24)
        }
        PixelFormat::Rgb3 => (packed, PixelLayout::Rgb24),
        PixelFormat::Grey => (packed, PixelLayout::Gray8),
    };

    Frame::new(data, width, height, layout, sequence)
        .map_err(|e| CaptureError::CaptureFailed(format!("{format:?} buffer: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_padded_grey_and_rgb() {
        // 2x2 GREY with lines padded to 4 bytes
        let grey = [10, 20, 0, 0, 30, 40, 0, 0];
        let frame = decode_buffer(PixelFormat::Grey, 2, 2, 4, &grey, 7).unwrap();
        assert_eq!(frame.data, vec![10, 20, 30, 40]);
        assert_eq!(frame.layout, PixelLayout::Gray8);
        assert_eq!(frame.sequence, 7);

        // 1x2 RGB3 with lines padded to 4 bytes
        let rgb = [1, 2, 3, 0, 4, 5, 6, 0];
        let frame = decode_buffer(PixelFormat::Rgb3, 1, 2, 4, &rgb, 0).unwrap();
        assert_eq!(frame.data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_decode_padded_yuyv() {
        // 2x2 YUYV, 4 bytes per row padded to 8
        let yuyv = [16, 128, 235, 128, 9, 9, 9, 9, 235, 128, 16, 128, 9, 9, 9, 9];
        let frame = decode_buffer(PixelFormat::Yuyv, 2, 2, 8, &yuyv, 0).unwrap();
        assert_eq!(frame.data.len(), 2 * 2 * 3);
        assert_eq!(&frame.data[..3], &[0, 0, 0]);
        assert_eq!(&frame.data[9..], &[0, 0, 0]);
    }

    #[test]
    fn test_decode_short_buffer_fails() {
        let result = decode_buffer(PixelFormat::Grey, 2, 2, 4, &[0; 5], 0);
        assert!(matches!(result, Err(CaptureError::CaptureFailed(_))));
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"RGB3")), Some(PixelFormat::Rgb3));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let result = V4l2Camera::open("/dev/video-doorlock-does-not-exist");
        assert!(matches!(result, Err(CaptureError::DeviceNotFound(_))));
    }
}
