//! Frame type and pixel helpers: row packing, YUYV conversion, luma, dark detection, box drawing.

use image::{DynamicImage, GrayImage, RgbImage};

/// Memory layout of [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Packed 8-bit RGB, 3 bytes/pixel.
    Rgb24,
    /// 8-bit grayscale, 1 byte/pixel.
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb24 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// A captured camera frame.
///
/// Produced once per cycle and never mutated after capture; consumers that
/// annotate work on a clone.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixel data, `width * height * layout.bytes_per_pixel()` bytes, row-major.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame, checking that `data` covers the full grid.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * layout.bytes_per_pixel();
        if data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let mut data = data;
        data.truncate(expected);
        Ok(Self {
            data,
            width,
            height,
            layout,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Grayscale copy of the frame (BT.601 luma for RGB input).
    pub fn to_gray(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Gray8 => self.data.clone(),
            PixelLayout::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let gray = self.to_gray();
        if gray.is_empty() {
            return 0.0;
        }
        gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
    }

    /// Draw an unfilled rectangle outline, clipped to the frame.
    ///
    /// On grayscale frames the colour is reduced to its luma.
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3], thickness: u32) {
        if w == 0 || h == 0 || x >= self.width || y >= self.height {
            return;
        }
        let x1 = (x + w - 1).min(self.width - 1);
        let y1 = (y + h - 1).min(self.height - 1);
        let t = thickness.max(1);

        for py in y..=y1 {
            for px in x..=x1 {
                let on_edge = py < y + t || py + t > y1 || px < x + t || px + t > x1;
                if on_edge {
                    self.put_pixel(px, py, color);
                }
            }
        }
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let idx = (y as usize * self.width as usize + x as usize) * self.layout.bytes_per_pixel();
        match self.layout {
            PixelLayout::Rgb24 => self.data[idx..idx + 3].copy_from_slice(&color),
            PixelLayout::Gray8 => self.data[idx] = luma(color[0], color[1], color[2]),
        }
    }

    /// Convert to an `image` buffer, e.g. for saving snapshots.
    pub fn to_image(&self) -> Option<DynamicImage> {
        match self.layout {
            PixelLayout::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8),
            PixelLayout::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageLuma8),
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Copy `rows` rows of `row_bytes` each out of a buffer whose lines are
/// `stride` bytes apart, dropping the per-line padding.
///
/// A `stride` of 0 or equal to `row_bytes` means the buffer is already packed.
pub fn pack_rows(data: &[u8], row_bytes: usize, stride: usize, rows: usize) -> Result<Vec<u8>, FrameError> {
    let stride = if stride == 0 { row_bytes } else { stride };
    if stride < row_bytes {
        return Err(FrameError::InvalidStride { stride, row_bytes });
    }
    let expected = match rows {
        0 => 0,
        n => (n - 1) * stride + row_bytes,
    };
    if data.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }

    if stride == row_bytes {
        return Ok(data[..row_bytes * rows].to_vec());
    }
    let mut packed = Vec::with_capacity(row_bytes * rows);
    for line in data.chunks(stride).take(rows) {
        packed.extend_from_slice(&line[..row_bytes]);
    }
    Ok(packed)
}

/// Convert packed YUYV (4:2:2) to packed RGB24 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

/// Check if a frame is dark: true if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("line stride {stride} shorter than a {row_bytes}-byte row")]
    InvalidStride { stride: usize, row_bytes: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::new(vec![value; (w * h) as usize], w, h, PixelLayout::Gray8, 0).unwrap()
    }

    #[test]
    fn test_yuyv_to_rgb_neutral_gray() {
        // 2x1 image, Y=128 with neutral chroma → mid gray on every channel
        let yuyv = vec![128, 128, 128, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![130, 130, 130, 130, 130, 130]);
    }

    #[test]
    fn test_yuyv_to_rgb_black_and_white() {
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_pack_rows_drops_line_padding() {
        // 2 rows of 3 bytes, each line padded to 4; the last line may omit its padding
        let data = [1, 2, 3, 0xEE, 4, 5, 6];
        assert_eq!(pack_rows(&data, 3, 4, 2).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_pack_rows_packed_and_invalid() {
        assert_eq!(pack_rows(&[1, 2, 3, 4], 2, 0, 2).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(pack_rows(&[1, 2, 3, 4, 9], 2, 2, 2).unwrap(), vec![1, 2, 3, 4]);
        assert!(matches!(
            pack_rows(&[0; 8], 4, 3, 2),
            Err(FrameError::InvalidStride { stride: 3, row_bytes: 4 })
        ));
        assert!(matches!(
            pack_rows(&[0; 6], 3, 4, 2),
            Err(FrameError::InvalidLength { expected: 7, actual: 6 })
        ));
    }

    #[test]
    fn test_frame_new_rejects_short_buffer() {
        let result = Frame::new(vec![0; 5], 2, 1, PixelLayout::Rgb24, 0);
        assert!(matches!(
            result,
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_to_gray_rgb() {
        let frame = Frame::new(vec![255, 255, 255, 0, 0, 0], 2, 1, PixelLayout::Rgb24, 0).unwrap();
        assert_eq!(frame.to_gray(), vec![255, 0]);
    }

    #[test]
    fn test_avg_brightness() {
        assert_eq!(gray_frame(4, 4, 100).avg_brightness(), 100.0);
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut frame = Frame::new(vec![0; 5 * 5 * 3], 5, 5, PixelLayout::Rgb24, 0).unwrap();
        frame.draw_rect(0, 0, 5, 5, [0, 255, 0], 1);
        // Corner is painted, centre is not
        assert_eq!(&frame.data[0..3], &[0, 255, 0]);
        let centre = (2 * 5 + 2) * 3;
        assert_eq!(&frame.data[centre..centre + 3], &[0, 0, 0]);
    }

    #[test]
    fn test_draw_rect_clips_to_frame() {
        let mut frame = gray_frame(4, 4, 0);
        frame.draw_rect(2, 2, 10, 10, [255, 255, 255], 1);
        assert_eq!(frame.data[2 * 4 + 2], 255);
        assert_eq!(frame.data[3 * 4 + 3], 255);
        assert_eq!(frame.data[0], 0);
    }

    #[test]
    fn test_to_image_dimensions() {
        let image = gray_frame(8, 6, 50).to_image().unwrap();
        assert_eq!((image.width(), image.height()), (8, 6));
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));
    }
}
