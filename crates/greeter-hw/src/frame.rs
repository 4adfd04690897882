//! Frame type and pixel conversion: YUYV/MJPG/RGB3 to RGB, dark detection.

use image::{ImageFormat, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.image.pixels().len();
        if pixels == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p.0)).sum::<f32>() / pixels as f32
    }

    /// True if more than `threshold_pct` of pixels are near black.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        let pixels = self.image.pixels().len();
        if pixels == 0 {
            return true;
        }
        let dark = self.image.pixels().filter(|p| luma(p.0) < 32.0).count();
        (dark as f32 / pixels as f32) > threshold_pct
    }
}

fn luma([r, g, b]: [u8; 3]) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded MJPG is {actual_w}x{actual_h}, expected {expected_w}x{expected_h}")]
    SizeMismatch {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// Each 4-byte group [Y0, U, Y1, V] yields two pixels sharing U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(chunk[2], u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected: (width * height * 3) as usize,
        actual: 0,
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        (c + 1.596 * e).round().clamp(0.0, 255.0) as u8,
        (c - 0.392 * d - 0.813 * e).round().clamp(0.0, 255.0) as u8,
        (c + 2.017 * d).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Copy a packed RGB24 buffer into an image.
pub fn rgb24_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

/// Decode one Motion-JPEG frame.
pub fn mjpg_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let image = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8();
    if image.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            expected_w: width,
            expected_h: height,
            actual_w: image.width(),
            actual_h: image.height(),
        });
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(image: RgbImage) -> Frame {
        Frame { image, timestamp: std::time::Instant::now(), sequence: 0 }
    }

    #[test]
    fn test_yuyv_grey_pixels() {
        // Neutral chroma: Y=16 is black, Y=235 is white.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let yuyv = vec![82, 90, 82, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > 240 && g < 20 && b < 20, "got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_rgb24_copy() {
        let buf: Vec<u8> = (0..12).collect();
        let rgb = rgb24_to_rgb(&buf, 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([9, 10, 11]));
        assert!(rgb24_to_rgb(&buf[..11], 2, 2).is_err());
    }

    #[test]
    fn test_mjpg_roundtrip_dimensions() {
        let src = RgbImage::from_pixel(8, 6, Rgb([200, 100, 50]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(src)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        assert_eq!(mjpg_to_rgb(&jpeg, 8, 6).unwrap().dimensions(), (8, 6));
        assert!(matches!(mjpg_to_rgb(&jpeg, 16, 6), Err(FrameError::SizeMismatch { .. })));
        assert!(matches!(mjpg_to_rgb(b"not a jpeg", 8, 6), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(frame(RgbImage::new(10, 10)).is_dark(0.95));
        assert!(!frame(RgbImage::from_pixel(10, 10, Rgb([128, 128, 128]))).is_dark(0.95));
        assert!(frame(RgbImage::new(0, 0)).is_dark(0.95));
    }

    #[test]
    fn test_avg_brightness() {
        let f = frame(RgbImage::from_pixel(4, 4, Rgb([100, 100, 100])));
        assert!((f.avg_brightness() - 100.0).abs() < 0.01);
    }
}
