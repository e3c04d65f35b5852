use crate::error::{EngineError, InspectorError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Channel layout of an [`ImageBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Single 8-bit luminance channel
    Luminance8,
    /// Three 8-bit channels in blue, green, red order
    Bgr24,
}

impl PixelFormat {
    /// Number of samples per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Luminance8 => 1,
            PixelFormat::Bgr24 => 3,
        }
    }
}

/// Encoded file formats for stored images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodedFormat {
    Jpeg,
    Png,
}

impl EncodedFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EncodedFormat::Jpeg => "jpg",
            EncodedFormat::Png => "png",
        }
    }
}

/// Immutable row-major 8-bit pixel buffer.
///
/// The sample vector always holds `width * height * channels` bytes. Pixel data
/// is shared, so cloning is cheap and never copies samples; every transform
/// allocates a fresh buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<Vec<u8>>,
}

impl ImageBuffer {
    /// Build a buffer from raw samples, checking the length invariant
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> std::result::Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::invalid_input(format!(
                "image dimensions must be positive, got {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(EngineError::invalid_input(format!(
                "expected {} samples for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                format,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            format,
            data: Arc::new(data),
        })
    }

    /// Buffer of the given size with every pixel set to `pixel`
    pub fn filled(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixel: &[u8],
    ) -> std::result::Result<Self, EngineError> {
        if pixel.len() != format.channels() {
            return Err(EngineError::invalid_input(format!(
                "fill value has {} channels, {:?} needs {}",
                pixel.len(),
                format,
                format.channels()
            )));
        }
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * format.channels())
            .collect();
        Self::from_raw(width, height, format, data)
    }

    /// Decode JPEG/PNG/BMP bytes into a BGR buffer
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut data = rgb.into_raw();
        swap_red_blue(&mut data);
        Ok(Self::from_raw(width, height, PixelFormat::Bgr24, data)?)
    }

    /// Encode into a compressed file format
    pub fn encode(&self, format: EncodedFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
        let (samples, color) = match self.format {
            PixelFormat::Luminance8 => (self.data.to_vec(), ColorType::L8),
            PixelFormat::Bgr24 => {
                let mut rgb = self.data.to_vec();
                swap_red_blue(&mut rgb);
                (rgb, ColorType::Rgb8)
            }
        };

        let mut output = Vec::new();
        match format {
            EncodedFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut output, jpeg_quality.clamp(1, 100))
                    .write_image(&samples, self.width, self.height, color)
                    .map_err(InspectorError::from)?;
            }
            EncodedFormat::Png => {
                PngEncoder::new(&mut output)
                    .write_image(&samples, self.width, self.height, color)
                    .map_err(InspectorError::from)?;
            }
        }
        Ok(output)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of pixels (not samples)
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Samples of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        Some(&self.data[start..start + channels])
    }

    /// True when width, height and channel layout all match
    pub fn is_comparable(&self, other: &ImageBuffer) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }

    /// Human-readable geometry, used in error reports
    pub fn describe(&self) -> String {
        format!("{}x{} {:?}", self.width, self.height, self.format)
    }

    pub(crate) fn to_gray_image(&self) -> Option<GrayImage> {
        match self.format {
            PixelFormat::Luminance8 => {
                GrayImage::from_raw(self.width, self.height, self.data.to_vec())
            }
            PixelFormat::Bgr24 => None,
        }
    }

    /// Three-channel view. Samples keep BGR order; callers only use
    /// channel-agnostic operations on it.
    pub(crate) fn to_rgb_container(&self) -> Option<RgbImage> {
        match self.format {
            PixelFormat::Bgr24 => RgbImage::from_raw(self.width, self.height, self.data.to_vec()),
            PixelFormat::Luminance8 => None,
        }
    }

    pub(crate) fn from_gray_image(image: GrayImage) -> std::result::Result<Self, EngineError> {
        let (width, height) = image.dimensions();
        Self::from_raw(width, height, PixelFormat::Luminance8, image.into_raw())
    }

    pub(crate) fn from_rgb_container(image: RgbImage) -> std::result::Result<Self, EngineError> {
        let (width, height) = image.dimensions();
        Self::from_raw(width, height, PixelFormat::Bgr24, image.into_raw())
    }
}

fn swap_red_blue(samples: &mut [u8]) {
    for pixel in samples.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_checks_length() {
        assert!(ImageBuffer::from_raw(2, 2, PixelFormat::Bgr24, vec![0; 12]).is_ok());

        let err = ImageBuffer::from_raw(2, 2, PixelFormat::Bgr24, vec![0; 11]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));

        let err = ImageBuffer::from_raw(0, 2, PixelFormat::Luminance8, vec![]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_filled_and_pixel_access() {
        let image = ImageBuffer::filled(3, 2, PixelFormat::Bgr24, &[1, 2, 3]).unwrap();
        assert_eq!(image.pixel_count(), 6);
        assert_eq!(image.pixel(2, 1), Some(&[1u8, 2, 3][..]));
        assert_eq!(image.pixel(3, 0), None);
    }

    #[test]
    fn test_comparable() {
        let a = ImageBuffer::filled(4, 4, PixelFormat::Bgr24, &[0, 0, 0]).unwrap();
        let b = ImageBuffer::filled(4, 4, PixelFormat::Luminance8, &[0]).unwrap();
        let c = ImageBuffer::filled(4, 5, PixelFormat::Bgr24, &[0, 0, 0]).unwrap();
        assert!(a.is_comparable(&a.clone()));
        assert!(!a.is_comparable(&b));
        assert!(!a.is_comparable(&c));
    }

    #[test]
    fn test_png_preserves_channel_order() {
        // Pure blue in BGR order
        let image = ImageBuffer::filled(2, 2, PixelFormat::Bgr24, &[255, 0, 0]).unwrap();
        let png = image.encode(EncodedFormat::Png, 90).unwrap();
        let decoded = ImageBuffer::decode(&png).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ImageBuffer::decode(&[0u8, 1, 2, 3]).is_err());
    }
}
