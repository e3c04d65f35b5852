//! Pixel-level disagreement between two comparable images.

use crate::error::EngineError;
use crate::frame::{ImageBuffer, PixelFormat};
use crate::pipeline::to_luminance;

/// Default mask level for [`highlight`]
pub const DEFAULT_HIGHLIGHT_THRESHOLD: u8 = 30;

/// Marker painted over differing pixels of a BGR image (pure red)
pub const MARKER_BGR: [u8; 3] = [0, 0, 255];

/// Marker painted over differing pixels of a luminance image
pub const MARKER_LUMINANCE: u8 = 255;

fn ensure_comparable(a: &ImageBuffer, b: &ImageBuffer) -> Result<(), EngineError> {
    if a.is_comparable(b) {
        Ok(())
    } else {
        Err(EngineError::SizeMismatch {
            left: a.describe(),
            right: b.describe(),
        })
    }
}

/// Element-wise `|a - b|` for every sample
pub fn abs_diff(a: &ImageBuffer, b: &ImageBuffer) -> Result<ImageBuffer, EngineError> {
    ensure_comparable(a, b)?;

    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| x.abs_diff(y))
        .collect();
    ImageBuffer::from_raw(a.width(), a.height(), a.format(), data)
}

/// Mean of squared luminance differences.
///
/// Multi-channel differences are collapsed to luminance before squaring.
pub fn mse(a: &ImageBuffer, b: &ImageBuffer) -> Result<f64, EngineError> {
    let diff = to_luminance(&abs_diff(a, b)?)?;

    let sum_squared: u64 = diff
        .data()
        .iter()
        .map(|&v| (v as u64) * (v as u64))
        .sum();
    Ok(sum_squared as f64 / diff.pixel_count() as f64)
}

/// Binary mask (0/255) of pixels whose luminance difference reaches `threshold`
pub fn difference_mask(
    a: &ImageBuffer,
    b: &ImageBuffer,
    threshold: u8,
) -> Result<ImageBuffer, EngineError> {
    let diff = to_luminance(&abs_diff(a, b)?)?;
    let data = diff
        .data()
        .iter()
        .map(|&v| if v >= threshold { 255 } else { 0 })
        .collect();
    ImageBuffer::from_raw(diff.width(), diff.height(), PixelFormat::Luminance8, data)
}

/// Copy of `a` with the marker color painted wherever the difference mask is set
pub fn highlight(
    a: &ImageBuffer,
    b: &ImageBuffer,
    threshold: u8,
) -> Result<ImageBuffer, EngineError> {
    let mask = difference_mask(a, b, threshold)?;

    let mut data = a.data().to_vec();
    let channels = a.channels();
    for (pixel, &m) in data.chunks_exact_mut(channels).zip(mask.data()) {
        if m == 255 {
            match a.format() {
                PixelFormat::Bgr24 => pixel.copy_from_slice(&MARKER_BGR),
                PixelFormat::Luminance8 => pixel[0] = MARKER_LUMINANCE,
            }
        }
    }
    ImageBuffer::from_raw(a.width(), a.height(), a.format(), data)
}

/// Number of set pixels in a mask produced by [`difference_mask`]
pub fn changed_pixels(mask: &ImageBuffer) -> usize {
    mask.data().iter().filter(|&&v| v == 255).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PreprocessingPipeline, PreprocessingStep, StepOp};

    fn bgr(width: u32, height: u32, pixel: [u8; 3]) -> ImageBuffer {
        ImageBuffer::filled(width, height, PixelFormat::Bgr24, &pixel).unwrap()
    }

    fn pattern(seed: u8) -> ImageBuffer {
        let data = (0..48u32)
            .map(|i| (i as u8).wrapping_mul(37).wrapping_add(seed))
            .collect();
        ImageBuffer::from_raw(4, 4, PixelFormat::Bgr24, data).unwrap()
    }

    #[test]
    fn test_abs_diff_is_symmetric() {
        let a = pattern(3);
        let b = pattern(91);
        assert_eq!(abs_diff(&a, &b).unwrap(), abs_diff(&b, &a).unwrap());
    }

    #[test]
    fn test_abs_diff_values() {
        let a = ImageBuffer::from_raw(1, 1, PixelFormat::Bgr24, vec![10, 200, 0]).unwrap();
        let b = ImageBuffer::from_raw(1, 1, PixelFormat::Bgr24, vec![30, 100, 255]).unwrap();
        assert_eq!(abs_diff(&a, &b).unwrap().data(), &[20, 100, 255]);
    }

    #[test]
    fn test_size_mismatch() {
        let a = bgr(4, 4, [0, 0, 0]);
        let b = bgr(4, 3, [0, 0, 0]);
        assert!(matches!(
            abs_diff(&a, &b),
            Err(EngineError::SizeMismatch { .. })
        ));
        assert!(matches!(mse(&a, &b), Err(EngineError::SizeMismatch { .. })));
        assert!(matches!(
            highlight(&a, &b, DEFAULT_HIGHLIGHT_THRESHOLD),
            Err(EngineError::SizeMismatch { .. })
        ));

        let gray = ImageBuffer::filled(4, 4, PixelFormat::Luminance8, &[0]).unwrap();
        assert!(matches!(
            abs_diff(&a, &gray),
            Err(EngineError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_mse_properties() {
        let a = pattern(5);
        let b = pattern(130);
        assert_eq!(mse(&a, &a).unwrap(), 0.0);
        assert_eq!(mse(&a, &b).unwrap(), mse(&b, &a).unwrap());
        assert!(mse(&a, &b).unwrap() >= 0.0);
    }

    #[test]
    fn test_mse_of_identical_gray_images_is_zero() {
        let a = bgr(4, 4, [128, 128, 128]);
        let b = bgr(4, 4, [128, 128, 128]);
        assert_eq!(mse(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_mse_black_vs_white_after_grayscale() {
        let pipeline =
            PreprocessingPipeline::new(vec![PreprocessingStep::new(1, StepOp::Grayscale)])
                .unwrap();
        let black = pipeline.apply(&bgr(2, 2, [0, 0, 0])).unwrap();
        let white = pipeline.apply(&bgr(2, 2, [255, 255, 255])).unwrap();
        assert_eq!(mse(&black, &white).unwrap(), 65025.0);
    }

    #[test]
    fn test_mse_does_not_overflow_on_large_images() {
        let black = ImageBuffer::filled(2000, 2000, PixelFormat::Luminance8, &[0]).unwrap();
        let white = ImageBuffer::filled(2000, 2000, PixelFormat::Luminance8, &[255]).unwrap();
        assert_eq!(mse(&black, &white).unwrap(), 65025.0);
    }

    #[test]
    fn test_highlight_marks_only_changed_region() {
        let a = bgr(3, 3, [100, 100, 100]);
        let mut data = a.data().to_vec();
        // Center pixel differs by 100 in every channel, so by 100 in luminance
        data[12..15].copy_from_slice(&[200, 200, 200]);
        let b = ImageBuffer::from_raw(3, 3, PixelFormat::Bgr24, data).unwrap();

        let output = highlight(&a, &b, DEFAULT_HIGHLIGHT_THRESHOLD).unwrap();
        for y in 0..3 {
            for x in 0..3 {
                if (x, y) == (1, 1) {
                    assert_eq!(output.pixel(x, y), Some(&MARKER_BGR[..]));
                } else {
                    assert_eq!(output.pixel(x, y), a.pixel(x, y));
                }
            }
        }
    }

    #[test]
    fn test_highlight_below_threshold_leaves_image_untouched() {
        let a = bgr(2, 2, [100, 100, 100]);
        let b = bgr(2, 2, [110, 110, 110]);
        assert_eq!(highlight(&a, &b, 30).unwrap(), a);
    }

    #[test]
    fn test_highlight_luminance_uses_white_marker() {
        let a = ImageBuffer::from_raw(2, 1, PixelFormat::Luminance8, vec![10, 10]).unwrap();
        let b = ImageBuffer::from_raw(2, 1, PixelFormat::Luminance8, vec![10, 90]).unwrap();
        let output = highlight(&a, &b, 30).unwrap();
        assert_eq!(output.data(), &[10, MARKER_LUMINANCE]);

        let mask = difference_mask(&a, &b, 30).unwrap();
        assert_eq!(changed_pixels(&mask), 1);
    }
}
