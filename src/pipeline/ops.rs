use super::step::StepOp;
use crate::error::EngineError;
use crate::frame::{ImageBuffer, PixelFormat};

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    contrast::equalize_histogram,
    filter::{gaussian_blur_f32, median_filter},
    geometric_transformations::{warp, Interpolation, Projection},
    map::map_colors,
};

// BT.601 weights in 14-bit fixed point; they sum to 1 << 14
const LUMA_B: u32 = 1868;
const LUMA_G: u32 = 9617;
const LUMA_R: u32 = 4899;
const LUMA_SHIFT: u32 = 14;

/// Luminance of one BGR sample triple
pub fn luminance(b: u8, g: u8, r: u8) -> u8 {
    ((b as u32 * LUMA_B + g as u32 * LUMA_G + r as u32 * LUMA_R + (1 << (LUMA_SHIFT - 1)))
        >> LUMA_SHIFT) as u8
}

/// Run one step against `image`, producing a new buffer
pub fn apply_step(op: &StepOp, image: &ImageBuffer) -> Result<ImageBuffer, EngineError> {
    op.validate()?;
    op.output_format(image.format())?;

    match op {
        StepOp::Grayscale => to_luminance(image),
        StepOp::Resize { width, height } => {
            let (w, h) = (*width as u32, *height as u32);
            per_layout(
                image,
                |gray| imageops::resize(gray, w, h, FilterType::Triangle),
                |color| imageops::resize(color, w, h, FilterType::Triangle),
            )
        }
        StepOp::GaussianBlur { kernel_size } => {
            if *kernel_size == 1 {
                return Ok(image.clone());
            }
            let sigma = gaussian_sigma(*kernel_size);
            per_layout(
                image,
                |gray| gaussian_blur_f32(gray, sigma),
                |color| gaussian_blur_f32(color, sigma),
            )
        }
        StepOp::MedianFilter { kernel_size } => {
            if *kernel_size == 1 {
                return Ok(image.clone());
            }
            let radius = (*kernel_size as u32 - 1) / 2;
            per_layout(
                image,
                |gray| median_filter(gray, radius, radius),
                |color| median_filter(color, radius, radius),
            )
        }
        StepOp::Threshold { value } => {
            let value = *value;
            gray_only(op.name(), image, |gray| {
                map_colors(gray, |p: Luma<u8>| {
                    Luma([if p[0] as f64 >= value { 255 } else { 0 }])
                })
            })
        }
        StepOp::EqualizeHistogram => gray_only(op.name(), image, equalize_histogram),
        StepOp::Brightness { delta } => {
            let data = image
                .data()
                .iter()
                .map(|&v| (v as i32).saturating_add(*delta).clamp(0, 255) as u8)
                .collect();
            ImageBuffer::from_raw(image.width(), image.height(), image.format(), data)
        }
        StepOp::Rotate { angle } => {
            let matrix = rotation_matrix(image.width(), image.height(), *angle);
            warp_affine(op.name(), image, &matrix)
        }
        StepOp::Affine { matrix } => warp_affine(op.name(), image, matrix),
    }
}

/// Convert BGR to single-channel luminance; luminance input is returned as is
pub fn to_luminance(image: &ImageBuffer) -> Result<ImageBuffer, EngineError> {
    match image.format() {
        PixelFormat::Luminance8 => Ok(image.clone()),
        PixelFormat::Bgr24 => {
            let data: Vec<u8> = image
                .data()
                .chunks_exact(3)
                .map(|px| luminance(px[0], px[1], px[2]))
                .collect();
            ImageBuffer::from_raw(image.width(), image.height(), PixelFormat::Luminance8, data)
        }
    }
}

/// Sigma used for a square kernel of the given size
pub(crate) fn gaussian_sigma(kernel_size: i32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Affine matrix rotating about the image center; positive angles turn counter-clockwise
pub(crate) fn rotation_matrix(width: u32, height: u32, angle_degrees: f64) -> [f64; 6] {
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
    let radians = angle_degrees.to_radians();
    let (alpha, beta) = (radians.cos(), radians.sin());
    [
        alpha,
        beta,
        (1.0 - alpha) * cx - beta * cy,
        -beta,
        alpha,
        beta * cx + (1.0 - alpha) * cy,
    ]
}

fn warp_affine(
    step: &'static str,
    image: &ImageBuffer,
    matrix: &[f64; 6],
) -> Result<ImageBuffer, EngineError> {
    let projection = Projection::from_matrix([
        matrix[0] as f32,
        matrix[1] as f32,
        matrix[2] as f32,
        matrix[3] as f32,
        matrix[4] as f32,
        matrix[5] as f32,
        0.0,
        0.0,
        1.0,
    ])
    .ok_or_else(|| EngineError::invalid_parameter(step, "matrix is not invertible"))?;

    per_layout(
        image,
        |gray| warp(gray, &projection, Interpolation::Bilinear, Luma([0u8])),
        |color| warp(color, &projection, Interpolation::Bilinear, Rgb([0u8, 0, 0])),
    )
}

/// Run a luminance-only operation; color input is rejected
fn gray_only<G>(
    step: &'static str,
    image: &ImageBuffer,
    gray: G,
) -> Result<ImageBuffer, EngineError>
where
    G: FnOnce(&GrayImage) -> GrayImage,
{
    if image.format() != PixelFormat::Luminance8 {
        return Err(EngineError::UnsupportedFormat {
            step,
            format: image.format(),
        });
    }
    let source = image
        .to_gray_image()
        .ok_or_else(|| EngineError::invalid_input("luminance buffer has wrong size"))?;
    ImageBuffer::from_gray_image(gray(&source))
}

fn per_layout<G, C>(image: &ImageBuffer, gray: G, color: C) -> Result<ImageBuffer, EngineError>
where
    G: FnOnce(&GrayImage) -> GrayImage,
    C: FnOnce(&RgbImage) -> RgbImage,
{
    match image.format() {
        PixelFormat::Luminance8 => {
            let source = image
                .to_gray_image()
                .ok_or_else(|| EngineError::invalid_input("luminance buffer has wrong size"))?;
            ImageBuffer::from_gray_image(gray(&source))
        }
        PixelFormat::Bgr24 => {
            let source = image
                .to_rgb_container()
                .ok_or_else(|| EngineError::invalid_input("color buffer has wrong size"))?;
            ImageBuffer::from_rgb_container(color(&source))
        }
    }
}
