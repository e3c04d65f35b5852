use crate::error::EngineError;
use crate::frame::PixelFormat;
use serde::{Deserialize, Serialize};

/// A single image transform with strongly typed parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOp {
    /// BGR to luminance. A no-op on luminance input.
    Grayscale,
    /// Linear resize to an explicit size
    Resize { width: i32, height: i32 },
    /// Gaussian smoothing with an odd square kernel
    GaussianBlur { kernel_size: i32 },
    /// Median filter with an odd square kernel
    MedianFilter { kernel_size: i32 },
    /// Binary threshold on luminance: `>= value` becomes 255, else 0
    Threshold { value: f64 },
    /// Histogram equalization on luminance
    EqualizeHistogram,
    /// Saturating add of `delta` to every sample
    Brightness { delta: i32 },
    /// Rotation about the image center, degrees counter-clockwise
    Rotate { angle: f64 },
    /// Row-major 2x3 affine matrix `[a, b, c, d, e, f]` mapping source to destination
    Affine { matrix: [f64; 6] },
}

impl StepOp {
    pub fn name(&self) -> &'static str {
        match self {
            StepOp::Grayscale => "grayscale",
            StepOp::Resize { .. } => "resize",
            StepOp::GaussianBlur { .. } => "gaussian_blur",
            StepOp::MedianFilter { .. } => "median_filter",
            StepOp::Threshold { .. } => "threshold",
            StepOp::EqualizeHistogram => "equalize_histogram",
            StepOp::Brightness { .. } => "brightness",
            StepOp::Rotate { .. } => "rotate",
            StepOp::Affine { .. } => "affine",
        }
    }

    /// Check parameters independently of any image
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            StepOp::Resize { width, height } => {
                if *width <= 0 || *height <= 0 {
                    return Err(EngineError::invalid_parameter(
                        self.name(),
                        format!("target size must be positive, got {}x{}", width, height),
                    ));
                }
            }
            StepOp::GaussianBlur { kernel_size } | StepOp::MedianFilter { kernel_size } => {
                if *kernel_size <= 0 || kernel_size % 2 == 0 {
                    return Err(EngineError::invalid_parameter(
                        self.name(),
                        format!("kernel size must be a positive odd integer, got {}", kernel_size),
                    ));
                }
            }
            StepOp::Threshold { value } => {
                if !value.is_finite() {
                    return Err(EngineError::invalid_parameter(
                        self.name(),
                        "threshold value must be finite",
                    ));
                }
            }
            StepOp::Rotate { angle } => {
                if !angle.is_finite() {
                    return Err(EngineError::invalid_parameter(
                        self.name(),
                        "rotation angle must be finite",
                    ));
                }
            }
            StepOp::Affine { matrix } => {
                if matrix.iter().any(|v| !v.is_finite()) {
                    return Err(EngineError::invalid_parameter(
                        self.name(),
                        "matrix entries must be finite",
                    ));
                }
                let determinant = matrix[0] * matrix[4] - matrix[1] * matrix[3];
                if determinant.abs() < f64::EPSILON {
                    return Err(EngineError::invalid_parameter(
                        self.name(),
                        "matrix is not invertible",
                    ));
                }
            }
            StepOp::Grayscale | StepOp::EqualizeHistogram | StepOp::Brightness { .. } => {}
        }
        Ok(())
    }

    /// Channel layout this step produces for `input`, or `UnsupportedFormat`
    pub fn output_format(&self, input: PixelFormat) -> Result<PixelFormat, EngineError> {
        match self {
            StepOp::Grayscale => Ok(PixelFormat::Luminance8),
            StepOp::Threshold { .. } | StepOp::EqualizeHistogram => match input {
                PixelFormat::Luminance8 => Ok(input),
                PixelFormat::Bgr24 => Err(EngineError::UnsupportedFormat {
                    step: self.name(),
                    format: input,
                }),
            },
            _ => Ok(input),
        }
    }
}

/// A transform plus its position in the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingStep {
    /// Execution position; ties keep insertion order
    pub order: i32,
    pub op: StepOp,
}

impl PreprocessingStep {
    pub fn new(order: i32, op: StepOp) -> Self {
        Self { order, op }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_validation() {
        for k in [1, 3, 5, 7, 31] {
            assert!(StepOp::GaussianBlur { kernel_size: k }.validate().is_ok());
            assert!(StepOp::MedianFilter { kernel_size: k }.validate().is_ok());
        }
        for k in [-3, 0, 2, 4, 8] {
            assert!(matches!(
                StepOp::GaussianBlur { kernel_size: k }.validate(),
                Err(EngineError::InvalidParameter { step: "gaussian_blur", .. })
            ));
            assert!(matches!(
                StepOp::MedianFilter { kernel_size: k }.validate(),
                Err(EngineError::InvalidParameter { step: "median_filter", .. })
            ));
        }
    }

    #[test]
    fn test_resize_validation() {
        assert!(StepOp::Resize { width: 10, height: 10 }.validate().is_ok());
        assert!(StepOp::Resize { width: 0, height: 10 }.validate().is_err());
        assert!(StepOp::Resize { width: 10, height: -1 }.validate().is_err());
    }

    #[test]
    fn test_affine_validation() {
        let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        assert!(StepOp::Affine { matrix: identity }.validate().is_ok());
        assert!(StepOp::Affine { matrix: [0.0; 6] }.validate().is_err());
        assert!(StepOp::Affine {
            matrix: [f64::NAN, 0.0, 0.0, 0.0, 1.0, 0.0]
        }
        .validate()
        .is_err());
        assert!(StepOp::Rotate { angle: f64::INFINITY }.validate().is_err());
    }

    #[test]
    fn test_output_format() {
        assert_eq!(
            StepOp::Grayscale.output_format(PixelFormat::Bgr24),
            Ok(PixelFormat::Luminance8)
        );
        assert_eq!(
            StepOp::Grayscale.output_format(PixelFormat::Luminance8),
            Ok(PixelFormat::Luminance8)
        );
        assert!(matches!(
            StepOp::Threshold { value: 128.0 }.output_format(PixelFormat::Bgr24),
            Err(EngineError::UnsupportedFormat { step: "threshold", .. })
        ));
        assert_eq!(
            StepOp::Brightness { delta: 5 }.output_format(PixelFormat::Bgr24),
            Ok(PixelFormat::Bgr24)
        );
    }

    #[test]
    fn test_step_toml_round_trip() {
        let steps = vec![
            PreprocessingStep::new(2, StepOp::Threshold { value: 127.5 }),
            PreprocessingStep::new(
                3,
                StepOp::Affine {
                    matrix: [1.0, 0.25, -3.5, 0.0, 1.0, 2.0],
                },
            ),
            PreprocessingStep::new(1, StepOp::Grayscale),
        ];

        #[derive(Serialize, Deserialize)]
        struct Doc {
            preprocessing: Vec<PreprocessingStep>,
        }

        let text = toml::to_string_pretty(&Doc {
            preprocessing: steps.clone(),
        })
        .unwrap();
        let parsed: Doc = toml::from_str(&text).unwrap();
        assert_eq!(parsed.preprocessing, steps);
    }
}
