//! Per-camera inspection settings and the prepared baseline they compare against.

use crate::classifier::{compare, validate_threshold, ComparisonResult};
use crate::config::CameraConfig;
use crate::error::EngineError;
use crate::frame::ImageBuffer;
use crate::pipeline::PreprocessingPipeline;
use std::path::PathBuf;

/// Where a camera's standard image comes from
#[derive(Debug, Clone, PartialEq)]
pub enum StandardRef {
    Path(PathBuf),
    Image(ImageBuffer),
}

/// Identity, threshold and standard reference of one camera
#[derive(Debug, Clone, PartialEq)]
pub struct CameraProfile {
    index: u32,
    description: Option<String>,
    threshold: f64,
    standard: Option<StandardRef>,
    signal_register: Option<u16>,
}

impl CameraProfile {
    pub fn new(index: u32, threshold: f64) -> Result<Self, EngineError> {
        validate_threshold(threshold)?;
        Ok(Self {
            index,
            description: None,
            threshold,
            standard: None,
            signal_register: None,
        })
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self, EngineError> {
        let mut profile = Self::new(config.index, config.threshold)?;
        profile.description = config.description.clone();
        profile.standard = config
            .standard_image
            .as_ref()
            .map(|p| StandardRef::Path(PathBuf::from(p)));
        profile.signal_register = config.signal_register;
        Ok(profile)
    }

    pub fn with_standard(mut self, standard: StandardRef) -> Self {
        self.standard = Some(standard);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, EngineError> {
        validate_threshold(threshold)?;
        self.threshold = threshold;
        Ok(self)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn standard(&self) -> Option<&StandardRef> {
        self.standard.as_ref()
    }

    pub fn signal_register(&self) -> Option<u16> {
        self.signal_register
    }

    pub fn label(&self) -> String {
        match &self.description {
            Some(d) => format!("camera {} ({})", self.index, d),
            None => format!("camera {}", self.index),
        }
    }
}

/// A profile bound to a pipeline with its standard already preprocessed.
///
/// The standard is run through the pipeline once; every frame afterwards only
/// pays for its own preprocessing.
#[derive(Debug, Clone)]
pub struct Inspection {
    profile: CameraProfile,
    pipeline: PreprocessingPipeline,
    baseline: ImageBuffer,
}

impl Inspection {
    /// Preprocess `standard` for `profile`; `None` means the camera has no reference yet
    pub fn prepare(
        profile: CameraProfile,
        pipeline: PreprocessingPipeline,
        standard: Option<&ImageBuffer>,
    ) -> Result<Self, EngineError> {
        let standard = match standard {
            Some(image) => image,
            None => {
                return Err(EngineError::MissingReference {
                    camera: profile.index(),
                })
            }
        };
        let baseline = pipeline.apply(standard)?;
        Ok(Self {
            profile,
            pipeline,
            baseline,
        })
    }

    /// Like [`prepare`](Self::prepare), using the profile's in-memory standard
    pub fn from_profile(
        profile: CameraProfile,
        pipeline: PreprocessingPipeline,
    ) -> Result<Self, EngineError> {
        let standard = match profile.standard() {
            Some(StandardRef::Image(image)) => Some(image.clone()),
            _ => None,
        };
        Self::prepare(profile, pipeline, standard.as_ref())
    }

    pub fn profile(&self) -> &CameraProfile {
        &self.profile
    }

    pub fn baseline(&self) -> &ImageBuffer {
        &self.baseline
    }

    pub fn preprocess(&self, frame: Option<&ImageBuffer>) -> Result<ImageBuffer, EngineError> {
        let frame = frame.ok_or_else(|| EngineError::invalid_input("no frame available"))?;
        self.pipeline.apply(frame)
    }

    pub fn compare_processed(
        &self,
        processed: &ImageBuffer,
        highlight_threshold: Option<u8>,
    ) -> Result<ComparisonResult, EngineError> {
        compare(
            &self.baseline,
            processed,
            self.profile.threshold(),
            highlight_threshold,
        )
    }

    /// Preprocess `frame`, score it against the baseline and classify the score
    pub fn inspect(
        &self,
        frame: Option<&ImageBuffer>,
        highlight_threshold: Option<u8>,
    ) -> Result<ComparisonResult, EngineError> {
        let processed = self.preprocess(frame)?;
        self.compare_processed(&processed, highlight_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Verdict;
    use crate::frame::PixelFormat;
    use crate::pipeline::{PreprocessingStep, StepOp};

    fn bgr(value: u8) -> ImageBuffer {
        ImageBuffer::filled(6, 6, PixelFormat::Bgr24, &[value, value, value]).unwrap()
    }

    fn grayscale() -> PreprocessingPipeline {
        PreprocessingPipeline::new(vec![PreprocessingStep::new(1, StepOp::Grayscale)]).unwrap()
    }

    #[test]
    fn test_profile_rejects_bad_threshold() {
        assert!(CameraProfile::new(0, -0.5).is_err());
        assert!(CameraProfile::new(0, f64::NAN).is_err());
        let profile = CameraProfile::new(3, 12.0).unwrap();
        assert!(profile.clone().with_threshold(f64::INFINITY).is_err());
        assert_eq!(profile.label(), "camera 3");
        assert_eq!(profile.with_description("Gate").label(), "camera 3 (Gate)");
    }

    #[test]
    fn test_from_config() {
        let mut config = CameraConfig::new(2, 55.0);
        config.standard_image = Some("std/cam2.png".to_string());
        config.signal_register = Some(7);

        let profile = CameraProfile::from_config(&config).unwrap();
        assert_eq!(profile.index(), 2);
        assert_eq!(profile.signal_register(), Some(7));
        assert_eq!(
            profile.standard(),
            Some(&StandardRef::Path(PathBuf::from("std/cam2.png")))
        );
    }

    #[test]
    fn test_missing_reference() {
        let profile = CameraProfile::new(4, 30.0).unwrap();
        let result = Inspection::prepare(profile.clone(), grayscale(), None);
        assert!(matches!(
            result,
            Err(EngineError::MissingReference { camera: 4 })
        ));
        assert!(Inspection::from_profile(profile, grayscale()).is_err());
    }

    #[test]
    fn test_absent_frame_is_invalid_input() {
        let profile = CameraProfile::new(0, 30.0).unwrap();
        let inspection = Inspection::prepare(profile, grayscale(), Some(&bgr(10))).unwrap();
        assert!(matches!(
            inspection.inspect(None, None),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_inspect_classifies_against_preprocessed_baseline() {
        let profile = CameraProfile::new(0, 30.0)
            .unwrap()
            .with_standard(StandardRef::Image(bgr(0)));
        let inspection = Inspection::from_profile(profile, grayscale()).unwrap();
        assert_eq!(inspection.baseline().format(), PixelFormat::Luminance8);

        let same = inspection.inspect(Some(&bgr(0)), None).unwrap();
        assert_eq!(same.verdict, Verdict::Normal);
        assert_eq!(same.score, 0.0);

        let different = inspection.inspect(Some(&bgr(255)), Some(30)).unwrap();
        assert_eq!(different.verdict, Verdict::Anomaly);
        assert_eq!(different.score, 65025.0);
        assert!(different.overlay.is_some());
    }

    #[test]
    fn test_size_mismatch_surfaces() {
        let profile = CameraProfile::new(0, 30.0).unwrap();
        let inspection =
            Inspection::prepare(profile, PreprocessingPipeline::empty(), Some(&bgr(0))).unwrap();
        let small = ImageBuffer::filled(3, 3, PixelFormat::Bgr24, &[0, 0, 0]).unwrap();
        assert!(matches!(
            inspection.inspect(Some(&small), None),
            Err(EngineError::SizeMismatch { .. })
        ));
    }
}
