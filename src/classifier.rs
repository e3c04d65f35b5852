//! Score-to-verdict mapping and the single-shot comparison.

use crate::difference::{highlight, mse};
use crate::error::EngineError;
use crate::frame::ImageBuffer;
use serde::{Deserialize, Serialize};

/// Outcome of comparing a frame with its standard image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Anomaly,
}

impl Verdict {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Verdict::Anomaly)
    }

    /// Register value driven out on the fieldbus
    pub fn signal_value(&self) -> u16 {
        match self {
            Verdict::Normal => 0,
            Verdict::Anomaly => 1,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Normal => write!(f, "Normal"),
            Verdict::Anomaly => write!(f, "Anomaly"),
        }
    }
}

/// Reject thresholds that cannot classify anything
pub fn validate_threshold(threshold: f64) -> Result<(), EngineError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(EngineError::invalid_configuration(format!(
            "threshold must be finite and non-negative, got {}",
            threshold
        )));
    }
    Ok(())
}

/// `score < threshold` is Normal; a score equal to the threshold is an Anomaly
pub fn classify(score: f64, threshold: f64) -> Result<Verdict, EngineError> {
    validate_threshold(threshold)?;
    if score < threshold {
        Ok(Verdict::Normal)
    } else {
        Ok(Verdict::Anomaly)
    }
}

/// Result of one comparison; not persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub score: f64,
    pub verdict: Verdict,
    pub overlay: Option<ImageBuffer>,
}

/// Score two already-preprocessed images and classify the score.
///
/// When `highlight_threshold` is set, the overlay is painted on a copy of
/// `target`.
pub fn compare(
    standard: &ImageBuffer,
    target: &ImageBuffer,
    threshold: f64,
    highlight_threshold: Option<u8>,
) -> Result<ComparisonResult, EngineError> {
    validate_threshold(threshold)?;
    let score = mse(standard, target)?;
    let verdict = classify(score, threshold)?;
    let overlay = match highlight_threshold {
        Some(level) => Some(highlight(target, standard, level)?),
        None => None,
    };

    Ok(ComparisonResult {
        score,
        verdict,
        overlay,
    })
}
