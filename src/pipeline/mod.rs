//! Ordered image preprocessing.
//!
//! A [`PreprocessingPipeline`] is an immutable, validated list of
//! [`PreprocessingStep`]s kept in execution order. Applying it is a fold: each
//! step consumes the previous output and allocates a new buffer.

mod ops;
mod step;

pub use ops::{apply_step, luminance, to_luminance};
pub use step::{PreprocessingStep, StepOp};

use crate::error::EngineError;
use crate::frame::{ImageBuffer, PixelFormat};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessingPipeline {
    steps: Vec<PreprocessingStep>,
}

impl PreprocessingPipeline {
    /// Validate every step and sort by position.
    ///
    /// The sort is stable, so steps sharing an `order` run in insertion order.
    pub fn new(mut steps: Vec<PreprocessingStep>) -> Result<Self, EngineError> {
        for step in &steps {
            step.op.validate()?;
        }
        steps.sort_by_key(|step| step.order);
        Ok(Self { steps })
    }

    /// Pipeline that returns its input unchanged
    pub fn empty() -> Self {
        Self::default()
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[PreprocessingStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Format produced for an input of `input` layout, or the first step that rejects it
    pub fn output_format(&self, input: PixelFormat) -> Result<PixelFormat, EngineError> {
        self.steps
            .iter()
            .try_fold(input, |format, step| step.op.output_format(format))
    }

    /// Apply every step in order
    pub fn apply(&self, image: &ImageBuffer) -> Result<ImageBuffer, EngineError> {
        self.steps
            .iter()
            .try_fold(image.clone(), |current, step| apply_step(&step.op, &current))
    }

    /// Append `op` after the current last step
    pub fn push_step(&self, op: StepOp) -> Result<Self, EngineError> {
        op.validate()?;
        let order = self.steps.last().map(|s| s.order + 1).unwrap_or(1);
        let mut steps = self.steps.clone();
        steps.push(PreprocessingStep::new(order, op));
        Ok(Self { steps })
    }

    /// Drop the last step, if any
    pub fn remove_last(&self) -> Self {
        let mut steps = self.steps.clone();
        steps.pop();
        Self { steps }
    }

    /// Move the step at `from` to position `to` and renumber orders from 1
    pub fn move_step(&self, from: usize, to: usize) -> Result<Self, EngineError> {
        let len = self.steps.len();
        if from >= len || to >= len {
            return Err(EngineError::invalid_configuration(format!(
                "cannot move step {} to {} in a pipeline of {} steps",
                from, to, len
            )));
        }

        let mut steps = self.steps.clone();
        let step = steps.remove(from);
        steps.insert(to, step);
        for (position, step) in steps.iter_mut().enumerate() {
            step.order = position as i32 + 1;
        }
        Ok(Self { steps })
    }

    pub fn into_steps(self) -> Vec<PreprocessingStep> {
        self.steps
    }
}
