use std::collections::BTreeMap;

use crate::{MlErr, Result};

/// The state scalar every optimizer saves its step size under.
pub(super) const LEARNING_RATE: &str = "learning_rate";

/// The resumable state of an optimizer: named scalars and named per parameter buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerState {
    pub scalars: BTreeMap<String, f32>,
    pub buffers: BTreeMap<String, Vec<f32>>,
}

impl OptimizerState {
    /// Takes the scalar called `name` out of this state.
    pub fn take_scalar(&mut self, name: &str) -> Result<f32> {
        self.scalars
            .remove(name)
            .ok_or_else(|| MlErr::InvalidOptimizerState(format!("missing scalar {name}")))
    }

    /// Takes the buffer called `name` out of this state, checking it holds `len` values.
    pub fn take_buffer(&mut self, name: &str, len: usize) -> Result<Vec<f32>> {
        let buffer = self
            .buffers
            .remove(name)
            .ok_or_else(|| MlErr::InvalidOptimizerState(format!("missing buffer {name}")))?;

        if buffer.len() != len {
            return Err(MlErr::SizeMismatch {
                what: "optimizer buffer",
                got: buffer.len(),
                expected: len,
            });
        }

        Ok(buffer)
    }
}

pub trait Optimizer: Send {
    /// The name the optimizer is recorded under in checkpoints.
    fn name(&self) -> &'static str;

    fn learning_rate(&self) -> f32;

    /// Updates the parameters according to the algorithm's learning rule.
    ///
    /// # Arguments
    /// * `grad` - The gradient used for taking the step.
    /// * `params` - The parameters that are going to be modified.
    ///
    /// # Returns
    /// An error if the gradient and parameters have different lengths.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// Snapshots the state needed to resume the optimization.
    fn state(&self) -> OptimizerState;

    /// Restores a state previously taken with `state`.
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// Checks that a gradient and the parameters it updates have the same length.
pub(super) fn check_lengths(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "optimizer gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
