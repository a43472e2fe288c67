use super::{
    Optimizer, OptimizerState,
    optimizer::{LEARNING_RATE, check_lengths},
};
use crate::Result;

/// Gradient descent optimization algorithm.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn name(&self) -> &'static str {
        "gradient_descent"
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params)?;

        let lr = self.learning_rate;
        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }

    fn state(&self) -> OptimizerState {
        let mut state = OptimizerState::default();
        state
            .scalars
            .insert(LEARNING_RATE.to_string(), self.learning_rate);
        state
    }

    fn load_state(&mut self, mut state: OptimizerState) -> Result<()> {
        self.learning_rate = state.take_scalar(LEARNING_RATE)?;
        Ok(())
    }
}
