mod adam;
mod gradient_descent;
mod optimizer;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use optimizer::{Optimizer, OptimizerState};

use crate::specs::OptimizerSpec;

/// Builds the optimizer described by `spec`.
///
/// # Arguments
/// * `spec` - The algorithm and its hyperparameters.
/// * `learning_rate` - The step size.
/// * `len` - The amount of parameters it will update.
pub fn build_optimizer(spec: &OptimizerSpec, learning_rate: f32, len: usize) -> Box<dyn Optimizer> {
    match *spec {
        OptimizerSpec::Adam {
            beta1,
            beta2,
            epsilon,
        } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
        OptimizerSpec::GradientDescent => Box::new(GradientDescent::new(learning_rate)),
    }
}
