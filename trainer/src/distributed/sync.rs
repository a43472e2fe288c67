use std::sync::Arc;

use machine_learning::{
    MlErr, Result,
    arch::{AutoencoderConfig, Forward, ForwardInput, Model, ParamLayout},
    optimization::Optimizer,
};
use ndarray::{Array3, ArrayView3};

use super::ProcessGroup;

/// A model whose gradient is averaged across the process group after every backward pass.
///
/// Every rank starts from the same parameters and applies the same averaged gradient, so the
/// replicas never drift apart.
pub struct Synced<M: Model> {
    inner: M,
    group: Arc<ProcessGroup>,
}

/// Wraps `model` so its gradient is synchronized through `group`.
///
/// # Arguments
/// * `model` - The local replica.
/// * `group` - The process group shared by every replica.
///
/// # Returns
/// The wrapped model, usable anywhere a `Model` is.
pub fn wrap_for_gradient_sync<M: Model>(model: M, group: Arc<ProcessGroup>) -> Synced<M> {
    Synced { inner: model, group }
}

impl<M: Model> Model for Synced<M> {
    fn config(&self) -> &AutoencoderConfig {
        self.inner.config()
    }

    fn layout(&self) -> &ParamLayout {
        self.inner.layout()
    }

    fn forward(&mut self, input: &ForwardInput) -> Result<Forward> {
        self.inner.forward(input)
    }

    fn backward(
        &mut self,
        d_reconstructions: &[Array3<f32>],
        d_encoding: ArrayView3<f32>,
    ) -> Result<()> {
        self.inner.backward(d_reconstructions, d_encoding)?;
        self.group
            .all_reduce(self.inner.grad_mut())
            .map_err(|e| MlErr::GradientSync(e.to_string()))
    }

    fn zero_grad(&mut self) {
        self.inner.zero_grad();
    }

    fn params(&self) -> &[f32] {
        self.inner.params()
    }

    fn params_mut(&mut self) -> &mut [f32] {
        self.inner.params_mut()
    }

    fn grad(&self) -> &[f32] {
        self.inner.grad()
    }

    fn grad_mut(&mut self) -> &mut [f32] {
        self.inner.grad_mut()
    }

    fn load_params(&mut self, params: &[f32]) -> Result<()> {
        self.inner.load_params(params)
    }

    fn step(&mut self, optimizer: &mut dyn Optimizer) -> Result<()> {
        self.inner.step(optimizer)
    }
}
