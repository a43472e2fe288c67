use ndarray::{Array3, ArrayView3};

use super::{AutoencoderConfig, Forward, ForwardInput, ParamLayout};
use crate::{Result, optimization::Optimizer};

/// A trainable multi domain autoencoder over a flat parameter buffer.
///
/// Gradients accumulate across `backward` calls until `zero_grad` is called.
pub trait Model: Send {
    /// The hyperparameters the model was built from.
    fn config(&self) -> &AutoencoderConfig;

    /// How the flat parameter buffer is split between encoder and decoders.
    fn layout(&self) -> &ParamLayout;

    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize {
        self.layout().size()
    }

    /// Encodes the input once and decodes it with every domain's decoder.
    ///
    /// # Arguments
    /// * `input` - The conditioning features and the previous samples.
    ///
    /// # Returns
    /// The shared encoding and one reconstruction per domain.
    fn forward(&mut self, input: &ForwardInput) -> Result<Forward>;

    /// Backpropagates the loss gradient of the last `forward` into the gradient buffer.
    ///
    /// # Arguments
    /// * `d_reconstructions` - The gradient with respect to each domain's reconstruction.
    /// * `d_encoding` - An extra gradient with respect to the shared encoding.
    fn backward(&mut self, d_reconstructions: &[Array3<f32>], d_encoding: ArrayView3<f32>)
    -> Result<()>;

    /// Zeros out the gradient.
    fn zero_grad(&mut self);

    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    /// The parameters of the segment called `name`, see [`ParamLayout`].
    fn segment(&self, name: &str) -> Option<&[f32]> {
        self.layout().range(name).map(|range| &self.params()[range])
    }

    fn grad(&self) -> &[f32];

    fn grad_mut(&mut self) -> &mut [f32];

    /// Overwrites every parameter.
    fn load_params(&mut self, params: &[f32]) -> Result<()>;

    /// Applies the current gradient onto the parameters.
    fn step(&mut self, optimizer: &mut dyn Optimizer) -> Result<()>;
}
