use ndarray::prelude::*;
use rand::Rng;

use super::layers::Dense;
use crate::{MlErr, Result};

/// A model that scores which domain an encoding came from.
///
/// The autoencoder is trained to fool it: the gradient of the confusion term flows back
/// through [`DomainClassifier::backward`] into the encoder. The classifier's own parameters
/// are left untouched by the training loop.
pub trait DomainClassifier: Send {
    /// The amount of domains, that is, the width of the produced logits.
    fn num_domains(&self) -> usize;

    /// Scores a batch of encodings.
    ///
    /// # Arguments
    /// * `encoding` - The `(batch, time, latent)` encoder output.
    ///
    /// # Returns
    /// The `(batch, num_domains)` unnormalized domain scores.
    fn predict(&mut self, encoding: ArrayView3<f32>) -> Result<Array2<f32>>;

    /// Propagates the gradient of the logits of the last `predict` back to its input.
    ///
    /// # Arguments
    /// * `d_logits` - The gradient of the loss with respect to the logits.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the encoding.
    fn backward(&mut self, d_logits: ArrayView2<f32>) -> Result<Array3<f32>>;
}

/// Averages the encoding over time and maps it to domain logits with a dense layer.
#[derive(Debug, Clone)]
pub struct MeanPoolClassifier {
    num_domains: usize,
    dense: Dense,
    params: Vec<f32>,
    grad: Vec<f32>,
    time: usize,
}

impl MeanPoolClassifier {
    /// Creates a new `MeanPoolClassifier` with random weights.
    ///
    /// # Arguments
    /// * `latent_channels` - The amount of channels of the encodings.
    /// * `num_domains` - The amount of domains.
    /// * `rng` - The source of the initial weights.
    pub fn new<R: Rng + ?Sized>(
        latent_channels: usize,
        num_domains: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let dense = Dense::new((latent_channels, num_domains), None);
        let mut params = vec![0.; dense.size()];
        dense.init(&mut params, rng)?;

        Ok(Self::with_params(dense, params, num_domains))
    }

    /// Creates a new `MeanPoolClassifier` with the given `(latent, num_domains)` weights
    /// followed by the `num_domains` biases.
    pub fn from_params(latent_channels: usize, num_domains: usize, params: Vec<f32>) -> Result<Self> {
        let dense = Dense::new((latent_channels, num_domains), None);
        if params.len() != dense.size() {
            return Err(MlErr::SizeMismatch {
                what: "classifier parameters",
                got: params.len(),
                expected: dense.size(),
            });
        }

        Ok(Self::with_params(dense, params, num_domains))
    }

    fn with_params(dense: Dense, params: Vec<f32>, num_domains: usize) -> Self {
        Self {
            num_domains,
            grad: vec![0.; params.len()],
            dense,
            params,
            time: 0,
        }
    }
}

impl DomainClassifier for MeanPoolClassifier {
    fn num_domains(&self) -> usize {
        self.num_domains
    }

    fn predict(&mut self, encoding: ArrayView3<f32>) -> Result<Array2<f32>> {
        let (batch, time, latent) = encoding.dim();
        if time == 0 {
            return Err(MlErr::ShapeMismatch {
                what: "classifier input",
                got: vec![batch, time, latent],
                expected: vec![batch, 1, latent],
            });
        }

        let pooled = encoding.sum_axis(Axis(1)) / time as f32;
        let pooled = pooled.insert_axis(Axis(1));
        let logits = self.dense.forward(&self.params, pooled.view())?;

        self.time = time;
        Ok(logits.index_axis_move(Axis(1), 0))
    }

    fn backward(&mut self, d_logits: ArrayView2<f32>) -> Result<Array3<f32>> {
        self.grad.fill(0.);

        let d_logits = d_logits.insert_axis(Axis(1));
        let d_pooled = self
            .dense
            .backward(&self.params, &mut self.grad, d_logits)?
            / self.time as f32;

        let (batch, _, latent) = d_pooled.dim();
        let d_encoding = d_pooled
            .broadcast((batch, self.time, latent))
            .ok_or_else(|| MlErr::ShapeMismatch {
                what: "classifier gradient",
                got: vec![batch, 1, latent],
                expected: vec![batch, self.time, latent],
            })?
            .to_owned();

        Ok(d_encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logits_only_depend_on_the_time_average() {
        // Two latent channels, two domains: identity weights, no biases.
        let mut classifier =
            MeanPoolClassifier::from_params(2, 2, vec![1., 0., 0., 1., 0., 0.]).unwrap();

        let encoding = array![[[1., 4.], [3., 0.]]];
        let logits = classifier.predict(encoding.view()).unwrap();
        assert_eq!(logits, array![[2., 2.]]);
    }

    #[test]
    fn backward_spreads_the_gradient_over_time() {
        let mut classifier =
            MeanPoolClassifier::from_params(2, 1, vec![2., -1., 0.5]).unwrap();

        classifier
            .predict(Array3::ones((3, 4, 2)).view())
            .unwrap();
        let d = classifier.backward(Array2::ones((3, 1)).view()).unwrap();

        assert_eq!(d.dim(), (3, 4, 2));
        assert!(d.slice(s![.., .., 0]).iter().all(|&v| (v - 0.5).abs() < 1e-6));
        assert!(d.slice(s![.., .., 1]).iter().all(|&v| (v + 0.25).abs() < 1e-6));
    }
}
