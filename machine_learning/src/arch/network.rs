use std::mem;

use ndarray::{Array3, ArrayView3};
use rand::Rng;

use super::layers::Layer;
use crate::{MlErr, Result};

/// A sequential stack of layers: information flows forward when computing an output and
/// backward when computing the gradient of its layers.
///
/// The network doesn't own its parameters, each call receives the flat slice of parameters of
/// the whole network and hands each layer its own contiguous chunk, in order.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    /// Creates a new `Network`.
    ///
    /// # Arguments
    /// * `layers` - The layers the network is composed of.
    ///
    /// # Returns
    /// A new `Network` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the amount of parameters in the network.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    pub fn in_channels(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.channels().0)
    }

    pub fn out_channels(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.channels().1)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Initializes every layer's chunk of `params`.
    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        self.check_size(params.len())?;

        let mut rest = params;
        for layer in &self.layers {
            let (head, tail) = mem::take(&mut rest).split_at_mut(layer.size());
            layer.init(head, rng)?;
            rest = tail;
        }

        Ok(())
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The network's parameters.
    /// * `x` - The `(batch, time, channels)` input.
    ///
    /// # Returns
    /// The output of the last layer or an error if occurred.
    pub fn forward(&mut self, params: &[f32], x: ArrayView3<f32>) -> Result<Array3<f32>> {
        self.check_size(params.len())?;

        let mut layers = self.layers.iter_mut();
        let Some(first) = layers.next() else {
            return Ok(x.to_owned());
        };

        let (head, mut rest) = params.split_at(first.size());
        let mut out = first.forward(head, x)?;

        for layer in layers {
            let (head, tail) = rest.split_at(layer.size());
            out = layer.forward(head, out.view())?;
            rest = tail;
        }

        Ok(out)
    }

    /// Makes a backward pass through the network, accumulating into `grad`.
    ///
    /// # Arguments
    /// * `params` - The network's parameters.
    /// * `grad` - The network's gradient.
    /// * `d` - The gradient of the loss with respect to the last output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the last input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView3<f32>,
    ) -> Result<Array3<f32>> {
        self.check_size(params.len())?;
        self.check_size(grad.len())?;

        let mut params = params;
        let mut grad = grad;
        let mut d = d.to_owned();

        for layer in self.layers.iter_mut().rev() {
            let at = params.len() - layer.size();
            let (params_rest, layer_params) = params.split_at(at);
            let (grad_rest, layer_grad) = mem::take(&mut grad).split_at_mut(at);

            d = layer.backward(layer_params, layer_grad, d.view())?;

            params = params_rest;
            grad = grad_rest;
        }

        Ok(d)
    }

    fn check_size(&self, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got,
                expected,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::activations::ActFn;

    fn network() -> Network {
        Network::new([
            Layer::dense((2, 3), None),
            Layer::causal_conv((3, 3), 2, 1, Some(ActFn::tanh())),
            Layer::causal_conv((3, 3), 2, 2, Some(ActFn::tanh())),
            Layer::dense((3, 4), None),
        ])
    }

    #[test]
    fn size_is_the_sum_of_the_layers() {
        let net = network();
        assert_eq!(net.size(), 9 + 21 + 21 + 16);
        assert_eq!(net.in_channels(), 2);
        assert_eq!(net.out_channels(), 4);
    }

    #[test]
    fn forward_keeps_batch_and_time() {
        let mut net = network();
        let mut params = vec![0.; net.size()];
        net.init(&mut params, &mut StdRng::seed_from_u64(1)).unwrap();

        let y = net
            .forward(&params, Array3::ones((3, 7, 2)).view())
            .unwrap();
        assert_eq!(y.dim(), (3, 7, 4));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut net = network();
        let mut params = vec![0.; net.size()];
        net.init(&mut params, &mut StdRng::seed_from_u64(2)).unwrap();

        let x = Array3::from_shape_fn((2, 5, 2), |(b, t, c)| ((b + 2 * t + 3 * c) as f32).cos());
        let weights = Array3::from_shape_fn((2, 5, 4), |(b, t, c)| ((b + t + c) % 3) as f32 - 1.);

        let mut loss = |params: &[f32]| -> f32 {
            (net.forward(params, x.view()).unwrap() * &weights).sum()
        };

        let h = 1e-2;
        let numeric: Vec<f32> = (0..params.len())
            .map(|i| {
                let mut plus = params.clone();
                plus[i] += h;
                let mut minus = params.clone();
                minus[i] -= h;
                (loss(&plus) - loss(&minus)) / (2. * h)
            })
            .collect();

        let mut grad = vec![0.; net.size()];
        net.forward(&params, x.view()).unwrap();
        net.backward(&params, &mut grad, weights.view()).unwrap();

        for (i, (numeric, analytic)) in numeric.iter().zip(&grad).enumerate() {
            assert!(
                (numeric - analytic).abs() < 2e-2,
                "param {i}: numeric {numeric}, analytic {analytic}"
            );
        }
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let mut net = network();
        let err = net
            .forward(&[0.; 3], Array3::ones((1, 1, 2)).view())
            .unwrap_err();

        assert!(matches!(err, MlErr::SizeMismatch { got: 3, .. }));
    }
}
