use ndarray::{linalg, prelude::*};
use rand::Rng;

use super::{check_size, flatten_time, unflatten_time};
use crate::{MlErr, Result, arch::activations::ActFn, initialization::RandWeightGen};

/// A position wise fully connected layer, a 1x1 convolution over `(batch, time, channels)`
/// tensors.
///
/// The parameters are laid out as the `(in, out)` weight matrix followed by the `out` biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of input and output channels.
    /// * `act_fn` - An optional activation applied to the affine output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            act_fn,
            size: (dim.0 + 1) * dim.1,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Fills `params` with xavier uniform weights and zeroed biases.
    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_size("dense parameters", params, self.size)?;

        let (w, b) = params.split_at_mut(self.size - self.dim.1);
        RandWeightGen::xavier_uniform(self.dim.0, self.dim.1)?.fill(rng, w);
        b.fill(0.);
        Ok(())
    }

    /// Makes a forward pass through this layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - The `(batch, time, in)` input.
    ///
    /// # Returns
    /// The `(batch, time, out)` output or an error if the shapes don't match.
    pub fn forward(&mut self, params: &[f32], x: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (batch, time, channels) = x.dim();
        if channels != self.dim.0 {
            return Err(MlErr::ShapeMismatch {
                what: "dense input",
                got: vec![batch, time, channels],
                expected: vec![batch, time, self.dim.0],
            });
        }

        let (w, b) = self.view_params(params)?;

        self.x = flatten_time(x)?;
        self.z = Array2::zeros((self.x.nrows(), self.dim.1));
        self.z += &b;
        linalg::general_mat_mul(1., &self.x, &w, 1., &mut self.z);

        let a = match &self.act_fn {
            Some(act_fn) => self.z.mapv(|z| act_fn.f(z)),
            None => self.z.clone(),
        };

        unflatten_time(a, batch, time)
    }

    /// Makes a backward pass through this layer, accumulating its gradient into `grad`.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient.
    /// * `d` - The gradient of the loss with respect to this layer's last output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's last input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView3<f32>,
    ) -> Result<Array3<f32>> {
        let (batch, time, channels) = d.dim();
        if channels != self.dim.1 || batch * time != self.x.nrows() {
            return Err(MlErr::ShapeMismatch {
                what: "dense output gradient",
                got: vec![batch * time, channels],
                expected: vec![self.x.nrows(), self.dim.1],
            });
        }

        let mut d = flatten_time(d)?;
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1., &self.x.t(), &d, 1., &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::<f32>::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1., &d, &w.t(), 0., &mut dx);

        unflatten_time(dx, batch, time)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_size("dense gradient", grad, self.size)?;

        let (dw_raw, db_raw) = grad.split_at_mut(self.size - self.dim.1);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_size("dense parameters", params, self.size)?;

        let (w_raw, b_raw) = params.split_at(self.size - self.dim.1);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}
