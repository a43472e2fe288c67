use ndarray::{Zip, linalg, prelude::*};
use rand::Rng;

use super::check_size;
use crate::{MlErr, Result, arch::activations::ActFn, initialization::RandWeightGen};

/// A dilated causal convolution over `(batch, time, channels)` tensors.
///
/// The output at step `t` only sees the inputs at `t, t - dilation, ..., t - (kernel_size - 1) * dilation`,
/// taps that fall before the start of the sequence read zeros. The parameters are laid out as
/// `kernel_size` stacked `(in, out)` weight matrices, the first one applied to the current step,
/// followed by the `out` biases.
#[derive(Debug, Clone)]
pub struct CausalConv {
    channels: (usize, usize),
    kernel_size: usize,
    dilation: usize,
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array3<f32>,
    z: Array3<f32>,
}

impl CausalConv {
    /// Creates a new `CausalConv` layer.
    ///
    /// # Arguments
    /// * `channels` - The amount of input and output channels.
    /// * `kernel_size` - The amount of taps.
    /// * `dilation` - The distance in steps between two consecutive taps.
    /// * `act_fn` - An optional activation applied to the convolution output.
    pub fn new(
        channels: (usize, usize),
        kernel_size: usize,
        dilation: usize,
        act_fn: Option<ActFn>,
    ) -> Self {
        Self {
            channels,
            kernel_size,
            dilation,
            act_fn,
            size: (kernel_size * channels.0 + 1) * channels.1,
            x: Array3::zeros((0, 0, channels.0)),
            z: Array3::zeros((0, 0, channels.1)),
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn channels(&self) -> (usize, usize) {
        self.channels
    }

    pub fn dilation(&self) -> usize {
        self.dilation
    }

    /// Fills `params` with xavier uniform weights and zeroed biases.
    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        check_size("causal conv parameters", params, self.size)?;

        let (in_ch, out_ch) = self.channels;
        let (w, b) = params.split_at_mut(self.size - out_ch);
        RandWeightGen::xavier_uniform(self.kernel_size * in_ch, self.kernel_size * out_ch)?
            .fill(rng, w);
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
        let (in_ch, out_ch) = self.channels;
        if channels != in_ch {
            return Err(MlErr::ShapeMismatch {
                what: "causal conv input",
                got: vec![batch, time, channels],
                expected: vec![batch, time, in_ch],
            });
        }

        let (w, b) = self.view_params(params)?;
        let taps = self.taps(time);

        let mut z = Array3::<f32>::zeros((batch, time, out_ch));
        z += &b;

        Zip::from(z.outer_iter_mut())
            .and(x.outer_iter())
            .par_for_each(|mut z_b, x_b| {
                for &(tap, shift) in &taps {
                    let w_tap = w.slice(s![tap * in_ch..(tap + 1) * in_ch, ..]);
                    linalg::general_mat_mul(
                        1.,
                        &x_b.slice(s![..time - shift, ..]),
                        &w_tap,
                        1.,
                        &mut z_b.slice_mut(s![shift.., ..]),
                    );
                }
            });

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.x = x.to_owned();
        self.z = z;
        Ok(a)
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
        if d.dim() != self.z.dim() {
            let (batch, time, channels) = d.dim();
            let (e_batch, e_time, e_channels) = self.z.dim();
            return Err(MlErr::ShapeMismatch {
                what: "causal conv output gradient",
                got: vec![batch, time, channels],
                expected: vec![e_batch, e_time, e_channels],
            });
        }

        let (batch, time, _) = d.dim();
        let in_ch = self.channels.0;

        let mut d = d.to_owned();
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let taps = self.taps(time);
        let (mut dw, mut db) = self.view_grad(grad)?;
        db += &d.sum_axis(Axis(0)).sum_axis(Axis(0));

        for &(tap, shift) in &taps {
            let mut dw_tap = dw.slice_mut(s![tap * in_ch..(tap + 1) * in_ch, ..]);
            for (x_b, d_b) in self.x.outer_iter().zip(d.outer_iter()) {
                linalg::general_mat_mul(
                    1.,
                    &x_b.slice(s![..time - shift, ..]).t(),
                    &d_b.slice(s![shift.., ..]),
                    1.,
                    &mut dw_tap,
                );
            }
        }

        let (w, _) = self.view_params(params)?;
        let mut dx = Array3::<f32>::zeros((batch, time, in_ch));

        Zip::from(dx.outer_iter_mut())
            .and(d.outer_iter())
            .par_for_each(|mut dx_b, d_b| {
                for &(tap, shift) in &taps {
                    let w_tap = w.slice(s![tap * in_ch..(tap + 1) * in_ch, ..]);
                    linalg::general_mat_mul(
                        1.,
                        &d_b.slice(s![shift.., ..]),
                        &w_tap.t(),
                        1.,
                        &mut dx_b.slice_mut(s![..time - shift, ..]),
                    );
                }
            });

        Ok(dx)
    }

    /// The taps that reach inside a sequence of `time` steps, along with their shift.
    fn taps(&self, time: usize) -> Vec<(usize, usize)> {
        (0..self.kernel_size)
            .map(|tap| (tap, tap * self.dilation))
            .take_while(|&(_, shift)| shift < time)
            .collect()
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        check_size("causal conv gradient", grad, self.size)?;

        let (in_ch, out_ch) = self.channels;
        let (dw_raw, db_raw) = grad.split_at_mut(self.size - out_ch);
        let dw = ArrayViewMut2::from_shape((self.kernel_size * in_ch, out_ch), dw_raw)?;
        let db = ArrayViewMut1::from_shape(out_ch, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        check_size("causal conv parameters", params, self.size)?;

        let (in_ch, out_ch) = self.channels;
        let (w_raw, b_raw) = params.split_at(self.size - out_ch);
        let weights = ArrayView2::from_shape((self.kernel_size * in_ch, out_ch), w_raw)?;
        let biases = ArrayView1::from_shape(out_ch, b_raw)?;
        Ok((weights, biases))
    }
}
