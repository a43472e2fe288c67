use ndarray::{Array3, ArrayView3};
use rand::Rng;

use super::{CausalConv, Dense};
use crate::{Result, arch::activations::ActFn};

#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    CausalConv(CausalConv),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Dense(super::Dense::new(dim, act_fn))
    }

    pub fn causal_conv(
        channels: (usize, usize),
        kernel_size: usize,
        dilation: usize,
        act_fn: Option<ActFn>,
    ) -> Self {
        CausalConv(super::CausalConv::new(
            channels,
            kernel_size,
            dilation,
            act_fn,
        ))
    }

    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            CausalConv(l) => l.size(),
        }
    }

    /// The amount of input and output channels.
    pub fn channels(&self) -> (usize, usize) {
        match self {
            Dense(l) => l.dim(),
            CausalConv(l) => l.channels(),
        }
    }

    pub fn init<R: Rng + ?Sized>(&self, params: &mut [f32], rng: &mut R) -> Result<()> {
        match self {
            Dense(l) => l.init(params, rng),
            CausalConv(l) => l.init(params, rng),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView3<f32>) -> Result<Array3<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
            CausalConv(l) => l.forward(params, x),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView3<f32>,
    ) -> Result<Array3<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
            CausalConv(l) => l.backward(params, grad, d),
        }
    }
}
