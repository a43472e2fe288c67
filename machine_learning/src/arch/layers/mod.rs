mod causal_conv;
mod dense;
mod layer;

pub use causal_conv::CausalConv;
pub use dense::Dense;
pub use layer::Layer;

use ndarray::{Array2, Array3, ArrayView3};

use crate::{MlErr, Result};

/// Merges the batch and time axes of `x` into the rows of a matrix.
fn flatten_time(x: ArrayView3<f32>) -> Result<Array2<f32>> {
    let (batch, time, channels) = x.dim();
    let flat = Array2::from_shape_vec((batch * time, channels), x.iter().copied().collect())?;
    Ok(flat)
}

/// Splits the rows of `x` back into the batch and time axes.
fn unflatten_time(x: Array2<f32>, batch: usize, time: usize) -> Result<Array3<f32>> {
    let channels = x.ncols();
    Ok(x.into_shape_with_order((batch, time, channels))?)
}

/// Checks that `params` holds exactly `size` values.
fn check_size(what: &'static str, params: &[f32], size: usize) -> Result<()> {
    if params.len() != size {
        return Err(MlErr::SizeMismatch {
            what,
            got: params.len(),
            expected: size,
        });
    }

    Ok(())
}
