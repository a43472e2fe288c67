use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{MlErr, Result};

/// A weight generator that follows a certain probabilistic distribution.
pub struct RandWeightGen<D: Distribution<f32>> {
    distribution: D,
}

impl<D: Distribution<f32>> RandWeightGen<D> {
    /// Creates a new `RandWeightGen` weight generator.
    ///
    /// # Arguments
    /// * `distribution` - The distribution to sample the random numbers from.
    pub fn new(distribution: D) -> Self {
        Self { distribution }
    }

    /// Overwrites every value of `out` with a fresh sample.
    pub fn fill<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut [f32]) {
        out.iter_mut()
            .for_each(|w| *w = self.distribution.sample(rng));
    }
}

impl RandWeightGen<Uniform<f32>> {
    /// Creates a new `RandWeightGen` weight generator with a uniform distribution.
    ///
    /// # Arguments
    /// * `low` - The inclusive lower limit.
    /// * `high` - The exclusive upper limit.
    ///
    /// # Returns
    /// An error if the range is invalid (low >= high or not finite).
    pub fn uniform(low: f32, high: f32) -> Result<Self> {
        let distribution = Uniform::new(low, high)
            .map_err(|e| MlErr::InvalidConfig(format!("uniform range [{low}, {high}): {e}")))?;

        Ok(Self::new(distribution))
    }

    /// Creates a new `RandWeightGen` weight generator using Xavier uniform initialization.
    ///
    /// # Arguments
    /// * `fan_in` - The number of input units in the weight tensor.
    /// * `fan_out` - The number of output units in the weight tensor.
    ///
    /// # Returns
    /// An error if the calculated range is invalid.
    pub fn xavier_uniform(fan_in: usize, fan_out: usize) -> Result<Self> {
        let range = (6. / (fan_in + fan_out) as f32).sqrt();
        Self::uniform(-range, range)
    }
}
