use std::{collections::HashMap, fs, ops::Range, path::Path};

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Uniform};
use safetensors::{Dtype, SafeTensorError, SafeTensors, serialize_to_file, tensor::TensorView};

use crate::{Result, TrainErr, config::DataConfig};

const FEATURES: &str = "features";
const SAMPLES: &str = "samples";

/// Fixed length audio segments held in memory: conditioning features and the quantized
/// samples to reconstruct.
#[derive(Debug, Clone)]
pub struct AudioDataset {
    features: Array3<f32>,
    samples: Array2<usize>,
}

impl AudioDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Arguments
    /// * `features` - The `(segments, time, n_features)` conditioning features.
    /// * `samples` - The `(segments, time)` quantized samples.
    ///
    /// # Returns
    /// The dataset or an error if the segment and time axes disagree.
    pub fn new(features: Array3<f32>, samples: Array2<usize>) -> Result<Self> {
        let (segments, time, _) = features.dim();
        if samples.dim() != (segments, time) {
            return Err(TrainErr::ShapeMismatch(format!(
                "dataset samples are {:?}, expected [{segments}, {time}]",
                samples.shape()
            )));
        }

        Ok(Self { features, samples })
    }

    /// Builds the dataset described by `config`.
    pub fn from_config(config: &DataConfig) -> Result<Self> {
        match *config {
            DataConfig::Synthetic {
                num_samples,
                segment_length,
                n_features,
                num_classes,
                seed,
            } => Self::synthetic(num_samples, segment_length, n_features, num_classes, seed),
            DataConfig::File { ref path } => Self::from_file(path),
        }
    }

    /// Generates a deterministic dataset whose samples are a quantized function of the
    /// features, so that there's something to learn.
    pub fn synthetic(
        num_samples: usize,
        segment_length: usize,
        n_features: usize,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(TrainErr::Configuration(
                "num_classes must be positive".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let uniform = Uniform::new(-1f32, 1.)
            .map_err(|e| TrainErr::Configuration(e.to_string()))?;

        let features = Array3::from_shape_simple_fn((num_samples, segment_length, n_features), || {
            uniform.sample(&mut rng)
        });

        let top = (num_classes - 1) as f32;
        let samples = features
            .mean_axis(Axis(2))
            .unwrap_or_else(|| Array2::zeros((num_samples, segment_length)))
            .mapv(|x| (((x.tanh() + 1.) / 2. * top).round() as usize).min(num_classes - 1));

        Self::new(features, samples)
    }

    /// Reads a dataset from a safetensors file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            TrainErr::Configuration(format!("couldn't read dataset {}: {e}", path.display()))
        })?;
        let invalid = |e: SafeTensorError| {
            TrainErr::Configuration(format!("invalid dataset {}: {e}", path.display()))
        };
        let tensors = SafeTensors::deserialize(&bytes).map_err(invalid)?;

        let features = tensors.tensor(FEATURES).map_err(invalid)?;
        let [segments, time, n_features] = expect_shape::<3>(&features, Dtype::F32)?;
        let values = features
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let features = Array3::from_shape_vec((segments, time, n_features), values)
            .map_err(|e| TrainErr::ShapeMismatch(e.to_string()))?;

        let samples = tensors.tensor(SAMPLES).map_err(invalid)?;
        let shape = expect_shape::<2>(&samples, Dtype::I64)?;
        let values = samples
            .data()
            .chunks_exact(8)
            .map(|b| {
                let mut raw = [0; 8];
                raw.copy_from_slice(b);
                usize::try_from(i64::from_le_bytes(raw)).map_err(|_| {
                    TrainErr::Configuration(format!("negative sample in {}", path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let samples = Array2::from_shape_vec((shape[0], shape[1]), values)
            .map_err(|e| TrainErr::ShapeMismatch(e.to_string()))?;

        Self::new(features, samples)
    }

    /// Writes this dataset in the format read by [`AudioDataset::from_file`].
    pub fn save(&self, path: &Path) -> Result<()> {
        let features: Vec<u8> = self.features.iter().flat_map(|x| x.to_le_bytes()).collect();
        let samples: Vec<u8> = self
            .samples
            .iter()
            .flat_map(|&x| (x as i64).to_le_bytes())
            .collect();

        let tensors = [
            (
                FEATURES,
                TensorView::new(Dtype::F32, self.features.shape().to_vec(), &features)?,
            ),
            (
                SAMPLES,
                TensorView::new(Dtype::I64, self.samples.shape().to_vec(), &samples)?,
            ),
        ];

        serialize_to_file(tensors, &None::<HashMap<String, String>>, path)?;
        Ok(())
    }

    /// The amount of segments.
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segment_length(&self) -> usize {
        self.samples.ncols()
    }

    pub fn n_features(&self) -> usize {
        self.features.dim().2
    }

    /// The features and samples of the segments in `range`.
    pub fn slice(&self, range: Range<usize>) -> (ArrayView3<'_, f32>, ArrayView2<'_, usize>) {
        (
            self.features.slice(s![range.clone(), .., ..]),
            self.samples.slice(s![range, ..]),
        )
    }
}

fn expect_shape<const N: usize>(tensor: &TensorView<'_>, dtype: Dtype) -> Result<[usize; N]> {
    if tensor.dtype() != dtype {
        return Err(TrainErr::Configuration(format!(
            "expected a {dtype:?} tensor, got {:?}",
            tensor.dtype()
        )));
    }

    tensor.shape().try_into().map_err(|_| {
        TrainErr::ShapeMismatch(format!(
            "expected a tensor of rank {N}, got shape {:?}",
            tensor.shape()
        ))
    })
}
