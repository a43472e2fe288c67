use std::sync::Arc;

use log::debug;
use ndarray::{Zip, concatenate, prelude::*};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Model, Network, NetworkBuilder, ParamLayout};
use crate::{Device, MlErr, Result, optimization::Optimizer, specs::NetworkSpec};

/// The hyperparameters of a [`MultiDomainAutoencoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderConfig {
    pub encoder: NetworkSpec,
    pub decoder: NetworkSpec,
    pub num_domains: usize,
}

impl AutoencoderConfig {
    /// The amount of quantized sample values, the width of each reconstruction.
    pub fn num_classes(&self) -> usize {
        self.decoder.n_out_channels
    }

    /// The amount of channels of the shared encoding.
    pub fn latent_channels(&self) -> usize {
        self.encoder.n_out_channels
    }

    /// Checks that the encoder and decoders fit together.
    pub fn validate(&self) -> Result<()> {
        if self.num_domains == 0 {
            return Err(MlErr::InvalidConfig(
                "num_domains must be positive".to_string(),
            ));
        }

        if self.decoder.n_in_channels != self.encoder.n_out_channels {
            return Err(MlErr::InvalidConfig(format!(
                "decoder n_in_channels ({}) must match encoder n_out_channels ({})",
                self.decoder.n_in_channels, self.encoder.n_out_channels
            )));
        }

        Ok(())
    }
}

/// The input of a forward pass.
///
/// The encoder sees the conditioning features together with the previous sample of each
/// step, so a step's reconstruction never depends on its own target.
#[derive(Debug, Clone)]
pub struct ForwardInput {
    features: Array3<f32>,
    prev_samples: Array2<usize>,
}

impl ForwardInput {
    /// Creates a new `ForwardInput`.
    ///
    /// # Arguments
    /// * `features` - The `(batch, time, features)` conditioning features.
    /// * `prev_samples` - The `(batch, time)` quantized sample preceding each step.
    ///
    /// # Returns
    /// The input or an error if the batch and time axes disagree.
    pub fn new(features: Array3<f32>, prev_samples: Array2<usize>) -> Result<Self> {
        let (batch, time, _) = features.dim();
        if prev_samples.dim() != (batch, time) {
            let (got_batch, got_time) = prev_samples.dim();
            return Err(MlErr::ShapeMismatch {
                what: "previous samples",
                got: vec![got_batch, got_time],
                expected: vec![batch, time],
            });
        }

        Ok(Self {
            features,
            prev_samples,
        })
    }

    /// Creates the input that reconstructs `targets`: every step is fed the target of the step
    /// before it, the first step is fed the silence class `num_classes / 2`.
    pub fn from_targets(
        features: Array3<f32>,
        targets: ArrayView2<usize>,
        num_classes: usize,
    ) -> Result<Self> {
        let (batch, time) = targets.dim();
        let silence = num_classes / 2;
        let prev_samples = Array2::from_shape_fn((batch, time), |(b, t)| match t {
            0 => silence,
            t => targets[[b, t - 1]],
        });

        Self::new(features, prev_samples)
    }

    pub fn features(&self) -> ArrayView3<'_, f32> {
        self.features.view()
    }

    pub fn prev_samples(&self) -> ArrayView2<'_, usize> {
        self.prev_samples.view()
    }

    /// The `(batch, time)` dimensions.
    pub fn dim(&self) -> (usize, usize) {
        self.prev_samples.dim()
    }
}

/// The output of a forward pass.
#[derive(Debug, Clone)]
pub struct Forward {
    /// The `(batch, time, latent)` encoding, shared by every decoder.
    pub encoding: Arc<Array3<f32>>,
    /// One `(batch, time, num_classes)` logit tensor per domain, in domain order.
    pub reconstructions: Vec<Array3<f32>>,
}

/// An encoder shared by every domain and one decoder per domain.
///
/// The parameters of every network live in one flat buffer laid out as described by
/// [`ParamLayout`], and so does the gradient.
pub struct MultiDomainAutoencoder {
    config: AutoencoderConfig,
    device: Device,
    encoder: Network,
    decoders: Vec<Network>,
    layout: ParamLayout,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl MultiDomainAutoencoder {
    /// Creates a new `MultiDomainAutoencoder` with random parameters.
    ///
    /// # Arguments
    /// * `config` - The hyperparameters.
    /// * `device` - The device the passes run on.
    /// * `seed` - The seed of the initial parameters.
    ///
    /// # Returns
    /// The autoencoder or an error if the configuration is invalid.
    pub fn new(config: AutoencoderConfig, device: Device, seed: u64) -> Result<Self> {
        config.validate()?;

        let builder = NetworkBuilder::new();

        // One extra input channel carries the previous sample.
        let mut encoder_spec = config.encoder.clone();
        encoder_spec.n_in_channels += 1;
        let encoder = builder.build(&encoder_spec)?;

        let decoder = builder.build(&config.decoder)?;
        let decoders = vec![decoder; config.num_domains];

        let layout = ParamLayout::new(encoder.size(), decoders[0].size(), config.num_domains);
        let mut params = vec![0.; layout.size()];

        let mut rng = StdRng::seed_from_u64(seed);
        let (encoder_params, decoder_params) = params.split_at_mut(encoder.size());
        encoder.init(encoder_params, &mut rng)?;
        for (decoder, chunk) in decoders
            .iter()
            .zip(decoder_params.chunks_exact_mut(decoder_size(&decoders)))
        {
            decoder.init(chunk, &mut rng)?;
        }

        debug!(
            encoder_size = encoder.size(),
            decoder_size = decoders[0].size(),
            num_domains = config.num_domains;
            "built multi domain autoencoder"
        );

        Ok(Self {
            grad: vec![0.; layout.size()],
            config,
            device,
            encoder,
            decoders,
            layout,
            params,
        })
    }

    /// Creates a new `MultiDomainAutoencoder` with the given parameters.
    pub fn with_params(config: AutoencoderConfig, device: Device, params: &[f32]) -> Result<Self> {
        let mut model = Self::new(config, device, 0)?;
        model.load_params(params)?;
        Ok(model)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn num_domains(&self) -> usize {
        self.decoders.len()
    }

    /// Concatenates the features with the previous samples scaled into `[-1, 1]`.
    fn encoder_input(&self, input: &ForwardInput) -> Result<Array3<f32>> {
        let features = input.features();
        let (batch, time, channels) = features.dim();
        if channels != self.config.encoder.n_in_channels {
            return Err(MlErr::ShapeMismatch {
                what: "encoder features",
                got: vec![batch, time, channels],
                expected: vec![batch, time, self.config.encoder.n_in_channels],
            });
        }

        let num_classes = self.config.num_classes();
        if let Some(&class) = input.prev_samples().iter().find(|&&c| c >= num_classes) {
            return Err(MlErr::InvalidTarget { class, num_classes });
        }

        let scale = match num_classes {
            0 | 1 => 0.,
            n => 2. / (n - 1) as f32,
        };

        let mut prev = Array3::<f32>::zeros((batch, time, 1));
        Zip::from(prev.index_axis_mut(Axis(2), 0))
            .and(input.prev_samples())
            .for_each(|p, &class| *p = class as f32 * scale - 1.);

        Ok(concatenate(Axis(2), &[features, prev.view()])?)
    }
}

fn decoder_size(decoders: &[Network]) -> usize {
    decoders.first().map_or(0, Network::size)
}

impl Model for MultiDomainAutoencoder {
    fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    fn forward(&mut self, input: &ForwardInput) -> Result<Forward> {
        let x = self.encoder_input(input)?;

        let encoder_size = self.encoder.size();
        let decoder_size = decoder_size(&self.decoders);
        let (encoder_params, decoder_params) = self.params.split_at(encoder_size);

        let encoder = &mut self.encoder;
        let decoders = &mut self.decoders;

        self.device.install(|| {
            let encoding = Arc::new(encoder.forward(encoder_params, x.view())?);

            let reconstructions = decoders
                .par_iter_mut()
                .zip(decoder_params.par_chunks(decoder_size))
                .map(|(decoder, params)| decoder.forward(params, encoding.view()))
                .collect::<Result<Vec<_>>>()?;

            Ok(Forward {
                encoding,
                reconstructions,
            })
        })
    }

    fn backward(
        &mut self,
        d_reconstructions: &[Array3<f32>],
        d_encoding: ArrayView3<f32>,
    ) -> Result<()> {
        if d_reconstructions.len() != self.decoders.len() {
            return Err(MlErr::SizeMismatch {
                what: "reconstruction gradients",
                got: d_reconstructions.len(),
                expected: self.decoders.len(),
            });
        }

        let encoder_size = self.encoder.size();
        let decoder_size = decoder_size(&self.decoders);
        let (encoder_params, decoder_params) = self.params.split_at(encoder_size);
        let (encoder_grad, decoder_grad) = self.grad.split_at_mut(encoder_size);

        let encoder = &mut self.encoder;
        let decoders = &mut self.decoders;

        self.device.install(|| {
            let d_inputs = decoders
                .par_iter_mut()
                .zip(decoder_params.par_chunks(decoder_size))
                .zip(decoder_grad.par_chunks_mut(decoder_size))
                .zip(d_reconstructions.par_iter())
                .map(|(((decoder, params), grad), d)| decoder.backward(params, grad, d.view()))
                .collect::<Result<Vec<_>>>()?;

            let mut d_encoding = d_encoding.to_owned();
            for d in &d_inputs {
                if d.dim() != d_encoding.dim() {
                    let (batch, time, channels) = d.dim();
                    let (e_batch, e_time, e_channels) = d_encoding.dim();
                    return Err(MlErr::ShapeMismatch {
                        what: "encoding gradient",
                        got: vec![batch, time, channels],
                        expected: vec![e_batch, e_time, e_channels],
                    });
                }

                d_encoding += d;
            }

            encoder.backward(encoder_params, encoder_grad, d_encoding.view())?;
            Ok(())
        })
    }

    fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn grad(&self) -> &[f32] {
        &self.grad
    }

    fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    fn load_params(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "autoencoder parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    fn step(&mut self, optimizer: &mut dyn Optimizer) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.params)
    }
}
