//! The configuration document of a training run.

use std::{
    fs,
    path::{Path, PathBuf},
};

use machine_learning::{
    arch::{AutoencoderConfig, loss::DEFAULT_TRADEOFF},
    specs::{ClassifierSpec, NetworkSpec, OptimizerSpec},
};
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

const fn default_seed() -> u64 {
    1234
}

const fn default_tradeoff() -> f32 {
    DEFAULT_TRADEOFF
}

const fn default_world_size() -> usize {
    1
}

const fn default_connect_retries() -> usize {
    50
}

const fn default_retry_interval_ms() -> u64 {
    200
}

fn default_backend() -> String {
    "tcp".to_string()
}

fn default_dist_url() -> String {
    "127.0.0.1:54321".to_string()
}

/// The whole configuration, parsed once at startup and passed by reference from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub train_config: TrainConfig,
    pub data_config: DataConfig,
    pub dist_config: DistConfig,
    pub encoder_config: NetworkSpec,
    pub decoder_config: NetworkSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    pub output_directory: PathBuf,
    pub epochs: usize,
    pub learning_rate: f32,
    pub iters_per_checkpoint: usize,
    pub batch_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// The checkpoint to resume from, an empty path means starting from scratch.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
    pub num_domains: usize,
    #[serde(default)]
    pub domain_confusion_model: ClassifierSpec,
    #[serde(default = "default_tradeoff")]
    pub tradeoff: f32,
    #[serde(default)]
    pub optimizer: OptimizerSpec,
    /// Whether a resumed epoch skips the batches consumed before the checkpoint.
    #[serde(default)]
    pub skip_consumed_batches: bool,
    /// The amount of compute threads, rayon's default if missing.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl TrainConfig {
    /// The checkpoint to resume from, if any.
    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.checkpoint_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

/// Where the training samples come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum DataConfig {
    /// Deterministic pseudo random segments.
    Synthetic {
        num_samples: usize,
        segment_length: usize,
        n_features: usize,
        num_classes: usize,
        #[serde(default)]
        seed: u64,
    },
    /// A safetensors file with `features` (F32 `[N, T, F]`) and `samples` (I64 `[N, T]`).
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistConfig {
    #[serde(default = "default_backend")]
    pub dist_backend: String,
    /// The address the coordinator listens at, an optional `tcp://` scheme is ignored.
    #[serde(default = "default_dist_url")]
    pub dist_url: String,
    /// The amount of devices available for training.
    #[serde(default = "default_world_size")]
    pub world_size: usize,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            dist_backend: default_backend(),
            dist_url: default_dist_url(),
            world_size: default_world_size(),
            connect_retries: default_connect_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl DistConfig {
    /// The `host:port` the coordinator binds and members connect to.
    pub fn addr(&self) -> &str {
        self.dist_url
            .strip_prefix("tcp://")
            .unwrap_or(&self.dist_url)
    }
}

impl Config {
    /// Reads, parses and validates the configuration at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            TrainErr::Configuration(format!("couldn't read {}: {e}", path.display()))
        })?;

        Self::from_json(&raw)
    }

    /// Parses and validates a configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The hyperparameters of the autoencoder.
    pub fn autoencoder(&self) -> AutoencoderConfig {
        AutoencoderConfig {
            encoder: self.encoder_config.clone(),
            decoder: self.decoder_config.clone(),
            num_domains: self.train_config.num_domains,
        }
    }

    fn validate(&self) -> Result<()> {
        let train = &self.train_config;
        let positive = [
            ("train_config.epochs", train.epochs),
            ("train_config.batch_size", train.batch_size),
            ("train_config.iters_per_checkpoint", train.iters_per_checkpoint),
            ("train_config.num_domains", train.num_domains),
            ("dist_config.world_size", self.dist_config.world_size),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(TrainErr::Configuration(format!("{name} must be positive")));
        }

        if !(train.learning_rate.is_finite() && train.learning_rate > 0.) {
            return Err(TrainErr::Configuration(format!(
                "train_config.learning_rate must be positive, got {}",
                train.learning_rate
            )));
        }

        if !train.tradeoff.is_finite() {
            return Err(TrainErr::Configuration(
                "train_config.tradeoff must be finite".to_string(),
            ));
        }

        if let Some(0) = train.threads {
            return Err(TrainErr::Configuration(
                "train_config.threads must be positive".to_string(),
            ));
        }

        self.autoencoder().validate()?;

        if let DataConfig::Synthetic {
            n_features,
            num_classes,
            segment_length,
            ..
        } = self.data_config
        {
            if n_features != self.encoder_config.n_in_channels {
                return Err(TrainErr::Configuration(format!(
                    "data_config n_features ({n_features}) must match encoder_config n_in_channels ({})",
                    self.encoder_config.n_in_channels
                )));
            }

            if num_classes != self.decoder_config.n_out_channels {
                return Err(TrainErr::Configuration(format!(
                    "data_config num_classes ({num_classes}) must match decoder_config n_out_channels ({})",
                    self.decoder_config.n_out_channels
                )));
            }

            if segment_length == 0 {
                return Err(TrainErr::Configuration(
                    "data_config segment_length must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}
