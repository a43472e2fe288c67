//! Serializable descriptions of the trainable pieces, resolved into live objects by
//! [`crate::arch::NetworkBuilder`] and [`crate::optimization::build_optimizer`].

use serde::{Deserialize, Serialize};

const fn default_kernel_size() -> usize {
    2
}

const fn default_amp() -> f32 {
    1.
}

const fn default_beta1() -> f32 {
    0.9
}

const fn default_beta2() -> f32 {
    0.999
}

const fn default_epsilon() -> f32 {
    1e-8
}

/// The activation function applied after each dilated convolution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    #[default]
    Tanh,
    Relu,
    Sigmoid {
        #[serde(default = "default_amp")]
        amp: f32,
    },
}

/// The hyperparameters of an encoder or of each of the decoders.
///
/// A network is a 1x1 input projection, `n_layers` dilated causal convolutions with
/// `n_residual_channels` channels and a 1x1 output projection. Dilations go `1, 2, 4, ...`
/// and wrap around once they would exceed `max_dilation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub n_in_channels: usize,
    pub n_layers: usize,
    pub max_dilation: usize,
    pub n_residual_channels: usize,
    pub n_out_channels: usize,
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    #[serde(default)]
    pub act_fn: ActFnSpec,
}

/// The optimization algorithm, the learning rate is configured separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum OptimizerSpec {
    Adam {
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    GradientDescent,
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::Adam {
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }
}

/// The domain confusion model that scores encodings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ClassifierSpec {
    MeanPool {
        #[serde(default)]
        seed: u64,
    },
}

impl Default for ClassifierSpec {
    fn default() -> Self {
        Self::MeanPool { seed: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_spec_fills_defaults() {
        let json = r#"{
            "n_in_channels": 4,
            "n_layers": 3,
            "max_dilation": 4,
            "n_residual_channels": 8,
            "n_out_channels": 2
        }"#;

        let spec: NetworkSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.kernel_size, 2);
        assert_eq!(spec.act_fn, ActFnSpec::Tanh);
    }

    #[test]
    fn network_spec_rejects_unknown_fields() {
        let json = r#"{
            "n_in_channels": 4,
            "n_layers": 3,
            "max_dilation": 4,
            "n_residual_channels": 8,
            "n_out_channels": 2,
            "n_skip_channels": 8
        }"#;

        assert!(serde_json::from_str::<NetworkSpec>(json).is_err());
    }

    #[test]
    fn optimizer_spec_variants() {
        let adam: OptimizerSpec = serde_json::from_str(r#"{ "adam": { "beta1": 0.8 } }"#).unwrap();
        assert_eq!(
            adam,
            OptimizerSpec::Adam {
                beta1: 0.8,
                beta2: 0.999,
                epsilon: 1e-8
            }
        );

        let gd: OptimizerSpec = serde_json::from_str(r#""gradient_descent""#).unwrap();
        assert_eq!(gd, OptimizerSpec::GradientDescent);
    }
}
