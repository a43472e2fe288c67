#![allow(dead_code)]

use std::path::Path;

use serde_json::{Value, json};
use trainer::Config;

/// 20 synthetic segments, which is 10 batches of 2 on a single device.
pub fn config_json(output_directory: &Path) -> Value {
    json!({
        "train_config": {
            "output_directory": output_directory,
            "epochs": 1,
            "learning_rate": 0.001,
            "iters_per_checkpoint": 5,
            "batch_size": 2,
            "seed": 1234,
            "checkpoint_path": "",
            "num_domains": 2,
            "threads": 1
        },
        "data_config": {
            "synthetic": {
                "num_samples": 20,
                "segment_length": 12,
                "n_features": 3,
                "num_classes": 8,
                "seed": 3
            }
        },
        "dist_config": {},
        "encoder_config": {
            "n_in_channels": 3,
            "n_layers": 3,
            "max_dilation": 4,
            "n_residual_channels": 4,
            "n_out_channels": 2
        },
        "decoder_config": {
            "n_in_channels": 2,
            "n_layers": 2,
            "max_dilation": 2,
            "n_residual_channels": 4,
            "n_out_channels": 8
        }
    })
}

pub fn config(output_directory: &Path) -> Config {
    config_with(output_directory, |_| {})
}

pub fn config_with<F: FnOnce(&mut Value)>(output_directory: &Path, edit: F) -> Config {
    let mut json = config_json(output_directory);
    edit(&mut json);
    Config::from_json(&json.to_string()).unwrap()
}
