//! Saving and restoring the training state.
//!
//! A checkpoint is a safetensors file holding one tensor per parameter segment of the model,
//! the optimizer's buffers and scalars, and the iteration it was taken at as metadata.

use std::{
    collections::HashMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use log::info;
use machine_learning::{
    Device,
    arch::{Model, MultiDomainAutoencoder},
    optimization::{Optimizer, OptimizerState},
    specs::NetworkSpec,
};
use safetensors::{Dtype, SafeTensors, serialize_to_file, tensor::TensorView};

use crate::{Result, TrainErr};

const OPTIMIZER_PREFIX: &str = "optimizer.";
const SCALAR_PREFIX: &str = "optimizer.scalar.";

const ITERATION: &str = "iteration";
const LEARNING_RATE: &str = "learning_rate";
const NUM_DOMAINS: &str = "num_domains";
const OPTIMIZER: &str = "optimizer";
const ENCODER_CONFIG: &str = "encoder_config";
const DECODER_CONFIG: &str = "decoder_config";

/// What a checkpoint restores besides the weights and the optimizer state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Restored {
    /// The iteration the checkpoint was saved at.
    pub iteration: usize,
    pub learning_rate: f32,
}

/// The path of the checkpoint taken at `iteration`.
pub fn checkpoint_path(output_directory: &Path, iteration: usize) -> PathBuf {
    output_directory.join(format!("wavenet_{iteration}"))
}

/// Saves the training state at `path`.
///
/// The file is written next to `path` first and then renamed, so a crash never leaves a
/// truncated checkpoint behind.
///
/// # Arguments
/// * `model` - The model, possibly wrapped for gradient synchronization.
/// * `optimizer` - The optimizer whose state is saved.
/// * `learning_rate` - The learning rate in use.
/// * `iteration` - The iteration that was just completed.
/// * `path` - Where to write the checkpoint.
/// * `device` - The device the clean copy of the model is built on.
pub fn save(
    model: &dyn Model,
    optimizer: &dyn Optimizer,
    learning_rate: f32,
    iteration: usize,
    path: &Path,
    device: &Device,
) -> Result<()> {
    let config = model.config().clone();
    let clean = MultiDomainAutoencoder::with_params(config, device.clone(), model.params())?;
    let state = optimizer.state();

    let mut blobs: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();

    for segment in clean.layout().segments() {
        let values = &clean.params()[segment.range.clone()];
        blobs.push((segment.name.clone(), vec![values.len()], to_bytes(values)));
    }

    for (name, buffer) in &state.buffers {
        blobs.push((
            format!("{OPTIMIZER_PREFIX}{name}"),
            vec![buffer.len()],
            to_bytes(buffer),
        ));
    }

    for (name, &value) in &state.scalars {
        blobs.push((format!("{SCALAR_PREFIX}{name}"), vec![1], to_bytes(&[value])));
    }

    let tensors = blobs
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.as_str(), view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let metadata = HashMap::from([
        (ITERATION.to_string(), iteration.to_string()),
        (LEARNING_RATE.to_string(), learning_rate.to_string()),
        (NUM_DOMAINS.to_string(), clean.num_domains().to_string()),
        (OPTIMIZER.to_string(), optimizer.name().to_string()),
        (
            ENCODER_CONFIG.to_string(),
            serde_json::to_string(&clean.config().encoder)?,
        ),
        (
            DECODER_CONFIG.to_string(),
            serde_json::to_string(&clean.config().decoder)?,
        ),
    ]);

    let tmp = temp_sibling(path);
    serialize_to_file(tensors, &Some(metadata), &tmp)?;
    fs::rename(&tmp, path)?;

    info!(iteration = iteration; "saved model and optimizer state to {}", path.display());
    Ok(())
}

/// Restores the training state saved at `path` into `model` and `optimizer`.
///
/// # Arguments
/// * `path` - The checkpoint to read.
/// * `model` - The model the weights are copied into, it must have the same architecture.
/// * `optimizer` - The optimizer whose state is replaced.
///
/// # Returns
/// The iteration and learning rate the checkpoint was saved with.
pub fn load(path: &Path, model: &mut dyn Model, optimizer: &mut dyn Optimizer) -> Result<Restored> {
    if !path.is_file() {
        return Err(TrainErr::CheckpointNotFound(path.to_path_buf()));
    }

    let bytes = fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let metadata = header
        .metadata()
        .as_ref()
        .ok_or_else(|| TrainErr::Checkpoint(format!("{} has no metadata", path.display())))?;

    let iteration: usize = parse_field(metadata, ITERATION)?;
    let learning_rate: f32 = parse_field(metadata, LEARNING_RATE)?;
    let num_domains: usize = parse_field(metadata, NUM_DOMAINS)?;
    let optimizer_name: String = parse_field(metadata, OPTIMIZER)?;

    if num_domains != model.config().num_domains {
        return Err(TrainErr::ShapeMismatch(format!(
            "checkpoint has {num_domains} domain(s), the model has {}",
            model.config().num_domains
        )));
    }

    for (key, expected) in [
        (ENCODER_CONFIG, &model.config().encoder),
        (DECODER_CONFIG, &model.config().decoder),
    ] {
        let raw = metadata
            .get(key)
            .ok_or_else(|| TrainErr::Checkpoint(format!("missing metadata field {key}")))?;
        let saved: NetworkSpec = serde_json::from_str(raw)
            .map_err(|e| TrainErr::Checkpoint(format!("invalid metadata field {key}: {e}")))?;

        if &saved != expected {
            return Err(TrainErr::ShapeMismatch(format!(
                "checkpoint {key} is {saved:?}, the model has {expected:?}"
            )));
        }
    }

    if optimizer_name != optimizer.name() {
        return Err(TrainErr::Checkpoint(format!(
            "checkpoint was saved with {optimizer_name}, the run uses {}",
            optimizer.name()
        )));
    }

    let tensors = SafeTensors::deserialize(&bytes)?;

    let mut params = vec![0.; model.size()];
    for segment in model.layout().segments() {
        let values = read_f32(&tensors, &segment.name)?;
        if values.len() != segment.range.len() {
            return Err(TrainErr::ShapeMismatch(format!(
                "checkpoint segment {} has {} parameters, the model expects {}",
                segment.name,
                values.len(),
                segment.range.len()
            )));
        }

        params[segment.range.clone()].copy_from_slice(&values);
    }

    let mut state = OptimizerState::default();
    for name in tensors.names() {
        if let Some(scalar) = name.strip_prefix(SCALAR_PREFIX) {
            let value = read_f32(&tensors, name)?;
            let &[value] = value.as_slice() else {
                return Err(TrainErr::Checkpoint(format!("{name} isn't a scalar")));
            };
            state.scalars.insert(scalar.to_string(), value);
        } else if let Some(buffer) = name.strip_prefix(OPTIMIZER_PREFIX) {
            state
                .buffers
                .insert(buffer.to_string(), read_f32(&tensors, name)?);
        }
    }

    optimizer.load_state(state)?;
    model.load_params(&params)?;

    info!(iteration = iteration; "restored checkpoint {}", path.display());
    Ok(Restored {
        iteration,
        learning_rate,
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn read_f32(tensors: &SafeTensors<'_>, name: &str) -> Result<Vec<f32>> {
    let tensor = tensors.tensor(name)?;
    if tensor.dtype() != Dtype::F32 {
        return Err(TrainErr::Checkpoint(format!(
            "{name} is {:?}, expected F32",
            tensor.dtype()
        )));
    }

    Ok(tensor
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_field<T: std::str::FromStr>(metadata: &HashMap<String, String>, key: &str) -> Result<T> {
    metadata
        .get(key)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| TrainErr::Checkpoint(format!("missing or invalid metadata field {key}")))
}
