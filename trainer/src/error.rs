use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use machine_learning::MlErr;

/// The result type used in the entire trainer.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// All errors that can occur while setting up or running a training.
///
/// Every one of them is fatal for the process that hits it.
#[derive(Debug)]
pub enum TrainErr {
    /// The configuration is missing, malformed or inconsistent.
    Configuration(String),
    /// The checkpoint to resume from doesn't exist.
    CheckpointNotFound(PathBuf),
    /// Two tensors or buffers that must agree in shape don't.
    ShapeMismatch(String),
    /// The process group couldn't be formed.
    DistributedInit(String),
    /// A rank other than 0 was requested without a process group.
    InvalidTopology { rank: usize, world_size: usize },
    /// A checkpoint file exists but can't be decoded.
    Checkpoint(String),
    /// A group member failed mid training.
    Communication(io::Error),
    Ml(MlErr),
    Io(io::Error),
}

impl Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::CheckpointNotFound(path) => {
                write!(f, "checkpoint not found: {}", path.display())
            }
            Self::ShapeMismatch(msg) => write!(f, "shape mismatch: {msg}"),
            Self::DistributedInit(msg) => write!(f, "distributed init failed: {msg}"),
            Self::InvalidTopology { rank, world_size } => write!(
                f,
                "invalid topology: rank {rank} requested with {world_size} device(s) in use"
            ),
            Self::Checkpoint(msg) => write!(f, "invalid checkpoint: {msg}"),
            Self::Communication(e) => write!(f, "communication failure: {e}"),
            Self::Ml(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Communication(e) | Self::Io(e) => Some(e),
            Self::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for TrainErr {
    fn from(e: MlErr) -> Self {
        match e {
            MlErr::SizeMismatch { .. }
            | MlErr::ShapeMismatch { .. }
            | MlErr::InvalidTarget { .. }
            | MlErr::Reshape(_) => Self::ShapeMismatch(e.to_string()),
            MlErr::InvalidConfig(msg) => Self::Configuration(msg),
            MlErr::InvalidOptimizerState(msg) => Self::Checkpoint(msg),
            MlErr::GradientSync(msg) => Self::Communication(io::Error::other(msg)),
            MlErr::Device(_) => Self::Ml(e),
        }
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<safetensors::SafeTensorError> for TrainErr {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint(e.to_string())
    }
}
