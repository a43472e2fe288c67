pub mod checkpoint;
pub mod config;
pub mod data;
pub mod distributed;
mod error;
pub mod orchestrator;

pub use config::Config;
pub use error::{Result, TrainErr};
pub use orchestrator::{Orchestrator, Phase, TrainingEvent, TrainingReport, train};
