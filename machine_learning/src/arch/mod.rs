pub mod activations;
mod autoencoder;
mod builder;
mod classifier;
pub mod layers;
pub mod loss;
mod model;
mod network;
mod param_layout;

pub use autoencoder::{AutoencoderConfig, Forward, ForwardInput, MultiDomainAutoencoder};
pub use builder::NetworkBuilder;
pub use classifier::{DomainClassifier, MeanPoolClassifier};
pub use model::Model;
pub use network::Network;
pub use param_layout::{ENCODER_SEGMENT, ParamLayout, Segment, decoder_segment};
