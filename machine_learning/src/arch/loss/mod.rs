mod adversarial;
mod cross_entropy;

pub use adversarial::{AdversarialLoss, DEFAULT_TRADEOFF, LossOutput};
pub use cross_entropy::CrossEntropy;
