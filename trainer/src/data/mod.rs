pub mod dataloader;
pub mod dataset;
pub mod shard;

pub use dataloader::{Batch, DataLoader};
pub use dataset::AudioDataset;
pub use shard::{ShardSpec, shard_range};
