pub mod arch;
pub mod device;
pub mod error;
pub mod initialization;
pub mod optimization;
pub mod specs;

pub use device::Device;
pub use error::{MlErr, Result};
