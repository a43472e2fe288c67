use std::{fmt, sync::Arc};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{MlErr, Result};

/// A handle to the compute device a process trains on.
///
/// Every tensor producing call of the models runs inside [`Device::install`], so
/// the parallel kernels use this device's thread pool instead of the global one.
#[derive(Clone)]
pub struct Device {
    ordinal: usize,
    pool: Arc<ThreadPool>,
}

impl Device {
    /// Creates a new CPU `Device`.
    ///
    /// # Arguments
    /// * `ordinal` - The index of this device, usually the process' rank.
    /// * `threads` - The amount of worker threads, `None` lets rayon decide.
    ///
    /// # Returns
    /// A new `Device` or an error if the thread pool couldn't be built.
    pub fn cpu(ordinal: usize, threads: Option<usize>) -> Result<Self> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(move |i| format!("device-{ordinal}-{i}"));

        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }

        let pool = builder
            .build()
            .map_err(|e| MlErr::Device(e.to_string()))?;

        Ok(Self {
            ordinal,
            pool: Arc::new(pool),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` on this device.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("ordinal", &self.ordinal)
            .field("threads", &self.threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_runs_on_the_device_pool() {
        let device = Device::cpu(3, Some(2)).unwrap();
        assert_eq!(device.ordinal(), 3);
        assert_eq!(device.threads(), 2);

        let threads = device.install(rayon::current_num_threads);
        assert_eq!(threads, 2);
    }
}
