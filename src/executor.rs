use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};

/// Fixed-size fan-out/fan-in executor.
///
/// Work is submitted in groups of `batch_size`; every task of a group runs on
/// the pool and the whole group joins before the next one starts.
pub struct BatchExecutor {
    pool: ThreadPool,
    batch_size: usize,
}

impl BatchExecutor {
    pub fn new(batch_size: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(batch_size)
            .thread_name(|i| format!("faceauth-worker-{i}"))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;
        Ok(Self { pool, batch_size })
    }

    /// Run `task` on every item, returning results in item order.
    ///
    /// A failing task stops the run once its group has joined.
    pub fn run<T, R, F>(&self, items: &[T], task: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let mut results = Vec::with_capacity(items.len());
        for group in items.chunks(self.batch_size) {
            let done: Result<Vec<R>> = self
                .pool
                .install(|| group.par_iter().map(&task).collect());
            results.extend(done?);
        }
        Ok(results)
    }
}
