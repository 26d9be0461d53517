//! Bounded worker pool for CPU-heavy crypto.
//!
//! The session runs on a cooperative runtime; hashing, modular
//! exponentiation, factorization and bulk AES all go through here so the
//! I/O loop never stalls on a long computation.

use std::sync::Arc;

use tokio::sync::Semaphore;

pub(crate) struct CpuPool {
    permits: Arc<Semaphore>,
}

impl CpuPool {
    /// A pool admitting at most `workers` concurrent jobs.
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Run `job` off the async runtime, waiting for a free worker slot.
    pub(crate) async fn run<T, F>(&self, job: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("worker pool semaphore closed");
        tokio::task::spawn_blocking(job)
            .await
            .expect("worker pool job panicked")
    }
}
