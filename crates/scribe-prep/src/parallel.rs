//! Ordered parallel map over a fixed-size worker pool.
//!
//! Every per-record stage is a pure function of its input, so the pool only
//! needs to fan work out and put results back in input order. Positional
//! correspondence matters downstream: example `i` must come from record `i`.

use rayon::prelude::*;

use crate::types::{PrepError, Result};

/// A `rayon` thread pool with an explicit worker count.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `num_workers` threads (`0` = one per CPU).
    pub fn new(num_workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("scribe-worker-{i}"))
            .build()
            .map_err(|e| PrepError::InvalidInput(format!("worker pool: {e}")))?;
        tracing::debug!(workers = pool.current_num_threads(), "worker pool ready");
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `f` to every item. Output order matches input order; the first
    /// error fails the whole map.
    pub fn try_map<T, U, F>(&self, items: &[T], f: F) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> Result<U> + Sync + Send,
    {
        self.pool.install(|| items.par_iter().map(&f).collect())
    }

    /// Apply `f` to consecutive chunks of `chunk_size` items and flatten the
    /// per-chunk outputs, preserving order.
    pub fn try_map_chunks<T, U, F>(&self, items: &[T], chunk_size: usize, f: F) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(&[T]) -> Result<Vec<U>> + Sync + Send,
    {
        if chunk_size == 0 {
            return Err(PrepError::InvalidInput("chunk size must be positive".into()));
        }
        let chunks: Vec<Vec<U>> = self
            .pool
            .install(|| items.par_chunks(chunk_size).map(&f).collect::<Result<_>>())?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// Map every item to an accumulator and fold them with `combine`.
    ///
    /// `combine` must be associative and `identity` its neutral element.
    pub fn map_reduce<T, A, I, M, R>(&self, items: &[T], identity: I, map: M, combine: R) -> A
    where
        T: Sync,
        A: Send,
        I: Fn() -> A + Sync + Send,
        M: Fn(&T) -> A + Sync + Send,
        R: Fn(A, A) -> A + Sync + Send,
    {
        self.pool
            .install(|| items.par_iter().map(&map).reduce(&identity, &combine))
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_workers", &self.num_workers())
            .finish()
    }
}
