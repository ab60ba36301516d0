//! Worker Tasks
//!
//! Structured fork/join parallelism for the two places the engine fans out:
//! Async-phase component updates and per-view extraction. Tasks borrow frame
//! state for the duration of the scope; the scope itself is the barrier, so
//! no captured state outlives the dispatch site.

use std::num::NonZeroUsize;

/// Fixed-size fork/join helper.
///
/// One instance lives on the [`Runtime`](crate::runtime::Runtime); worker
/// count defaults to available parallelism minus one (the main thread keeps
/// one core).
#[derive(Clone, Copy, Debug)]
pub struct TaskPool {
    workers: usize,
}

impl TaskPool {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Worker count from the machine topology.
    #[must_use]
    pub fn with_default_workers() -> Self {
        let available = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self::new(available.saturating_sub(1).max(1))
    }

    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Runs `task` once per item, fanned out over the workers.
    ///
    /// Items are processed in non-overlapping index ranges; the call returns
    /// only after every task finished (the scope is the barrier).
    pub fn for_each_mut<T, F>(&self, items: &mut [T], task: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync,
    {
        if items.is_empty() {
            return;
        }

        let chunk_count = self.workers.min(items.len());
        if chunk_count <= 1 {
            for (i, item) in items.iter_mut().enumerate() {
                task(i, item);
            }
            return;
        }

        let chunk_size = items.len().div_ceil(chunk_count);
        std::thread::scope(|scope| {
            for (chunk_index, chunk) in items.chunks_mut(chunk_size).enumerate() {
                let task = &task;
                scope.spawn(move || {
                    let base = chunk_index * chunk_size;
                    for (i, item) in chunk.iter_mut().enumerate() {
                        task(base + i, item);
                    }
                });
            }
        });
    }

    /// Runs a set of independent jobs to completion.
    pub fn run_all<F>(&self, jobs: Vec<F>)
    where
        F: FnOnce() + Send,
    {
        if jobs.len() <= 1 {
            for job in jobs {
                job();
            }
            return;
        }

        std::thread::scope(|scope| {
            for job in jobs {
                scope.spawn(job);
            }
        });
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::with_default_workers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn for_each_visits_every_item_once() {
        let pool = TaskPool::new(4);
        let mut items = vec![0u32; 1000];
        pool.for_each_mut(&mut items, |i, item| *item = i as u32 + 1);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(*item, i as u32 + 1);
        }
    }

    #[test]
    fn run_all_is_a_barrier() {
        let pool = TaskPool::new(3);
        let counter = AtomicUsize::new(0);
        let jobs: Vec<_> = (0..8)
            .map(|_| {
                let counter = &counter;
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();
        pool.run_all(jobs);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
