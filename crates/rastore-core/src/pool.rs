//! Fork/join worker pool
//!
//! Every parallel phase runs `size` workers over scoped threads and blocks
//! the caller until all of them have finished. There is no task queue:
//! worker `k` is handed its index and decides from it which partition it
//! owns.

use std::panic;

use tracing::trace;

use crate::error::StoreResult;

/// Fixed-size fork/join pool
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f(k)` for every worker `k` and collect the results in worker
    /// order. The first error, by worker index, is returned.
    pub fn in_parallel<T, F>(&self, f: F) -> StoreResult<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> StoreResult<T> + Sync,
    {
        if self.size == 1 {
            return Ok(vec![f(0)?]);
        }

        trace!(workers = self.size, "fork");
        let results: Vec<std::thread::Result<StoreResult<T>>> = std::thread::scope(|s| {
            let f = &f;
            let handles: Vec<_> = (0..self.size).map(|k| s.spawn(move || f(k))).collect();
            handles.into_iter().map(|h| h.join()).collect()
        });
        trace!(workers = self.size, "join");

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    }

    /// Run `f(k, &mut items[k])` with each worker owning exactly one item
    pub fn for_each_mut<T, F>(&self, items: &mut [T], f: F) -> StoreResult<()>
    where
        T: Send,
        F: Fn(usize, &mut T) -> StoreResult<()> + Sync,
    {
        if self.size == 1 || items.len() <= 1 {
            for (k, item) in items.iter_mut().enumerate() {
                f(k, item)?;
            }
            return Ok(());
        }

        let results: Vec<std::thread::Result<StoreResult<()>>> = std::thread::scope(|s| {
            let f = &f;
            let handles: Vec<_> = items
                .iter_mut()
                .enumerate()
                .map(|(k, item)| s.spawn(move || f(k, item)))
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        for r in results {
            r.unwrap_or_else(|payload| panic::resume_unwind(payload))?;
        }
        Ok(())
    }
}

/// Contiguous slice `[lo, hi)` of `0..n` owned by worker `k` of `workers`
pub fn partition(n: usize, workers: usize, k: usize) -> (usize, usize) {
    let workers = workers.max(1);
    let lo = n * k / workers;
    let hi = n * (k + 1) / workers;
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_worker_order() {
        let pool = WorkerPool::new(4);
        let out = pool.in_parallel(|k| Ok(k * 10)).unwrap();
        assert_eq!(out, vec![0, 10, 20, 30]);
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[test]
    fn test_error_propagates() {
        let pool = WorkerPool::new(3);
        let ran = AtomicUsize::new(0);
        let err = pool
            .in_parallel(|k| {
                ran.fetch_add(1, Ordering::Relaxed);
                if k == 1 {
                    Err(StoreError::malformed("worker one failed"))
                } else {
                    Ok(k)
                }
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        // Every worker still ran to completion
        assert_eq!(ran.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_for_each_mut_exclusive_items() {
        let pool = WorkerPool::new(4);
        let mut items = vec![Vec::new(); 4];
        pool.for_each_mut(&mut items, |k, v: &mut Vec<usize>| {
            v.extend(0..k);
            Ok(())
        })
        .unwrap();
        assert_eq!(items.iter().map(Vec::len).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_partition_covers_range() {
        for n in [0usize, 1, 5, 6, 97] {
            for workers in 1..6 {
                let mut next = 0;
                for k in 0..workers {
                    let (lo, hi) = partition(n, workers, k);
                    assert_eq!(lo, next);
                    assert!(hi >= lo);
                    next = hi;
                }
                assert_eq!(next, n);
            }
        }
    }
}
