//! The parallel-for primitive (spec §4.8): a fixed worker pool repeatedly
//! claims disjoint chunks of an index range from a shared atomic cursor and
//! runs a callback over each chunk, with a barrier rendezvous at the end of
//! every call. Used by the scheduler's `unskip` pass and the engine's
//! `drift_all` pass, both plain per-task/per-cell loops with no unlock
//! graph between their iterations, unlike the graph-scheduled tasks
//! `WorkerPool` drains.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A raw-pointer wrapper that lets a `&mut [T]` be captured by worker
/// closures running on other OS threads. Safety rests entirely on the
/// caller: `parallel_for` only ever hands a thread the byte range `[start,
/// end)` its atomic cursor claim gave it, and claims never overlap, so no
/// two threads dereference the same index concurrently.
struct SyncMutPtr<T>(*mut T);
unsafe impl<T> Send for SyncMutPtr<T> {}
unsafe impl<T> Sync for SyncMutPtr<T> {}

/// A small barrier: `nr_threads` callers rendezvous before any of them
/// proceeds, built directly on `parking_lot::{Mutex, Condvar}` the way the
/// worker pool's launch barrier is (spec §4.4).
pub(crate) struct Barrier {
    state: Mutex<(usize, u64)>,
    cv: Condvar,
    nr_threads: usize,
}

impl Barrier {
    pub(crate) fn new(nr_threads: usize) -> Self {
        Self {
            state: Mutex::new((0, 0)),
            cv: Condvar::new(),
            nr_threads,
        }
    }

    pub(crate) fn wait(&self) {
        let mut guard = self.state.lock();
        let generation = guard.1;
        guard.0 += 1;
        if guard.0 == self.nr_threads {
            guard.0 = 0;
            guard.1 = guard.1.wrapping_add(1);
            self.cv.notify_all();
        } else {
            while guard.1 == generation {
                self.cv.wait(&mut guard);
            }
        }
    }
}

/// A fixed-size thread pool offering one operation: run a callback over
/// chunks of a slice, in parallel, with dynamic load balancing via an
/// atomic fetch-add cursor (spec §4.8 "chunk size ... atomic cursor").
pub struct ThreadPool {
    nr_threads: usize,
}

impl ThreadPool {
    pub fn new(nr_threads: usize) -> Self {
        Self {
            nr_threads: nr_threads.max(1),
        }
    }

    pub fn nr_threads(&self) -> usize {
        self.nr_threads
    }

    /// Splits `data` into chunks of at most `chunk_size` elements and runs
    /// `f` over each chunk on one of `nr_threads` worker threads. Blocks
    /// until every chunk has been processed.
    pub fn parallel_for_chunks<T, F>(&self, data: &mut [T], chunk_size: usize, f: F)
    where
        T: Send,
        F: Fn(&mut [T]) + Sync,
    {
        let chunk_size = chunk_size.max(1);
        let len = data.len();
        if len == 0 {
            return;
        }
        let cursor = AtomicUsize::new(0);
        let ptr = SyncMutPtr(data.as_mut_ptr());
        let nr_chunks = (len + chunk_size - 1) / chunk_size;
        let nr_threads = self.nr_threads.min(nr_chunks).max(1);

        std::thread::scope(|scope| {
            for _ in 0..nr_threads {
                let cursor = &cursor;
                let ptr_copy = SyncMutPtr(ptr.0);
                let f = &f;
                scope.spawn(move || loop {
                    let start = cursor.fetch_add(chunk_size, Ordering::Relaxed);
                    if start >= len {
                        break;
                    }
                    let end = (start + chunk_size).min(len);
                    // SAFETY: `[start, end)` was claimed by this call alone;
                    // the fetch_add cursor never reissues an index twice, so
                    // no other thread holds an overlapping slice right now.
                    let chunk = unsafe {
                        std::slice::from_raw_parts_mut(ptr_copy.0.add(start), end - start)
                    };
                    f(chunk);
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn every_element_is_visited_exactly_once() {
        let pool = ThreadPool::new(4);
        let mut data: Vec<u64> = (0..1000).collect();
        pool.parallel_for_chunks(&mut data, 37, |chunk| {
            for v in chunk.iter_mut() {
                *v += 1;
            }
        });
        for (i, v) in data.iter().enumerate() {
            assert_eq!(*v, i as u64 + 1);
        }
    }

    #[test]
    fn total_work_done_matches_input_length_under_contention() {
        let pool = ThreadPool::new(8);
        let mut data = vec![0u8; 5000];
        let counter = AtomicU64::new(0);
        pool.parallel_for_chunks(&mut data, 13, |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 5000);
    }

    #[test]
    fn barrier_releases_all_waiters() {
        let barrier = Arc::new(Barrier::new(3));
        let mut handles = Vec::new();
        let hits = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let barrier = barrier.clone();
            let hits = hits.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                hits.fetch_add(1, Ordering::SeqCst);
                barrier.wait();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
