use std::sync::atomic::{AtomicBool, Ordering};

use crate::recycler::Recycler;

/// Shared per-run state: worker count, scratch-buffer pool and the
/// cooperative cancellation flag.
///
/// Constructed once per reduction run and passed by reference (or `Arc`)
/// to every component that parallelizes work or borrows scratch buffers.
pub struct ReductionContext {
    threads: usize,
    recycler: Recycler,
    interrupted: AtomicBool,
}

impl ReductionContext {
    /// `threads == 0` selects the rayon default for this machine.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            rayon::current_num_threads()
        } else {
            threads
        };
        Self {
            threads,
            recycler: Recycler::new(threads),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads.max(1)
    }

    pub fn recycler(&self) -> &Recycler {
        &self.recycler
    }

    /// Request cooperative cancellation. In-flight work units run to
    /// completion; no further units are started.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Clear the cancellation flag, e.g. between reduction rounds of a
    /// fresh run.
    pub fn reset(&self) {
        self.interrupted.store(false, Ordering::Relaxed);
    }
}

impl Default for ReductionContext {
    fn default() -> Self {
        Self::new(0)
    }
}
