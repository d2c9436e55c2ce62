use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

/// Thread-safe pool of fixed-length scratch buffers.
///
/// Short-lived parallel tasks acquire and release buffers here instead of
/// allocating fresh ones each time. The pool is a performance optimization
/// only: when it is full, released buffers are dropped; when it is empty,
/// `acquire` falls back to allocation.
///
/// Buffers are NOT zeroed on acquire. A recycled buffer keeps the contents
/// its previous owner left in it; callers must overwrite every element
/// they rely on.
pub struct Recycler {
    pools: Mutex<HashMap<usize, Vec<Vec<f64>>>>,
    capacity: AtomicUsize,
    dropped: AtomicUsize,
}

impl Recycler {
    /// Create a pool holding up to `capacity` buffers per size.
    pub fn new(capacity: usize) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            capacity: AtomicUsize::new(capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Get a buffer of exactly `size` elements, recycled if one is queued.
    pub fn acquire(&self, size: usize) -> Vec<f64> {
        let recycled = {
            let mut pools = self.pools.lock().unwrap();
            pools.get_mut(&size).and_then(Vec::pop)
        };
        recycled.unwrap_or_else(|| vec![0.0; size])
    }

    /// Return a buffer to the pool. Dropped silently if the pool is at
    /// capacity for this size.
    pub fn release(&self, buffer: Vec<f64>) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let size = buffer.len();
        let mut pools = self.pools.lock().unwrap();
        let queue = pools.entry(size).or_default();
        if queue.len() < capacity {
            queue.push(buffer);
        } else {
            drop(pools);
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(size, total_dropped = total, "recycler at capacity, dropping buffer");
        }
    }

    /// Set the per-size capacity. Clears everything currently pooled.
    pub fn set_capacity(&self, capacity: usize) {
        let mut pools = self.pools.lock().unwrap();
        pools.clear();
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Number of buffers dropped because the pool was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
