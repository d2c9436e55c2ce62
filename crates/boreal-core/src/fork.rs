//! Fork-join task partitioning.
//!
//! Every per-frame and per-channel operation in the reduction runs through
//! one of the entry points here: an index range (or a vector of owned work
//! units) is split across up to `ctx.threads()` rayon workers, the caller's
//! closure runs once per index, and per-worker partial results are merged
//! in worker order so the outcome is deterministic.
//!
//! Indices are handed out reverse-strided: worker `w` of `p` takes
//! `n-1-w, n-1-w-p, ...`. On uneven workloads this keeps workers finishing
//! near-simultaneously without a work queue.
//!
//! Cancellation is cooperative: the context's interrupted flag is polled
//! once per work unit, and once set no further callbacks fire. Partial
//! results produced before the interrupt are still merged. An error (or
//! panic) inside a worker callback is captured, logged with the worker
//! identity, and re-raised to the caller after all workers have joined.

use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tracing::error;

use crate::context::ReductionContext;
use crate::error::{BorealError, Result};

fn worker_count(ctx: &ReductionContext, n: usize) -> usize {
    ctx.threads().min(n).max(1)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawn `p` workers in a rayon scope, each running `body(w)` once.
/// The first failure (in worker order) is re-raised after the join.
fn run_workers<F>(p: usize, body: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    let failures: Mutex<Vec<(usize, BorealError)>> = Mutex::new(Vec::new());

    rayon::scope(|s| {
        for w in 0..p {
            let failures = &failures;
            let body = &body;
            s.spawn(move |_| {
                let outcome = catch_unwind(AssertUnwindSafe(|| body(w)));
                let failure = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => BorealError::Worker {
                        worker: w,
                        source: Box::new(e),
                    },
                    Err(payload) => BorealError::WorkerPanic {
                        worker: w,
                        message: panic_message(payload),
                    },
                };
                error!(worker = w, error = %failure, "parallel worker failed");
                failures.lock().unwrap().push((w, failure));
            });
        }
    });

    let mut failures = failures.into_inner().unwrap();
    failures.sort_by_key(|(w, _)| *w);
    match failures.into_iter().next() {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}

/// Invoke `f(i)` exactly once for every `i` in `[0, n)`.
pub fn indexed<F>(ctx: &ReductionContext, n: usize, f: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    if n == 0 {
        return Ok(());
    }
    let p = worker_count(ctx, n);
    run_workers(p, |w| {
        let mut i = n as isize - 1 - w as isize;
        while i >= 0 {
            if ctx.is_interrupted() {
                break;
            }
            f(i as usize)?;
            i -= p as isize;
        }
        Ok(())
    })
}

/// Invoke `f(block, from..to)` for every contiguous block of `block_size`
/// indices in `[0, n)`. The last block is truncated.
pub fn blocked<F>(ctx: &ReductionContext, n: usize, block_size: usize, f: F) -> Result<()>
where
    F: Fn(usize, Range<usize>) -> Result<()> + Sync,
{
    if n == 0 || block_size == 0 {
        return Ok(());
    }
    let blocks = n.div_ceil(block_size);
    indexed(ctx, blocks, |b| {
        let from = b * block_size;
        let to = (from + block_size).min(n);
        f(b, from..to)
    })
}

/// Per-worker fold over `[0, n)` with an associative merge.
///
/// Each worker folds its strided share of the indices into an accumulator
/// produced by `init`; the per-worker accumulators are then merged in
/// worker order. If the run is interrupted, the merge still covers
/// whatever partials exist.
pub fn map_indexed<T, I, F, M>(ctx: &ReductionContext, n: usize, init: I, fold: F, merge: M) -> Result<T>
where
    T: Send,
    I: Fn() -> T + Sync,
    F: Fn(&mut T, usize) -> Result<()> + Sync,
    M: Fn(T, T) -> T,
{
    if n == 0 {
        return Ok(init());
    }
    let p = worker_count(ctx, n);
    let partials: Mutex<Vec<(usize, T)>> = Mutex::new(Vec::with_capacity(p));

    run_workers(p, |w| {
        let mut acc = init();
        let mut i = n as isize - 1 - w as isize;
        while i >= 0 {
            if ctx.is_interrupted() {
                break;
            }
            fold(&mut acc, i as usize)?;
            i -= p as isize;
        }
        partials.lock().unwrap().push((w, acc));
        Ok(())
    })?;

    let mut partials = partials.into_inner().unwrap();
    partials.sort_by_key(|(w, _)| *w);
    let mut results = partials.into_iter().map(|(_, t)| t);
    let first = results.next().unwrap_or_else(&init);
    Ok(results.fold(first, &merge))
}

/// Distribute owned work units across workers, reverse-strided.
///
/// `f` receives the unit's original position and the unit itself. Used
/// where a work unit carries exclusive access to a slice of shared data
/// (e.g. one resolution block of frames).
pub fn distribute<U, F>(ctx: &ReductionContext, units: Vec<U>, f: F) -> Result<()>
where
    U: Send,
    F: Fn(usize, U) -> Result<()> + Sync,
{
    let n = units.len();
    if n == 0 {
        return Ok(());
    }
    let p = worker_count(ctx, n);

    let mut per_worker: Vec<Vec<(usize, U)>> = (0..p).map(|_| Vec::with_capacity(n / p + 1)).collect();
    for (i, unit) in units.into_iter().enumerate().rev() {
        per_worker[i % p].push((i, unit));
    }
    let queues: Vec<Mutex<Vec<(usize, U)>>> = per_worker.into_iter().map(Mutex::new).collect();

    run_workers(p, |w| {
        let mine = std::mem::take(&mut *queues[w].lock().unwrap());
        for (i, unit) in mine {
            if ctx.is_interrupted() {
                break;
            }
            f(i, unit)?;
        }
        Ok(())
    })
}

/// Partition a mutable slice into blocks of `block_size` and run `f` on
/// each block concurrently. Block disjointness makes the mutation safe
/// without any caller-side locking.
pub fn chunks_mut<T, F>(ctx: &ReductionContext, data: &mut [T], block_size: usize, f: F) -> Result<()>
where
    T: Send,
    F: Fn(usize, &mut [T]) -> Result<()> + Sync,
{
    if block_size == 0 {
        return Ok(());
    }
    let units: Vec<&mut [T]> = data.chunks_mut(block_size).collect();
    distribute(ctx, units, |i, chunk| f(i, chunk))
}
