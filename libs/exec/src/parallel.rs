// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Latch-driven fan-out of `[0, count)` ranges onto the worker pool.
//!
//! Pool tasks must be `'static`, but the whole point of these primitives
//! is to run *borrowed* closures over *borrowed* slices. The borrows are
//! smuggled across the submit boundary as erased pointers paired with a
//! monomorphised runner function; the countdown latch makes that sound:
//! the caller blocks until every scheduled tile has finished touching the
//! borrowed state, and abandoned tiles never start.

use std::sync::Arc;

use crate::latch::Latch;
use crate::pool::ThreadPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum ParallelError {
    /// Input and output lengths differ.
    ShapeMismatch,
    /// One or more tiles failed or could not be scheduled.
    Incomplete,
}

/// Erased pointer that may cross the submit boundary.
#[derive(Clone, Copy)]
struct SendPtr(*const ());

// Safety: the pointee is only dereferenced by the matching runner while
// the submitting call frame is parked on the latch, which serialises all
// access per tile; tiles address disjoint ranges.
unsafe impl Send for SendPtr {}

type TileRunner = unsafe fn(*const (), usize, usize);

/// Arms the latch arrival so it also fires when a tile body panics and
/// unwinds through the worker's catch.
struct Arrival {
    latch: Arc<Latch>,
    clean: bool,
}

impl Drop for Arrival {
    fn drop(&mut self) {
        self.latch.arrive(!self.clean);
    }
}

fn choose_chunk_size(pool: &ThreadPool, count: usize, preferred: usize) -> usize {
    if preferred > 0 {
        return preferred;
    }

    let target_tasks = pool.worker_count().max(1) * 4;
    count.div_ceil(target_tasks).max(1)
}

/// Submits `tiles` range tasks over `ctx` and waits for all of them.
fn run_tiles(
    pool: &ThreadPool,
    ctx: *const (),
    runner: TileRunner,
    count: usize,
    chunk: usize,
    tiles: usize,
) -> Result<(), ParallelError> {
    let latch = Arc::new(Latch::new(tiles));
    let ctx = SendPtr(ctx);

    for tile in 0..tiles {
        let start = tile * chunk;
        let end = (start + chunk).min(count);
        let mut arrival = Arrival {
            latch: Arc::clone(&latch),
            clean: false,
        };

        let submitted = pool.submit(move || {
            // Force capture of the whole `SendPtr` (not just its `.0`
            // field) so the closure relies on `SendPtr`'s `unsafe impl
            // Send` rather than trying to send the raw pointer directly.
            let ctx = ctx;
            // Safety: the submitting frame owns the context and blocks on
            // the latch below until this tile (and every other) arrives,
            // so the pointee outlives the call; `[start, end)` ranges are
            // disjoint between tiles.
            unsafe { runner(ctx.0, start, end) };
            arrival.clean = true;
        });

        if let Err(error) = submitted {
            tracing::debug!(%error, tile, tiles, "parallel fan-out incomplete");
            // This tile's arrival fires on the drop path; the rest were
            // never created.
            latch.abandon(tiles - tile - 1);
            break;
        }
    }

    if latch.wait() {
        Ok(())
    } else {
        Err(ParallelError::Incomplete)
    }
}

/// Calls `body(index)` for every index in `[0, count)` across the pool.
///
/// A `chunk_size` of zero picks `⌈count / (4 · workers)⌉`.
///
/// # Errors
///
/// [`ParallelError::Incomplete`] when tiles could not be scheduled (pool
/// shutting down) or a tile body panicked.
pub fn parallel_for<F>(
    pool: &ThreadPool,
    count: usize,
    chunk_size: usize,
    body: F,
) -> Result<(), ParallelError>
where
    F: Fn(usize) + Send + Sync,
{
    unsafe fn run_tile<F: Fn(usize)>(ctx: *const (), start: usize, end: usize) {
        // Safety: `ctx` is the `&F` erased in `parallel_for`, alive until
        // the latch opens.
        let body = unsafe { &*ctx.cast::<F>() };
        for index in start..end {
            body(index);
        }
    }

    if count == 0 {
        return Ok(());
    }

    let chunk = choose_chunk_size(pool, count, chunk_size);
    let tiles = count.div_ceil(chunk);
    run_tiles(
        pool,
        core::ptr::from_ref(&body).cast(),
        run_tile::<F>,
        count,
        chunk,
        tiles,
    )
}

struct MapCtx<T, U, F> {
    input: *const T,
    output: *mut U,
    transform: *const F,
}

/// Computes `output[i] = transform(i, &input[i])` across the pool.
///
/// # Errors
///
/// [`ParallelError::ShapeMismatch`] when the slices differ in length,
/// otherwise as [`parallel_for`].
pub fn parallel_map<T, U, F>(
    pool: &ThreadPool,
    input: &[T],
    output: &mut [U],
    chunk_size: usize,
    transform: F,
) -> Result<(), ParallelError>
where
    T: Sync,
    U: Send,
    F: Fn(usize, &T) -> U + Send + Sync,
{
    unsafe fn run_tile<T, U, F: Fn(usize, &T) -> U>(ctx: *const (), start: usize, end: usize) {
        // Safety: `ctx` is the `MapCtx` on the submitting frame, alive
        // until the latch opens; element indices in `[start, end)` belong
        // to this tile alone.
        let ctx = unsafe { &*ctx.cast::<MapCtx<T, U, F>>() };
        for index in start..end {
            // Safety: `index < input.len() == output.len()`, checked
            // before submission; writing through a unique `&mut` drops the
            // previous element properly.
            unsafe {
                let transform = &*ctx.transform;
                let value = transform(index, &*ctx.input.add(index));
                *ctx.output.add(index) = value;
            }
        }
    }

    if input.len() != output.len() {
        return Err(ParallelError::ShapeMismatch);
    }
    let count = input.len();
    if count == 0 {
        return Ok(());
    }

    let ctx = MapCtx {
        input: input.as_ptr(),
        output: output.as_mut_ptr(),
        transform: &raw const transform,
    };

    let chunk = choose_chunk_size(pool, count, chunk_size);
    let tiles = count.div_ceil(chunk);
    run_tiles(
        pool,
        core::ptr::from_ref(&ctx).cast(),
        run_tile::<T, U, F>,
        count,
        chunk,
        tiles,
    )
}

struct ReduceCtx<F> {
    partials: *mut i64,
    chunk: usize,
    body: *const F,
}

/// Sums `body(index)` over `[0, count)` across the pool. Per-tile partial
/// sums are combined on the caller after the latch opens.
///
/// # Errors
///
/// As [`parallel_for`]; on error no result is produced.
pub fn parallel_reduce_i64<F>(
    pool: &ThreadPool,
    count: usize,
    chunk_size: usize,
    body: F,
) -> Result<i64, ParallelError>
where
    F: Fn(usize) -> i64 + Send + Sync,
{
    unsafe fn run_tile<F: Fn(usize) -> i64>(ctx: *const (), start: usize, end: usize) {
        // Safety: `ctx` is the `ReduceCtx` on the submitting frame, alive
        // until the latch opens; each tile owns exactly one partial slot.
        let (ctx, body) = unsafe {
            let ctx = &*ctx.cast::<ReduceCtx<F>>();
            (ctx, &*ctx.body)
        };

        let mut partial = 0i64;
        for index in start..end {
            partial = partial.wrapping_add(body(index));
        }

        let tile = start / ctx.chunk;
        // Safety: `tile` indexes the partials vector allocated with one
        // slot per tile.
        unsafe { *ctx.partials.add(tile) = partial };
    }

    if count == 0 {
        return Ok(0);
    }

    let chunk = choose_chunk_size(pool, count, chunk_size);
    let tiles = count.div_ceil(chunk);
    let mut partials = vec![0i64; tiles];

    let ctx = ReduceCtx {
        partials: partials.as_mut_ptr(),
        chunk,
        body: &raw const body,
    };

    run_tiles(
        pool,
        core::ptr::from_ref(&ctx).cast(),
        run_tile::<F>,
        count,
        chunk,
        tiles,
    )?;

    Ok(partials.iter().fold(0i64, |acc, p| acc.wrapping_add(*p)))
}
