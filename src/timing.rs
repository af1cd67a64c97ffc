//! The pointer-chase latency primitive.
//!
//! Every step loads the address of the next step, so each access waits for the
//! previous one to complete: neither the prefetcher nor out-of-order execution
//! can overlap them, and elapsed time divided by steps is the load-to-use latency.
use std::time::Instant;

use crate::platform::opaque_use;

/// Steps per loop iteration in the timed traversal.
const UNROLL: usize = 8;

/// Chase `warmup` untimed steps, then time `iterations` steps (rounded down to a
/// multiple of 8, minimum 8) and return nanoseconds per step.
///
/// # Safety
///
/// `start` must point at a slot of a closed chain: every slot reachable from it
/// holds the address of another slot of the same chain, and the whole chain stays
/// valid and unmodified for the duration of the call.
#[inline(never)]
pub unsafe fn chase(start: *const usize, warmup: usize, iterations: usize) -> f64 {
    let mut p = start;

    for _ in 0..warmup {
        p = unsafe { *p } as *const usize;
    }

    let loops = (iterations / UNROLL).max(1);
    let start_time = Instant::now();

    for _ in 0..loops {
        // Unroll 8x to reduce loop overhead relative to memory latency
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
        p = unsafe { *p } as *const usize;
    }

    let elapsed = start_time.elapsed();

    // Prevent dead code elimination
    opaque_use(p);

    elapsed.as_nanos() as f64 / (loops * UNROLL) as f64
}
