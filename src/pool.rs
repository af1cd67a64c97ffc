//! # Pool
//!
//! A fixed set of worker threads used for exactly one kind of measurement: every
//! worker hammers its own 8-byte slot of a shared buffer with atomic increments.
//! When two slots fall inside one cache line, the line ping-pongs between cores
//! and the whole run slows down.
//!
//! Workers are spawned fresh for each run, pinned to distinct cores and raised to
//! maximum priority, then held at a [`StartGate`] until every one of them has
//! arrived. The clock starts when the gate opens and stops once all workers are
//! joined, so thread creation never lands in the timed window. Workers share no
//! state besides their own slot, so no locking is involved.
use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use core_affinity::CoreId;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::platform::opaque_use;

/// Slot buffers start on this boundary so slot 0 sits at the start of a line on
/// any line size up to a page.
const BUFFER_ALIGN: usize = 4096;

const SLOT_BYTES: usize = std::mem::size_of::<AtomicU64>();

/// Start barrier that the opening thread can also release early.
///
/// Unlike `std::sync::Barrier`, a gate whose expected party never arrives (a failed
/// spawn) can still be opened, so the workers already waiting are not stranded.
#[derive(Debug, Default)]
pub struct StartGate {
    arrived: AtomicUsize,
    open: AtomicBool,
}

impl StartGate {
    /// Called by each worker: announce arrival, then spin until the gate opens.
    pub fn arrive_and_wait(&self) {
        self.arrived.fetch_add(1, Ordering::AcqRel);
        while !self.open.load(Ordering::Acquire) {
            spin_loop();
        }
    }

    /// Spin until `parties` workers have arrived, then release them all at once.
    pub fn open_when(&self, parties: usize) {
        while self.arrived.load(Ordering::Acquire) < parties {
            spin_loop();
        }
        self.open();
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }
}

pub struct WorkerPool {
    workers: usize,
    cores: Vec<CoreId>,
}

impl WorkerPool {
    /// Pool of `workers` threads, pinned round-robin over the cores the OS reports.
    pub fn new(workers: usize) -> Self {
        let cores = core_affinity::get_core_ids().unwrap_or_default();
        if cores.is_empty() {
            warn!("Couldn't enumerate CPU cores, contention workers will not be pinned");
        }
        Self { workers, cores }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Time `writes` atomic increments per worker, with worker `i` owning the slot at
    /// byte offset `i * stride`.
    pub fn run_contended(&self, stride: usize, writes: usize) -> Result<Duration> {
        debug_assert!(stride >= SLOT_BYTES && stride % SLOT_BYTES == 0);

        let slots_per_stride = stride / SLOT_BYTES;
        let len = self.workers * slots_per_stride + BUFFER_ALIGN / SLOT_BYTES;
        let buffer: Vec<AtomicU64> = (0..len).map(|_| AtomicU64::new(0)).collect();
        let misalign = buffer.as_ptr() as usize % BUFFER_ALIGN;
        let first = ((BUFFER_ALIGN - misalign) % BUFFER_ALIGN) / SLOT_BYTES;

        let gate = StartGate::default();

        let (elapsed, checksum) = thread::scope(|scope| -> Result<(Duration, u64)> {
            let mut handles = Vec::with_capacity(self.workers);
            for worker in 0..self.workers {
                let slot = &buffer[first + worker * slots_per_stride];
                let gate = &gate;
                let core = (!self.cores.is_empty()).then(|| self.cores[worker % self.cores.len()]);
                let handle = thread::Builder::new()
                    .name(format!("sharer-{worker}"))
                    .spawn_scoped(scope, move || {
                        if let Some(core) = core {
                            if !core_affinity::set_for_current(core) {
                                warn!(
                                    "Couldn't pin worker {} to CPU core {} (NOTE: this is expected on macOS)",
                                    worker, core.id
                                );
                            }
                        }
                        if thread_priority::set_current_thread_priority(
                            thread_priority::ThreadPriority::Max,
                        )
                        .is_err()
                        {
                            debug!("Couldn't set worker {worker} to maximum thread priority");
                        }

                        gate.arrive_and_wait();
                        let mut last = 0;
                        for _ in 0..writes {
                            last = slot.fetch_add(1, Ordering::Relaxed);
                        }
                        last
                    })
                    .map_err(Error::Spawn);
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        // release the workers already parked; the scope joins them
                        gate.open();
                        return Err(e);
                    }
                }
            }

            gate.open_when(handles.len());
            let start = Instant::now();
            // a panicking worker contributes nothing; its slot simply stays cold
            let checksum = handles
                .into_iter()
                .map(|h| h.join().unwrap_or(0))
                .fold(0u64, |acc, v| acc ^ v);
            Ok((start.elapsed(), checksum))
        })?;

        opaque_use(checksum);
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_releases_once_all_parties_arrive() {
        let gate = StartGate::default();
        let released = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    gate.arrive_and_wait();
                    released.fetch_add(1, Ordering::Relaxed);
                });
            }
            gate.open_when(3);
        });
        assert_eq!(released.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn contended_run_completes_for_every_layout() {
        let pool = WorkerPool::new(2);
        for stride in [8, 64, 256] {
            let elapsed = pool.run_contended(stride, 1_000).unwrap();
            assert!(elapsed > Duration::ZERO);
        }
    }
}
