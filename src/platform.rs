//! Services the inference code consumes from the OS: the measurement region,
//! core pinning, thread priority, and an optimizer-opaque use.
use std::hint::black_box;

use core_affinity::CoreId;
use log::{debug, info, warn};
use memmap2::{MmapMut, MmapOptions};

use crate::error::{Error, Result};
use crate::format_size;

/// Page-aligned, zero-filled anonymous mapping, unmapped on drop.
pub struct MemoryRegion {
    map: MmapMut,
}

impl MemoryRegion {
    /// Map `bytes` of anonymous memory, pre-faulting every page so no timed
    /// traversal pays for a first-touch page fault.
    pub fn allocate(bytes: usize) -> Result<Self> {
        let map = MmapOptions::new()
            .len(bytes)
            .populate()
            .map_anon()
            .map_err(|source| Error::Allocation { bytes, source })?;

        // chains are visited in random order; readahead would only pollute the caches
        #[cfg(unix)]
        if let Err(e) = map.advise(memmap2::Advice::Random) {
            debug!("madvise(MADV_RANDOM) on measurement region failed: {e}");
        }

        info!(
            "Allocated {} measurement region at {:p}",
            format_size(bytes as f32),
            map.as_ptr()
        );
        Ok(Self { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }
}

/// Pin the calling thread to `core`, or to the first core the OS reports.
///
/// Returns whether pinning succeeded; a failure only makes the measurements noisier.
pub fn pin_current_thread(core: Option<usize>) -> bool {
    let core_id = match core {
        Some(id) => CoreId { id },
        None => match core_affinity::get_core_ids().and_then(|ids| ids.into_iter().next()) {
            Some(id) => id,
            None => {
                warn!("Couldn't enumerate CPU cores, measuring thread stays unpinned");
                return false;
            }
        },
    };

    if core_affinity::set_for_current(core_id) {
        debug!("Pinned measuring thread to CPU core {}", core_id.id);
        true
    } else {
        warn!(
            "Couldn't pin thread to CPU core {} (NOTE: this is expected on macOS)",
            core_id.id
        );
        false
    }
}

/// Raise the calling thread to maximum priority. Returns whether it worked.
pub fn elevate_current_thread() -> bool {
    match thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max) {
        Ok(()) => true,
        Err(e) => {
            warn!("Couldn't set thread to maximum priority: {e:?}");
            false
        }
    }
}

/// Number of logical CPUs available to this process, or 1 if unknown.
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Consume `value` in a way the optimizer has to assume is observable.
#[inline]
pub fn opaque_use<T>(value: T) -> T {
    black_box(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_is_page_aligned_and_zeroed() {
        let region = MemoryRegion::allocate(1 << 20).unwrap();
        assert_eq!(region.len(), 1 << 20);
        assert_eq!(region.as_ptr() as usize % 4096, 0);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
