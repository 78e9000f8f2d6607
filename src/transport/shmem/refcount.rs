//! Reference-count segment (spec.md §4.7 "Reference counting").
//!
//! Every shmem message carries a handle into this segment, a dedicated
//! region of 32-bit atomic counters. `copy` increments, destruction
//! decrements; living in shared memory means a descriptor deserialized in a
//! peer process participates in the same count.

use crate::error::{FlowMqError, FlowMqResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

pub struct RefcountTable {
    _path: PathBuf,
    mmap: MmapMut,
    capacity_slots: usize,
}

// The table hands out `&AtomicU32` views into `mmap`'s bytes; all mutation
// goes through atomic operations, so concurrent access from multiple
// threads (or, via the mapped file, processes) is sound.
unsafe impl Sync for RefcountTable {}

impl RefcountTable {
    pub fn create(path: impl AsRef<Path>, capacity_slots: usize) -> FlowMqResult<Self> {
        let path = path.as_ref().to_path_buf();
        let byte_len = capacity_slots * std::mem::size_of::<AtomicU32>();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| FlowMqError::Io {
                source: e,
                path: Some(path.clone()),
            })?;
        file.set_len(byte_len.max(1) as u64).map_err(|e| FlowMqError::Io {
            source: e,
            path: Some(path.clone()),
        })?;
        let mmap = unsafe {
            MmapOptions::new()
                .len(byte_len.max(1))
                .map_mut(&file)
                .map_err(|e| FlowMqError::Io {
                    source: e,
                    path: Some(path.clone()),
                })?
        };
        Ok(Self {
            _path: path,
            mmap,
            capacity_slots,
        })
    }

    fn slot(&self, handle: u64) -> FlowMqResult<&AtomicU32> {
        let index = handle as usize;
        if index >= self.capacity_slots {
            return Err(FlowMqError::Transport {
                reason: format!("refcount handle {handle} out of range"),
            });
        }
        let ptr = self.mmap.as_ptr() as *const AtomicU32;
        Ok(unsafe { &*ptr.add(index) })
    }

    /// Initializes `handle`'s counter to 1 (the allocating descriptor's own
    /// reference) and returns it.
    pub fn init(&self, handle: u64) -> FlowMqResult<u32> {
        self.slot(handle)?.store(1, Ordering::Release);
        Ok(1)
    }

    pub fn incr(&self, handle: u64) -> FlowMqResult<u32> {
        Ok(self.slot(handle)?.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Decrements and returns the resulting count; `0` means the caller
    /// just released the last reference.
    pub fn decr(&self, handle: u64) -> FlowMqResult<u32> {
        Ok(self.slot(handle)?.fetch_sub(1, Ordering::AcqRel) - 1)
    }

    pub fn get(&self, handle: u64) -> FlowMqResult<u32> {
        Ok(self.slot(handle)?.load(Ordering::Acquire))
    }
}
