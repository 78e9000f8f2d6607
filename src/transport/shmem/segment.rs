//! Main-segment allocation (spec.md §4.7 "Allocation").
//!
//! Two pluggable strategies behind [`Allocator`]: [`RbTreeBestFit`] (a
//! size-keyed free-list best-fit search — the Rust-idiomatic stand-in for a
//! literal red-black tree) and [`SimpleSeqFit`] (first-fit linear scan).
//! [`Segment`] wraps either one behind a mutex and a memory-mapped backing
//! file, with the bounded-retry allocation policy from spec.md §6
//! (`bad-alloc-max-attempts`, `bad-alloc-attempt-interval`).

use crate::error::{FlowMqError, FlowMqResult};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A free-space allocator over a fixed-capacity linear address space.
pub trait Allocator: Send {
    fn alloc(&mut self, size: usize) -> Option<usize>;
    fn free(&mut self, offset: usize, size: usize);
}

/// Best-fit over a `size -> free offsets` index, with an `offset -> size`
/// index kept alongside for neighbor coalescing on free.
pub struct RbTreeBestFit {
    by_offset: BTreeMap<usize, usize>,
    by_size: BTreeMap<usize, Vec<usize>>,
}

impl RbTreeBestFit {
    pub fn new(capacity: usize) -> Self {
        let mut s = Self {
            by_offset: BTreeMap::new(),
            by_size: BTreeMap::new(),
        };
        s.insert_free(0, capacity);
        s
    }

    fn remove_free(&mut self, offset: usize, size: usize) {
        self.by_offset.remove(&offset);
        if let Some(v) = self.by_size.get_mut(&size) {
            v.retain(|&o| o != offset);
            if v.is_empty() {
                self.by_size.remove(&size);
            }
        }
    }

    fn insert_free(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        self.by_offset.insert(offset, size);
        self.by_size.entry(size).or_default().push(offset);
    }
}

impl Allocator for RbTreeBestFit {
    fn alloc(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return Some(0);
        }
        let (&best_size, offsets) = self.by_size.range(size..).next()?;
        let offset = *offsets.first()?;
        self.remove_free(offset, best_size);
        if best_size > size {
            self.insert_free(offset + size, best_size - size);
        }
        Some(offset)
    }

    fn free(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let mut merged_offset = offset;
        let mut merged_size = size;
        if let Some((&left_off, &left_size)) = self.by_offset.range(..offset).next_back() {
            if left_off + left_size == offset {
                self.remove_free(left_off, left_size);
                merged_offset = left_off;
                merged_size += left_size;
            }
        }
        if let Some((&right_off, &right_size)) = self.by_offset.range(merged_offset + merged_size..).next() {
            if right_off == merged_offset + merged_size {
                self.remove_free(right_off, right_size);
                merged_size += right_size;
            }
        }
        self.insert_free(merged_offset, merged_size);
    }
}

/// First-fit over an offset-sorted free-block list.
pub struct SimpleSeqFit {
    free_blocks: Vec<(usize, usize)>,
}

impl SimpleSeqFit {
    pub fn new(capacity: usize) -> Self {
        Self {
            free_blocks: vec![(0, capacity)],
        }
    }
}

impl Allocator for SimpleSeqFit {
    fn alloc(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return Some(0);
        }
        let idx = self.free_blocks.iter().position(|&(_, s)| s >= size)?;
        let (offset, block_size) = self.free_blocks[idx];
        if block_size == size {
            self.free_blocks.remove(idx);
        } else {
            self.free_blocks[idx] = (offset + size, block_size - size);
        }
        Some(offset)
    }

    fn free(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let pos = self.free_blocks.partition_point(|&(o, _)| o < offset);
        self.free_blocks.insert(pos, (offset, size));
        if pos + 1 < self.free_blocks.len() {
            let (o, s) = self.free_blocks[pos];
            let (next_o, next_s) = self.free_blocks[pos + 1];
            if o + s == next_o {
                self.free_blocks[pos] = (o, s + next_s);
                self.free_blocks.remove(pos + 1);
            }
        }
        if pos > 0 {
            let (prev_o, prev_s) = self.free_blocks[pos - 1];
            let (o, s) = self.free_blocks[pos];
            if prev_o + prev_s == o {
                self.free_blocks[pos - 1] = (prev_o, prev_s + s);
                self.free_blocks.remove(pos);
            }
        }
    }
}

/// Retry policy for an allocation attempt. At least one attempt is always
/// made; `max_attempts == -1` means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i64,
    pub attempt_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_interval: Duration::from_millis(50),
        }
    }
}

struct Inner {
    allocator: Box<dyn Allocator>,
    mmap: MmapMut,
}

/// A memory-mapped, allocator-backed segment (the main segment, or the
/// management segment, depending on how it is constructed).
pub struct Segment {
    path: PathBuf,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Segment {
    /// Creates (or truncates) the backing file at `path`, maps it, and
    /// seats `allocator` over the full `capacity`.
    pub fn create(path: impl AsRef<Path>, capacity: usize, allocator: Box<dyn Allocator>) -> FlowMqResult<Self> {
        let path = path.as_ref().to_path_buf();
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
        file.set_len(capacity as u64).map_err(|e| FlowMqError::Io {
            source: e,
            path: Some(path.clone()),
        })?;
        let mmap = unsafe {
            MmapOptions::new()
                .len(capacity)
                .map_mut(&file)
                .map_err(|e| FlowMqError::Io {
                    source: e,
                    path: Some(path.clone()),
                })?
        };
        Ok(Self {
            path,
            capacity,
            inner: Mutex::new(Inner { allocator, mmap }),
        })
    }

    /// Opens an existing segment file at `path` without creating or
    /// truncating it, and seats `allocator` over `capacity`. Grounded on
    /// `manager/memory_map.rs`'s `MappedFile::open`, which opens without
    /// `create`/`truncate` so a missing path surfaces as a not-found error
    /// rather than silently creating an empty file; here that same
    /// `OpenOptions` omission naturally yields a `FlowMqError::Io` wrapping
    /// `io::ErrorKind::NotFound` when the segment was already removed (spec.md
    /// §8 scenario 6's "subsequent attempt to open the segments fails with
    /// 'not found'").
    pub fn open(path: impl AsRef<Path>, capacity: usize, allocator: Box<dyn Allocator>) -> FlowMqResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FlowMqError::Io {
                source: e,
                path: Some(path.clone()),
            })?;
        let mmap = unsafe {
            MmapOptions::new()
                .len(capacity)
                .map_mut(&file)
                .map_err(|e| FlowMqError::Io {
                    source: e,
                    path: Some(path.clone()),
                })?
        };
        Ok(Self {
            path,
            capacity,
            inner: Mutex::new(Inner { allocator, mmap }),
        })
    }

    /// Removes the backing file from disk. The segment must not be used
    /// afterward. Grounded on `manager/memory_map.rs`'s
    /// `FileManager::delete_file`, which calls `std::fs::remove_file` on a
    /// tracked segment path.
    pub fn remove_file(&self) -> FlowMqResult<()> {
        std::fs::remove_file(&self.path).map_err(|e| FlowMqError::Io {
            source: e,
            path: Some(self.path.clone()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ptr(&self) -> *mut u8 {
        self.inner.lock().mmap.as_mut_ptr()
    }

    /// Allocates `size` bytes, retrying per `policy` on exhaustion. Always
    /// makes at least one attempt regardless of `policy.max_attempts`.
    pub fn alloc(&self, size: usize, policy: RetryPolicy) -> FlowMqResult<usize> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if let Some(offset) = self.inner.lock().allocator.alloc(size) {
                return Ok(offset);
            }
            let exhausted = policy.max_attempts >= 0 && attempts as i64 >= policy.max_attempts;
            if exhausted {
                return Err(FlowMqError::MessageBadAlloc {
                    requested: size,
                    attempts,
                });
            }
            std::thread::sleep(policy.attempt_interval);
        }
    }

    pub fn free(&self, offset: usize, size: usize) {
        self.inner.lock().allocator.free(offset, size);
    }
}
