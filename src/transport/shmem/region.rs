//! Unmanaged regions over shared memory (spec.md §4.7 "Unmanaged regions").

use crate::error::{FlowMqError, FlowMqResult};
use crate::transport::region::{Region, RegionFlags, ReleasedBlock};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How the release callback is delivered as views over a region drop.
#[derive(Clone, Copy)]
pub enum ReleaseMode {
    /// One callback invocation per freed block.
    PerBlock,
    /// Callbacks are buffered and delivered together; `flush()` (called by
    /// the owning transport's monitor thread on a fixed cadence) is this
    /// version's stand-in for the coalescing window.
    Bulk { window: Duration },
}

type ReleaseCallback = Arc<dyn Fn(Vec<ReleasedBlock>) + Send + Sync>;

pub struct ShmemRegion {
    id: u64,
    mmap: MmapMut,
    size: usize,
    user_flags: u64,
    creation_flags: RegionFlags,
    backing_file: Option<PathBuf>,
    linger_ms: u64,
    mode: ReleaseMode,
    callback: ReleaseCallback,
    pending: Mutex<Vec<ReleasedBlock>>,
}

// `mmap`'s payload bytes are only ever touched through explicit user views;
// the region object itself is shared for lifecycle bookkeeping.
unsafe impl Sync for ShmemRegion {}

impl ShmemRegion {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: u64,
        path: impl AsRef<Path>,
        size: usize,
        user_flags: u64,
        creation_flags: RegionFlags,
        linger_ms: u64,
        mode: ReleaseMode,
        callback: ReleaseCallback,
    ) -> FlowMqResult<Self> {
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
        file.set_len(size.max(1) as u64).map_err(|e| FlowMqError::Io {
            source: e,
            path: Some(path.clone()),
        })?;
        let mut mmap = unsafe {
            MmapOptions::new()
                .len(size.max(1))
                .map_mut(&file)
                .map_err(|e| FlowMqError::Io {
                    source: e,
                    path: Some(path.clone()),
                })?
        };
        if creation_flags.contains(RegionFlags::ZERO_ON_CREATION) {
            mmap.fill(0);
        }
        Ok(Self {
            id,
            mmap,
            size,
            user_flags,
            creation_flags,
            backing_file: Some(path),
            linger_ms,
            mode,
            callback,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Notifies the release callback that `block` was freed (the last view
    /// over it dropped).
    pub fn release_block(&self, block: ReleasedBlock) {
        match self.mode {
            ReleaseMode::PerBlock => (self.callback)(vec![block]),
            ReleaseMode::Bulk { .. } => self.pending.lock().push(block),
        }
    }

    /// Delivers any blocks buffered under `Bulk` mode.
    pub fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if !pending.is_empty() {
            (self.callback)(pending);
        }
    }

    pub fn mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }
}

impl Region for ShmemRegion {
    fn id(&self) -> u64 {
        self.id
    }

    fn ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn user_flags(&self) -> u64 {
        self.user_flags
    }

    fn creation_flags(&self) -> RegionFlags {
        self.creation_flags
    }

    fn backing_file(&self) -> Option<&PathBuf> {
        self.backing_file.as_ref()
    }

    fn linger_ms(&self) -> u64 {
        self.linger_ms
    }
}

impl Drop for ShmemRegion {
    fn drop(&mut self) {
        self.flush();
        // Destruction lingers for `linger_ms` before the backing memory is
        // unmapped/removed, to let outstanding peer acknowledgements land.
        if self.linger_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.linger_ms));
        }
        if self.creation_flags.contains(RegionFlags::REMOVE_ON_DESTRUCTION) {
            if let Some(path) = &self.backing_file {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn per_block_mode_calls_back_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let region = ShmemRegion::create(
            1,
            dir.path().join("region"),
            64,
            0,
            RegionFlags::empty(),
            0,
            ReleaseMode::PerBlock,
            Arc::new(move |_blocks| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        region.release_block(ReleasedBlock { offset: 0, size: 8, hint: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bulk_mode_waits_for_flush() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let region = ShmemRegion::create(
            2,
            dir.path().join("region2"),
            64,
            0,
            RegionFlags::empty(),
            0,
            ReleaseMode::Bulk { window: Duration::from_millis(10) },
            Arc::new(move |_blocks| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        region.release_block(ReleasedBlock { offset: 0, size: 8, hint: 0 });
        region.release_block(ReleasedBlock { offset: 8, size: 8, hint: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        region.flush();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_on_destruction_deletes_the_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region3");
        let region = ShmemRegion::create(
            3,
            &path,
            64,
            0,
            RegionFlags::REMOVE_ON_DESTRUCTION,
            0,
            ReleaseMode::PerBlock,
            Arc::new(|_| {}),
        )
        .unwrap();
        assert!(path.exists());
        drop(region);
        assert!(!path.exists());
    }
}
