//! Unmanaged Region (spec.md §3 "Unmanaged Region").

use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// Creation flags for an unmanaged region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        const LOCK_PAGES = 0b0001;
        const ZERO_ON_CREATION = 0b0010;
        const REMOVE_ON_DESTRUCTION = 0b0100;
    }
}

/// One of the three observable lifecycle events a region traverses.
#[derive(Debug, Clone)]
pub enum RegionEvent {
    Created { id: u64, size: usize },
    Destroyed { id: u64 },
    /// Visible only in the producing process (no cross-process monitor
    /// observed it being announced, e.g. the `Default` transport).
    LocalOnly { id: u64 },
}

/// A block released from a region when the last view over it drops,
/// delivered to the region's release callback (spec.md §3, §4.7
/// "Unmanaged regions").
#[derive(Debug, Clone, Copy)]
pub struct ReleasedBlock {
    pub offset: usize,
    pub size: usize,
    pub hint: u64,
}

/// A user-allocated contiguous area registered with a transport for
/// zero-copy sending.
pub trait Region: Send + Sync {
    fn id(&self) -> u64;
    fn ptr(&self) -> *const u8;
    fn size(&self) -> usize;
    fn user_flags(&self) -> u64;
    fn creation_flags(&self) -> RegionFlags;
    fn backing_file(&self) -> Option<&PathBuf>;
    fn linger_ms(&self) -> u64;
}
