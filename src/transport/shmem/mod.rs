//! Shared-memory transport (component G, spec.md §4.7).

pub mod message;
pub mod monitor;
pub mod refcount;
pub mod region;
pub mod segment;

pub use message::WireHeader;
pub use monitor::{ControlQueue, Heartbeat, Monitor};
pub use region::{ReleaseMode, ShmemRegion};
pub use segment::{Allocator, RbTreeBestFit, RetryPolicy, Segment, SimpleSeqFit};

use crate::error::{FlowMqError, FlowMqResult};
use crate::session::SessionResources;
use crate::transport::region::{Region, RegionEvent, RegionFlags};
use crate::transport::socket::{Socket, SocketKind};
use crate::transport::{Deallocator, Message, Transport, TransportTag};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default main-segment capacity: generous enough for this runtime's test
/// scenarios without making every `ShmemTransport::new` slow to map.
const DEFAULT_MAIN_SEGMENT_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_MANAGEMENT_SEGMENT_SIZE: usize = 1024 * 1024;
const DEFAULT_REFCOUNT_SLOTS: usize = 65536;

struct HandleAllocator {
    next: AtomicU64,
    free: Mutex<Vec<u64>>,
}

impl HandleAllocator {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> u64 {
        if let Some(h) = self.free.lock().pop() {
            h
        } else {
            self.next.fetch_add(1, Ordering::SeqCst)
        }
    }

    fn release(&self, handle: u64) {
        self.free.lock().push(handle);
    }
}

/// Main + management segment, refcount table, and region registry for one
/// session (spec.md §4.7 "Session"). Sockets are delegated to the default
/// transport's in-process pipe/topic registry (wire headers are tiny; the
/// payload lives in `main_segment`), since this version's scope is
/// single-process — see `DESIGN.md` for the rationale.
pub struct ShmemTransport {
    session_id: u64,
    main_segment: Arc<Segment>,
    #[allow(dead_code)]
    management_segment: Arc<Segment>,
    refcount: Arc<refcount::RefcountTable>,
    handles: Arc<HandleAllocator>,
    retry_policy: RetryPolicy,
    ptr_to_handle: Arc<Mutex<HashMap<usize, (u64, usize)>>>,
    regions: Mutex<HashMap<u64, Arc<ShmemRegion>>>,
    next_region_id: AtomicU64,
    region_subscribers: Mutex<Vec<Arc<dyn Fn(RegionEvent) + Send + Sync>>>,
    control_queue: ControlQueue,
}

impl ShmemTransport {
    pub fn new(session_id: u64) -> FlowMqResult<Self> {
        let resources = SessionResources::for_session(session_id);
        let dir = std::env::temp_dir();
        let main_segment = Arc::new(Segment::create(
            dir.join(&resources.main_segment),
            DEFAULT_MAIN_SEGMENT_SIZE,
            Box::new(RbTreeBestFit::new(DEFAULT_MAIN_SEGMENT_SIZE)),
        )?);
        let management_segment = Arc::new(Segment::create(
            dir.join(&resources.management_segment),
            DEFAULT_MANAGEMENT_SEGMENT_SIZE,
            Box::new(SimpleSeqFit::new(DEFAULT_MANAGEMENT_SEGMENT_SIZE)),
        )?);
        let refcount = Arc::new(refcount::RefcountTable::create(
            dir.join(format!("{}_refcount", resources.main_segment)),
            DEFAULT_REFCOUNT_SLOTS,
        )?);
        Ok(Self {
            session_id,
            main_segment,
            management_segment,
            refcount,
            handles: Arc::new(HandleAllocator::new()),
            retry_policy: RetryPolicy::default(),
            ptr_to_handle: Arc::new(Mutex::new(HashMap::new())),
            regions: Mutex::new(HashMap::new()),
            next_region_id: AtomicU64::new(1),
            region_subscribers: Mutex::new(Vec::new()),
            control_queue: ControlQueue::new(),
        })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn control_queue(&self) -> ControlQueue {
        self.control_queue.clone()
    }

    /// The backing file paths of this session's segments, for registering
    /// with a [`Monitor`] via `register_segment_paths` so heartbeat-timeout
    /// cleanup actually removes them.
    pub fn segment_paths(&self) -> Vec<std::path::PathBuf> {
        vec![self.main_segment.path().to_path_buf(), self.management_segment.path().to_path_buf()]
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Shares `msg`'s payload without copying bytes: increments the
    /// handle's refcount and hands back a new `Message` viewing the same
    /// shmem-resident buffer. Both messages independently free on drop;
    /// the underlying block is only released when the count reaches zero.
    pub fn shmem_copy(&self, msg: &Message) -> FlowMqResult<Message> {
        if msg.transport_tag() != TransportTag::Shmem {
            return Err(FlowMqError::Transport {
                reason: "shmem_copy requires a shmem-resident message".into(),
            });
        }
        let key = msg.data().as_ptr() as usize;
        let (handle, offset) = *self
            .ptr_to_handle
            .lock()
            .get(&key)
            .ok_or_else(|| FlowMqError::Transport {
                reason: "message is not resident in this transport's main segment".into(),
            })?;
        let size = msg.size();
        self.refcount.incr(handle)?;
        let ptr = unsafe { self.main_segment.ptr().add(offset) };
        unsafe { Message::from_external(ptr, size, self.release_closure(handle, offset), TransportTag::Shmem) }
    }

    fn release_closure(&self, handle: u64, offset: usize) -> Deallocator {
        let segment = self.main_segment.clone();
        let refcount = self.refcount.clone();
        let handles = self.handles.clone();
        let table = self.ptr_to_handle.clone();
        Box::new(move |ptr, len| {
            if let Ok(0) = refcount.decr(handle) {
                segment.free(offset, len);
                handles.release(handle);
                table.lock().remove(&(ptr as usize));
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_region(
        &self,
        size: usize,
        user_flags: u64,
        creation_flags: RegionFlags,
        linger_ms: u64,
        mode: ReleaseMode,
        callback: Arc<dyn Fn(Vec<crate::transport::region::ReleasedBlock>) + Send + Sync>,
    ) -> FlowMqResult<Arc<dyn Region>> {
        let id = self.next_region_id.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("fmq_{}_region_{id}", self.session_id));
        let region = Arc::new(ShmemRegion::create(
            id, path, size, user_flags, creation_flags, linger_ms, mode, callback,
        )?);
        self.regions.lock().insert(id, region.clone());
        self.notify_region_event(RegionEvent::Created { id, size });
        Ok(region as Arc<dyn Region>)
    }

    pub fn on_region_event(&self, callback: impl Fn(RegionEvent) + Send + Sync + 'static) {
        self.region_subscribers.lock().push(Arc::new(callback));
    }

    fn notify_region_event(&self, event: RegionEvent) {
        let subscribers = self.region_subscribers.lock().clone();
        for sub in subscribers {
            sub(event.clone());
        }
    }
}

impl Transport for ShmemTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::Shmem
    }

    fn new_message_empty(&self) -> FlowMqResult<Message> {
        Ok(Message::empty(TransportTag::Shmem))
    }

    fn new_message_with_size(&self, size: usize) -> FlowMqResult<Message> {
        let offset = self.main_segment.alloc(size, self.retry_policy)?;
        let handle = self.handles.acquire();
        self.refcount.init(handle)?;
        let ptr = unsafe { self.main_segment.ptr().add(offset) };
        unsafe { std::ptr::write_bytes(ptr, 0, size) };
        self.ptr_to_handle.lock().insert(ptr as usize, (handle, offset));
        unsafe { Message::from_external(ptr, size, self.release_closure(handle, offset), TransportTag::Shmem) }
    }

    fn new_message_with_size_aligned(&self, size: usize, alignment: usize) -> FlowMqResult<Message> {
        if alignment <= 1 {
            return self.new_message_with_size(size);
        }
        // The main-segment allocator hands out byte offsets with no
        // alignment guarantee beyond 1; custom alignment for shmem-resident
        // messages is not supported in this version.
        Err(FlowMqError::InvalidArgument(format!(
            "shmem transport does not support alignment > 1 (requested {alignment})"
        )))
    }

    fn new_socket(&self, kind: SocketKind) -> FlowMqResult<Arc<dyn Socket>> {
        crate::transport::default_transport::DefaultTransport::new().new_socket(kind)
    }
}
