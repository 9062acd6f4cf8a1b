use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use log::trace;

use crate::assets::DecodedAsset;
use crate::scene::entity::Entity;

/// Opaque reference into the rendering collaborator's world. Owned by the
/// collaborator; the scheduler only hands it back for updates and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderHandle(pub u64);

impl fmt::Display for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "visual-{}", self.0)
    }
}

/// The boundary contract towards the rendering/engine layer. Mesh, material
/// and LOD construction happen entirely behind this trait.
pub trait RenderSink: Send + Sync {
    fn create_visual(&self, entity: &Entity) -> RenderHandle;
    fn update_visual(&self, handle: RenderHandle, entity: &Entity);
    fn attach_asset(&self, handle: RenderHandle, payload: &DecodedAsset);
    /// Starts the timed visual removal and returns its duration.
    fn begin_dissolve(&self, handle: RenderHandle) -> Duration;
    fn release_visual(&self, handle: RenderHandle);
}

/// Counting sink for the synthetic driver and for tests. Visuals are handle
/// numbers, operations are counters plus trace logs.
pub struct LogRenderSink {
    next_handle: AtomicU64,
    dissolve_duration: Duration,
    pub created: AtomicUsize,
    pub updated: AtomicUsize,
    pub attached: AtomicUsize,
    pub dissolving: AtomicUsize,
    pub released: AtomicUsize,
}

impl LogRenderSink {
    pub fn new(dissolve_duration: Duration) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            dissolve_duration,
            created: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
            attached: AtomicUsize::new(0),
            dissolving: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn live_visuals(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

impl Default for LogRenderSink {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl RenderSink for LogRenderSink {
    fn create_visual(&self, entity: &Entity) -> RenderHandle {
        let handle = RenderHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.created.fetch_add(1, Ordering::SeqCst);
        trace!("Creating {} for entity {}", handle, entity.local);
        handle
    }

    fn update_visual(&self, handle: RenderHandle, entity: &Entity) {
        self.updated.fetch_add(1, Ordering::SeqCst);
        trace!("Updating {} for entity {}", handle, entity.local);
    }

    fn attach_asset(&self, handle: RenderHandle, payload: &DecodedAsset) {
        self.attached.fetch_add(1, Ordering::SeqCst);
        trace!("Attaching {:?} payload to {}", payload.kind, handle);
    }

    fn begin_dissolve(&self, handle: RenderHandle) -> Duration {
        self.dissolving.fetch_add(1, Ordering::SeqCst);
        trace!("Dissolving {}", handle);
        self.dissolve_duration
    }

    fn release_visual(&self, handle: RenderHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
        trace!("Releasing {}", handle);
    }
}
