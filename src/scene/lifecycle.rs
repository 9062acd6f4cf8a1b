use std::sync::Arc;
use std::time::Instant;

use log::trace;

use crate::render::{RenderHandle, RenderSink};

#[derive(Debug)]
struct DissolveEntry {
    handle: RenderHandle,
    release_at: Instant,
}

/// Drives the `Live -> Dissolving -> Removed` tail of the entity state
/// machine. By the time a visual lands here its entity is already gone from
/// registry, orphan table and snapshots, so no update can resurrect it.
pub struct LifecycleManager {
    render: Arc<dyn RenderSink>,
    dissolving: Vec<DissolveEntry>,
}

impl LifecycleManager {
    pub fn new(render: Arc<dyn RenderSink>) -> Self {
        Self {
            render,
            dissolving: Vec::new(),
        }
    }

    /// Starts the bounded visual dissolve; the rendering collaborator decides
    /// the duration.
    pub fn begin_dissolve(&mut self, handle: RenderHandle, now: Instant) {
        let duration = self.render.begin_dissolve(handle);
        trace!("{} dissolving for {:?}", handle, duration);
        self.dissolving.push(DissolveEntry {
            handle,
            release_at: now + duration,
        });
    }

    /// Releases every visual whose dissolve elapsed. Called once per frame.
    pub fn tick(&mut self, now: Instant) {
        let render = self.render.clone();
        self.dissolving.retain(|entry| {
            if entry.release_at <= now {
                render.release_visual(entry.handle);
                false
            } else {
                true
            }
        });
    }

    /// Immediate release, bypassing the dissolve. Used for region leave and
    /// session teardown.
    pub fn release_now(&self, handle: RenderHandle) {
        self.render.release_visual(handle);
    }

    pub fn dissolving_len(&self) -> usize {
        self.dissolving.len()
    }

    /// Teardown: release everything still mid-dissolve.
    pub fn release_all(&mut self) {
        for entry in self.dissolving.drain(..) {
            self.render.release_visual(entry.handle);
        }
    }
}
