use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::mpsc::Sender;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use glam::Vec3;
use itertools::Itertools;
use log::{debug, info, trace};

use crate::proximity::frustum::{CameraPose, Frustum};
use crate::scene::entity::{EntitySnapshot, LocalHandle};

pub mod frustum;

/// Parent chains longer than this are assumed cyclic (corrupt data) and
/// skipped.
const MAX_PARENT_DEPTH: usize = 64;

/// Camera pose hand-off between the main thread and the oracle. The whole
/// pose is swapped atomically, the oracle polls it once per cycle.
#[derive(Default)]
pub struct SharedCamera {
    pose: ArcSwapOption<CameraPose>,
}

impl SharedCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, pose: CameraPose) {
        self.pose.store(Some(Arc::new(pose)));
    }

    pub fn current(&self) -> Option<Arc<CameraPose>> {
        self.pose.load_full()
    }
}

/// Admission verdict sent to the frame dispatcher: this entity's bounding
/// sphere entered the frustum, issue its asset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionTicket {
    pub handle: LocalHandle,
}

/// Approximate world-space state derived by walking resolved parent chains.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityRecord {
    pub handle: LocalHandle,
    pub world_position: Vec3,
    pub bounding_radius: f32,
}

/// Background visibility gate: the sole admission control for expensive
/// asset downloads. Reads entity snapshots published by the dispatcher and
/// the shared camera pose; writes only its own records and the admission
/// queue. It never mutates the registry.
pub struct ProximityOracle {
    snapshots: Arc<DashMap<LocalHandle, Arc<EntitySnapshot>>>,
    camera: Arc<SharedCamera>,
    admissions: Sender<AdmissionTicket>,
    records: HashMap<LocalHandle, VisibilityRecord>,
    admitted: HashSet<LocalHandle>,
}

impl ProximityOracle {
    pub fn new(
        snapshots: Arc<DashMap<LocalHandle, Arc<EntitySnapshot>>>,
        camera: Arc<SharedCamera>,
        admissions: Sender<AdmissionTicket>,
    ) -> Self {
        Self {
            snapshots,
            camera,
            admissions,
            records: HashMap::new(),
            admitted: HashSet::new(),
        }
    }

    /// Sleep-poll loop, independent of the render frame cadence. The stop
    /// flag is checked every cycle so teardown can join us in bounded time.
    pub fn run(mut self, stop: Arc<AtomicBool>, poll_interval: Duration) {
        info!("Proximity oracle polling every {:?}", poll_interval);
        loop {
            if stop.load(SeqCst) {
                info!("Proximity oracle stopping");
                return;
            }

            self.cycle();
            std::thread::sleep(poll_interval);
        }
    }

    /// One oracle cycle: refresh visibility records from the snapshot table,
    /// then admit every pending entity whose sphere intersects the frustum.
    pub fn cycle(&mut self) {
        self.refresh_records();

        let Some(pose) = self.camera.current() else {
            trace!("No camera pose published yet, skipping admission");
            return;
        };
        let frustum = Frustum::from_pose(&pose);

        // Entries whose entity vanished or got its request issued are
        // forgotten; a reused handle starts a fresh admission.
        self.admitted.retain(|handle| {
            self.snapshots
                .get(handle)
                .map(|snapshot| snapshot.wants_admission)
                .unwrap_or(false)
        });

        let pending = self
            .snapshots
            .iter()
            .filter(|entry| entry.value().wants_admission)
            .map(|entry| (*entry.key(), entry.value().is_hud))
            .collect_vec();

        for (handle, is_hud) in pending {
            if self.admitted.contains(&handle) {
                continue;
            }

            // HUD entities live in camera space and are always on screen.
            let in_view = if is_hud {
                true
            } else {
                let Some(record) = self.records.get(&handle) else {
                    // Ancestor chain still bottoms out in an orphan; re-check
                    // next cycle rather than pushing.
                    continue;
                };
                frustum.contains_sphere(record.world_position, record.bounding_radius)
            };

            if in_view {
                trace!("Admitting entity {} for asset request", handle);
                if self.admissions.send(AdmissionTicket { handle }).is_err() {
                    debug!("Admission queue closed, oracle results discarded");
                    return;
                }
                self.admitted.insert(handle);
            }
        }
    }

    /// Rebuilds the record table by walking parent chains in snapshot space.
    /// Entities with an unresolved ancestor get no record this cycle.
    fn refresh_records(&mut self) {
        self.records.clear();
        for entry in self.snapshots.iter() {
            let handle = *entry.key();
            if let Some(world_position) = self.world_position_of(handle, entry.value()) {
                self.records.insert(
                    handle,
                    VisibilityRecord {
                        handle,
                        world_position,
                        bounding_radius: entry.value().bounding_radius,
                    },
                );
            }
        }
    }

    fn world_position_of(&self, handle: LocalHandle, snapshot: &EntitySnapshot) -> Option<Vec3> {
        if !snapshot.placed {
            return None;
        }

        let mut position = snapshot.local_position;
        let mut parent = snapshot.parent;
        let mut depth = 0;

        while !parent.is_world_root() {
            depth += 1;
            if depth > MAX_PARENT_DEPTH {
                debug!("Parent chain of {} exceeds {} links, skipping", handle, MAX_PARENT_DEPTH);
                return None;
            }

            let link = self.snapshots.get(&parent)?;
            position += link.local_position;
            parent = link.parent;
        }

        Some(position)
    }

    pub fn visibility_records(&self) -> &HashMap<LocalHandle, VisibilityRecord> {
        &self.records
    }
}
