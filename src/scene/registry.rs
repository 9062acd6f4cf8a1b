use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use itertools::Itertools;
use log::{debug, warn};

use crate::scene::entity::{Entity, EntitySnapshot, Kinematics, LocalHandle, RegionId, ShapePatch, StableId};

/// Outcome of a registration attempt. A duplicate handle is a protocol
/// violation worth investigating, but never fatal: the original wins.
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    DuplicateHandle,
}

/// Partial state delta merged into an existing entity. Every field carries an
/// absolute value, so cross-category reordering stays convergent.
#[derive(Debug, Clone, Default)]
pub struct UpdateDelta {
    pub kinematics: Option<Kinematics>,
    pub shape_patch: Option<ShapePatch>,
}

impl UpdateDelta {
    pub fn kinematics(kinematics: Kinematics) -> Self {
        Self {
            kinematics: Some(kinematics),
            ..Self::default()
        }
    }
}

/// Authoritative map from local handle to entity, with a secondary index from
/// stable id to handle. Mutated exclusively on the main thread; the snapshot
/// table is the only part other threads (the proximity oracle) may read.
pub struct EntityRegistry {
    entities: HashMap<LocalHandle, Entity>,
    by_stable: HashMap<StableId, LocalHandle>,
    snapshots: Arc<DashMap<LocalHandle, Arc<EntitySnapshot>>>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            by_stable: HashMap::new(),
            snapshots: Arc::new(DashMap::new()),
        }
    }

    /// The shared snapshot table handed to the proximity oracle.
    pub fn snapshots(&self) -> Arc<DashMap<LocalHandle, Arc<EntitySnapshot>>> {
        self.snapshots.clone()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn register(&mut self, entity: Entity) -> RegisterOutcome {
        if self.entities.contains_key(&entity.local) {
            warn!(
                "Rejecting duplicate registration of {} (stable id {}), the existing entity wins",
                entity.local, entity.stable_id
            );
            return RegisterOutcome::DuplicateHandle;
        }

        let local = entity.local;
        self.by_stable.insert(entity.stable_id, local);
        self.entities.insert(local, entity);
        self.publish(local);
        RegisterOutcome::Registered
    }

    pub fn get(&self, local: LocalHandle) -> Option<&Entity> {
        self.entities.get(&local)
    }

    /// Mutable access. Callers that touch kinematics, placement or fetch
    /// state must `publish` afterwards so the oracle sees the change.
    pub fn get_mut(&mut self, local: LocalHandle) -> Option<&mut Entity> {
        self.entities.get_mut(&local)
    }

    pub fn lookup(&self, stable_id: StableId) -> Option<LocalHandle> {
        self.by_stable.get(&stable_id).copied()
    }

    /// Removes the entity along with its stable-id index entry and published
    /// snapshot. Detaching from pending asset requests is the dispatcher's
    /// part of the cascade.
    pub fn remove(&mut self, local: LocalHandle) -> Option<Entity> {
        let entity = self.entities.remove(&local)?;
        self.by_stable.remove(&entity.stable_id);
        self.snapshots.remove(&local);
        Some(entity)
    }

    /// Merges a delta into an existing entity and returns whether the
    /// construction fingerprint changed, i.e. whether a re-render is needed.
    /// `None` means the handle is unknown (benign, see the drop rules).
    pub fn apply_update(&mut self, local: LocalHandle, delta: &UpdateDelta) -> Option<bool> {
        let entity = self.entities.get_mut(&local)?;

        if let Some(kinematics) = delta.kinematics {
            entity.kinematics = kinematics;
        }
        if let Some(patch) = &delta.shape_patch {
            patch.apply_to(&mut entity.shape);
        }

        let needs_rebuild = entity.refresh_fingerprint();
        self.publish(local);
        Some(needs_rebuild)
    }

    /// Republishes the immutable snapshot the proximity oracle reads. The
    /// whole `Arc` is replaced, never mutated in place.
    pub fn publish(&self, local: LocalHandle) {
        if let Some(entity) = self.entities.get(&local) {
            self.snapshots
                .insert(local, Arc::new(EntitySnapshot::of(entity)));
        } else {
            debug!("Not publishing snapshot for unknown entity {}", local);
        }
    }

    pub fn handles(&self) -> impl Iterator<Item = LocalHandle> + '_ {
        self.entities.keys().copied()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn region_handles(&self, region: RegionId) -> Vec<LocalHandle> {
        self.entities
            .values()
            .filter(|entity| entity.region == region)
            .map(|entity| entity.local)
            .collect_vec()
    }

    /// Session teardown: drop everything, snapshots included.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_stable.clear();
        self.snapshots.clear();
    }
}
