use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use log::{debug, info, warn};

use crate::assets::pipeline::AssetPipeline;
use crate::assets::DecodeResult;
use crate::events::queues::{drain, EventQueues};
use crate::events::{AvatarUpdate, BlockUpdate, FullUpdate, Kill, NameReply, NewObject, PropertyReply, TerseUpdate};
use crate::proximity::AdmissionTicket;
use crate::render::RenderSink;
use crate::scene::entity::{Entity, EntityKind, FetchState, LocalHandle, RegionId, ShapeDescription, StableId};
use crate::scene::lifecycle::LifecycleManager;
use crate::scene::orphans::OrphanTable;
use crate::scene::registry::{EntityRegistry, RegisterOutcome, UpdateDelta};
use crate::settings::DrainCaps;

/// Per-frame stats, mostly for the periodic log line of the driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStats {
    pub events_applied: usize,
    pub admissions: usize,
    pub assets_delivered: usize,
    pub assets_failed: usize,
}

/// Runs once per render frame on the main thread: drains each event queue up
/// to its cap, applies the events to the registry, resolves orphans, and
/// completes the hand-off with the proximity oracle and the asset pipeline.
/// All registry mutation happens here, which is what keeps the registry
/// lock-free.
pub struct FrameDispatcher {
    registry: EntityRegistry,
    orphans: OrphanTable,
    lifecycle: LifecycleManager,
    queues: EventQueues,
    admissions: Receiver<AdmissionTicket>,
    decode_results: Receiver<DecodeResult>,
    pipeline: Arc<AssetPipeline>,
    render: Arc<dyn RenderSink>,
    caps: DrainCaps,
}

impl FrameDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queues: EventQueues,
        admissions: Receiver<AdmissionTicket>,
        decode_results: Receiver<DecodeResult>,
        pipeline: Arc<AssetPipeline>,
        render: Arc<dyn RenderSink>,
        caps: DrainCaps,
    ) -> Self {
        Self {
            registry: EntityRegistry::new(),
            orphans: OrphanTable::new(),
            lifecycle: LifecycleManager::new(render.clone()),
            queues,
            admissions,
            decode_results,
            pipeline,
            render,
            caps,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn orphans(&self) -> &OrphanTable {
        &self.orphans
    }

    pub fn pipeline(&self) -> &Arc<AssetPipeline> {
        &self.pipeline
    }

    /// One dispatch pass. Queue items beyond a category's cap simply stay
    /// queued; bounded staleness is fine, unbounded frame time is not.
    pub fn run_frame(&mut self, now: Instant) -> FrameStats {
        let mut stats = FrameStats::default();
        let mut applied = 0;

        // Creations first so updates enqueued behind them in other categories
        // have a chance to hit a registered entity within the same frame.
        applied += self.drain_new_objects();
        applied += self.drain_avatar_updates();
        applied += self.drain_full_updates();
        applied += self.drain_terse_updates();
        applied += self.drain_block_updates();
        applied += self.drain_kills(now);
        applied += self.drain_name_replies();
        applied += self.drain_property_replies();

        stats.events_applied = applied;
        stats.admissions = self.drain_admissions();
        let (delivered, failed) = self.drain_decode_results();
        stats.assets_delivered = delivered;
        stats.assets_failed = failed;

        self.lifecycle.tick(now);
        stats
    }

    fn drain_new_objects(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.new_objects, self.caps.new_objects, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_new_object(event);
        }
        count
    }

    fn drain_avatar_updates(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.avatar_updates, usize::MAX, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_avatar_update(event);
        }
        count
    }

    fn drain_full_updates(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.full_updates, self.caps.full_updates, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_full_update(event);
        }
        count
    }

    fn drain_terse_updates(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.terse_updates, self.caps.terse_updates, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_terse_update(event);
        }
        count
    }

    fn drain_block_updates(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.block_updates, self.caps.block_updates, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_block_update(event);
        }
        count
    }

    fn drain_kills(&mut self, now: Instant) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.kills, usize::MAX, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_kill(event, now);
        }
        count
    }

    fn drain_name_replies(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.name_replies, usize::MAX, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_name_reply(event);
        }
        count
    }

    fn drain_property_replies(&mut self) -> usize {
        let mut events = Vec::new();
        drain(&self.queues.property_replies, usize::MAX, |e| events.push(e));
        let count = events.len();
        for event in events {
            self.handle_property_reply(event);
        }
        count
    }

    fn handle_new_object(&mut self, event: NewObject) {
        if self.registry.get(event.local).is_some() {
            // At-least-once delivery makes duplicate creations routine.
            debug!("Duplicate creation for {}, keeping the existing entity", event.local);
            return;
        }

        let mut entity = Entity::new(
            event.local,
            event.stable_id,
            event.region,
            event.parent,
            event.kind,
            event.kinematics,
            event.shape,
        );
        entity.attachment = event.attachment;

        let parent_known = event.parent.is_world_root() || self.registry.get(event.parent).is_some();
        if parent_known {
            entity.placed = true;
            entity.render_handle = Some(self.render.create_visual(&entity));
        } else {
            // Register anyway so per-handle updates apply, but leave the
            // entity unplaced until the parent shows up.
            entity.placed = false;
            self.orphans
                .defer(event.local, event.parent, event.region, event.kinematics);
        }

        let local = entity.local;
        if self.registry.register(entity) == RegisterOutcome::Registered {
            self.resolve_orphans_transitively(local);
        } else {
            // The orphan record (if any) must not outlive the rejection.
            self.orphans.forget_child(local);
        }
    }

    fn handle_avatar_update(&mut self, event: AvatarUpdate) {
        if self.registry.get(event.local).is_none() {
            if !event.is_new {
                debug!("Dropping avatar update for unknown {}", event.local);
                return;
            }
            self.handle_new_object(NewObject {
                local: event.local,
                stable_id: event.stable_id,
                region: event.region,
                parent: LocalHandle::WORLD_ROOT,
                kind: EntityKind::Avatar,
                kinematics: event.kinematics,
                shape: ShapeDescription::default(),
                attachment: None,
            });
            return;
        }

        self.apply_delta(event.local, &UpdateDelta::kinematics(event.kinematics));
    }

    fn handle_full_update(&mut self, event: FullUpdate) {
        let delta = UpdateDelta {
            kinematics: Some(event.kinematics),
            shape_patch: Some(event.shape.clone().into()),
        };
        self.apply_delta(event.local, &delta);
    }

    fn handle_terse_update(&mut self, event: TerseUpdate) {
        self.apply_delta(event.local, &UpdateDelta::kinematics(event.kinematics()));
    }

    fn handle_block_update(&mut self, event: BlockUpdate) {
        let delta = UpdateDelta {
            shape_patch: Some(event.patch),
            ..UpdateDelta::default()
        };
        self.apply_delta(event.local, &delta);
    }

    /// Shared update path: unknown handles are dropped (the entity was
    /// already destroyed or not yet created, both benign under unordered
    /// delivery), shape changes propagate to the visual.
    fn apply_delta(&mut self, local: LocalHandle, delta: &UpdateDelta) {
        match self.registry.apply_update(local, delta) {
            None => debug!("Dropping update for unknown entity {}", local),
            Some(needs_rebuild) => {
                let entity = self
                    .registry
                    .get(local)
                    .expect("entity present, apply_update just succeeded");
                if let Some(handle) = entity.render_handle {
                    if needs_rebuild || delta.kinematics.is_some() {
                        self.render.update_visual(handle, entity);
                    }
                }
            }
        }
    }

    fn handle_kill(&mut self, event: Kill, now: Instant) {
        let Some(entity) = self.registry.get(event.local) else {
            debug!("Dropping kill for unknown entity {}", event.local);
            return;
        };
        if entity.region != event.region {
            // Handle spaces are region-scoped; a kill from another region
            // must not touch this entity.
            debug!(
                "Dropping kill for {} from {}, entity lives in {}",
                event.local, event.region, entity.region
            );
            return;
        }

        self.remove_entity(event.local, true, now);
    }

    /// The removal cascade: registry (handle + stable id + snapshot), orphan
    /// table, pending asset requests. The visual either dissolves or is
    /// released immediately.
    fn remove_entity(&mut self, local: LocalHandle, dissolve: bool, now: Instant) {
        let Some(entity) = self.registry.remove(local) else {
            return;
        };
        self.orphans.forget_child(local);
        self.pipeline.detach(local);

        if let Some(handle) = entity.render_handle {
            if dissolve {
                self.lifecycle.begin_dissolve(handle, now);
            } else {
                self.lifecycle.release_now(handle);
            }
        }
    }

    fn handle_name_reply(&mut self, event: NameReply) {
        let Some(local) = self.registry.lookup(event.stable_id) else {
            debug!("Dropping name reply for unknown stable id {}", event.stable_id);
            return;
        };
        if let Some(entity) = self.registry.get_mut(local) {
            entity.name = Some(event.name);
        }
    }

    fn handle_property_reply(&mut self, event: PropertyReply) {
        let Some(local) = self.registry.lookup(event.stable_id) else {
            debug!("Dropping property reply for unknown stable id {}", event.stable_id);
            return;
        };
        if let Some(entity) = self.registry.get_mut(local) {
            entity.properties.extend(event.properties);
        }
    }

    /// Replays deferred children after a successful registration. A resolved
    /// child can itself be an awaited parent, so this keeps re-checking until
    /// the whole chain has converged within this dispatch pass.
    fn resolve_orphans_transitively(&mut self, registered: LocalHandle) {
        let mut parents = vec![registered];

        while let Some(parent) = parents.pop() {
            for record in self.orphans.resolve_children_of(parent) {
                let Some(child) = self.registry.get_mut(record.child) else {
                    debug!("Orphan record for vanished child {}", record.child);
                    continue;
                };

                // The registry kept receiving updates while the child was
                // deferred, so its state is at least as fresh as the record's.
                child.placed = true;
                if child.render_handle.is_none() {
                    child.render_handle = Some(self.render.create_visual(child));
                }
                self.registry.publish(record.child);
                parents.push(record.child);
            }
        }
    }

    /// Admissions from the proximity oracle turn into actual decode requests.
    fn drain_admissions(&mut self) -> usize {
        let mut tickets = Vec::new();
        drain(&self.admissions, usize::MAX, |t| tickets.push(t));

        let mut issued = 0;
        for AdmissionTicket { handle } in tickets {
            let Some(entity) = self.registry.get_mut(handle) else {
                debug!("Admission for already removed entity {}", handle);
                continue;
            };
            if entity.fetch_state != FetchState::AwaitingVisibility {
                debug!("Admission for {} in state {:?}, ignoring", handle, entity.fetch_state);
                continue;
            }
            let Some((asset_id, kind)) = entity.kind.fetch_dependency() else {
                debug!("Admission for {} without an asset dependency", handle);
                continue;
            };

            entity.fetch_state = FetchState::Requested;
            self.registry.publish(handle);
            self.pipeline.request(asset_id, kind, handle);
            issued += 1;
        }
        issued
    }

    /// Decoded payloads are attached to every consumer still alive; consumers
    /// removed while the asset was in flight are skipped silently.
    fn drain_decode_results(&mut self) -> (usize, usize) {
        let mut results = Vec::new();
        drain(&self.decode_results, usize::MAX, |r| results.push(r));

        let mut delivered = 0;
        let mut failed = 0;
        for result in results {
            match result {
                DecodeResult::Decoded { asset_id, asset } => {
                    for consumer in self.pipeline.complete(asset_id, &asset) {
                        let Some(entity) = self.registry.get_mut(consumer) else {
                            debug!("Consumer {} of {} gone before delivery", consumer, asset_id);
                            continue;
                        };
                        entity.fetch_state = FetchState::Delivered;
                        if let Some(handle) = entity.render_handle {
                            self.render.attach_asset(handle, &asset);
                        }
                        self.registry.publish(consumer);
                        delivered += 1;
                    }
                }
                DecodeResult::Failed { asset_id, reason } => {
                    warn!("Decode of {} failed: {}", asset_id, reason);
                    for consumer in self.pipeline.fail(asset_id) {
                        if let Some(entity) = self.registry.get_mut(consumer) {
                            entity.fetch_state = FetchState::Failed;
                            self.registry.publish(consumer);
                        }
                    }
                    failed += 1;
                }
            }
        }
        (delivered, failed)
    }

    /// "Left region" signal: every entity, orphan record and request consumer
    /// scoped to that region's handle space goes in one pass. Handles are
    /// region-scoped, so nothing may silently alias into the next region.
    pub fn leave_region(&mut self, region: RegionId, now: Instant) {
        let handles = self.registry.region_handles(region);
        info!("Leaving {}, purging {} entities", region, handles.len());

        for handle in handles {
            self.remove_entity(handle, false, now);
        }
        self.orphans.purge_region(region);
    }

    /// Session teardown: queues are drained without processing, tables
    /// cleared, remaining visuals released. The caller is responsible for
    /// stopping and joining the proximity oracle *before* this runs.
    pub fn teardown(&mut self) {
        let dropped = drain(&self.queues.new_objects, usize::MAX, |_| ())
            + drain(&self.queues.full_updates, usize::MAX, |_| ())
            + drain(&self.queues.terse_updates, usize::MAX, |_| ())
            + drain(&self.queues.block_updates, usize::MAX, |_| ())
            + drain(&self.queues.kills, usize::MAX, |_| ())
            + drain(&self.queues.avatar_updates, usize::MAX, |_| ())
            + drain(&self.queues.name_replies, usize::MAX, |_| ())
            + drain(&self.queues.property_replies, usize::MAX, |_| ())
            + drain(&self.admissions, usize::MAX, |_| ())
            + drain(&self.decode_results, usize::MAX, |_| ());
        info!("Teardown dropped {} queued items", dropped);

        let handles: Vec<_> = self
            .registry
            .entities()
            .filter_map(|entity| entity.render_handle)
            .collect();
        for handle in handles {
            self.lifecycle.release_now(handle);
        }

        self.lifecycle.release_all();
        self.orphans.clear();
        self.registry.clear();
        self.pipeline.clear();
    }

    /// Lookup used by name/property tests and the driver.
    pub fn entity_by_stable(&self, stable_id: StableId) -> Option<&Entity> {
        self.registry
            .lookup(stable_id)
            .and_then(|local| self.registry.get(local))
    }

    pub fn dissolving_len(&self) -> usize {
        self.lifecycle.dissolving_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetDecoder, AssetId, AssetKind, DecodeResultSink, DecodedAsset};
    use crate::events::queues::{event_channels, EventSink};
    use crate::render::LogRenderSink;
    use crate::scene::entity::Kinematics;
    use glam::{Quat, Vec3};
    use itertools::Itertools;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering::SeqCst;
    use std::sync::mpsc::{Sender, channel};
    use std::time::Duration;

    const REGION_A: RegionId = RegionId(1);
    const REGION_B: RegionId = RegionId(2);

    struct RecordingDecoder {
        requests: Mutex<Vec<AssetId>>,
    }

    impl AssetDecoder for RecordingDecoder {
        fn decode(&self, asset_id: AssetId, _kind: AssetKind) {
            self.requests.lock().unwrap().push(asset_id);
        }
    }

    struct Harness {
        dispatcher: FrameDispatcher,
        sink: EventSink,
        admissions: Sender<AdmissionTicket>,
        results: DecodeResultSink,
        decoder: Arc<RecordingDecoder>,
        render: Arc<LogRenderSink>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_caps(DrainCaps::default())
        }

        fn with_caps(caps: DrainCaps) -> Self {
            let (sink, queues) = event_channels();
            let (admission_tx, admission_rx) = channel();
            let (result_tx, result_rx) = channel();
            let decoder = Arc::new(RecordingDecoder {
                requests: Mutex::new(Vec::new()),
            });
            let render = Arc::new(LogRenderSink::new(Duration::from_millis(50)));
            let pipeline = Arc::new(AssetPipeline::new(decoder.clone(), result_tx.clone(), 64));

            Self {
                dispatcher: FrameDispatcher::new(
                    queues,
                    admission_rx,
                    result_rx,
                    pipeline,
                    render.clone(),
                    caps,
                ),
                sink,
                admissions: admission_tx,
                results: DecodeResultSink::new(result_tx),
                decoder,
                render,
            }
        }

        fn frame(&mut self) -> FrameStats {
            self.dispatcher.run_frame(Instant::now())
        }
    }

    fn prim(local: u32, parent: u32, region: RegionId) -> NewObject {
        NewObject {
            local: LocalHandle(local),
            stable_id: StableId(local as u128),
            region,
            parent: LocalHandle(parent),
            kind: EntityKind::ClassicPrimitive,
            kinematics: Kinematics::default(),
            shape: ShapeDescription::default(),
            attachment: None,
        }
    }

    fn mesh(local: u32, asset: u128, region: RegionId) -> NewObject {
        NewObject {
            kind: EntityKind::Mesh {
                mesh_asset: AssetId(asset),
            },
            ..prim(local, 0, region)
        }
    }

    fn terse(local: u32, position: Vec3) -> TerseUpdate {
        TerseUpdate {
            local: LocalHandle(local),
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }

    #[test]
    fn basic_parent_child_resolution() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 3, REGION_A));
        h.sink.push_new_object(prim(3, 0, REGION_A));
        h.frame();

        let child = h.dispatcher.registry().get(LocalHandle(5)).unwrap();
        assert_eq!(child.parent, LocalHandle(3));
        assert!(child.placed);
        assert!(h.dispatcher.registry().get(LocalHandle(3)).is_some());
        assert!(h.dispatcher.orphans().is_empty());
    }

    #[test]
    fn orphan_chains_converge_for_any_delivery_order() {
        // 4 entities: 2 under 1, 3 under 2, 4 under 3.
        let chain = [prim(1, 0, REGION_A), prim(2, 1, REGION_A), prim(3, 2, REGION_A), prim(4, 3, REGION_A)];

        for permutation in (0..chain.len()).permutations(chain.len()) {
            let mut h = Harness::new();
            for index in &permutation {
                h.sink.push_new_object(chain[*index].clone());
            }
            h.frame();

            let registry = h.dispatcher.registry();
            assert_eq!(registry.len(), 4, "order {:?}", permutation);
            for (local, parent) in [(1u32, 0u32), (2, 1), (3, 2), (4, 3)] {
                let entity = registry.get(LocalHandle(local)).unwrap();
                assert_eq!(entity.parent, LocalHandle(parent), "order {:?}", permutation);
                assert!(entity.placed, "entity {} unplaced in order {:?}", local, permutation);
            }
            assert!(h.dispatcher.orphans().is_empty(), "order {:?}", permutation);
        }
    }

    #[test]
    fn duplicate_creation_is_idempotent() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 0, REGION_A));
        h.sink.push_new_object(prim(5, 0, REGION_A));
        h.frame();

        assert_eq!(h.dispatcher.registry().len(), 1);
        assert_eq!(h.render.created.load(SeqCst), 1);
    }

    #[test]
    fn kill_removes_completely_and_blocks_resurrection() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 0, REGION_A));
        h.frame();

        h.sink.push_kill(Kill {
            region: REGION_A,
            local: LocalHandle(5),
        });
        h.frame();

        assert!(h.dispatcher.registry().get(LocalHandle(5)).is_none());
        assert!(!h.dispatcher.orphans().contains_child(LocalHandle(5)));
        assert!(!h.dispatcher.registry().snapshots().contains_key(&LocalHandle(5)));
        assert_eq!(h.dispatcher.dissolving_len(), 1);

        // A terse update racing the kill must be dropped as unknown.
        h.sink.push_terse_update(terse(5, Vec3::splat(1.0)));
        h.frame();
        assert!(h.dispatcher.registry().get(LocalHandle(5)).is_none());

        // The dissolve elapses, the visual is released.
        std::thread::sleep(Duration::from_millis(60));
        h.frame();
        assert_eq!(h.dispatcher.dissolving_len(), 0);
        assert_eq!(h.render.released.load(SeqCst), 1);
    }

    #[test]
    fn kill_from_the_wrong_region_is_ignored() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 0, REGION_A));
        h.frame();

        h.sink.push_kill(Kill {
            region: REGION_B,
            local: LocalHandle(5),
        });
        h.frame();
        assert!(h.dispatcher.registry().get(LocalHandle(5)).is_some());
    }

    #[test]
    fn one_decode_request_fans_out_to_all_consumers() {
        let mut h = Harness::new();
        h.sink.push_new_object(mesh(1, 0xFEED, REGION_A));
        h.sink.push_new_object(mesh(2, 0xFEED, REGION_A));
        h.frame();

        // The oracle admits both entities.
        h.admissions.send(AdmissionTicket { handle: LocalHandle(1) }).unwrap();
        h.admissions.send(AdmissionTicket { handle: LocalHandle(2) }).unwrap();
        let stats = h.frame();
        assert_eq!(stats.admissions, 2);
        assert_eq!(h.decoder.requests.lock().unwrap().len(), 1, "one request per asset id");

        h.results.on_decoded(
            AssetId(0xFEED),
            DecodedAsset {
                kind: AssetKind::Mesh,
                payload: Arc::new(vec![0xAB]),
            },
        );
        let stats = h.frame();
        assert_eq!(stats.assets_delivered, 2);
        assert_eq!(h.render.attached.load(SeqCst), 2);
        for local in [1, 2] {
            let entity = h.dispatcher.registry().get(LocalHandle(local)).unwrap();
            assert_eq!(entity.fetch_state, FetchState::Delivered);
        }
        assert!(!h.dispatcher.pipeline().is_outstanding(AssetId(0xFEED)));
    }

    #[test]
    fn consumer_killed_mid_flight_is_skipped_silently() {
        let mut h = Harness::new();
        h.sink.push_new_object(mesh(1, 0xFEED, REGION_A));
        h.frame();
        h.admissions.send(AdmissionTicket { handle: LocalHandle(1) }).unwrap();
        h.frame();

        h.sink.push_kill(Kill {
            region: REGION_A,
            local: LocalHandle(1),
        });
        h.frame();

        h.results.on_decoded(
            AssetId(0xFEED),
            DecodedAsset {
                kind: AssetKind::Mesh,
                payload: Arc::new(vec![0xAB]),
            },
        );
        let stats = h.frame();
        assert_eq!(stats.assets_delivered, 0);
        assert_eq!(h.render.attached.load(SeqCst), 0);
        // The payload still lands in the cache for future needs.
        assert!(h.dispatcher.pipeline().is_cached(AssetId(0xFEED)));
    }

    #[test]
    fn decode_failure_flags_consumers_and_allows_retry() {
        let mut h = Harness::new();
        h.sink.push_new_object(mesh(1, 0xFEED, REGION_A));
        h.frame();
        h.admissions.send(AdmissionTicket { handle: LocalHandle(1) }).unwrap();
        h.frame();

        h.results.on_decode_failed(AssetId(0xFEED), "truncated payload");
        let stats = h.frame();
        assert_eq!(stats.assets_failed, 1);
        let entity = h.dispatcher.registry().get(LocalHandle(1)).unwrap();
        assert_eq!(entity.fetch_state, FetchState::Failed);
        assert!(!h.dispatcher.pipeline().is_outstanding(AssetId(0xFEED)));
    }

    #[test]
    fn region_leave_purges_exactly_that_region() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(1, 0, REGION_A));
        h.sink.push_new_object(prim(2, 1, REGION_A));
        h.sink.push_new_object(mesh(3, 0xAAA, REGION_A));
        h.sink.push_new_object(mesh(4, 0xBBB, REGION_B));
        h.frame();

        h.admissions.send(AdmissionTicket { handle: LocalHandle(3) }).unwrap();
        h.admissions.send(AdmissionTicket { handle: LocalHandle(4) }).unwrap();
        h.frame();

        h.dispatcher.leave_region(REGION_A, Instant::now());

        let registry = h.dispatcher.registry();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(LocalHandle(4)).is_some());
        assert!(h.dispatcher.pipeline().consumers_of(AssetId(0xAAA)).is_empty());
        assert_eq!(
            h.dispatcher.pipeline().consumers_of(AssetId(0xBBB)),
            vec![LocalHandle(4)]
        );
        // Region leave releases immediately, no dissolve.
        assert_eq!(h.dispatcher.dissolving_len(), 0);
        assert_eq!(h.render.released.load(SeqCst), 3);
    }

    #[test]
    fn orphans_get_their_visual_only_once_placed() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 3, REGION_A));
        h.frame();

        let child = h.dispatcher.registry().get(LocalHandle(5)).unwrap();
        assert!(!child.placed);
        assert!(child.render_handle.is_none());
        assert_eq!(h.render.created.load(SeqCst), 0);

        h.sink.push_new_object(prim(3, 0, REGION_A));
        h.frame();
        assert_eq!(h.render.created.load(SeqCst), 2);
        assert!(h.dispatcher.registry().get(LocalHandle(5)).unwrap().placed);
    }

    #[test]
    fn updates_for_orphaned_children_still_apply() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 3, REGION_A));
        h.frame();

        h.sink.push_terse_update(terse(5, Vec3::new(9.0, 0.0, 0.0)));
        h.frame();

        let child = h.dispatcher.registry().get(LocalHandle(5)).unwrap();
        assert_eq!(child.kinematics.position, Vec3::new(9.0, 0.0, 0.0));
        assert!(!child.placed);
    }

    #[test]
    fn terse_queue_cap_bounds_per_frame_work() {
        let caps = DrainCaps {
            terse_updates: 4,
            ..DrainCaps::default()
        };
        let mut h = Harness::with_caps(caps);
        h.sink.push_new_object(prim(1, 0, REGION_A));
        h.frame();

        for i in 0..10 {
            h.sink.push_terse_update(terse(1, Vec3::new(i as f32, 0.0, 0.0)));
        }

        assert_eq!(h.frame().events_applied, 4);
        assert_eq!(h.frame().events_applied, 4);
        assert_eq!(h.frame().events_applied, 2);

        // FIFO within the category: the last value wins in the end.
        let entity = h.dispatcher.registry().get(LocalHandle(1)).unwrap();
        assert_eq!(entity.kinematics.position.x, 9.0);
    }

    #[test]
    fn avatar_updates_create_and_move() {
        let mut h = Harness::new();
        h.sink.push_avatar_update(AvatarUpdate {
            local: LocalHandle(9),
            stable_id: StableId(0x90),
            region: REGION_A,
            is_new: true,
            kinematics: Kinematics::default(),
        });
        h.frame();
        assert!(matches!(
            h.dispatcher.registry().get(LocalHandle(9)).unwrap().kind,
            EntityKind::Avatar
        ));

        h.sink.push_avatar_update(AvatarUpdate {
            local: LocalHandle(9),
            stable_id: StableId(0x90),
            region: REGION_A,
            is_new: false,
            kinematics: Kinematics::at(Vec3::splat(2.0)),
        });
        h.frame();
        assert_eq!(
            h.dispatcher.registry().get(LocalHandle(9)).unwrap().kinematics.position,
            Vec3::splat(2.0)
        );
    }

    #[test]
    fn name_and_property_replies_index_by_stable_id() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(5, 0, REGION_A));
        h.frame();

        h.sink.push_name_reply(NameReply {
            stable_id: StableId(5),
            name: "Lamp Post".to_string(),
        });
        h.sink.push_property_reply(PropertyReply {
            stable_id: StableId(5),
            properties: vec![("creator".to_string(), "someone".to_string())],
        });
        // Replies for stable ids we never saw are dropped, not an error.
        h.sink.push_name_reply(NameReply {
            stable_id: StableId(0xDEAD),
            name: "Ghost".to_string(),
        });
        h.frame();

        let entity = h.dispatcher.entity_by_stable(StableId(5)).unwrap();
        assert_eq!(entity.name.as_deref(), Some("Lamp Post"));
        assert_eq!(entity.properties.get("creator").map(String::as_str), Some("someone"));
    }

    #[test]
    fn teardown_drops_queued_events_without_processing() {
        let mut h = Harness::new();
        h.sink.push_new_object(prim(1, 0, REGION_A));
        h.frame();

        h.sink.push_new_object(prim(2, 0, REGION_A));
        h.sink.push_terse_update(terse(1, Vec3::ONE));
        h.dispatcher.teardown();

        assert!(h.dispatcher.registry().is_empty());
        assert!(h.dispatcher.orphans().is_empty());
        assert_eq!(h.dispatcher.pipeline().outstanding_len(), 0);
        assert_eq!(h.render.live_visuals(), 0);
    }
}
