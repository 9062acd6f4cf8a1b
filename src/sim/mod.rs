//! Synthetic stand-ins for the two external collaborators the scheduler
//! needs: a network event source and an asset decode pipeline. This is what
//! the `simulate` operation mode runs against, exercising orphan resolution,
//! frustum admission and asset fan-out without a live simulator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::mpsc::{Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use glam::Vec3;
use log::{debug, info};
use rand::Rng;

use crate::assets::{AssetDecoder, AssetId, AssetKind, DecodeResultSink, DecodedAsset};
use crate::events::queues::EventSink;
use crate::events::{Kill, NewObject, TerseUpdate};
use crate::scene::entity::{EntityKind, Kinematics, LocalHandle, RegionId, ShapeDescription, StableId};

pub const SIM_REGION: RegionId = RegionId(1000);

/// A small pool of asset ids shared across many entities, so the at-most-one
/// outstanding request rule actually gets exercised.
const ASSET_POOL: u128 = 24;

/// Decode collaborator that sleeps for a bit on a worker thread and then
/// reports a payload (or, rarely, a failure) through the result sink.
pub struct StubDecoder {
    jobs: Sender<(AssetId, AssetKind)>,
    worker: Option<JoinHandle<()>>,
}

impl StubDecoder {
    pub fn new(results: DecodeResultSink) -> Self {
        let (jobs, job_rx) = channel::<(AssetId, AssetKind)>();
        let worker = std::thread::Builder::new()
            .name("Stub Decoder".into())
            .spawn(move || {
                let mut rng = rand::rng();
                while let Ok((asset_id, kind)) = job_rx.recv() {
                    std::thread::sleep(Duration::from_millis(rng.random_range(5..25)));
                    if rng.random::<f32>() < 0.05 {
                        results.on_decode_failed(asset_id, "synthetic decode failure");
                    } else {
                        results.on_decoded(
                            asset_id,
                            DecodedAsset {
                                kind,
                                payload: Arc::new(vec![0u8; rng.random_range(64..4096)]),
                            },
                        );
                    }
                }
                debug!("Stub decoder draining done");
            })
            .expect("Spawning the stub decoder thread");

        Self {
            jobs,
            worker: Some(worker),
        }
    }
}

impl AssetDecoder for StubDecoder {
    fn decode(&self, asset_id: AssetId, kind: AssetKind) {
        if self.jobs.send((asset_id, kind)).is_err() {
            debug!("Decode job for {} dropped after shutdown", asset_id);
        }
    }
}

impl Drop for StubDecoder {
    fn drop(&mut self) {
        // Closing the job channel lets the worker run dry and exit.
        let (closed, _) = channel();
        self.jobs = closed;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Network stand-in: producer threads that enqueue a plausible object
/// population, children frequently delivered before their parents, plus terse
/// noise and the occasional kill.
pub struct SyntheticEventSource {
    threads: Vec<JoinHandle<()>>,
}

impl SyntheticEventSource {
    pub fn spawn(sink: EventSink, stop: Arc<AtomicBool>, population: u32, producer_threads: u32) -> Self {
        let threads = (0..producer_threads)
            .map(|index| {
                let sink = sink.clone();
                let stop = stop.clone();
                std::thread::Builder::new()
                    .name(format!("Event Producer {index}"))
                    .spawn(move || produce(sink, stop, index, population))
                    .expect("Spawning an event producer thread")
            })
            .collect();
        Self { threads }
    }

    pub fn join(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

fn produce(sink: EventSink, stop: Arc<AtomicBool>, producer: u32, population: u32) {
    let mut rng = rand::rng();
    // Disjoint handle ranges per producer; handles are server-assigned and
    // the producers play the server here.
    let base = 1 + producer * population;
    let mut spawned: Vec<u32> = Vec::new();
    let mut next = base;

    info!("Event producer {} populating handles {}..", producer, base);
    while !stop.load(SeqCst) {
        match rng.random_range(0..100) {
            // Root object plus a child, child enqueued first on purpose so the
            // orphan path is constantly exercised.
            0..55 if next + 1 < base + population => {
                let parent = next;
                let child = next + 1;
                next += 2;
                sink.push_new_object(object(child, parent, &mut rng));
                sink.push_new_object(object(parent, 0, &mut rng));
                spawned.push(parent);
                spawned.push(child);
            }
            55..85 if !spawned.is_empty() => {
                let target = spawned[rng.random_range(0..spawned.len())];
                sink.push_terse_update(TerseUpdate {
                    local: LocalHandle(target),
                    position: random_position(&mut rng),
                    rotation: glam::Quat::IDENTITY,
                    velocity: Vec3::ZERO,
                    angular_velocity: Vec3::ZERO,
                });
            }
            85..90 if spawned.len() > 8 => {
                let target = spawned.swap_remove(rng.random_range(0..spawned.len()));
                sink.push_kill(Kill {
                    region: SIM_REGION,
                    local: LocalHandle(target),
                });
            }
            _ => {}
        }

        std::thread::sleep(Duration::from_millis(rng.random_range(1..8)));
    }
    debug!("Event producer {} stopping", producer);
}

fn object(local: u32, parent: u32, rng: &mut impl Rng) -> NewObject {
    let kind = match rng.random_range(0..3) {
        0 => EntityKind::ClassicPrimitive,
        1 => EntityKind::Mesh {
            mesh_asset: AssetId(rng.random_range(0..ASSET_POOL)),
        },
        _ => EntityKind::Sculpt {
            sculpt_map: AssetId(ASSET_POOL + rng.random_range(0..ASSET_POOL)),
        },
    };

    NewObject {
        local: LocalHandle(local),
        stable_id: StableId(local as u128 | 0x5EED_0000),
        region: SIM_REGION,
        parent: LocalHandle(parent),
        kind,
        kinematics: Kinematics::at(if parent == 0 {
            random_position(rng)
        } else {
            Vec3::new(rng.random::<f32>(), rng.random::<f32>(), rng.random::<f32>())
        }),
        shape: ShapeDescription {
            scale: Vec3::splat(rng.random_range(0.5..4.0)),
            ..ShapeDescription::default()
        },
        attachment: None,
    }
}

fn random_position(rng: &mut impl Rng) -> Vec3 {
    Vec3::new(
        rng.random_range(-128.0..128.0),
        rng.random_range(-128.0..128.0),
        rng.random_range(0.0..40.0),
    )
}
