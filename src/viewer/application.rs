use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::mpsc::channel;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::Context;
use log::info;

use crate::assets::pipeline::AssetPipeline;
use crate::assets::{AssetDecoder, DecodeResultSink};
use crate::events::dispatcher::{FrameDispatcher, FrameStats};
use crate::events::queues::{event_channels, EventSink};
use crate::proximity::{ProximityOracle, SharedCamera};
use crate::render::RenderSink;
use crate::scene::entity::RegionId;
use crate::settings::{CliArgs, DrainCaps};

/// Wires the six core components together and owns the background threads.
/// The network transport and the decode collaborator are injected; everything
/// they hand us crosses a queue, never a shared table.
pub struct ViewerApplication {
    pub camera: Arc<SharedCamera>,
    pub close_requested: Arc<AtomicBool>,
    dispatcher: FrameDispatcher,
    event_sink: EventSink,
    oracle_thread: Option<JoinHandle<()>>,
}

impl ViewerApplication {
    /// `build_decoder` receives the result sink the decode collaborator must
    /// call back on; it may spawn its own worker threads.
    pub fn new(
        args: &CliArgs,
        render: Arc<dyn RenderSink>,
        build_decoder: impl FnOnce(DecodeResultSink) -> Arc<dyn AssetDecoder>,
    ) -> anyhow::Result<Self> {
        let (event_sink, queues) = event_channels();
        let (admission_tx, admission_rx) = channel();
        let (result_tx, result_rx) = channel();

        let decoder = build_decoder(DecodeResultSink::new(result_tx.clone()));
        let pipeline = Arc::new(AssetPipeline::new(
            decoder,
            result_tx,
            args.asset_cache_capacity,
        ));

        let dispatcher = FrameDispatcher::new(
            queues,
            admission_rx,
            result_rx,
            pipeline,
            render,
            DrainCaps::from(args),
        );

        let camera = Arc::new(SharedCamera::new());
        let close_requested = Arc::new(AtomicBool::new(false));

        let oracle = ProximityOracle::new(dispatcher.registry().snapshots(), camera.clone(), admission_tx);
        let stop = close_requested.clone();
        let poll_interval = args.poll_interval();
        let oracle_thread = std::thread::Builder::new()
            .name("Proximity Oracle".into())
            .spawn(move || oracle.run(stop, poll_interval))
            .context("Spawning the proximity oracle thread")?;

        Ok(Self {
            camera,
            close_requested,
            dispatcher,
            event_sink,
            oracle_thread: Some(oracle_thread),
        })
    }

    /// Clonable producer half for network callback threads.
    pub fn event_sink(&self) -> EventSink {
        self.event_sink.clone()
    }

    pub fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    /// One main-thread dispatch pass. Call once per render frame.
    pub fn run_frame(&mut self, now: Instant) -> FrameStats {
        self.dispatcher.run_frame(now)
    }

    pub fn leave_region(&mut self, region: RegionId, now: Instant) {
        self.dispatcher.leave_region(region, now);
    }

    /// Session teardown. The oracle is stopped and joined *before* the
    /// registry is torn down, so no late background read touches freed state.
    pub fn shutdown(&mut self) {
        self.close_requested.store(true, SeqCst);
        if let Some(handle) = self.oracle_thread.take() {
            handle
                .join()
                .expect("Proximity Oracle thread to terminate normally");
        }
        self.dispatcher.teardown();
        info!("Viewer session torn down");
    }
}

impl Drop for ViewerApplication {
    fn drop(&mut self) {
        if self.oracle_thread.is_some() {
            self.shutdown();
        }
    }
}
