use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec3;
use log::info;

use crate::proximity::frustum::CameraPose;
use crate::render::LogRenderSink;
use crate::settings::{CliArgs, OperationMode};
use crate::sim::{StubDecoder, SyntheticEventSource};
use crate::viewer::application::ViewerApplication;

pub mod assets;
pub mod events;
pub mod proximity;
pub mod render;
pub mod scene;
mod settings;
mod sim;
pub mod viewer;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let render = Arc::new(LogRenderSink::default());
    let mut app = ViewerApplication::new(&args, render.clone(), |results| {
        Arc::new(StubDecoder::new(results))
    })?;

    let OperationMode::Simulate {
        duration_secs,
        population,
        producer_threads,
    } = args.operation_mode;

    let producers = SyntheticEventSource::spawn(
        app.event_sink(),
        app.close_requested.clone(),
        population,
        producer_threads,
    );

    run_frames(&mut app, &args, Duration::from_secs(duration_secs));

    app.shutdown();
    producers.join();

    info!(
        "Simulation done: {} visuals created, {} assets attached, {} still live",
        render.created.load(std::sync::atomic::Ordering::SeqCst),
        render.attached.load(std::sync::atomic::Ordering::SeqCst),
        render.live_visuals()
    );
    Ok(())
}

/// Fixed-cadence main loop: one dispatch pass per frame, with the camera
/// slowly orbiting the scene so admission keeps happening.
fn run_frames(app: &mut ViewerApplication, args: &CliArgs, duration: Duration) {
    let start = Instant::now();
    let mut last_report = start;

    while start.elapsed() < duration {
        let now = Instant::now();
        let angle = start.elapsed().as_secs_f32() * 0.2;

        let mut pose = CameraPose::looking(
            Vec3::new(angle.cos() * 40.0, angle.sin() * 40.0, 20.0),
            Vec3::new(-angle.cos(), -angle.sin(), -0.3),
        );
        pose.far_clip = args.view_distance;
        app.camera.publish(pose);

        let stats = app.run_frame(now);

        if now.duration_since(last_report) >= Duration::from_secs(1) {
            last_report = now;
            info!(
                "{} entities, {} orphans, {} decodes in flight | frame: {} events, {} admissions, {} delivered",
                app.dispatcher().registry().len(),
                app.dispatcher().orphans().len(),
                app.dispatcher().pipeline().outstanding_len(),
                stats.events_applied,
                stats.admissions,
                stats.assets_delivered,
            );
        }

        std::thread::sleep(FRAME_INTERVAL);
    }
}
