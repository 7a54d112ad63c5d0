//! edgecam: real-time camera -> edge-detection -> GPU display pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use edgecam::capture::{self, detect, CaptureSource, RawFrame, SyntheticSource, V4l2Source};
use edgecam::filter::{FilterGateway, SobelEdgeFilter};
use edgecam::pipeline::{FrameSlot, Orchestrator, PipelineControls, StatsPublisher};
use edgecam::render;
use edgecam::Config;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "edgecam=info".to_string()))
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("edgecam starting");

    // Load configuration
    let config = Config::load_or_default(Path::new("edgecam.toml"));
    edgecam::CONFIG.store(Arc::new(config.clone()));

    let controls = Arc::new(PipelineControls::new(
        config.display.initial_mode,
        config.filter.enabled,
    ));
    let slot = Arc::new(FrameSlot::new());
    let stats = Arc::new(StatsPublisher::new());

    let (tx, rx) = flume::bounded(config.pipeline.channel_depth.max(1));
    spawn_capture(&config, tx, controls.clone());

    // Dedicated processing thread: convert -> filter -> publish.
    let gateway = FilterGateway::new(Box::new(SobelEdgeFilter::new(&config.filter)));
    let orchestrator = Orchestrator::new(
        gateway,
        slot.clone(),
        controls.clone(),
        stats.clone(),
        Duration::from_millis(config.pipeline.stats_window_ms.max(1)),
    );
    let pin = config.pipeline.pin_processing_thread;
    let processing = std::thread::Builder::new()
        .name("frame-processing".into())
        .spawn(move || {
            if pin {
                pin_current_thread();
            }
            orchestrator.run(rx);
        })?;

    // Display event loop owns the main thread until the window closes.
    render::run_display(config.display, slot, controls.clone(), stats)?;

    controls.stop();
    let _ = processing.join();

    info!("edgecam shutting down");
    Ok(())
}

fn pin_current_thread() {
    let Some(core) = core_affinity::get_core_ids().and_then(|ids| ids.into_iter().next_back())
    else {
        return;
    };
    if core_affinity::set_for_current(core) {
        info!("processing thread pinned to core {:?}", core.id);
    }
}

/// Pick a capture backend: a detected V4L2 device when one exists, the
/// synthetic test pattern otherwise.
fn spawn_capture(config: &Config, tx: flume::Sender<RawFrame>, controls: Arc<PipelineControls>) {
    let mut capture_config = config.capture.clone();

    if capture_config.device.is_empty() {
        match detect::auto_detect_device() {
            Some(found) => {
                capture_config.device = found.path;
                capture_config.format = found.format;
            }
            None => {
                warn!("no capture device found, using synthetic test pattern");
                spawn_synthetic(&capture_config, tx, controls);
                return;
            }
        }
    }

    info!("using capture device {}", capture_config.device);
    match V4l2Source::new(capture_config.clone()) {
        Ok(mut source) => {
            tokio::spawn(async move {
                match source.start() {
                    Ok(()) => capture::run_capture(source, tx, controls).await,
                    Err(e) => warn!("failed to start capture stream: {}", e),
                }
            });
        }
        Err(e) => {
            warn!(
                "failed to open {} ({}), using synthetic test pattern",
                capture_config.device, e
            );
            spawn_synthetic(&capture_config, tx, controls);
        }
    }
}

fn spawn_synthetic(
    capture_config: &edgecam::CaptureConfig,
    tx: flume::Sender<RawFrame>,
    controls: Arc<PipelineControls>,
) {
    let mut source = SyntheticSource::new(
        capture_config.width,
        capture_config.height,
        capture_config.fps,
    );
    tokio::spawn(async move {
        if source.start().is_ok() {
            capture::run_capture(source, tx, controls).await;
        }
    });
}
