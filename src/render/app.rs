//! Winit application glue: translates windowing lifecycle callbacks into
//! render pipeline transitions and wires the keyboard to the pipeline
//! controls (1-4 select the render mode, E toggles edge detection).

use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::{error, info, trace};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::error::RenderError;
use crate::pipeline::{FrameSlot, PipelineControls, StatsPublisher};
use crate::render::{RenderMode, RenderPipeline};
use crate::DisplayConfig;

const TITLE_REFRESH: Duration = Duration::from_secs(1);

pub struct DisplayApp {
    config: DisplayConfig,
    pipeline: RenderPipeline,
    slot: Arc<FrameSlot>,
    controls: Arc<PipelineControls>,
    stats: Arc<StatsPublisher>,
    window: Option<Arc<Window>>,
    last_title_refresh: Instant,
}

impl DisplayApp {
    pub fn new(
        config: DisplayConfig,
        slot: Arc<FrameSlot>,
        controls: Arc<PipelineControls>,
        stats: Arc<StatsPublisher>,
    ) -> Self {
        let pipeline = RenderPipeline::new(config.vsync);
        Self {
            config,
            pipeline,
            slot,
            controls,
            stats,
            window: None,
            last_title_refresh: Instant::now(),
        }
    }

    fn draw_tick(&mut self) {
        // The active mode is read exactly once per tick, so a mid-stream
        // switch applies whole on the next draw.
        let mode = self.controls.mode();
        let frame = self.slot.take();
        if let Some(frame) = &frame {
            let latency = frame.timestamp.elapsed();
            metrics::histogram!("frame_latency_ms").record(latency.as_secs_f64() * 1000.0);
        }

        match self.pipeline.draw(mode, frame) {
            Ok(()) => {}
            Err(RenderError::SurfaceLost) => {
                trace!("surface lost; reconfigured for next tick");
            }
            Err(RenderError::NotInitialized) => {}
            Err(e) => error!("Draw error: {}", e),
        }

        if self.last_title_refresh.elapsed() >= TITLE_REFRESH {
            self.last_title_refresh = Instant::now();
            if let Some(window) = &self.window {
                let snapshot = self.stats.load();
                let filter = if self.controls.edge_enabled() {
                    "edges"
                } else {
                    "raw"
                };
                window.set_title(&format!(
                    "edgecam [{}] {:.1} fps / {:.2} ms",
                    filter, snapshot.frames_per_second, snapshot.average_processing_time_ms
                ));
            }
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        match key {
            Key::Named(NamedKey::Escape) => {
                info!("Escape pressed, shutting down");
                self.controls.stop();
                self.pipeline.destroy();
                event_loop.exit();
            }
            Key::Character(text) => match text.as_str() {
                "1" => self.controls.set_mode(RenderMode::Normal),
                "2" => self.controls.set_mode(RenderMode::Grayscale),
                "3" => self.controls.set_mode(RenderMode::Invert),
                "4" => self.controls.set_mode(RenderMode::EdgeDetect),
                "e" | "E" => {
                    let enabled = self.controls.toggle_edge();
                    info!(
                        "edge detection {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
                _ => {}
            },
            _ => {}
        }
    }
}

impl ApplicationHandler for DisplayApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("edgecam")
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height))
            .with_fullscreen(if self.config.fullscreen {
                Some(winit::window::Fullscreen::Borderless(None))
            } else {
                None
            });

        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        // Shader or device failures leave the pipeline uninitialized: the
        // window stays blank while capture statistics keep flowing.
        if let Err(e) = pollster::block_on(self.pipeline.initialize(window.clone())) {
            error!("Render pipeline initialization failed: {}", e);
        }
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                self.controls.stop();
                self.pipeline.destroy();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                self.draw_tick();
            }
            WindowEvent::Resized(size) => {
                self.pipeline.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    let key = event.logical_key.clone();
                    self.handle_key(event_loop, &key);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Run the display event loop on the calling thread until the window closes.
pub fn run_display(
    config: DisplayConfig,
    slot: Arc<FrameSlot>,
    controls: Arc<PipelineControls>,
    stats: Arc<StatsPublisher>,
) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DisplayApp::new(config, slot, controls, stats);
    event_loop.run_app(&mut app)?;
    Ok(())
}
