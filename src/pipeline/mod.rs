pub mod orchestrator;
pub mod slot;
pub mod stats;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::render::RenderMode;

pub use orchestrator::Orchestrator;
pub use slot::FrameSlot;
pub use stats::{StatsPublisher, StatsSnapshot, WindowStats};

/// User control surface: simple, idempotent, last-write-wins mutations,
/// readable from any thread.
pub struct PipelineControls {
    mode: AtomicU8,
    edge_enabled: AtomicBool,
    running: AtomicBool,
}

impl PipelineControls {
    pub fn new(initial_mode: RenderMode, edge_enabled: bool) -> Self {
        Self {
            mode: AtomicU8::new(initial_mode.as_u8()),
            edge_enabled: AtomicBool::new(edge_enabled),
            running: AtomicBool::new(true),
        }
    }

    /// Current render mode. Callers on the draw path read this exactly once
    /// per tick so a mid-stream switch applies whole.
    pub fn mode(&self) -> RenderMode {
        RenderMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: RenderMode) {
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    pub fn edge_enabled(&self) -> bool {
        self.edge_enabled.load(Ordering::Acquire)
    }

    pub fn set_edge_enabled(&self, enabled: bool) {
        self.edge_enabled.store(enabled, Ordering::Release);
    }

    /// Flip the edge-detection toggle, returning the new state.
    pub fn toggle_edge(&self) -> bool {
        !self.edge_enabled.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting new frames. In-flight convert/filter work finishes;
    /// buffers and GPU resources are released by their owners on teardown.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for PipelineControls {
    fn default() -> Self {
        Self::new(RenderMode::Normal, true)
    }
}
