//! Error taxonomy for the frame pipeline.
//!
//! Per-frame errors ([`ConvertError`], [`FilterError`]) are contained by the
//! orchestrator and never interrupt the capture loop. Initialization errors
//! ([`RenderError`]) are surfaced to the caller for diagnostics.

use thiserror::Error;

/// A raw frame that cannot be packed. The frame is dropped and the
/// pipeline continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("plane {plane} is empty")]
    EmptyPlane { plane: usize },

    #[error("plane {plane} holds {got} bytes, need {need} for {width}x{height}")]
    PlaneTooShort {
        plane: usize,
        got: usize,
        need: usize,
        width: u32,
        height: u32,
    },
}

/// External filter failure. Callers fall back to the unfiltered frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// The filter backend has not finished its own initialization. Failing
    /// closed here keeps unfiltered data from being mislabeled as filtered.
    #[error("filter backend is not initialized")]
    Unavailable,

    #[error("filter execution failed: {0}")]
    Failed(String),

    /// The filter contract requires output with the same byte layout as
    /// the input.
    #[error("filter returned {got} bytes, expected {expected}")]
    BadOutput { expected: usize, got: usize },
}

/// Render pipeline failures. Shader errors are fatal to rendering until the
/// surface is recreated; surface loss recovers on the next tick.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to acquire GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("failed to create presentation surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    #[error("render pipeline link failed: {0}")]
    PipelineLink(String),

    /// The surface was lost or outdated; it has been reconfigured and the
    /// next draw tick will recover.
    #[error("presentation surface was lost")]
    SurfaceLost,

    #[error("surface error: {0}")]
    Surface(wgpu::SurfaceError),

    #[error("render pipeline is not initialized")]
    NotInitialized,
}

/// Capture source failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device does not support video capture")]
    NotACaptureDevice,

    #[error("capture stream is not started")]
    StreamNotStarted,

    #[error("device delivered {got} bytes, expected {expected}")]
    ShortFrame { expected: usize, got: usize },

    #[error("jpeg decode failed: {0}")]
    JpegDecode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
