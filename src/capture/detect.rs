//! Capture device auto-detection.

use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use super::SourceFormat;

/// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub format: SourceFormat,
}

/// Scan `/dev/video*` for a usable capture device, preferring YUYV (no
/// decode step) over MJPEG. Returns `None` when no device qualifies; the
/// caller falls back to the synthetic source.
pub fn auto_detect_device() -> Option<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let mut mjpeg = false;
        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"YUYV") {
                info!("Found YUYV device: {} - {}", path, caps.card);
                return Some(FoundDevice {
                    path,
                    format: SourceFormat::Yuyv,
                });
            }
            if fmt.fourcc == FourCC::new(b"MJPG") {
                mjpeg = true;
            }
        }
        if mjpeg {
            info!("Found MJPEG device: {} - {}", path, caps.card);
            return Some(FoundDevice {
                path,
                format: SourceFormat::Mjpeg,
            });
        }
    }

    None
}
