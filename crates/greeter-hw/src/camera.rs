//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    StreamingNotSupported,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl CameraError {
    /// Message suitable for showing to the person standing at the kiosk.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied(_) => {
                "Camera access denied. Please allow camera permissions.".to_string()
            }
            CameraError::DeviceNotFound(_) => {
                "No camera found. Connect a camera and restart the kiosk.".to_string()
            }
            CameraError::DeviceBusy(_) => {
                "The camera is in use by another application.".to_string()
            }
            CameraError::FormatNegotiationFailed(_) | CameraError::StreamingNotSupported => {
                "This camera does not support a usable video format.".to_string()
            }
            CameraError::CaptureFailed(detail) => format!("Camera error: {detail}"),
        }
    }

    fn from_open(device_path: &str, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            io::ErrorKind::NotFound => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
            _ if e.raw_os_error() == Some(16) => {
                // EBUSY
                CameraError::DeviceBusy(format!("{device_path}: {e}"))
            }
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted with BT.601.
    Yuyv,
    /// Motion-JPEG, decoded per frame.
    Mjpg,
    /// Packed 24-bit RGB.
    Rgb3,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpg),
            b"RGB3" => Some(PixelFormat::Rgb3),
            _ => None,
        }
    }
}

/// V4L2 camera device handle.
///
/// One mmap stream is started at open and kept for the life of the handle.
/// The stream holds the device open.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a camera (e.g. "/dev/video0") at the requested resolution.
    ///
    /// The driver may negotiate a different size; the negotiated one is
    /// exposed as `width`/`height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device =
            Device::with_path(device_path).map_err(|e| CameraError::from_open(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or RGB3)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            requested_width = width,
            requested_height = height,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// Capture the next frame from the running stream as RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let image = decode(self.pixel_format, buf, self.width, self.height)?;
        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// Dequeue and drop `count` frames while auto-exposure settles.
    ///
    /// Returns how many frames were actually discarded; a failed dequeue ends
    /// the warm-up early.
    pub fn warm_up(&mut self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        tracing::info!(count, device = %self.device_path, "discarding warmup frames");
        for discarded in 0..count {
            if let Err(e) = self.stream.next() {
                tracing::warn!(error = %e, discarded, "warmup capture failed");
                return discarded;
            }
        }
        count
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn decode(
    pixel_format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<image::RgbImage, CameraError> {
    let converted = match pixel_format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Mjpg => frame::mjpg_to_rgb(buf, width, height),
        PixelFormat::Rgb3 => frame::rgb24_to_rgb(buf, width, height),
    };
    converted.map_err(|e| CameraError::CaptureFailed(format!("{pixel_format:?} conversion failed: {e}")))
}
