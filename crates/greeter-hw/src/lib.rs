//! greeter-hw: Hardware abstraction for the kiosk.
//!
//! Provides V4L2 camera capture (converted to RGB) and spoken output through
//! an external speech synthesiser.

pub mod camera;
pub mod frame;
pub mod speech;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
pub use speech::{CommandSpeaker, SilentSpeaker, Speaker, SpeechError};
