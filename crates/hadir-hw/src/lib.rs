//! hadir-hw — Device capabilities used by the attendance flow.
//!
//! Each device sits behind a small trait so the flow can run against real
//! hardware (V4L2 camera, fixed kiosk position, espeak) or against fakes.

pub mod camera;
pub mod frame;
pub mod location;
pub mod speech;

pub use camera::{
    CameraConstraints, CameraError, CameraProvider, CameraStream, Facing, V4lCameraProvider,
};
pub use frame::Frame;
pub use location::{
    FixedLocationProvider, LocationError, LocationProvider, LocationRequest, PositionFix,
};
pub use speech::{CommandSpeech, SilentSpeech, SpeechFeedback, TracingSpeech};
