//! iriscap-hw: Sensor module control for USB camera bridges.
//!
//! Device enumeration, the per-device init/capture/teardown state machine,
//! and bit-exact register access for sensor exposure and frame length.

pub mod error_codes;
pub mod frame;
pub mod manager;
pub mod mock;
pub mod native;
pub mod registers;
pub mod sensor_config;
pub mod source;
pub mod v4l2;

pub use error_codes::ErrorCode;
pub use frame::Frame;
pub use manager::DeviceManager;
pub use native::{DeviceId, DeviceIdentity, FrameSize, NativeFault, NativeLayer, SourceConfig};
pub use source::{CriticalError, DeviceSource, Readiness, SourceError, SourceState, WriteOutcome};
pub use v4l2::V4l2Backend;
