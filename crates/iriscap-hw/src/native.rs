//! Boundary to the native capture layer.
//!
//! Everything that talks to hardware goes through [`NativeLayer`]. The
//! device source and manager only ever see this trait, so the V4L2 backend
//! and the in-memory mock are interchangeable.

use crate::error_codes::ErrorCode;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Failure reported by the native layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NativeFault {
    /// The layer returned a non-success status code.
    #[error("status {0}")]
    Status(ErrorCode),
    /// The layer itself failed (no status code available).
    #[error("library-internal failure: {0}")]
    Library(String),
}

impl NativeFault {
    pub fn library(msg: impl Into<String>) -> Self {
        Self::Library(msg.into())
    }
}

/// Native device id. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidDeviceId {
    #[error("device id must be a non-negative integer, got {0}")]
    Negative(i64),
    #[error("device id {0} exceeds the native id range")]
    TooLarge(i64),
    #[error("device id must be an integer, got {0:?}")]
    NotAnInteger(String),
}

impl DeviceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        if id < 0 {
            return Err(InvalidDeviceId::Negative(id));
        }
        u32::try_from(id)
            .map(Self)
            .map_err(|_| InvalidDeviceId::TooLarge(id))
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: i64 = s
            .trim()
            .parse()
            .map_err(|_| InvalidDeviceId::NotAnInteger(s.to_string()))?;
        Self::try_from(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A device found by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Opaque serial / bus identifier.
    pub serial: String,
    pub index: u32,
}

/// Output frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Construction inputs for a device source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub frame_size: FrameSize,
    /// Frames per second.
    pub frame_rate: u32,
    /// Device configuration file handed to the native initialize call.
    pub config_path: PathBuf,
}

/// An image as delivered by the native layer, before shape checks.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// 8-bit luma, row-major.
    pub data: Vec<u8>,
}

/// The native capture layer.
///
/// A `Handle` is an opaque token for one opened device. It is handed out by
/// [`initialize`](Self::initialize) and consumed by [`close`](Self::close),
/// so at most one owner can hold it.
pub trait NativeLayer: Send {
    type Handle: Send + 'static;

    /// Fresh list of attached devices.
    fn list_devices(&mut self) -> Result<Vec<DeviceIdentity>, NativeFault>;

    fn initialize(
        &mut self,
        id: DeviceId,
        config: &SourceConfig,
    ) -> Result<Self::Handle, NativeFault>;

    fn begin_capture(&mut self, handle: &mut Self::Handle) -> Result<(), NativeFault>;

    /// Next frame. `Ok(None)` means the layer produced no image without
    /// reporting an error.
    fn capture(&mut self, handle: &mut Self::Handle) -> Result<Option<RawImage>, NativeFault>;

    fn read_register(&mut self, handle: &mut Self::Handle, address: u16)
        -> Result<u8, NativeFault>;

    fn write_register(
        &mut self,
        handle: &mut Self::Handle,
        address: u16,
        value: u8,
    ) -> Result<(), NativeFault>;

    fn end_capture(&mut self, handle: &mut Self::Handle) -> Result<(), NativeFault>;

    fn close(&mut self, handle: Self::Handle) -> Result<(), NativeFault>;
}
