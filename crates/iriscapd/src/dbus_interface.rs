use crate::engine::{EngineError, EngineHandle};
use iriscap_hw::{Readiness, SourceError, WriteOutcome};
use zbus::interface;

/// Sentinel returned over the bus when a register value cannot be read.
pub const UNAVAILABLE: i64 = -1;

/// D-Bus configuration interface for the capture daemon.
///
/// Bus name: org.iriscap.Daemon1
/// Object path: /org/iriscap/Daemon1
pub struct CaptureService {
    cameras: Vec<EngineHandle>,
}

impl CaptureService {
    pub fn new(cameras: Vec<EngineHandle>) -> Self {
        Self { cameras }
    }

    fn camera(&self, camera: u32) -> zbus::fdo::Result<&EngineHandle> {
        self.cameras.get(camera as usize).ok_or_else(|| {
            zbus::fdo::Error::InvalidArgs(format!(
                "no camera {camera} (have {})",
                self.cameras.len()
            ))
        })
    }
}

fn failed(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.iriscap.Daemon1")]
impl CaptureService {
    /// Return daemon and per-camera status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let mut cameras = Vec::with_capacity(self.cameras.len());
        for handle in &self.cameras {
            cameras.push(handle.status().await.map_err(failed)?);
        }
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "cameras": cameras,
        })
        .to_string())
    }

    /// Current exposure in lines, or -1 if unavailable.
    async fn get_exposure(&self, camera: u32) -> zbus::fdo::Result<i64> {
        let value = self.camera(camera)?.get_exposure().await.map_err(failed)?;
        Ok(value.map_or(UNAVAILABLE, i64::from))
    }

    /// Set exposure. Out-of-range values and unreadable registers are a
    /// no-op and return false.
    async fn set_exposure(&self, camera: u32, value: u32) -> zbus::fdo::Result<bool> {
        tracing::info!(camera, value, "set_exposure requested");
        match self.camera(camera)?.set_exposure(value).await {
            Ok(WriteOutcome::Applied) => Ok(true),
            Ok(WriteOutcome::Skipped) => Ok(false),
            Err(EngineError::Source(SourceError::OutOfRange(err))) => {
                tracing::warn!(camera, error = %err, "exposure rejected");
                Ok(false)
            }
            Err(err) => Err(failed(err)),
        }
    }

    /// Current frame length in lines, or -1 if unavailable.
    async fn get_frame_length(&self, camera: u32) -> zbus::fdo::Result<i64> {
        let value = self
            .camera(camera)?
            .get_frame_length()
            .await
            .map_err(failed)?;
        Ok(value.map_or(UNAVAILABLE, i64::from))
    }

    /// Re-initialize a camera on another device id. Returns an empty string
    /// when the camera is capturing, otherwise the reason it is inert.
    async fn re_init(&self, camera: u32, device_id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(camera, device_id, "re_init requested");
        match self.camera(camera)?.re_init(device_id).await {
            Ok(Readiness::Ready) => Ok(String::new()),
            Ok(Readiness::Inert(reason)) => Ok(reason.to_string()),
            Err(EngineError::Source(err @ SourceError::InvalidId(_))) => {
                Err(zbus::fdo::Error::InvalidArgs(err.to_string()))
            }
            Err(err) => Err(failed(err)),
        }
    }
}
