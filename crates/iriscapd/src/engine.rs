use iriscap_hw::{DeviceSource, Frame, NativeLayer, Readiness, SourceError, WriteOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of one camera for the status call.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub state: String,
    pub active: bool,
    pub init_done: bool,
    /// Why the camera is inert, if it is.
    pub reason: Option<String>,
}

/// Messages sent to an engine thread.
enum EngineRequest {
    Capture {
        reply: oneshot::Sender<Result<Frame, EngineError>>,
    },
    GetExposure {
        reply: oneshot::Sender<Result<Option<u32>, EngineError>>,
    },
    SetExposure {
        value: u32,
        reply: oneshot::Sender<Result<WriteOutcome, EngineError>>,
    },
    GetFrameLength {
        reply: oneshot::Sender<Result<Option<u32>, EngineError>>,
    },
    ReInit {
        device_id: i64,
        reply: oneshot::Sender<Result<Readiness, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<CameraStatus>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to one camera's engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn capture(&self) -> Result<Frame, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await?
    }

    pub async fn get_exposure(&self) -> Result<Option<u32>, EngineError> {
        self.request(|reply| EngineRequest::GetExposure { reply })
            .await?
    }

    pub async fn set_exposure(&self, value: u32) -> Result<WriteOutcome, EngineError> {
        self.request(|reply| EngineRequest::SetExposure { value, reply })
            .await?
    }

    pub async fn get_frame_length(&self) -> Result<Option<u32>, EngineError> {
        self.request(|reply| EngineRequest::GetFrameLength { reply })
            .await?
    }

    pub async fn re_init(&self, device_id: i64) -> Result<Readiness, EngineError> {
        self.request(|reply| EngineRequest::ReInit { device_id, reply })
            .await?
    }

    pub async fn status(&self) -> Result<CameraStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Close the device and stop the engine thread.
    pub async fn close(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Close { reply }).await
    }
}

fn status_of<B: NativeLayer>(source: &DeviceSource<B>) -> CameraStatus {
    let reason = match source.readiness() {
        Readiness::Ready => None,
        Readiness::Inert(err) => Some(err.to_string()),
    };
    let size = source.config().frame_size;
    CameraStatus {
        id: source.id().get(),
        width: size.width,
        height: size.height,
        state: format!("{:?}", source.state()),
        active: source.is_active(),
        init_done: source.init_done(),
        reason,
    }
}

/// Spawn the engine for `source` on a dedicated OS thread.
///
/// Native calls block, so they stay off the async runtime. The thread owns
/// the source and serves requests in arrival order until closed.
pub fn spawn_engine<B: NativeLayer + 'static>(
    name: String,
    source: DeviceSource<B>,
) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new().name(name).spawn(move || {
        tracing::info!(id = %source.id(), "engine thread started");
        while let Some(req) = rx.blocking_recv() {
            match req {
                EngineRequest::Capture { reply } => {
                    let _ = reply.send(source.capture().map_err(EngineError::from));
                }
                EngineRequest::GetExposure { reply } => {
                    let _ = reply.send(source.get_exposure().map_err(EngineError::from));
                }
                EngineRequest::SetExposure { value, reply } => {
                    let _ = reply.send(source.set_exposure(value).map_err(EngineError::from));
                }
                EngineRequest::GetFrameLength { reply } => {
                    let _ = reply.send(source.get_frame_length().map_err(EngineError::from));
                }
                EngineRequest::ReInit { device_id, reply } => {
                    let _ = reply.send(source.re_init(device_id).map_err(EngineError::from));
                }
                EngineRequest::Status { reply } => {
                    let _ = reply.send(status_of(&source));
                }
                EngineRequest::Close { reply } => {
                    source.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        tracing::info!(id = %source.id(), "engine thread exiting");
    })?;

    Ok(EngineHandle { tx })
}

/// Pull frames from `engine` at `frame_rate` and publish the latest one.
///
/// This is the pull-based frame source a streaming consumer subscribes to.
/// Capture errors are transient: logged, then retried on the next tick.
pub fn spawn_frame_pump(
    camera: usize,
    engine: EngineHandle,
    frame_rate: u32,
    initial: Frame,
) -> watch::Receiver<Arc<Frame>> {
    let (tx, rx) = watch::channel(Arc::new(initial));
    let period = (Duration::from_secs(1) / frame_rate.max(1)).max(Duration::from_nanos(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut delivered = 0u64;
        let mut degraded = 0u64;
        let mut failures = 0u64;

        loop {
            ticker.tick().await;
            match engine.capture().await {
                Ok(frame) => {
                    delivered += 1;
                    if frame.is_degraded() {
                        degraded += 1;
                    }
                    if tx.send(Arc::new(frame)).is_err() {
                        break;
                    }
                }
                Err(EngineError::ChannelClosed) => break,
                Err(err) => {
                    failures += 1;
                    tracing::warn!(camera, error = %err, "frame capture failed; retrying next tick");
                }
            }
            if delivered > 0 && delivered % (u64::from(frame_rate) * 10) == 0 {
                tracing::debug!(camera, delivered, degraded, failures, "frame pump stats");
            }
        }
        tracing::info!(camera, delivered, degraded, failures, "frame pump stopped");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use iriscap_hw::mock::{status, CaptureOutcome, MockBackend};
    use iriscap_hw::{FrameSize, SourceConfig};

    fn config() -> SourceConfig {
        SourceConfig {
            frame_size: FrameSize::new(8, 4),
            frame_rate: 100,
            config_path: "mock.toml".into(),
        }
    }

    fn engine(mock: &MockBackend) -> EngineHandle {
        let source = DeviceSource::open(mock.clone(), 0, config()).unwrap();
        spawn_engine("test-engine".into(), source).unwrap()
    }

    #[tokio::test]
    async fn test_requests_round_trip() {
        let mock = MockBackend::new();
        let handle = engine(&mock);

        let frame = handle.capture().await.unwrap();
        assert_eq!(frame.pixels.dim(), (4, 8));

        assert_eq!(
            handle.set_exposure(0x200).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(handle.get_exposure().await.unwrap(), Some(0x200));
        assert!(handle.set_exposure(0).await.is_err());

        let status = handle.status().await.unwrap();
        assert_eq!((status.width, status.height), (8, 4));
        assert!(status.active);
        assert!(status.reason.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_inert_reason() {
        let mock = MockBackend::new();
        mock.fail_initialize(0, status(0xFF71));
        let handle = engine(&mock);

        let status = handle.status().await.unwrap();
        assert!(!status.active);
        assert!(status
            .reason
            .unwrap()
            .contains("USB_BOARD_FW_VERSION_NOT_SUPPORT_ERROR"));

        let readiness = handle.re_init(0).await.unwrap();
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn test_close_stops_engine() {
        let mock = MockBackend::new();
        let handle = engine(&mock);
        handle.close().await.unwrap();
        assert_eq!(mock.open_handles(), 0);
        assert!(matches!(
            handle.capture().await,
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_pump_survives_capture_errors() {
        let mock = MockBackend::new();
        mock.push_capture(CaptureOutcome::Fault(status(0xFF26)));
        mock.push_capture(CaptureOutcome::Fill(9));
        let handle = engine(&mock);

        let mut frames = spawn_frame_pump(0, handle, 100, Frame::degraded(FrameSize::new(8, 4)));
        let frame = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                frames.changed().await.unwrap();
                let frame = frames.borrow_and_update().clone();
                if !frame.is_degraded() {
                    return frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(frame.pixels[[0, 0]], 9);
    }

    #[tokio::test]
    async fn test_pump_handles_sub_nanosecond_period() {
        let mock = MockBackend::new();
        mock.push_capture(CaptureOutcome::Fill(5));
        let handle = engine(&mock);

        let mut frames =
            spawn_frame_pump(0, handle, u32::MAX, Frame::degraded(FrameSize::new(8, 4)));
        tokio::time::timeout(Duration::from_secs(2), frames.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!frames.borrow().is_degraded());
    }
}
