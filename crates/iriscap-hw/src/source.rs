//! Device source: lifecycle, capture and register access for one device.
//!
//! ```text
//! Initializing → Active | Failed → Closed
//!      ↑              │       │       │
//!      └──── re_init ─┴───────┴───────┘
//! ```
//!
//! Initialization failures never escape the constructor. They leave the
//! source inert, readiness carries the reason, and capture keeps returning
//! zero-filled frames of the configured size until a `re_init` succeeds.

use crate::error_codes::ErrorCode;
use crate::frame::Frame;
use crate::native::{DeviceId, InvalidDeviceId, NativeFault, NativeLayer, SourceConfig};
use crate::registers::{CodecError, RegisterField, EXPOSURE, FRAME_LENGTH};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;

/// Step of the construction protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Initialize,
    BeginCapture,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialize => f.write_str("opening"),
            Self::BeginCapture => f.write_str("beginning capture on"),
        }
    }
}

/// The device could not be brought up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CriticalError {
    #[error("error {stage} camera {id}: status {code}")]
    Status {
        id: DeviceId,
        stage: InitStage,
        code: ErrorCode,
    },
    #[error("error {stage} camera {id}: {message} (failure inside the native capture library)")]
    Library {
        id: DeviceId,
        stage: InitStage,
        message: String,
    },
}

impl CriticalError {
    fn new(id: DeviceId, stage: InitStage, fault: NativeFault) -> Self {
        match fault {
            NativeFault::Status(code) => Self::Status { id, stage, code },
            NativeFault::Library(message) => Self::Library { id, stage, message },
        }
    }

    pub fn stage(&self) -> InitStage {
        match self {
            Self::Status { stage, .. } | Self::Library { stage, .. } => *stage,
        }
    }

    /// Status code, when the native layer returned one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::Library { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    InvalidId(#[from] InvalidDeviceId),
    #[error("capture failed on camera {id}: {fault}")]
    Capture { id: DeviceId, fault: NativeFault },
    #[error(transparent)]
    OutOfRange(#[from] CodecError),
    #[error("camera {0} is closed")]
    Closed(DeviceId),
}

/// Outcome of the construction protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Inert(CriticalError),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Lifecycle state of a [`DeviceSource`].
///
/// `Initializing` only lasts while the construction protocol runs under the
/// device lock, so callers normally see `Active`, `Failed` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Initializing,
    Active,
    Failed,
    Closed,
}

/// Result of a register write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Nothing was changed on the device.
    Skipped,
}

struct Session<B: NativeLayer> {
    backend: B,
    handle: Option<B::Handle>,
    id: DeviceId,
    state: SourceState,
    active: bool,
    init_done: bool,
    readiness: Readiness,
}

/// One physical device.
///
/// All operations lock the same per-device mutex, so capture and the
/// multi-step register sequences never interleave.
pub struct DeviceSource<B: NativeLayer> {
    config: SourceConfig,
    session: Mutex<Session<B>>,
}

impl<B: NativeLayer> DeviceSource<B> {
    /// Validate `id` and run the construction protocol.
    ///
    /// Only an invalid id is an error here; an unreachable device yields an
    /// inert source (see [`readiness`](Self::readiness)).
    pub fn open(backend: B, id: i64, config: SourceConfig) -> Result<Self, SourceError> {
        let id = DeviceId::try_from(id)?;
        Ok(Self::with_id(backend, id, config))
    }

    /// Construct from an already validated id.
    pub fn with_id(backend: B, id: DeviceId, config: SourceConfig) -> Self {
        let mut session = Session {
            backend,
            handle: None,
            id,
            state: SourceState::Initializing,
            active: false,
            init_done: false,
            readiness: Readiness::Ready,
        };
        session.bring_up(&config);
        Self {
            config,
            session: Mutex::new(session),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session<B>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn id(&self) -> DeviceId {
        self.lock().id
    }

    pub fn state(&self) -> SourceState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn init_done(&self) -> bool {
        self.lock().init_done
    }

    pub fn readiness(&self) -> Readiness {
        self.lock().readiness.clone()
    }

    /// Pull one frame.
    ///
    /// An inactive source returns a degraded frame without touching the
    /// native layer, as does an active one whose native layer hands back no
    /// image. A native failure is a transient [`SourceError::Capture`].
    pub fn capture(&self) -> Result<Frame, SourceError> {
        let mut guard = self.lock();
        let session = &mut *guard;
        if session.state == SourceState::Closed {
            return Err(SourceError::Closed(session.id));
        }
        let size = self.config.frame_size;
        let handle = match session.handle.as_mut() {
            Some(handle) if session.active => handle,
            _ => return Ok(Frame::degraded(size)),
        };

        let raw = session
            .backend
            .capture(handle)
            .map_err(|fault| SourceError::Capture {
                id: session.id,
                fault,
            })?;
        let captured_at = Instant::now();

        let Some(raw) = raw else {
            tracing::warn!(id = %session.id, "native layer returned no image; sending blank frame");
            return Ok(Frame::degraded(size));
        };
        let (width, height) = (raw.width, raw.height);
        match Frame::from_raw(raw, size, captured_at) {
            Some(frame) => Ok(frame),
            None => {
                tracing::warn!(
                    id = %session.id,
                    width,
                    height,
                    expected_width = size.width,
                    expected_height = size.height,
                    "image does not match configured frame size; sending blank frame"
                );
                Ok(Frame::degraded(size))
            }
        }
    }

    /// Current exposure in lines, or `None` if it cannot be read.
    pub fn get_exposure(&self) -> Result<Option<u32>, SourceError> {
        self.read_field(&EXPOSURE)
    }

    /// Write a new exposure.
    ///
    /// Out-of-range values are rejected before any register access. If the
    /// current register contents cannot be read the call changes nothing and
    /// returns [`WriteOutcome::Skipped`].
    pub fn set_exposure(&self, value: u32) -> Result<WriteOutcome, SourceError> {
        self.write_field(&EXPOSURE, value)
    }

    /// Current frame length (VTS) in lines, or `None` if it cannot be read.
    pub fn get_frame_length(&self) -> Result<Option<u32>, SourceError> {
        self.read_field(&FRAME_LENGTH)
    }

    fn read_field(&self, field: &RegisterField) -> Result<Option<u32>, SourceError> {
        let mut session = self.lock();
        session.ensure_open()?;
        let Some(raw) = session.read_raw(field) else {
            return Ok(None);
        };
        match field.decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(id = %session.id, error = %e, "register decode failed");
                Ok(None)
            }
        }
    }

    fn write_field(&self, field: &RegisterField, value: u32) -> Result<WriteOutcome, SourceError> {
        field.validate(value)?;
        let mut session = self.lock();
        session.ensure_open()?;

        let Some(previous) = session.read_raw(field) else {
            tracing::warn!(id = %session.id, field = field.name, value, "register read failed; write skipped");
            return Ok(WriteOutcome::Skipped);
        };
        let next = field.encode(value, &previous)?;
        Ok(session.write_raw(field, &previous, &next))
    }

    /// Tear down the current session and bring the source up again on
    /// `new_id`.
    ///
    /// The id is validated before anything is torn down. After that the
    /// source is always deactivated, the old handle released, and the
    /// construction protocol re-run; the returned readiness reports how it
    /// went.
    pub fn re_init(&self, new_id: i64) -> Result<Readiness, SourceError> {
        let new_id = DeviceId::try_from(new_id)?;
        let mut session = self.lock();
        tracing::info!(old = %session.id, new = %new_id, "re-initializing camera");
        session.active = false;
        session.init_done = false;
        session.release("re-init");
        session.id = new_id;
        session.bring_up(&self.config);
        Ok(session.readiness.clone())
    }

    /// End capture and close the device. Shutdown errors are logged and
    /// dropped. Capture and register calls fail afterwards until `re_init`.
    pub fn close(&self) {
        let mut session = self.lock();
        if session.state == SourceState::Closed {
            return;
        }
        session.active = false;
        session.release("close");
        session.state = SourceState::Closed;
        tracing::info!(id = %session.id, "camera closed");
    }
}

impl<B: NativeLayer> Drop for DeviceSource<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: NativeLayer> Session<B> {
    /// Initialize, then begin capture. Leaves `readiness` describing the
    /// outcome.
    fn bring_up(&mut self, config: &SourceConfig) {
        self.state = SourceState::Initializing;
        self.active = false;
        self.init_done = false;
        tracing::debug!(id = %self.id, config = %config.config_path.display(), "attempting to open camera");

        match self.run_protocol(config) {
            Ok(()) => {
                self.init_done = true;
                self.active = true;
                self.state = SourceState::Active;
                self.readiness = Readiness::Ready;
                tracing::info!(id = %self.id, "camera capturing");
            }
            Err(err) => {
                self.state = SourceState::Failed;
                tracing::error!(
                    id = %self.id,
                    code = err.code().map(|c| c.0),
                    error = %err,
                    "camera unavailable; serving blank frames"
                );
                self.readiness = Readiness::Inert(err);
            }
        }
    }

    fn run_protocol(&mut self, config: &SourceConfig) -> Result<(), CriticalError> {
        let id = self.id;
        let handle = self
            .backend
            .initialize(id, config)
            .map_err(|fault| CriticalError::new(id, InitStage::Initialize, fault))?;
        tracing::debug!(%id, "camera opened");

        // keep the handle even if capture cannot begin, so it is released
        // by close/re_init and registers stay reachable
        let handle = self.handle.insert(handle);
        self.backend
            .begin_capture(handle)
            .map_err(|fault| CriticalError::new(id, InitStage::BeginCapture, fault))
    }

    /// Best-effort end capture and close; failures are logged only.
    fn release(&mut self, reason: &str) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        let id = self.id;
        if let Err(fault) = self.backend.end_capture(&mut handle) {
            tracing::warn!(%id, reason, error = %fault, "end capture failed");
        }
        if let Err(fault) = self.backend.close(handle) {
            tracing::warn!(%id, reason, error = %fault, "close failed");
        }
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.state == SourceState::Closed {
            Err(SourceError::Closed(self.id))
        } else {
            Ok(())
        }
    }

    /// Read every register of `field`, or `None` if any read fails.
    fn read_raw(&mut self, field: &RegisterField) -> Option<Vec<u8>> {
        let id = self.id;
        let handle = self.handle.as_mut()?;
        let mut raw = Vec::with_capacity(field.segments.len());
        for address in field.addresses() {
            match self.backend.read_register(handle, address) {
                Ok(byte) => raw.push(byte),
                Err(fault) => {
                    tracing::warn!(
                        %id,
                        field = field.name,
                        address = format_args!("0x{address:04X}"),
                        error = %fault,
                        "register read failed"
                    );
                    return None;
                }
            }
        }
        Some(raw)
    }

    /// Write `next` byte by byte. If a write fails, restore the bytes
    /// already written so the group is never left half-updated.
    fn write_raw(&mut self, field: &RegisterField, previous: &[u8], next: &[u8]) -> WriteOutcome {
        let id = self.id;
        let Some(handle) = self.handle.as_mut() else {
            return WriteOutcome::Skipped;
        };
        let addresses: Vec<u16> = field.addresses().collect();

        for (i, (&address, &byte)) in addresses.iter().zip(next).enumerate() {
            let Err(fault) = self.backend.write_register(handle, address, byte) else {
                continue;
            };
            tracing::warn!(
                %id,
                field = field.name,
                address = format_args!("0x{address:04X}"),
                error = %fault,
                "register write failed; rolling back"
            );
            for (&address, &byte) in addresses.iter().zip(previous).take(i) {
                if let Err(fault) = self.backend.write_register(handle, address, byte) {
                    tracing::error!(
                        %id,
                        address = format_args!("0x{address:04X}"),
                        error = %fault,
                        "register rollback failed"
                    );
                }
            }
            return WriteOutcome::Skipped;
        }

        tracing::debug!(%id, field = field.name, raw = ?next, "register group written");
        WriteOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{status, Call, CaptureOutcome, MockBackend};
    use crate::native::{FrameSize, RawImage};

    fn config() -> SourceConfig {
        SourceConfig {
            frame_size: FrameSize::new(8, 6),
            frame_rate: 60,
            config_path: "contrib/sensors/ov9281.toml".into(),
        }
    }

    fn open(mock: &MockBackend, id: i64) -> DeviceSource<MockBackend> {
        DeviceSource::open(mock.clone(), id, config()).unwrap()
    }

    #[test]
    fn test_successful_bring_up() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        assert!(source.is_active());
        assert!(source.init_done());
        assert_eq!(source.state(), SourceState::Active);
        assert!(source.readiness().is_ready());
        assert_eq!(mock.calls(), vec![Call::Initialize(0), Call::BeginCapture(0)]);
    }

    #[test]
    fn test_state_settles_after_construction() {
        let mock = MockBackend::new();
        mock.fail_initialize(1, status(0xFF01));
        assert_eq!(open(&mock, 0).state(), SourceState::Active);
        assert_eq!(open(&mock, 1).state(), SourceState::Failed);
    }

    #[test]
    fn test_negative_id_rejected_before_native_call() {
        let mock = MockBackend::new();
        let err = DeviceSource::open(mock.clone(), -1, config()).err();
        assert!(matches!(
            err,
            Some(SourceError::InvalidId(InvalidDeviceId::Negative(-1)))
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_init_status_leaves_source_inert() {
        let mock = MockBackend::new();
        mock.fail_initialize(0, status(0xFF71));
        let source = open(&mock, 0);

        assert!(!source.is_active());
        assert!(!source.init_done());
        assert_eq!(source.state(), SourceState::Failed);
        let Readiness::Inert(err) = source.readiness() else {
            panic!("expected inert source");
        };
        assert_eq!(err.stage(), InitStage::Initialize);
        assert_eq!(err.code(), Some(ErrorCode::BOARD_FW_NOT_SUPPORTED));
        assert!(err
            .to_string()
            .contains("USB_BOARD_FW_VERSION_NOT_SUPPORT_ERROR"));
        assert_eq!(mock.calls(), vec![Call::Initialize(0)]);
    }

    #[test]
    fn test_begin_capture_failure_keeps_handle_for_release() {
        let mock = MockBackend::new();
        mock.fail_begin_capture(2, NativeFault::library("stream refused"));
        let source = open(&mock, 2);

        let Readiness::Inert(err) = source.readiness() else {
            panic!("expected inert source");
        };
        assert_eq!(err.stage(), InitStage::BeginCapture);
        assert_eq!(err.code(), None);
        assert!(err.to_string().contains("native capture library"));
        assert!(!source.init_done());
        assert_eq!(mock.open_handles(), 1);

        source.close();
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_inert_capture_makes_no_native_call() {
        let mock = MockBackend::new();
        mock.fail_initialize(0, status(0xFF01));
        let source = open(&mock, 0);
        mock.clear_calls();

        let frame = source.capture().unwrap();
        assert!(frame.is_degraded());
        assert_eq!(frame.pixels.dim(), (6, 8));
        assert!(frame.pixels.iter().all(|&p| p == 0));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_capture_success_has_timestamp() {
        let mock = MockBackend::new();
        mock.push_capture(CaptureOutcome::Fill(77));
        let source = open(&mock, 0);

        let frame = source.capture().unwrap();
        assert!(frame.captured_at.is_some());
        assert_eq!(frame.pixels.dim(), (6, 8));
        assert!(frame.pixels.iter().all(|&p| p == 77));
    }

    #[test]
    fn test_no_image_degrades() {
        let mock = MockBackend::new();
        mock.push_capture(CaptureOutcome::NoImage);
        let source = open(&mock, 0);

        let frame = source.capture().unwrap();
        assert!(frame.is_degraded());
        assert_eq!(frame.pixels.dim(), (6, 8));
    }

    #[test]
    fn test_wrong_size_image_degrades() {
        let mock = MockBackend::new();
        mock.push_capture(CaptureOutcome::Image(RawImage {
            width: 2,
            height: 2,
            data: vec![1; 4],
        }));
        let source = open(&mock, 0);
        let frame = source.capture().unwrap();
        assert!(frame.is_degraded());
        assert_eq!(frame.pixels.dim(), (6, 8));
    }

    #[test]
    fn test_capture_fault_propagates_and_is_transient() {
        let mock = MockBackend::new();
        mock.push_capture(CaptureOutcome::Fault(status(0xFF26)));
        let source = open(&mock, 0);

        let err = source.capture().unwrap_err();
        assert!(matches!(
            err,
            SourceError::Capture {
                fault: NativeFault::Status(ErrorCode::USB_TIMEOUT),
                ..
            }
        ));
        assert!(source.is_active());
        assert!(!source.capture().unwrap().is_degraded());
    }

    #[test]
    fn test_exposure_round_trip_preserves_shared_bits() {
        let mock = MockBackend::new();
        mock.set_register(0, 0x3500, 0xA0);
        mock.set_register(0, 0x3502, 0x0B);
        let source = open(&mock, 0);

        assert_eq!(source.set_exposure(0x1234).unwrap(), WriteOutcome::Applied);
        assert_eq!(source.get_exposure().unwrap(), Some(0x1234));
        assert_eq!(mock.register(0, 0x3500), Some(0xA1));
        assert_eq!(mock.register(0, 0x3501), Some(0x23));
        assert_eq!(mock.register(0, 0x3502), Some(0x4B));
    }

    #[test]
    fn test_zero_exposure_rejected_without_register_access() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        source.set_exposure(0x0380).unwrap();
        mock.clear_calls();

        assert!(matches!(
            source.set_exposure(0),
            Err(SourceError::OutOfRange(_))
        ));
        assert!(mock.calls().is_empty());
        assert_eq!(source.get_exposure().unwrap(), Some(0x0380));
    }

    #[test]
    fn test_exposure_unavailable_on_read_failure() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        mock.fail_register_read(0x3501, status(0xFF0C));
        assert_eq!(source.get_exposure().unwrap(), None);
    }

    #[test]
    fn test_set_exposure_skips_when_read_fails() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        source.set_exposure(100).unwrap();
        mock.fail_register_read(0x3502, status(0xBEEF));
        mock.clear_calls();

        assert_eq!(source.set_exposure(200).unwrap(), WriteOutcome::Skipped);
        assert!(!mock
            .calls()
            .iter()
            .any(|c| matches!(c, Call::WriteRegister(..))));

        mock.heal_registers();
        assert_eq!(source.get_exposure().unwrap(), Some(100));
    }

    #[test]
    fn test_failed_write_is_rolled_back() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        source.set_exposure(0x0111).unwrap();
        let before: Vec<_> = [0x3500, 0x3501, 0x3502]
            .iter()
            .map(|&a| mock.register(0, a))
            .collect();

        mock.fail_register_write(0x3502, status(0xFF0D));
        assert_eq!(source.set_exposure(0x0FF0).unwrap(), WriteOutcome::Skipped);

        let after: Vec<_> = [0x3500, 0x3501, 0x3502]
            .iter()
            .map(|&a| mock.register(0, a))
            .collect();
        assert_eq!(before, after);
        mock.heal_registers();
        assert_eq!(source.get_exposure().unwrap(), Some(0x0111));
    }

    #[test]
    fn test_frame_length_uses_own_handle() {
        let mock = MockBackend::new();
        mock.set_register(3, 0x380E, 0x03);
        mock.set_register(3, 0x380F, 0x8E);
        let source = open(&mock, 3);
        assert_eq!(source.get_frame_length().unwrap(), Some(0x038E));
        assert!(mock.calls().contains(&Call::ReadRegister(3, 0x380E)));
    }

    #[test]
    fn test_registers_unavailable_without_handle() {
        let mock = MockBackend::new();
        mock.fail_initialize(0, status(0xFF01));
        let source = open(&mock, 0);
        assert_eq!(source.get_exposure().unwrap(), None);
        assert_eq!(source.set_exposure(10).unwrap(), WriteOutcome::Skipped);
    }

    #[test]
    fn test_re_init_releases_old_handle_first() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        mock.clear_calls();

        let readiness = source.re_init(1).unwrap();
        assert!(readiness.is_ready());
        assert_eq!(source.id(), DeviceId::new(1));
        assert_eq!(
            mock.calls(),
            vec![
                Call::EndCapture(0),
                Call::Close(0),
                Call::Initialize(1),
                Call::BeginCapture(1)
            ]
        );
        assert_eq!(mock.open_handles(), 1);
    }

    #[test]
    fn test_re_init_to_failing_device_resets_flags() {
        let mock = MockBackend::new();
        mock.fail_initialize(5, status(0xFF04));
        let source = open(&mock, 0);
        assert!(source.is_active());

        let readiness = source.re_init(5).unwrap();
        assert!(!readiness.is_ready());
        assert!(!source.is_active());
        assert!(!source.init_done());
        assert!(source.capture().unwrap().is_degraded());
    }

    #[test]
    fn test_re_init_ignores_teardown_errors() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        mock.fail_close(NativeFault::library("usb reset"));
        assert!(source.re_init(0).unwrap().is_ready());
        assert!(source.is_active());
    }

    #[test]
    fn test_re_init_rejects_negative_id_before_teardown() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        mock.clear_calls();
        assert!(source.re_init(-4).is_err());
        assert!(mock.calls().is_empty());
        assert!(source.is_active());
    }

    #[test]
    fn test_close_is_terminal() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        source.close();

        assert_eq!(source.state(), SourceState::Closed);
        assert!(!source.is_active());
        assert_eq!(mock.open_handles(), 0);
        assert!(matches!(source.capture(), Err(SourceError::Closed(_))));
        assert!(matches!(source.get_exposure(), Err(SourceError::Closed(_))));
        assert!(matches!(
            source.set_exposure(10),
            Err(SourceError::Closed(_))
        ));

        // second close is a no-op
        mock.clear_calls();
        source.close();
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_close_swallows_shutdown_errors() {
        let mock = MockBackend::new();
        mock.fail_close(status(0xFF31));
        let source = open(&mock, 0);
        source.close();
        assert_eq!(source.state(), SourceState::Closed);
    }

    #[test]
    fn test_re_init_after_close_reopens() {
        let mock = MockBackend::new();
        let source = open(&mock, 0);
        source.close();
        assert!(source.re_init(0).unwrap().is_ready());
        assert!(source.capture().is_ok());
    }

    #[test]
    fn test_drop_releases_handle() {
        let mock = MockBackend::new();
        {
            let _source = open(&mock, 0);
            assert_eq!(mock.open_handles(), 1);
        }
        assert_eq!(mock.open_handles(), 0);
    }
}
