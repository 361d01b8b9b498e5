//! Scriptable in-memory native layer.
//!
//! Used by the test suite and by the daemon when no hardware is attached.
//! Clones share state, so a test can keep one clone to script failures and
//! inspect the call log while a device source owns another.

use crate::error_codes::ErrorCode;
use crate::native::{
    DeviceId, DeviceIdentity, FrameSize, NativeFault, NativeLayer, RawImage, SourceConfig,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A native call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDevices,
    Initialize(u32),
    BeginCapture(u32),
    Capture(u32),
    ReadRegister(u32, u16),
    WriteRegister(u32, u16, u8),
    EndCapture(u32),
    Close(u32),
}

/// Scripted result for the next capture call.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// A frame of the configured size with every pixel set to the value.
    Fill(u8),
    /// A frame with explicit dimensions, e.g. to simulate a size mismatch.
    Image(RawImage),
    /// No image and no error.
    NoImage,
    Fault(NativeFault),
}

/// Opaque token for a device opened through the mock.
#[derive(Debug)]
pub struct MockHandle {
    id: u32,
    token: u64,
    frame_size: FrameSize,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<DeviceIdentity>,
    list_fault: Option<NativeFault>,
    init_faults: HashMap<u32, NativeFault>,
    begin_faults: HashMap<u32, NativeFault>,
    close_fault: Option<NativeFault>,
    captures: VecDeque<CaptureOutcome>,
    registers: HashMap<u32, HashMap<u16, u8>>,
    read_faults: HashMap<u16, NativeFault>,
    write_faults: HashMap<u16, NativeFault>,
    open: HashSet<u64>,
    next_token: u64,
    sequence: u8,
    calls: Vec<Call>,
}

/// In-memory [`NativeLayer`].
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Devices reported by enumeration.
    pub fn with_devices(self, devices: Vec<DeviceIdentity>) -> Self {
        self.state().devices = devices;
        self
    }

    pub fn set_devices(&self, devices: Vec<DeviceIdentity>) {
        self.state().devices = devices;
    }

    pub fn fail_list_devices(&self, fault: NativeFault) {
        self.state().list_fault = Some(fault);
    }

    pub fn fail_initialize(&self, id: u32, fault: NativeFault) {
        self.state().init_faults.insert(id, fault);
    }

    pub fn fail_begin_capture(&self, id: u32, fault: NativeFault) {
        self.state().begin_faults.insert(id, fault);
    }

    pub fn fail_close(&self, fault: NativeFault) {
        self.state().close_fault = Some(fault);
    }

    /// Queue the result of a future capture. Without queued outcomes every
    /// capture yields a frame filled with an incrementing value.
    pub fn push_capture(&self, outcome: CaptureOutcome) {
        self.state().captures.push_back(outcome);
    }

    pub fn set_register(&self, id: u32, address: u16, value: u8) {
        self.state()
            .registers
            .entry(id)
            .or_default()
            .insert(address, value);
    }

    pub fn register(&self, id: u32, address: u16) -> Option<u8> {
        self.state()
            .registers
            .get(&id)
            .and_then(|regs| regs.get(&address).copied())
    }

    pub fn fail_register_read(&self, address: u16, fault: NativeFault) {
        self.state().read_faults.insert(address, fault);
    }

    pub fn fail_register_write(&self, address: u16, fault: NativeFault) {
        self.state().write_faults.insert(address, fault);
    }

    /// Remove every scripted register failure.
    pub fn heal_registers(&self) {
        let mut state = self.state();
        state.read_faults.clear();
        state.write_faults.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Handles handed out and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.state().open.len()
    }
}

impl NativeLayer for MockBackend {
    type Handle = MockHandle;

    fn list_devices(&mut self) -> Result<Vec<DeviceIdentity>, NativeFault> {
        let mut state = self.state();
        state.calls.push(Call::ListDevices);
        match state.list_fault.clone() {
            Some(fault) => Err(fault),
            None => Ok(state.devices.clone()),
        }
    }

    fn initialize(&mut self, id: DeviceId, config: &SourceConfig) -> Result<MockHandle, NativeFault> {
        let id = id.get();
        let mut state = self.state();
        state.calls.push(Call::Initialize(id));
        if let Some(fault) = state.init_faults.get(&id) {
            return Err(fault.clone());
        }
        let token = state.next_token;
        state.next_token += 1;
        state.open.insert(token);
        state.registers.entry(id).or_default();
        Ok(MockHandle {
            id,
            token,
            frame_size: config.frame_size,
        })
    }

    fn begin_capture(&mut self, handle: &mut MockHandle) -> Result<(), NativeFault> {
        let mut state = self.state();
        state.calls.push(Call::BeginCapture(handle.id));
        match state.begin_faults.get(&handle.id) {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    fn capture(&mut self, handle: &mut MockHandle) -> Result<Option<RawImage>, NativeFault> {
        let mut state = self.state();
        state.calls.push(Call::Capture(handle.id));
        let outcome = match state.captures.pop_front() {
            Some(outcome) => outcome,
            None => {
                state.sequence = state.sequence.wrapping_add(1);
                CaptureOutcome::Fill(state.sequence)
            }
        };
        let size = handle.frame_size;
        match outcome {
            CaptureOutcome::Fill(value) => Ok(Some(RawImage {
                width: size.width,
                height: size.height,
                data: vec![value; size.pixels()],
            })),
            CaptureOutcome::Image(image) => Ok(Some(image)),
            CaptureOutcome::NoImage => Ok(None),
            CaptureOutcome::Fault(fault) => Err(fault),
        }
    }

    fn read_register(&mut self, handle: &mut MockHandle, address: u16) -> Result<u8, NativeFault> {
        let mut state = self.state();
        state.calls.push(Call::ReadRegister(handle.id, address));
        if let Some(fault) = state.read_faults.get(&address) {
            return Err(fault.clone());
        }
        Ok(state
            .registers
            .get(&handle.id)
            .and_then(|regs| regs.get(&address).copied())
            .unwrap_or(0))
    }

    fn write_register(
        &mut self,
        handle: &mut MockHandle,
        address: u16,
        value: u8,
    ) -> Result<(), NativeFault> {
        let mut state = self.state();
        state.calls.push(Call::WriteRegister(handle.id, address, value));
        if let Some(fault) = state.write_faults.get(&address) {
            return Err(fault.clone());
        }
        state
            .registers
            .entry(handle.id)
            .or_default()
            .insert(address, value);
        Ok(())
    }

    fn end_capture(&mut self, handle: &mut MockHandle) -> Result<(), NativeFault> {
        self.state().calls.push(Call::EndCapture(handle.id));
        Ok(())
    }

    fn close(&mut self, handle: MockHandle) -> Result<(), NativeFault> {
        let mut state = self.state();
        state.calls.push(Call::Close(handle.id));
        // the handle is gone either way, like a real driver releasing the fd
        state.open.remove(&handle.token);
        match state.close_fault.clone() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

/// Convenience for scripting a status-code failure.
pub fn status(code: u32) -> NativeFault {
    NativeFault::Status(ErrorCode(code))
}
