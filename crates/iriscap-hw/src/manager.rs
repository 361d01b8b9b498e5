//! Device enumeration.

use crate::native::{DeviceIdentity, NativeFault, NativeLayer};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("device enumeration failed: {0}")]
pub struct ManagerError(#[from] pub NativeFault);

/// Lists attached devices. Owns no device handles.
pub struct DeviceManager<B: NativeLayer> {
    backend: B,
    last_seen: Vec<DeviceIdentity>,
}

impl<B: NativeLayer> DeviceManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            last_seen: Vec::new(),
        }
    }

    /// Query the native layer for attached devices.
    ///
    /// Every call goes to the native layer; nothing is cached between
    /// calls except the diagnostic copy behind [`last_seen`](Self::last_seen).
    pub fn enumerate(&mut self) -> Result<Vec<DeviceIdentity>, ManagerError> {
        let devices = self.backend.list_devices()?;
        tracing::debug!(count = devices.len(), "enumerated devices");
        self.last_seen.clone_from(&devices);
        Ok(devices)
    }

    /// Result of the most recent successful enumeration.
    pub fn last_seen(&self) -> &[DeviceIdentity] {
        &self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{status, Call, MockBackend};

    fn identity(serial: &str, index: u32) -> DeviceIdentity {
        DeviceIdentity {
            serial: serial.to_string(),
            index,
        }
    }

    #[test]
    fn test_enumerate_empty() {
        let mut manager = DeviceManager::new(MockBackend::new());
        assert!(manager.enumerate().unwrap().is_empty());
        assert!(manager.last_seen().is_empty());
    }

    #[test]
    fn test_enumerate_queries_every_call() {
        let mock = MockBackend::new().with_devices(vec![identity("usb-1.2", 0)]);
        let mut manager = DeviceManager::new(mock.clone());

        assert_eq!(manager.enumerate().unwrap(), vec![identity("usb-1.2", 0)]);

        mock.set_devices(vec![identity("usb-1.2", 0), identity("usb-1.3", 2)]);
        let devices = manager.enumerate().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(manager.last_seen(), devices.as_slice());
        assert_eq!(mock.calls(), vec![Call::ListDevices, Call::ListDevices]);
    }

    #[test]
    fn test_enumerate_failure_keeps_previous_list() {
        let mock = MockBackend::new().with_devices(vec![identity("usb-1.2", 0)]);
        let mut manager = DeviceManager::new(mock.clone());
        manager.enumerate().unwrap();

        mock.fail_list_devices(status(0xFF01));
        assert!(manager.enumerate().is_err());
        assert_eq!(manager.last_seen(), &[identity("usb-1.2", 0)]);
    }
}
