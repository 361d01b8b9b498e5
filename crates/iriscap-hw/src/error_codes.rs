//! Hardware status code taxonomy.
//!
//! Maps the numeric status codes returned by the USB camera bridge to their
//! labels. The table is built once and never mutated.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Label returned for codes that have no table entry.
pub const UNKNOWN_LABEL: &str = "UNKNOWN_HARDWARE_ERROR";

const TABLE: &[(u32, &str)] = &[
    (0x0000, "USB_CAMERA_NO_ERROR"),
    (0xFF01, "USB_CAMERA_USB_CREATE_ERROR"),
    (0xFF02, "USB_CAMERA_USB_SET_CONTEXT_ERROR"),
    (0xFF03, "USB_CAMERA_VR_COMMAND_ERROR"),
    (0xFF04, "USB_CAMERA_USB_VERSION_ERROR"),
    (0xFF05, "USB_CAMERA_BUFFER_ERROR"),
    (0xFF0B, "USB_CAMERA_I2C_BIT_ERROR"),
    (0xFF0C, "USB_CAMERA_I2C_NACK_ERROR"),
    (0xFF0D, "USB_CAMERA_I2C_TIMEOUT"),
    (0xFF20, "USB_CAMERA_USB_TASK_ERROR"),
    (0xFF21, "USB_CAMERA_DATA_OVERFLOW_ERROR"),
    (0xFF22, "USB_CAMERA_DATA_LACK_ERROR"),
    (0xFF23, "USB_CAMERA_FIFO_FULL_ERROR"),
    (0xFF24, "USB_CAMERA_DATA_LEN_ERROR"),
    (0xFF25, "USB_CAMERA_FRAME_INDEX_ERROR"),
    (0xFF26, "USB_CAMERA_USB_TIMEOUT_ERROR"),
    (0xFF30, "USB_CAMERA_READ_EMPTY_ERROR"),
    (0xFF31, "USB_CAMERA_DEL_EMPTY_ERROR"),
    (0xFF51, "USB_CAMERA_SIZE_EXCEED_ERROR"),
    (0xFF61, "USB_USERDATA_ADDR_ERROR"),
    (0xFF62, "USB_USERDATA_LEN_ERROR"),
    (0xFF71, "USB_BOARD_FW_VERSION_NOT_SUPPORT_ERROR"),
    (0x10000, "config file not found"),
];

static LABELS: OnceLock<HashMap<u32, &'static str>> = OnceLock::new();

fn labels() -> &'static HashMap<u32, &'static str> {
    LABELS.get_or_init(|| TABLE.iter().copied().collect())
}

/// A hardware status code as reported by the native capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const I2C_NACK: Self = Self(0xFF0C);
    pub const I2C_TIMEOUT: Self = Self(0xFF0D);
    pub const USB_TIMEOUT: Self = Self(0xFF26);
    pub const SIZE_EXCEED: Self = Self(0xFF51);
    pub const BOARD_FW_NOT_SUPPORTED: Self = Self(0xFF71);
    pub const CONFIG_NOT_FOUND: Self = Self(0x10000);

    /// Semantic label, or [`UNKNOWN_LABEL`] for unrecognized codes.
    pub fn label(self) -> &'static str {
        labels().get(&self.0).copied().unwrap_or(UNKNOWN_LABEL)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.0, self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_label() {
        assert_eq!(ErrorCode(0x0000).label(), "USB_CAMERA_NO_ERROR");
    }

    #[test]
    fn test_known_labels() {
        assert_eq!(
            ErrorCode::BOARD_FW_NOT_SUPPORTED.label(),
            "USB_BOARD_FW_VERSION_NOT_SUPPORT_ERROR"
        );
        assert_eq!(ErrorCode::CONFIG_NOT_FOUND.label(), "config file not found");
        assert_eq!(ErrorCode(0xFF30).label(), "USB_CAMERA_READ_EMPTY_ERROR");
    }

    #[test]
    fn test_unknown_code_falls_back() {
        let code = ErrorCode(0xBEEF);
        assert!(!labels().contains_key(&code.0));
        assert_eq!(code.label(), UNKNOWN_LABEL);
    }

    #[test]
    fn test_display_includes_code_and_label() {
        assert_eq!(
            ErrorCode::I2C_TIMEOUT.to_string(),
            "0xFF0D (USB_CAMERA_I2C_TIMEOUT)"
        );
        assert_eq!(
            ErrorCode::CONFIG_NOT_FOUND.to_string(),
            "0x10000 (config file not found)"
        );
    }

    #[test]
    fn test_table_has_no_duplicate_codes() {
        assert_eq!(labels().len(), TABLE.len());
    }
}
