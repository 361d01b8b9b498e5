//! Multi-register field codec.
//!
//! A logical sensor control (exposure, frame length) is spread across several
//! byte-wide registers. Each register contributes the bits selected by its
//! mask; the remaining bits in that byte belong to something else and must
//! survive a write untouched.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{field}: value {value} outside legal range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("{field}: expected {expected} register bytes, got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// One register's share of a field: its address and the bits it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSegment {
    pub address: u16,
    /// Contiguous run of owned bits.
    pub mask: u8,
}

impl RegisterSegment {
    pub const fn new(address: u16, mask: u8) -> Self {
        Self { address, mask }
    }

    fn width(&self) -> u32 {
        self.mask.count_ones()
    }

    fn shift(&self) -> u32 {
        self.mask.trailing_zeros()
    }
}

/// A logical value stored across adjacent registers, most-significant
/// segment first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub name: &'static str,
    pub segments: &'static [RegisterSegment],
    /// Smallest legal value. The largest is implied by the total bit width.
    pub min: u32,
}

/// Sensor integration time in lines.
///
/// `0x3500[7:4]` and `0x3502[3:0]` hold debug and fractional bits that are
/// not part of the value.
pub const EXPOSURE: RegisterField = RegisterField {
    name: "exposure",
    segments: &[
        RegisterSegment::new(0x3500, 0x0F),
        RegisterSegment::new(0x3501, 0xFF),
        RegisterSegment::new(0x3502, 0xF0),
    ],
    min: 1,
};

/// Total frame length in lines (VTS).
pub const FRAME_LENGTH: RegisterField = RegisterField {
    name: "frame_length",
    segments: &[
        RegisterSegment::new(0x380E, 0xFF),
        RegisterSegment::new(0x380F, 0xFF),
    ],
    min: 1,
};

impl RegisterField {
    /// Register addresses in the order `decode`/`encode` expect their bytes.
    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.segments.iter().map(|s| s.address)
    }

    pub fn bits(&self) -> u32 {
        self.segments.iter().map(RegisterSegment::width).sum()
    }

    pub fn max(&self) -> u32 {
        let bits = self.bits();
        if bits >= 32 {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        }
    }

    /// Reject values outside `min..=max` before any register is touched.
    pub fn validate(&self, value: u32) -> Result<(), CodecError> {
        if value < self.min || value > self.max() {
            return Err(CodecError::OutOfRange {
                field: self.name,
                value,
                min: self.min,
                max: self.max(),
            });
        }
        Ok(())
    }

    fn check_len(&self, raw: &[u8]) -> Result<(), CodecError> {
        if raw.len() != self.segments.len() {
            return Err(CodecError::WrongLength {
                field: self.name,
                expected: self.segments.len(),
                actual: raw.len(),
            });
        }
        Ok(())
    }

    /// Reassemble the logical value from raw register bytes.
    pub fn decode(&self, raw: &[u8]) -> Result<u32, CodecError> {
        self.check_len(raw)?;
        let value = self
            .segments
            .iter()
            .zip(raw)
            .fold(0u32, |acc, (seg, &byte)| {
                (acc << seg.width()) | u32::from((byte & seg.mask) >> seg.shift())
            });
        Ok(value)
    }

    /// Produce new register contents carrying `value`, keeping every bit
    /// outside the segment masks as it was in `previous`.
    ///
    /// `previous` must be the current register contents; stale bytes would
    /// clobber whatever else lives in the shared registers.
    pub fn encode(&self, value: u32, previous: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.validate(value)?;
        self.check_len(previous)?;

        let mut out = previous.to_vec();
        let mut remaining = value;
        for (seg, byte) in self.segments.iter().zip(out.iter_mut()).rev() {
            let part = remaining & ((1u32 << seg.width()) - 1);
            remaining >>= seg.width();
            // part fits in seg.width() bits, so the shifted value fits in a byte
            let owned = ((part << seg.shift()) as u8) & seg.mask;
            *byte = (*byte & !seg.mask) | owned;
        }
        Ok(out)
    }
}
