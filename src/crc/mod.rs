//! Parameterized CRC engine
//!
//! A [`CrcModel`] describes a CRC variant with the usual Rocksoft parameters
//! (width, polynomial, init, final XOR, input/output reflection). A [`Crc`]
//! compiles a model into a 256-entry lookup table once, so framers can verify
//! every frame without rebuilding it.
//!
//! The engine always runs the MSB-first recurrence. Input reflection is applied
//! per byte before it enters the register and output reflection is applied to
//! the final register across `width` bits, which reproduces every catalogue
//! variant including mixed-reflection ones.
//!
//! # Example
//!
//! ```
//! use sensorvis_rs::crc::{lookup_preset, Crc};
//!
//! let model = lookup_preset("CRC32-CRC32").unwrap();
//! let crc = Crc::new(model).unwrap();
//! assert_eq!(crc.checksum(b"123456789"), 0xCBF4_3926);
//! assert!(crc.verify(b"123456789", 0xCBF4_3926));
//! ```

mod presets;

pub use presets::{lookup_preset, CrcPreset, PRESETS};

use crate::error::{Result, SensorVisError};
use serde::{Deserialize, Serialize};

/// Parameter set describing one CRC variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrcModel {
    /// Register width in bits (8, 16, 32 or 64)
    pub width: u8,
    /// Generator polynomial without the implicit top bit
    pub polynomial: u64,
    /// Initial register value
    #[serde(default)]
    pub init_value: u64,
    /// Value XORed into the final register
    #[serde(default)]
    pub final_xor_value: u64,
    /// Reflect each input byte before processing
    #[serde(default)]
    pub reverse_input: bool,
    /// Reflect the final register before the XOR
    #[serde(default)]
    pub reverse_output: bool,
}

impl Default for CrcModel {
    /// CRC-8 with polynomial 0x07, the default model of a CRC framing policy
    fn default() -> Self {
        Self {
            width: 8,
            polynomial: 0x07,
            init_value: 0x00,
            final_xor_value: 0x00,
            reverse_input: false,
            reverse_output: false,
        }
    }
}

impl CrcModel {
    /// Number of bytes the checksum occupies on the wire
    pub fn byte_len(&self) -> usize {
        self.width as usize / 8
    }

    /// Mask selecting the low `width` bits
    fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Check that the model can be compiled into an engine
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.width, 8 | 16 | 32 | 64) {
            return Err(SensorVisError::Config(format!(
                "CRC width must be 8, 16, 32 or 64 bits, got {}",
                self.width
            )));
        }
        let mask = self.mask();
        for (label, value) in [
            ("polynomial", self.polynomial),
            ("init value", self.init_value),
            ("final XOR value", self.final_xor_value),
        ] {
            if value & !mask != 0 {
                return Err(SensorVisError::Config(format!(
                    "CRC {} 0x{:X} does not fit in {} bits",
                    label, value, self.width
                )));
            }
        }
        Ok(())
    }
}

/// A CRC model compiled into a lookup table
#[derive(Clone)]
pub struct Crc {
    model: CrcModel,
    table: Box<[u64; 256]>,
}

impl std::fmt::Debug for Crc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc").field("model", &self.model).finish()
    }
}

impl Crc {
    /// Compile a model, failing on unsupported widths or oversized parameters
    pub fn new(model: CrcModel) -> Result<Self> {
        model.validate()?;

        let width = model.width as u32;
        let mask = model.mask();
        let top_bit = 1u64 << (width - 1);
        let mut table = Box::new([0u64; 256]);

        for (byte, entry) in table.iter_mut().enumerate() {
            let mut reg = (byte as u64) << (width - 8);
            for _ in 0..8 {
                reg = if reg & top_bit != 0 {
                    (reg << 1) ^ model.polynomial
                } else {
                    reg << 1
                };
            }
            *entry = reg & mask;
        }

        Ok(Self { model, table })
    }

    /// The model this engine was built from
    pub fn model(&self) -> &CrcModel {
        &self.model
    }

    /// Compute the checksum of `data`
    pub fn checksum(&self, data: &[u8]) -> u64 {
        let width = self.model.width as u32;
        let shift = width - 8;
        let mask = self.model.mask();

        let mut reg = self.model.init_value;
        for &byte in data {
            let byte = if self.model.reverse_input {
                byte.reverse_bits()
            } else {
                byte
            };
            let index = (((reg >> shift) as u8) ^ byte) as usize;
            reg = ((reg << 8) & mask) ^ self.table[index];
        }

        if self.model.reverse_output {
            reg = reflect(reg, width);
        }
        (reg ^ self.model.final_xor_value) & mask
    }

    /// Whether `expected` is the checksum of `data`
    pub fn verify(&self, data: &[u8], expected: u64) -> bool {
        self.checksum(data) == expected
    }
}

/// Reverse the low `width` bits of `value`
fn reflect(value: u64, width: u32) -> u64 {
    value.reverse_bits() >> (64 - width)
}

/// Compute the checksum of `payload` under `model`
///
/// Builds a fresh table; hold a [`Crc`] when checking many payloads.
pub fn compute(payload: &[u8], model: &CrcModel) -> Result<u64> {
    Ok(Crc::new(*model)?.checksum(payload))
}

/// Whether `expected_crc` matches the checksum of `payload` under `model`
pub fn verify(payload: &[u8], expected_crc: u64, model: &CrcModel) -> Result<bool> {
    Ok(Crc::new(*model)?.verify(payload, expected_crc))
}
