//! Named CRC presets
//!
//! The catalogue names follow the CRC RevEng catalogue. `check` is the
//! checksum of the ASCII string `123456789` under each model.

use super::CrcModel;
use crate::error::{Result, SensorVisError};

/// A named, well-known CRC model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcPreset {
    /// Name used in configuration files (e.g. `CRC16-MODBUS`)
    pub name: &'static str,
    /// Catalogue name (e.g. `CRC-16/MODBUS`)
    pub catalogue_name: &'static str,
    /// The model parameters
    pub model: CrcModel,
    /// Checksum of `123456789`
    pub check: u64,
}

#[allow(clippy::too_many_arguments)]
const fn preset(
    name: &'static str,
    catalogue_name: &'static str,
    width: u8,
    polynomial: u64,
    init_value: u64,
    final_xor_value: u64,
    reflected: bool,
    check: u64,
) -> CrcPreset {
    CrcPreset {
        name,
        catalogue_name,
        model: CrcModel {
            width,
            polynomial,
            init_value,
            final_xor_value,
            reverse_input: reflected,
            reverse_output: reflected,
        },
        check,
    }
}

/// All supported presets
pub const PRESETS: &[CrcPreset] = &[
    preset("CRC8-CCITT", "CRC-8/SMBUS", 8, 0x07, 0x00, 0x00, false, 0xF4),
    preset("CRC8-SAEJ1850", "CRC-8/SAE-J1850", 8, 0x1D, 0xFF, 0xFF, false, 0x4B),
    preset("CRC8-SAEJ1850-ZERO", "CRC-8/GSM-A", 8, 0x1D, 0x00, 0x00, false, 0x37),
    preset("CRC8-AUTOSAR", "CRC-8/AUTOSAR", 8, 0x2F, 0xFF, 0xFF, false, 0xDF),
    preset("CRC8-BLUETOOTH", "CRC-8/BLUETOOTH", 8, 0xA7, 0x00, 0x00, true, 0x26),
    preset("CRC8-MAXIM-DOW", "CRC-8/MAXIM-DOW", 8, 0x31, 0x00, 0x00, true, 0xA1),
    preset("CRC16-CCITT", "CRC-16/IBM-3740", 16, 0x1021, 0xFFFF, 0x0000, false, 0x29B1),
    preset("CRC16-XMODEM", "CRC-16/XMODEM", 16, 0x1021, 0x0000, 0x0000, false, 0x31C3),
    preset("CRC16-GSM", "CRC-16/GSM", 16, 0x1021, 0x0000, 0xFFFF, false, 0xCE3C),
    preset("CRC16-PROFIBUS", "CRC-16/PROFIBUS", 16, 0x1DCF, 0xFFFF, 0xFFFF, false, 0xA819),
    preset("CRC16-MODBUS", "CRC-16/MODBUS", 16, 0x8005, 0xFFFF, 0x0000, true, 0x4B37),
    preset("CRC16-KERMIT", "CRC-16/KERMIT", 16, 0x1021, 0x0000, 0x0000, true, 0x2189),
    preset(
        "CRC32-CRC32",
        "CRC-32/ISO-HDLC",
        32,
        0x04C1_1DB7,
        0xFFFF_FFFF,
        0xFFFF_FFFF,
        true,
        0xCBF4_3926,
    ),
    preset(
        "CRC32-AUTOSAR",
        "CRC-32/AUTOSAR",
        32,
        0xF4AC_FB13,
        0xFFFF_FFFF,
        0xFFFF_FFFF,
        true,
        0x1697_D06A,
    ),
    preset(
        "CRC32-BZIP2",
        "CRC-32/BZIP2",
        32,
        0x04C1_1DB7,
        0xFFFF_FFFF,
        0xFFFF_FFFF,
        false,
        0xFC89_1918,
    ),
    preset(
        "CRC32-POSIX",
        "CRC-32/CKSUM",
        32,
        0x04C1_1DB7,
        0x0000_0000,
        0xFFFF_FFFF,
        false,
        0x765E_7680,
    ),
    preset(
        "CRC64-ECMA",
        "CRC-64/ECMA-182",
        64,
        0x42F0_E1EB_A9EA_3693,
        0,
        0,
        false,
        0x6C40_DF5F_0B49_7347,
    ),
];

/// Look up a preset model by configuration name or catalogue name
///
/// Matching ignores ASCII case, so `crc16-modbus` and `CRC-16/MODBUS` both work.
pub fn lookup_preset(name: &str) -> Result<CrcModel> {
    PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name) || p.catalogue_name.eq_ignore_ascii_case(name))
        .map(|p| p.model)
        .ok_or_else(|| SensorVisError::Config(format!("Unknown CRC preset '{}'", name)))
}
