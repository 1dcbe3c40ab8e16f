//! End-of-transmission framing
//!
//! A byte source delivers arbitrarily chunked data. The [`Framer`] owns one
//! stream's input buffer and carves complete frames out of it according to a
//! [`FramingPolicy`] chosen when the stream is created.
//!
//! # Policies
//!
//! - Delimiter policies ([`FramingPolicy::Carriage`], [`FramingPolicy::LineFeed`],
//!   [`FramingPolicy::CarriageLineFeed`]) end a frame at the delimiter, which stays
//!   part of the frame.
//! - [`FramingPolicy::FixedLength`] emits every `len` bytes.
//! - [`FramingPolicy::Header`] locates a start sequence, decodes a length field
//!   from a fixed-size header and emits the whole span.
//! - [`FramingPolicy::Crc`] takes fixed-size messages whose trailing bytes carry a
//!   CRC; only frames that verify are emitted, with the trailer stripped.
//! - [`FramingPolicy::HeaderCrc`] delimits with the header rules and then
//!   validates the span with the CRC rules.
//! - [`FramingPolicy::Timeout`] emits whatever has accumulated once the line has
//!   been quiet for the configured interval.
//!
//! Policy parameters are immutable once a [`Framer`] is built; everything that
//! changes while the stream runs lives in [`StreamState`].

mod encoder;
mod framer;
mod link;

pub use framer::{Frame, Framer, FramerStats, StreamState};
pub use link::{LinkSettings, Parity};

use crate::crc::CrcModel;
use crate::error::{Result, SensorVisError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Byte order of multi-byte fields on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

impl Endianness {
    /// Decode up to eight bytes as an unsigned integer
    pub fn read_uint(&self, bytes: &[u8]) -> u64 {
        debug_assert!(bytes.len() <= 8);
        match self {
            Endianness::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
            Endianness::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        }
    }

    /// Encode the low `len` bytes of `value`
    pub fn write_uint(&self, value: u64, len: usize) -> Vec<u8> {
        let le = value.to_le_bytes();
        let mut out = le[..len.min(8)].to_vec();
        if *self == Endianness::Big {
            out.reverse();
        }
        out
    }
}

/// Layout of a length-carrying header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Bytes marking the start of a header; empty means any byte can start one
    pub start_sequence: Vec<u8>,
    /// Total header size in bytes, start sequence included
    pub header_size: usize,
    /// Offset of the length field inside the header
    pub length_field_offset: usize,
    /// Width of the length field in bytes (1-8)
    pub length_field_size: usize,
    /// Whether the length field counts the header bytes
    pub header_included_in_length: bool,
    /// Byte order of the length field
    pub endianness: Endianness,
}

impl HeaderLayout {
    fn validate(&self) -> Result<()> {
        if self.header_size == 0 {
            return Err(SensorVisError::Config("header size must be positive".into()));
        }
        if self.length_field_size == 0 || self.length_field_size > 8 {
            return Err(SensorVisError::Config(format!(
                "length field size must be between 1 and 8 bytes, got {}",
                self.length_field_size
            )));
        }
        if self.length_field_offset + self.length_field_size > self.header_size {
            return Err(SensorVisError::Config(format!(
                "length field [{}, {}) lies outside the {}-byte header",
                self.length_field_offset,
                self.length_field_offset + self.length_field_size,
                self.header_size
            )));
        }
        if self.start_sequence.len() > self.header_size {
            return Err(SensorVisError::Config(
                "start sequence is longer than the header".into(),
            ));
        }
        Ok(())
    }
}

/// CRC trailer carried at the end of each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcTrailer {
    /// CRC variant protecting the frame
    pub model: CrcModel,
    /// Whether the configured length already counts the trailer bytes
    pub crc_included_in_length: bool,
    /// Byte order of the transmitted CRC
    pub endianness: Endianness,
}

impl CrcTrailer {
    /// Trailer size in bytes
    pub fn byte_len(&self) -> usize {
        self.model.byte_len()
    }

    /// Bytes to add to a configured length to cover the trailer
    pub fn length_adjustment(&self) -> usize {
        if self.crc_included_in_length {
            0
        } else {
            self.byte_len()
        }
    }
}

/// Quiescence interval of the timeout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSetting {
    /// Emit after this long without new bytes
    Fixed(Duration),
    /// Emit after one character time of the link
    Auto,
}

impl TimeoutSetting {
    /// Build from seconds, where a negative value selects [`TimeoutSetting::Auto`]
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if secs.is_nan() {
            return Err(SensorVisError::Config("timeout must be a number".into()));
        }
        if secs < 0.0 {
            Ok(TimeoutSetting::Auto)
        } else {
            Duration::try_from_secs_f64(secs)
                .map(TimeoutSetting::Fixed)
                .map_err(|e| SensorVisError::Config(format!("invalid timeout {}: {}", secs, e)))
        }
    }
}

/// End-of-transmission policy of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingPolicy {
    /// Every read is passed through as one frame
    None,
    /// Frames end at `\r`
    Carriage,
    /// Frames end at `\n`
    LineFeed,
    /// Frames end at `\r\n`
    CarriageLineFeed,
    /// Frames are exactly `len` bytes
    FixedLength { len: usize },
    /// Frame length comes from a header field
    Header(HeaderLayout),
    /// Fixed-size frames validated by a trailing CRC
    Crc {
        trailer: CrcTrailer,
        message_len: usize,
    },
    /// Header-delimited frames validated by a trailing CRC
    HeaderCrc {
        header: HeaderLayout,
        trailer: CrcTrailer,
    },
    /// Frames end when the line goes quiet
    Timeout { timeout: TimeoutSetting },
}

impl FramingPolicy {
    /// Short policy name for logs
    pub fn name(&self) -> &'static str {
        match self {
            FramingPolicy::None => "none",
            FramingPolicy::Carriage => "carriage",
            FramingPolicy::LineFeed => "line_feed",
            FramingPolicy::CarriageLineFeed => "carriage_line_feed",
            FramingPolicy::FixedLength { .. } => "fixed_length",
            FramingPolicy::Header(_) => "header",
            FramingPolicy::Crc { .. } => "crc",
            FramingPolicy::HeaderCrc { .. } => "header_crc",
            FramingPolicy::Timeout { .. } => "timeout",
        }
    }

    /// Delimiter bytes of the delimiter policies
    pub fn delimiter(&self) -> Option<&'static [u8]> {
        match self {
            FramingPolicy::Carriage => Some(b"\r"),
            FramingPolicy::LineFeed => Some(b"\n"),
            FramingPolicy::CarriageLineFeed => Some(b"\r\n"),
            _ => None,
        }
    }

    /// CRC trailer of the CRC-validated policies
    pub fn trailer(&self) -> Option<&CrcTrailer> {
        match self {
            FramingPolicy::Crc { trailer, .. } | FramingPolicy::HeaderCrc { trailer, .. } => {
                Some(trailer)
            }
            _ => None,
        }
    }

    /// Check every parameter, failing with a configuration error
    pub fn validate(&self) -> Result<()> {
        match self {
            FramingPolicy::FixedLength { len } if *len == 0 => Err(SensorVisError::Config(
                "fixed frame length must be positive".into(),
            )),
            FramingPolicy::Header(header) => header.validate(),
            FramingPolicy::Crc {
                trailer,
                message_len,
            } => {
                trailer.model.validate()?;
                if *message_len == 0 {
                    return Err(SensorVisError::Config(
                        "CRC message length must be positive".into(),
                    ));
                }
                if trailer.crc_included_in_length && *message_len < trailer.byte_len() {
                    return Err(SensorVisError::Config(format!(
                        "CRC message length {} cannot hold a {}-byte CRC",
                        message_len,
                        trailer.byte_len()
                    )));
                }
                Ok(())
            }
            FramingPolicy::HeaderCrc { header, trailer } => {
                header.validate()?;
                trailer.model.validate()
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> HeaderLayout {
        HeaderLayout {
            start_sequence: vec![0xAA, 0xBB],
            header_size: 4,
            length_field_offset: 2,
            length_field_size: 2,
            header_included_in_length: true,
            endianness: Endianness::Little,
        }
    }

    #[test]
    fn test_read_uint() {
        assert_eq!(Endianness::Little.read_uint(&[0x06, 0x00]), 6);
        assert_eq!(Endianness::Big.read_uint(&[0x06, 0x00]), 0x0600);
        assert_eq!(Endianness::Big.read_uint(&[0x12, 0x34, 0x56]), 0x12_3456);
        assert_eq!(Endianness::Little.read_uint(&[0xFF; 8]), u64::MAX);
    }

    #[test]
    fn test_write_uint() {
        assert_eq!(Endianness::Little.write_uint(0x1234, 2), vec![0x34, 0x12]);
        assert_eq!(Endianness::Big.write_uint(0x1234, 2), vec![0x12, 0x34]);
        let bytes = Endianness::Big.write_uint(0xDEAD_BEEF, 4);
        assert_eq!(Endianness::Big.read_uint(&bytes), 0xDEAD_BEEF);
    }

    #[test]
    fn test_fixed_length_zero_rejected() {
        let policy = FramingPolicy::FixedLength { len: 0 };
        assert!(matches!(policy.validate(), Err(SensorVisError::Config(_))));
    }

    #[test]
    fn test_header_validation() {
        assert!(FramingPolicy::Header(header()).validate().is_ok());

        let mut bad = header();
        bad.length_field_offset = 3;
        assert!(FramingPolicy::Header(bad).validate().is_err());

        let mut bad = header();
        bad.header_size = 0;
        assert!(FramingPolicy::Header(bad).validate().is_err());

        let mut bad = header();
        bad.length_field_size = 0;
        assert!(FramingPolicy::Header(bad).validate().is_err());
    }

    #[test]
    fn test_crc_validation() {
        let trailer = CrcTrailer {
            model: crate::crc::lookup_preset("CRC16-MODBUS").unwrap(),
            crc_included_in_length: true,
            endianness: Endianness::Little,
        };
        assert!(FramingPolicy::Crc {
            trailer,
            message_len: 8
        }
        .validate()
        .is_ok());
        assert!(FramingPolicy::Crc {
            trailer,
            message_len: 1
        }
        .validate()
        .is_err());
        assert!(FramingPolicy::Crc {
            trailer,
            message_len: 0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_timeout_setting() {
        assert_eq!(
            TimeoutSetting::from_secs_f64(-1.0).unwrap(),
            TimeoutSetting::Auto
        );
        assert_eq!(
            TimeoutSetting::from_secs_f64(0.5).unwrap(),
            TimeoutSetting::Fixed(Duration::from_millis(500))
        );
        assert!(TimeoutSetting::from_secs_f64(f64::NAN).is_err());
    }
}
