//! Frame construction, the inverse of extraction
//!
//! Used by the mock source to emit traffic in any policy and by tests and
//! benchmarks to build valid streams.

use super::{CrcTrailer, FramingPolicy, HeaderLayout};
use crate::crc::Crc;
use crate::error::{Result, SensorVisError};

impl FramingPolicy {
    /// Wrap `payload` into one frame the matching [`super::Framer`] would accept
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.validate()?;
        match self {
            FramingPolicy::None | FramingPolicy::Timeout { .. } => Ok(payload.to_vec()),
            FramingPolicy::Carriage | FramingPolicy::LineFeed | FramingPolicy::CarriageLineFeed => {
                let mut frame = payload.to_vec();
                frame.extend_from_slice(self.delimiter().unwrap_or_default());
                Ok(frame)
            }
            FramingPolicy::FixedLength { len } => {
                if payload.len() != *len {
                    return Err(SensorVisError::Config(format!(
                        "payload of {} bytes does not fill a {}-byte fixed frame",
                        payload.len(),
                        len
                    )));
                }
                Ok(payload.to_vec())
            }
            FramingPolicy::Header(header) => encode_header(header, payload, 0),
            FramingPolicy::Crc {
                trailer,
                message_len,
            } => {
                let expected = message_len - (trailer.byte_len() - trailer.length_adjustment());
                if payload.len() != expected {
                    return Err(SensorVisError::Config(format!(
                        "CRC frame payload must be {} bytes, got {}",
                        expected,
                        payload.len()
                    )));
                }
                append_crc(trailer, payload.to_vec())
            }
            FramingPolicy::HeaderCrc { header, trailer } => {
                let crc_counted = trailer.byte_len() - trailer.length_adjustment();
                let frame = encode_header(header, payload, crc_counted)?;
                append_crc(trailer, frame)
            }
        }
    }
}

fn encode_header(header: &HeaderLayout, payload: &[u8], extra: usize) -> Result<Vec<u8>> {
    if header.length_field_offset < header.start_sequence.len() {
        return Err(SensorVisError::Config(
            "length field overlaps the start sequence".into(),
        ));
    }

    let mut length = payload.len() + extra;
    if header.header_included_in_length {
        length += header.header_size;
    }
    let bits = header.length_field_size * 8;
    if bits < 64 && (length as u64) >> bits != 0 {
        return Err(SensorVisError::Config(format!(
            "length {} does not fit a {}-byte length field",
            length, header.length_field_size
        )));
    }

    let mut frame = vec![0u8; header.header_size];
    frame[..header.start_sequence.len()].copy_from_slice(&header.start_sequence);
    let field = header
        .endianness
        .write_uint(length as u64, header.length_field_size);
    frame[header.length_field_offset..header.length_field_offset + header.length_field_size]
        .copy_from_slice(&field);
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn append_crc(trailer: &CrcTrailer, mut frame: Vec<u8>) -> Result<Vec<u8>> {
    let crc = Crc::new(trailer.model)?.checksum(&frame);
    frame.extend(trailer.endianness.write_uint(crc, trailer.byte_len()));
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::lookup_preset;
    use crate::framing::Endianness;

    #[test]
    fn test_encode_delimited() {
        assert_eq!(
            FramingPolicy::CarriageLineFeed.encode(b"{a:1}").unwrap(),
            b"{a:1}\r\n".to_vec()
        );
    }

    #[test]
    fn test_encode_fixed_length_mismatch() {
        let policy = FramingPolicy::FixedLength { len: 4 };
        assert!(policy.encode(b"abc").is_err());
        assert_eq!(policy.encode(b"abcd").unwrap(), b"abcd".to_vec());
    }

    #[test]
    fn test_encode_header() {
        let header = HeaderLayout {
            start_sequence: vec![0xAA, 0xBB],
            header_size: 4,
            length_field_offset: 2,
            length_field_size: 2,
            header_included_in_length: true,
            endianness: Endianness::Little,
        };
        let frame = FramingPolicy::Header(header).encode(&[0xCC, 0xDD]).unwrap();
        assert_eq!(frame, vec![0xAA, 0xBB, 0x06, 0x00, 0xCC, 0xDD]);
    }

    #[test]
    fn test_encode_header_length_overflow() {
        let header = HeaderLayout {
            start_sequence: vec![0x7E],
            header_size: 2,
            length_field_offset: 1,
            length_field_size: 1,
            header_included_in_length: false,
            endianness: Endianness::Little,
        };
        assert!(FramingPolicy::Header(header).encode(&[0u8; 300]).is_err());
    }

    #[test]
    fn test_encode_crc_trailer() {
        let policy = FramingPolicy::Crc {
            trailer: CrcTrailer {
                model: lookup_preset("CRC16-MODBUS").unwrap(),
                crc_included_in_length: false,
                endianness: Endianness::Little,
            },
            message_len: 9,
        };
        let frame = policy.encode(b"123456789").unwrap();
        assert_eq!(&frame[9..], &[0x37, 0x4B]);
    }
}
