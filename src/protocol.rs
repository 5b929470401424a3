//! URTP wire format
//!
//! A URTP record is a 14-byte header followed by up to one audio block of
//! payload:
//!
//! ```text
//! offset  size  field
//!      0     1  sync byte, always 0x5a
//!      1     1  audio coding scheme (0 = PCM_S16, 1 = UNICAM_8)
//!      2     2  sequence number, big-endian, +1 per 20 ms block
//!      4     8  source timestamp in microseconds, big-endian
//!     12     2  payload size in bytes, big-endian
//!     14     n  payload
//! ```
//!
//! Over UDP one record arrives per datagram; over TCP the records are
//! packed back to back and recovered by [`crate::network::reassembly`].

use crate::constants::SAMPLES_PER_BLOCK;
use crate::error::NetworkError;

/// URTP sync byte
pub const SYNC_BYTE: u8 = 0x5a;

/// Size of the fixed URTP header in bytes
pub const URTP_HEADER_SIZE: usize = 14;

/// Bytes per PCM sample on the wire
pub const URTP_SAMPLE_SIZE: usize = 2;

/// Largest payload a record may carry (one 20 ms block of 16-bit PCM)
pub const URTP_PAYLOAD_MAX_SIZE: usize = SAMPLES_PER_BLOCK * URTP_SAMPLE_SIZE;

/// Largest complete record
pub const URTP_DATAGRAM_MAX_SIZE: usize = URTP_HEADER_SIZE + URTP_PAYLOAD_MAX_SIZE;

/// Worst-case IP overhead on top of one record, used to size receive buffers
pub const IP_HEADER_OVERHEAD: usize = 40;

/// Length of a timing echo datagram (header minus coding and payload size)
pub const TIMING_DATAGRAM_SIZE: usize = 11;

/// Audio coding schemes a record may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCoding {
    /// Big-endian signed 16-bit PCM
    PcmSigned16 = 0,
    /// 8-bit samples in 16-sample blocks with a shared 4-bit exponent
    Unicam8 = 1,
}

impl AudioCoding {
    /// Map a wire byte onto a coding scheme
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::PcmSigned16),
            1 => Some(Self::Unicam8),
            _ => None,
        }
    }
}

/// Parsed URTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrtpHeader {
    pub coding: AudioCoding,
    pub sequence_number: u16,
    pub timestamp: u64,
    pub payload_size: usize,
}

impl UrtpHeader {
    /// Parse and verify the first [`URTP_HEADER_SIZE`] bytes of a record
    pub fn parse(bytes: &[u8]) -> Result<Self, NetworkError> {
        if bytes.len() < URTP_HEADER_SIZE {
            return Err(NetworkError::InvalidHeader(format!(
                "{} byte(s) is shorter than a header",
                bytes.len()
            )));
        }
        if bytes[0] != SYNC_BYTE {
            return Err(NetworkError::InvalidHeader(format!(
                "0x{:02x} at the start is not the sync byte",
                bytes[0]
            )));
        }
        let coding = AudioCoding::from_wire(bytes[1]).ok_or_else(|| {
            NetworkError::InvalidHeader(format!(
                "0x{:02x} is not a valid audio coding scheme",
                bytes[1]
            ))
        })?;
        let payload_size = u16::from_be_bytes([bytes[12], bytes[13]]) as usize;
        if payload_size > URTP_PAYLOAD_MAX_SIZE {
            return Err(NetworkError::PayloadTooLarge(payload_size));
        }
        Ok(Self {
            coding,
            sequence_number: u16::from_be_bytes([bytes[2], bytes[3]]),
            timestamp: u64::from_be_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
            ]),
            payload_size,
        })
    }
}

/// A URTP record after audio decoding
///
/// `audio` is `None` when the payload could not be decoded; the timeline
/// treats that as a whole missing block.
#[derive(Debug, Clone)]
pub struct UrtpRecord {
    pub sequence_number: u16,
    pub timestamp: u64,
    pub audio: Option<Vec<i16>>,
}

/// Build the timing echo for a received record
///
/// The echo is the raw header with the audio coding byte and the payload
/// size stripped: sync byte, two sequence number bytes, eight timestamp
/// bytes.
pub fn timing_echo(header_bytes: &[u8]) -> [u8; TIMING_DATAGRAM_SIZE] {
    debug_assert!(header_bytes.len() >= URTP_HEADER_SIZE - URTP_SAMPLE_SIZE);
    let mut echo = [0u8; TIMING_DATAGRAM_SIZE];
    echo[0] = header_bytes[0];
    echo[1..].copy_from_slice(&header_bytes[2..12]);
    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(coding: u8, seq: u16, ts: u64, size: u16) -> Vec<u8> {
        let mut bytes = vec![SYNC_BYTE, coding];
        bytes.extend_from_slice(&seq.to_be_bytes());
        bytes.extend_from_slice(&ts.to_be_bytes());
        bytes.extend_from_slice(&size.to_be_bytes());
        bytes
    }

    #[test]
    fn test_parse_valid_header() {
        let bytes = header(0, 0x1234, 0x0102030405060708, 640);
        let parsed = UrtpHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.coding, AudioCoding::PcmSigned16);
        assert_eq!(parsed.sequence_number, 0x1234);
        assert_eq!(parsed.timestamp, 0x0102030405060708);
        assert_eq!(parsed.payload_size, 640);
    }

    #[test]
    fn test_reject_bad_sync() {
        let mut bytes = header(0, 1, 2, 3);
        bytes[0] = 0xa5;
        assert!(UrtpHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_reject_unknown_coding() {
        let bytes = header(2, 1, 2, 3);
        assert!(UrtpHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_reject_oversized_payload() {
        let bytes = header(1, 1, 2, (URTP_PAYLOAD_MAX_SIZE + 1) as u16);
        assert!(matches!(
            UrtpHeader::parse(&bytes),
            Err(NetworkError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_reject_short_header() {
        assert!(UrtpHeader::parse(&[SYNC_BYTE, 0, 1]).is_err());
    }

    #[test]
    fn test_timing_echo_layout() {
        let bytes = header(1, 0xabcd, 0x1122334455667788, 100);
        let echo = timing_echo(&bytes);
        assert_eq!(echo[0], SYNC_BYTE);
        assert_eq!(&echo[1..3], &0xabcdu16.to_be_bytes());
        assert_eq!(&echo[3..], &0x1122334455667788u64.to_be_bytes());
    }
}
