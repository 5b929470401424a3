//! URTP recovery from a byte stream
//!
//! TCP delivers URTP records packed back to back with no framing of its
//! own, so a deterministic state machine walks the byte stream: one byte
//! at a time through the header fields, then bulk reads of the payload.
//! Anything that fails a header check sends the machine back to hunting
//! for a sync byte, one byte forward at a time.

use tracing::warn;

use crate::protocol::{AudioCoding, SYNC_BYTE, URTP_PAYLOAD_MAX_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingSync,
    AwaitingCoding,
    AwaitingSequenceNumber,
    AwaitingTimestamp,
    AwaitingPayloadSize,
    AwaitingPayload,
}

/// Reassembles complete URTP records from stream fragments
///
/// One instance per TCP connection; dropped with it.
pub struct StreamReassembler {
    state: State,
    header: Vec<u8>,
    byte_count: usize,
    payload_size: usize,
    record: Vec<u8>,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingSync,
            header: Vec::with_capacity(crate::protocol::URTP_HEADER_SIZE),
            byte_count: 0,
            payload_size: 0,
            record: Vec::new(),
        }
    }

    fn abort_to_sync(&mut self) {
        self.header.clear();
        self.byte_count = 0;
        self.payload_size = 0;
        self.state = State::AwaitingSync;
    }

    /// Feed stream bytes in, get every record they complete back out
    ///
    /// Each returned record is the full wire form, header included.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        let mut index = 0;

        while index < data.len() {
            match self.state {
                State::AwaitingSync => {
                    let byte = data[index];
                    index += 1;
                    if byte == SYNC_BYTE {
                        self.header.clear();
                        self.header.push(byte);
                        self.state = State::AwaitingCoding;
                    }
                }
                State::AwaitingCoding => {
                    let byte = data[index];
                    index += 1;
                    if AudioCoding::from_wire(byte).is_some() {
                        self.header.push(byte);
                        self.state = State::AwaitingSequenceNumber;
                    } else {
                        warn!(byte, "not a valid audio coding scheme, resyncing");
                        self.abort_to_sync();
                    }
                }
                State::AwaitingSequenceNumber => {
                    self.header.push(data[index]);
                    index += 1;
                    self.byte_count += 1;
                    if self.byte_count >= 2 {
                        self.byte_count = 0;
                        self.state = State::AwaitingTimestamp;
                    }
                }
                State::AwaitingTimestamp => {
                    self.header.push(data[index]);
                    index += 1;
                    self.byte_count += 1;
                    if self.byte_count >= 8 {
                        self.byte_count = 0;
                        self.state = State::AwaitingPayloadSize;
                    }
                }
                State::AwaitingPayloadSize => {
                    let byte = data[index];
                    index += 1;
                    self.header.push(byte);
                    self.payload_size = (self.payload_size << 8) | byte as usize;
                    self.byte_count += 1;
                    if self.byte_count >= 2 {
                        self.byte_count = 0;
                        if self.payload_size > URTP_PAYLOAD_MAX_SIZE {
                            warn!(
                                declared = self.payload_size,
                                maximum = URTP_PAYLOAD_MAX_SIZE,
                                "declared payload too large, resyncing"
                            );
                            self.abort_to_sync();
                        } else {
                            self.record = std::mem::take(&mut self.header);
                            if self.payload_size == 0 {
                                records.push(std::mem::take(&mut self.record));
                                self.abort_to_sync();
                            } else {
                                self.state = State::AwaitingPayload;
                            }
                        }
                    }
                }
                State::AwaitingPayload => {
                    let available = data.len() - index;
                    let take = available.min(self.payload_size);
                    self.record.extend_from_slice(&data[index..index + take]);
                    index += take;
                    self.payload_size -= take;
                    if self.payload_size == 0 {
                        records.push(std::mem::take(&mut self.record));
                        self.abort_to_sync();
                    }
                }
            }
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{UrtpHeader, URTP_HEADER_SIZE};

    fn wire_record(coding: u8, sequence: u16, timestamp: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![SYNC_BYTE, coding];
        bytes.extend_from_slice(&sequence.to_be_bytes());
        bytes.extend_from_slice(&timestamp.to_be_bytes());
        bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_single_record_in_one_read() {
        let record = wire_record(0, 42, 1234, &[1, 2, 3, 4]);
        let mut reassembler = StreamReassembler::new();
        let records = reassembler.feed(&record);
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn test_record_delivered_byte_by_byte() {
        let record = wire_record(1, 7, 99, &vec![0xaa; 640]);
        let mut reassembler = StreamReassembler::new();
        let mut records = Vec::new();
        for byte in &record {
            records.extend(reassembler.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(records, vec![record]);
    }

    #[test]
    fn test_header_then_pause_then_payload() {
        // The first ten header bytes arrive alone, the rest later
        let record = wire_record(0, 3, 5, &vec![0x55; 640]);
        let mut reassembler = StreamReassembler::new();
        assert!(reassembler.feed(&record[..10]).is_empty());
        let records = reassembler.feed(&record[10..]);
        assert_eq!(records.len(), 1);
        let header = UrtpHeader::parse(&records[0]).unwrap();
        assert_eq!(header.sequence_number, 3);
        assert_eq!(header.timestamp, 5);
        assert_eq!(header.payload_size, 640);
    }

    #[test]
    fn test_two_records_in_one_read() {
        let first = wire_record(0, 1, 10, &[1, 2]);
        let second = wire_record(0, 2, 20, &[3, 4]);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        let mut reassembler = StreamReassembler::new();
        assert_eq!(reassembler.feed(&stream), vec![first, second]);
    }

    #[test]
    fn test_garbage_before_sync_is_discarded() {
        let record = wire_record(0, 9, 0, &[5, 6]);
        let mut stream = vec![0x00, 0x17, 0xfe];
        stream.extend_from_slice(&record);
        let mut reassembler = StreamReassembler::new();
        assert_eq!(reassembler.feed(&stream), vec![record]);
    }

    #[test]
    fn test_bad_coding_aborts_and_recovers() {
        let record = wire_record(1, 9, 0, &[5, 6]);
        let mut stream = vec![SYNC_BYTE, 0x02];
        stream.extend_from_slice(&record);
        let mut reassembler = StreamReassembler::new();
        assert_eq!(reassembler.feed(&stream), vec![record]);
    }

    #[test]
    fn test_oversized_payload_aborts_and_recovers() {
        let mut bogus = wire_record(0, 1, 2, &[]);
        bogus[12] = 0xff;
        bogus[13] = 0xff;
        let record = wire_record(0, 2, 3, &[7]);
        let mut stream = bogus;
        stream.extend_from_slice(&record);
        let mut reassembler = StreamReassembler::new();
        assert_eq!(reassembler.feed(&stream), vec![record]);
    }

    #[test]
    fn test_zero_payload_emits_immediately() {
        let record = wire_record(0, 5, 6, &[]);
        let mut reassembler = StreamReassembler::new();
        let records = reassembler.feed(&record);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), URTP_HEADER_SIZE);
    }

    #[test]
    fn test_every_embedded_record_emitted_once_in_order() {
        let mut stream = vec![0xde, 0xad];
        let mut expected = Vec::new();
        for sequence in 0..20u16 {
            let record = wire_record((sequence % 2) as u8, sequence, sequence as u64, &[0x11; 32]);
            stream.extend_from_slice(&record);
            expected.push(record);
            stream.push(0x00); // stray byte between records
        }
        let mut reassembler = StreamReassembler::new();
        // Deliver in awkward chunk sizes
        let mut records = Vec::new();
        for chunk in stream.chunks(7) {
            records.extend(reassembler.feed(chunk));
        }
        assert_eq!(records, expected);
    }
}
