//! URTP payload decoding
//!
//! Turns the payload of a URTP record into signed 16-bit PCM samples.
//! PCM_S16 payloads are a straight byte-swap; UNICAM_8 payloads are
//! expanded from their shared-exponent block form and run through the
//! de-emphasis and de-squeal filters.

use crate::codec::filters::Fir;
use crate::protocol::{AudioCoding, URTP_SAMPLE_SIZE};

/// Samples in one UNICAM compression block
const SAMPLES_PER_UNICAM_BLOCK: usize = 16;

/// Bits of coded sample data per UNICAM block
const UNICAM_SAMPLE_SIZE_BITS: usize = 8;

/// Bits of shared shift value per UNICAM block
const UNICAM_CODED_SHIFT_SIZE_BITS: usize = 4;

/// Total bits one UNICAM block occupies on the wire
const UNICAM_BLOCK_BITS: usize =
    SAMPLES_PER_UNICAM_BLOCK * UNICAM_SAMPLE_SIZE_BITS + UNICAM_CODED_SHIFT_SIZE_BITS;

/// Decoder for URTP audio payloads
///
/// Owns the UNICAM filter chain, whose state persists across records.
pub struct UrtpDecoder {
    deemphasis: Fir,
    desqueal: Fir,
    records_decoded: u64,
    samples_produced: u64,
}

impl Default for UrtpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UrtpDecoder {
    pub fn new() -> Self {
        Self {
            deemphasis: Fir::deemphasis(),
            desqueal: Fir::desqueal(),
            records_decoded: 0,
            samples_produced: 0,
        }
    }

    /// Decode a record payload into PCM samples
    ///
    /// Returns `None` when the record carries no audio at all.
    pub fn decode(&mut self, coding: AudioCoding, payload: &[u8]) -> Option<Vec<i16>> {
        if payload.is_empty() {
            return None;
        }
        let audio = match coding {
            AudioCoding::PcmSigned16 => self.decode_pcm(payload),
            AudioCoding::Unicam8 => self.decode_unicam(payload),
        };
        self.records_decoded += 1;
        self.samples_produced += audio.len() as u64;
        Some(audio)
    }

    /// Decode big-endian signed 16-bit PCM
    fn decode_pcm(&self, payload: &[u8]) -> Vec<i16> {
        payload
            .chunks_exact(URTP_SAMPLE_SIZE)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Decode UNICAM shared-exponent blocks
    ///
    /// Each block is 16 coded 8-bit samples plus a 4-bit shift packed two
    /// blocks per byte; the even block carries the shared byte and uses
    /// its low nibble, the odd block reuses the high nibble. Only whole
    /// 132-bit blocks are decoded, trailing bits are ignored.
    fn decode_unicam(&mut self, payload: &[u8]) -> Vec<i16> {
        let num_blocks = payload.len() * 8 / UNICAM_BLOCK_BITS;
        let mut audio = Vec::with_capacity(num_blocks * SAMPLES_PER_UNICAM_BLOCK);
        let mut source_index = 0;
        let mut shift_values = 0u8;

        for block in 0..num_blocks {
            let coded = &payload[source_index..source_index + SAMPLES_PER_UNICAM_BLOCK];
            source_index += SAMPLES_PER_UNICAM_BLOCK;

            let shift = if block & 1 == 0 {
                shift_values = payload[source_index];
                source_index += 1;
                shift_values & 0x0f
            } else {
                shift_values >> 4
            };

            for &byte in coded {
                // Sign extend from bit 7, then undo the coder's shift
                let sample = (byte as i8 as i16) << shift;
                let filtered = self.desqueal.process(self.deemphasis.process(sample as f32));
                audio.push(filtered as i16);
            }
        }
        audio
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            records_decoded: self.records_decoded,
            samples_produced: self.samples_produced,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub records_decoded: u64,
    pub samples_produced: u64,
}
