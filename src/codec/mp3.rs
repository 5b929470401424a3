//! MP3 encoding via LAME
//!
//! Thin wrapper around `mp3lame-encoder` treating LAME as a byte-in,
//! byte-out device: PCM samples go in, encoded MP3 bytes accumulate until
//! the segmenter cuts a segment. Encoding is CBR because the VBR header
//! frame confuses players that sniff the first 100 bytes of a segment for
//! an MPEG sync, and segments are flushed gaplessly so consecutive files
//! can be butted up against each other.

use bytes::Bytes;
use mp3lame_encoder::{Builder, Encoder, FlushNoGap, MonoPcm};
use std::time::Duration;

use crate::constants::{MP3_SAMPLES_PER_FRAME, SAMPLING_FREQUENCY};
use crate::error::CodecError;

/// Fixed portion of the ID3v2.4 "PRIV" tag written at the start of every
/// segment; the 8-byte big-endian 90 kHz timestamp follows it
const ID3_PRIV_PREFIX: &[u8] =
    b"ID3\x04\x00\x00\x00\x00\x00\x3fPRIV\x00\x00\x00\x35\x00\x00com.apple.streaming.transportStreamTimestamp\x00";

/// Length of the binary timestamp at the end of the tag
const ID3_TIMESTAMP_LEN: usize = 8;

/// Build the ID3 "PRIV" tag carrying a segment's time offset from the
/// previous segment, expressed in ticks of a 90 kHz clock
pub fn id3_priv_tag(offset: Duration) -> Vec<u8> {
    let ticks = offset.as_micros() as u64 * 90_000 / 1_000_000;
    let mut tag = Vec::with_capacity(ID3_PRIV_PREFIX.len() + ID3_TIMESTAMP_LEN);
    tag.extend_from_slice(ID3_PRIV_PREFIX);
    tag.extend_from_slice(&ticks.to_be_bytes());
    tag
}

/// Mono 16 kHz CBR MP3 encoder
pub struct Mp3Encoder {
    encoder: Encoder,
    /// Encoded bytes for the segment currently being produced
    segment: Vec<u8>,
    samples_consumed: u64,
    bytes_produced: u64,
}

impl Mp3Encoder {
    /// Create and configure the encoder
    pub fn new() -> Result<Self, CodecError> {
        let mut builder = Builder::new()
            .ok_or_else(|| CodecError::EncoderInit("lame_init returned null".to_string()))?;
        builder
            .set_num_channels(1)
            .map_err(|e| CodecError::EncoderInit(format!("channels: {:?}", e)))?;
        builder
            .set_sample_rate(SAMPLING_FREQUENCY)
            .map_err(|e| CodecError::EncoderInit(format!("sample rate: {:?}", e)))?;
        builder
            .set_brate(mp3lame_encoder::Birtate::Kbps96)
            .map_err(|e| CodecError::EncoderInit(format!("bitrate: {:?}", e)))?;
        builder
            .set_quality(mp3lame_encoder::Quality::Best)
            .map_err(|e| CodecError::EncoderInit(format!("quality: {:?}", e)))?;
        let encoder = builder
            .build()
            .map_err(|e| CodecError::EncoderInit(format!("{:?}", e)))?;
        Ok(Self {
            encoder,
            segment: Vec::new(),
            samples_consumed: 0,
            bytes_produced: 0,
        })
    }

    /// Samples in one MP3 frame at the configured rate
    pub fn samples_per_frame(&self) -> usize {
        MP3_SAMPLES_PER_FRAME
    }

    /// Feed PCM samples into the encoder
    ///
    /// Encoded bytes accumulate internally until [`Self::finish_segment`].
    pub fn encode(&mut self, samples: &[i16]) -> Result<usize, CodecError> {
        self.segment
            .reserve(mp3lame_encoder::max_required_buffer_size(samples.len()));
        let bytes = self
            .encoder
            .encode_to_vec(MonoPcm(samples), &mut self.segment)
            .map_err(|e| CodecError::EncodingFailed(format!("{:?}", e)))?;
        self.samples_consumed += samples.len() as u64;
        self.bytes_produced += bytes as u64;
        Ok(bytes)
    }

    /// Flush the encoder gaplessly and take the finished segment's bytes
    pub fn finish_segment(&mut self) -> Result<Bytes, CodecError> {
        self.segment.reserve(7200);
        let bytes = self
            .encoder
            .flush_to_vec::<FlushNoGap>(&mut self.segment)
            .map_err(|e| CodecError::EncodingFailed(format!("{:?}", e)))?;
        self.bytes_produced += bytes as u64;
        Ok(Bytes::from(std::mem::take(&mut self.segment)))
    }

    /// Get statistics
    pub fn stats(&self) -> Mp3EncoderStats {
        Mp3EncoderStats {
            samples_consumed: self.samples_consumed,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct Mp3EncoderStats {
    pub samples_consumed: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id3_tag_layout() {
        let tag = id3_priv_tag(Duration::ZERO);
        assert_eq!(tag.len(), 73);
        assert_eq!(&tag[..3], b"ID3");
        assert_eq!(tag[3], 0x04);
        assert_eq!(tag[9], 0x3f);
        assert_eq!(&tag[10..14], b"PRIV");
        assert_eq!(tag[17], 0x35);
        assert_eq!(&tag[65..], &[0u8; 8]);
    }

    #[test]
    fn test_id3_tag_90khz_offset() {
        let tag = id3_priv_tag(Duration::from_secs(1));
        assert_eq!(&tag[65..], &90_000u64.to_be_bytes());

        let tag = id3_priv_tag(Duration::from_millis(972));
        assert_eq!(&tag[65..], &(972u64 * 90).to_be_bytes());
    }

    #[test]
    fn test_encode_produces_mp3_frames() {
        let mut encoder = Mp3Encoder::new().unwrap();
        let samples = vec![0i16; SAMPLING_FREQUENCY as usize];
        encoder.encode(&samples).unwrap();
        let segment = encoder.finish_segment().unwrap();
        assert!(!segment.is_empty());
        // MPEG sync at the very start of the stream
        assert_eq!(segment[0], 0xff);
        let stats = encoder.stats();
        assert_eq!(stats.samples_consumed, SAMPLING_FREQUENCY as u64);
        assert_eq!(stats.bytes_produced as usize, segment.len());
    }

    #[test]
    fn test_segment_buffer_resets_after_finish() {
        let mut encoder = Mp3Encoder::new().unwrap();
        encoder.encode(&vec![0i16; 5760]).unwrap();
        let first = encoder.finish_segment().unwrap();
        assert!(!first.is_empty());
        encoder.encode(&vec![0i16; 576]).unwrap();
        let second = encoder.finish_segment().unwrap();
        // The second segment starts from an empty buffer
        assert!(second.len() < first.len() + 1500);
    }
}
