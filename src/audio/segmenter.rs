//! MP3 segment production
//!
//! The segmenter ticks every 20 ms: newly arrived records are folded
//! into the timeline, a slice of the timeline is fed to the MP3 encoder
//! and, once a segment's worth of samples has gone through, the encoder
//! output is written out as a segment file with its ID3 timing tag and
//! announced to the publisher.
//!
//! Segments always contain an exact integer number of MP3 frames so that
//! consecutive files concatenate without decode glitches.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::timeline::Timeline;
use crate::audio::PipelineEvent;
use crate::codec::mp3::{id3_priv_tag, Mp3Encoder};
use crate::constants::*;
use crate::error::{Error, StreamError};
use crate::hls::{MediaEvent, OutputBufferState, Segment};
use crate::protocol::UrtpRecord;

/// One segment file being written
struct OpenSegment {
    path: PathBuf,
    file: File,
}

/// The audio pipeline's segment producer
pub struct Segmenter {
    timeline: Timeline,
    encoder: Mp3Encoder,
    live_dir: PathBuf,
    media_tx: UnboundedSender<MediaEvent>,
    raw_pcm: Option<File>,
    pending: Vec<UrtpRecord>,
    /// Samples per segment, rounded down to whole MP3 frames
    samples_per_segment: usize,
    /// Samples still to feed before the current segment closes
    samples_to_encode: usize,
    /// Samples fed into the current segment so far
    samples_encoded: usize,
    /// Time offset of the current segment from the first one
    offset: Duration,
    oos_age: Duration,
    max_oos_age: Duration,
    min_output_buffered: Duration,
    current: Option<OpenSegment>,
}

/// Round a segment duration down to a whole number of MP3 frames
fn samples_per_segment(segment_duration: Duration) -> usize {
    let samples = segment_duration.as_millis() as usize * SAMPLING_FREQUENCY as usize / 1000;
    samples / MP3_SAMPLES_PER_FRAME * MP3_SAMPLES_PER_FRAME
}

impl Segmenter {
    /// Create the segmenter, the encoder and the first segment file
    ///
    /// Failure here is fatal: a live directory that cannot take a
    /// segment file is better discovered at start-up.
    pub fn new(
        live_dir: PathBuf,
        segment_duration: Duration,
        max_oos_age: Duration,
        raw_pcm_path: Option<&Path>,
        media_tx: UnboundedSender<MediaEvent>,
    ) -> Result<Self, Error> {
        let encoder = Mp3Encoder::new()?;
        let raw_pcm = match raw_pcm_path {
            Some(path) => Some(File::create(path)?),
            None => None,
        };
        let samples_per_segment = samples_per_segment(segment_duration);
        let mut segmenter = Self {
            timeline: Timeline::new(),
            encoder,
            live_dir,
            media_tx,
            raw_pcm,
            pending: Vec::new(),
            samples_per_segment,
            samples_to_encode: samples_per_segment,
            samples_encoded: 0,
            offset: Duration::ZERO,
            oos_age: Duration::ZERO,
            max_oos_age,
            min_output_buffered: MIN_OUTPUT_BUFFERED,
            current: None,
        };
        segmenter.current = Some(
            segmenter
                .open_segment()
                .map_err(|e| StreamError::SegmentOpen(e.to_string()))?,
        );
        info!(
            samples = segmenter.samples_per_segment,
            frames = segmenter.samples_per_segment / MP3_SAMPLES_PER_FRAME,
            "segmenter ready"
        );
        Ok(segmenter)
    }

    /// Drive the pipeline until the event channel closes
    pub async fn run(mut self, mut rx: UnboundedReceiver<PipelineEvent>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(BLOCK_DURATION_MS as u64));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                event = rx.recv() => match event {
                    Some(PipelineEvent::Record(record)) => self.pending.push(record),
                    Some(PipelineEvent::OutputBuffer(state)) => self.output_buffer_low(state),
                    None => {
                        info!("pipeline channel closed, stopping");
                        break;
                    }
                },
            }
        }
    }

    /// One 20 ms pass: fold in new records, feed the encoder, close the
    /// segment when it is full
    fn tick(&mut self) {
        let processed = !self.pending.is_empty();
        for record in self.pending.drain(..) {
            self.timeline.push_record(record);
        }

        if processed {
            self.oos_age = Duration::ZERO;
        } else {
            self.oos_age += Duration::from_millis(BLOCK_DURATION_MS as u64);
            if self.oos_age > self.max_oos_age {
                warn!(
                    secs = self.max_oos_age.as_secs(),
                    "no input for too long, resetting the stream"
                );
                self.reset();
            }
        }

        let samples = self.timeline.take(self.samples_to_encode);
        if !samples.is_empty() {
            if let Some(sink) = self.raw_pcm.as_mut() {
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(e) = sink.write_all(&bytes) {
                    warn!(error = %e, "unable to write to the raw PCM sink");
                }
            }
            match self.encoder.encode(&samples) {
                Ok(_) => {
                    self.samples_encoded += samples.len();
                    self.samples_to_encode -= samples.len();
                }
                Err(e) => error!(error = %e, "MP3 encoding failed"),
            }
        }

        if self.samples_to_encode == 0 {
            self.close_segment();
        }
    }

    /// Zero the segment counters and tell the publisher to start over
    fn reset(&mut self) {
        self.oos_age = Duration::ZERO;
        self.offset = Duration::ZERO;
        self.samples_encoded = 0;
        self.samples_to_encode = self.samples_per_segment;
        let _ = self.media_tx.send(MediaEvent::Reset);
    }

    /// Top the timeline up with silence when the output buffer runs low,
    /// so the HLS client never runs dry and stops polling
    fn output_buffer_low(&mut self, state: OutputBufferState) {
        info!(
            buffered_ms = state.buffered.as_millis() as u64,
            "output buffer report"
        );
        if self.min_output_buffered > state.buffer_size / 2 {
            self.min_output_buffered = state.buffer_size / 2;
        }
        if state.buffered < self.min_output_buffered {
            info!(
                samples = self.samples_per_segment,
                ms = self.samples_per_segment * 1000 / SAMPLING_FREQUENCY as usize,
                "injecting silence into the PCM stream"
            );
            self.timeline.inject_silence(self.samples_per_segment);
        }
    }

    /// Flush the encoder, write the segment file, announce it, open the
    /// next one
    fn close_segment(&mut self) {
        let duration = Duration::from_micros(
            self.samples_encoded as u64 * 1_000_000 / SAMPLING_FREQUENCY as u64,
        );

        if let Some(open) = self.current.take() {
            match self.write_segment(open, duration) {
                Ok(file_name) => {
                    let _ = self.media_tx.send(MediaEvent::NewSegment(Segment {
                        file_name,
                        title: MP3_TITLE.to_string(),
                        created_at: Instant::now(),
                        duration,
                        usable: true,
                        removable: false,
                    }));
                }
                Err(e) => error!(error = %e, "unable to write segment"),
            }
        }

        self.offset += duration;
        self.samples_encoded = 0;
        self.samples_to_encode = self.samples_per_segment;
        match self.open_segment() {
            Ok(open) => self.current = Some(open),
            // Skipped this time round; the next close tries again
            Err(e) => error!(error = %e, "unable to open the next segment file"),
        }
    }

    /// Write ID3 tag plus encoded audio into an open segment file
    fn write_segment(&mut self, mut open: OpenSegment, duration: Duration) -> Result<String, Error> {
        let audio = self.encoder.finish_segment()?;
        debug!(
            ms = duration.as_millis() as u64,
            bytes = audio.len(),
            offset_ms = self.offset.as_millis() as u64,
            pcm_buffered = self.timeline.len(),
            path = %open.path.display(),
            "closing segment"
        );
        open.file
            .write_all(&id3_priv_tag(self.offset))
            .map_err(|e| StreamError::SegmentWrite(e.to_string()))?;
        open.file
            .write_all(&audio)
            .map_err(|e| StreamError::SegmentWrite(e.to_string()))?;
        let file_name = open
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(file_name)
    }

    /// Create a fresh randomly named segment file in the live directory
    fn open_segment(&self) -> Result<OpenSegment, Error> {
        let path = self.live_dir.join(format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            SEGMENT_EXTENSION
        ));
        let file = File::create(&path)?;
        debug!(path = %path.display(), "opened segment file");
        Ok(OpenSegment { path, file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_segmenter(
        dir: &Path,
        max_oos_age: Duration,
    ) -> (Segmenter, mpsc::UnboundedReceiver<MediaEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let segmenter = Segmenter::new(
            dir.to_path_buf(),
            Duration::from_millis(1000),
            max_oos_age,
            None,
            tx,
        )
        .unwrap();
        (segmenter, rx)
    }

    fn block(sequence_number: u16) -> UrtpRecord {
        UrtpRecord {
            sequence_number,
            timestamp: 0,
            audio: Some(vec![0x0100; SAMPLES_PER_BLOCK]),
        }
    }

    #[test]
    fn test_samples_per_segment_is_whole_frames() {
        // 1 s at 16 kHz is 27 full MP3 frames
        assert_eq!(samples_per_segment(Duration::from_millis(1000)), 27 * 576);
        assert_eq!(samples_per_segment(Duration::from_millis(500)), 13 * 576);
    }

    #[test]
    fn test_one_second_of_audio_closes_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segmenter, mut rx) = test_segmenter(dir.path(), Duration::from_secs(300));

        // 50 blocks is 16000 samples, one nominal second
        segmenter.pending.extend((0..50).map(block));
        segmenter.tick();

        let event = rx.try_recv().unwrap();
        let segment = match event {
            MediaEvent::NewSegment(segment) => segment,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(segment.duration, Duration::from_millis(972));
        assert_eq!(segment.title, MP3_TITLE);
        assert!(segment.usable);
        assert!(!segment.removable);

        // The file is on disk, starts with the ID3 tag and the leftover
        // samples stay on the timeline
        let bytes = std::fs::read(dir.path().join(&segment.file_name)).unwrap();
        assert_eq!(&bytes[..3], b"ID3");
        assert!(bytes.len() > 73);
        assert_eq!(segmenter.timeline.len(), 16000 - 27 * 576);
    }

    #[test]
    fn test_second_segment_carries_time_offset() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segmenter, mut rx) = test_segmenter(dir.path(), Duration::from_secs(300));

        segmenter.pending.extend((0..100).map(block));
        segmenter.tick();
        segmenter.tick();

        let _first = rx.try_recv().unwrap();
        let second = match rx.try_recv().unwrap() {
            MediaEvent::NewSegment(segment) => segment,
            other => panic!("unexpected event {:?}", other),
        };
        let bytes = std::fs::read(dir.path().join(&second.file_name)).unwrap();
        // 972 ms on a 90 kHz basis
        assert_eq!(&bytes[65..73], &(972u64 * 90).to_be_bytes());
    }

    #[test]
    fn test_oos_watchdog_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segmenter, mut rx) = test_segmenter(dir.path(), Duration::from_millis(30));

        segmenter.offset = Duration::from_secs(5);
        segmenter.tick(); // 20 ms quiet
        segmenter.tick(); // 40 ms quiet, over the threshold
        assert!(matches!(rx.try_recv().unwrap(), MediaEvent::Reset));
        assert_eq!(segmenter.offset, Duration::ZERO);
        assert_eq!(segmenter.samples_to_encode, segmenter.samples_per_segment);

        // Input arriving again clears the watchdog
        segmenter.pending.push(block(0));
        segmenter.tick();
        assert_eq!(segmenter.oos_age, Duration::ZERO);
    }

    #[test]
    fn test_low_output_buffer_injects_silence() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segmenter, _rx) = test_segmenter(dir.path(), Duration::from_secs(300));

        segmenter.output_buffer_low(OutputBufferState {
            buffered: Duration::ZERO,
            buffer_size: Duration::from_secs(7),
        });
        assert_eq!(segmenter.timeline.len(), segmenter.samples_per_segment);
    }

    #[test]
    fn test_healthy_output_buffer_injects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segmenter, _rx) = test_segmenter(dir.path(), Duration::from_secs(300));

        segmenter.output_buffer_low(OutputBufferState {
            buffered: Duration::from_secs(5),
            buffer_size: Duration::from_secs(7),
        });
        assert!(segmenter.timeline.is_empty());
    }

    #[test]
    fn test_min_output_buffered_tracks_small_windows() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segmenter, _rx) = test_segmenter(dir.path(), Duration::from_secs(300));

        // A 1 s window halves the threshold to 500 ms, so 600 ms of
        // buffered audio is considered healthy
        segmenter.output_buffer_low(OutputBufferState {
            buffered: Duration::from_millis(600),
            buffer_size: Duration::from_secs(1),
        });
        assert!(segmenter.timeline.is_empty());
        assert_eq!(segmenter.min_output_buffered, Duration::from_millis(500));
    }
}
