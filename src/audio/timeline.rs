//! Outbound PCM timeline
//!
//! Decoded records are appended here in arrival order. Sequence-number
//! jumps and short blocks leave holes in the timeline, which are filled
//! by cyclically repeating the previous record's samples so the encoder
//! always sees a continuous signal. Gaps longer than
//! [`MAX_GAP_FILL_MS`](crate::constants::MAX_GAP_FILL_MS) are dropped
//! instead; if the silence persists the out-of-service watchdog resets
//! the stream.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::constants::{MAX_GAP_FILL_MS, SAMPLES_PER_BLOCK, SAMPLING_FREQUENCY};
use crate::protocol::UrtpRecord;

/// Longest gap that is filled rather than dropped, in samples
const MAX_GAP_FILL_SAMPLES: usize = SAMPLING_FREQUENCY as usize * MAX_GAP_FILL_MS / 1000;

struct PreviousRecord {
    sequence_number: u16,
    audio: Vec<i16>,
}

/// FIFO of PCM samples awaiting encoding
#[derive(Default)]
pub struct Timeline {
    buffer: VecDeque<i16>,
    previous: Option<PreviousRecord>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decoded record, filling any gap the sequence numbers or a
    /// short block reveal
    pub fn push_record(&mut self, record: UrtpRecord) {
        let audio = record.audio.unwrap_or_default();
        let jump = self.previous.as_ref().and_then(|previous| {
            let delta = record.sequence_number.wrapping_sub(previous.sequence_number);
            (delta != 1).then_some((previous.sequence_number, delta))
        });

        match jump {
            Some((previous_sequence, delta)) => {
                warn!(
                    expected = previous_sequence.wrapping_add(1),
                    received = record.sequence_number,
                    "sequence number skip"
                );
                let gap = (delta as usize * SAMPLES_PER_BLOCK).saturating_sub(audio.len());
                self.fill_gap(gap);
                self.buffer.extend(audio.iter().copied());
            }
            None => {
                self.buffer.extend(audio.iter().copied());
                if audio.len() < SAMPLES_PER_BLOCK {
                    self.fill_gap(SAMPLES_PER_BLOCK - audio.len());
                }
            }
        }

        self.previous = Some(PreviousRecord {
            sequence_number: record.sequence_number,
            audio,
        });
    }

    /// Fill a gap by repeating the previous record's samples cyclically,
    /// or with silence when there is nothing to repeat
    fn fill_gap(&mut self, gap: usize) {
        if gap == 0 {
            return;
        }
        if gap >= MAX_GAP_FILL_SAMPLES {
            warn!(samples = gap, "ignored a silly gap");
            return;
        }
        debug!(samples = gap, "filling a gap");
        match self.previous.as_ref().filter(|previous| !previous.audio.is_empty()) {
            Some(previous) => {
                let source = &previous.audio;
                self.buffer
                    .extend((0..gap).map(|index| source[index % source.len()]));
            }
            None => self.buffer.extend(std::iter::repeat(0i16).take(gap)),
        }
    }

    /// Inject silence, used when the output buffer is running dry
    pub fn inject_silence(&mut self, samples: usize) {
        self.buffer.extend(std::iter::repeat(0i16).take(samples));
    }

    /// Take up to `max` samples off the front of the timeline
    pub fn take(&mut self, max: usize) -> Vec<i16> {
        let count = max.min(self.buffer.len());
        self.buffer.drain(..count).collect()
    }

    /// Samples currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
