//! Audio pipeline
//!
//! A single consumer task owns the timeline, the segmenter state and the
//! MP3 encoder; everything reaches it as a [`PipelineEvent`].

pub mod segmenter;
pub mod timeline;

pub use segmenter::Segmenter;
pub use timeline::Timeline;

use crate::hls::OutputBufferState;
use crate::protocol::UrtpRecord;

/// Messages consumed by the audio pipeline
#[derive(Debug)]
pub enum PipelineEvent {
    /// A decoded URTP record from the ingest side
    Record(UrtpRecord),
    /// Output buffer depth feedback from the publisher
    OutputBuffer(OutputBufferState),
}
