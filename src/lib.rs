//! # Chuff Streamer
//!
//! Live audio streaming server for a single remote audio source. URTP
//! datagrams carrying 16 kHz mono speech arrive over UDP or TCP, are
//! decoded and stitched into a continuous PCM timeline, encoded into
//! fixed-duration MP3 segments and published to browsers over HLS.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 UDP datagrams / TCP byte stream
//!                              │
//!                              ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │  Ingest (network::udp / network::tcp)                │
//!  │  frame → verify → decode (codec::decoder)            │
//!  │  timing echo back to the source, max 1/s             │
//!  └──────────────────────────┬───────────────────────────┘
//!                             │ PipelineEvent
//!                             ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │  Audio pipeline (audio::segmenter, 20 ms tick)       │
//!  │  timeline gap fill → LAME → MP3 segment files        │
//!  └──────────────────────────┬───────────────────────────┘
//!                             │ MediaEvent
//!                             ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │  Publisher (hls::publisher, 100 ms tick)             │
//!  │  segment list → playlist → axum HTTP (hls::server)   │
//!  │  buffer-depth feedback to the pipeline               │
//!  └──────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod hls;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sampling frequency of the incoming audio
    pub const SAMPLING_FREQUENCY: u32 = 16_000;

    /// Duration of one incoming audio block in milliseconds
    pub const BLOCK_DURATION_MS: u32 = 20;

    /// Number of samples in a nominal audio block
    pub const SAMPLES_PER_BLOCK: usize =
        (SAMPLING_FREQUENCY as usize) * (BLOCK_DURATION_MS as usize) / 1000;

    /// Samples per MP3 frame at 16 kHz (MPEG-2 Layer III)
    pub const MP3_SAMPLES_PER_FRAME: usize = 576;

    /// Track title written into the playlist for every segment
    pub const MP3_TITLE: &str = "Internet of Chuffs";

    /// Longest sequence-number gap that is filled with audio rather
    /// than dropped
    pub const MAX_GAP_FILL_MS: usize = 500;

    /// Minimum amount of audio the output buffer is kept topped up to
    pub const MIN_OUTPUT_BUFFERED: Duration = Duration::from_millis(1000);

    /// Minimum interval between timing echoes back to the source
    pub const TIMING_DATAGRAM_PERIOD: Duration = Duration::from_secs(1);

    /// Default playlist window in seconds
    pub const DEFAULT_PLAYLIST_WINDOW_SECS: u64 = 7;

    /// Default segment duration in milliseconds
    pub const DEFAULT_SEGMENT_DURATION_MS: u32 = 1000;

    /// Default out-of-service threshold in seconds
    pub const DEFAULT_MAX_OOS_SECS: u64 = 300;

    /// Playlist file extension
    pub const PLAYLIST_EXTENSION: &str = "m3u8";

    /// Segment file extension
    pub const SEGMENT_EXTENSION: &str = "mp3";
}
