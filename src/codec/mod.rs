//! Audio codecs
//!
//! URTP payload decoding (PCM and UNICAM) on the way in, LAME MP3
//! encoding on the way out.

pub mod decoder;
pub mod filters;
pub mod mp3;

pub use decoder::UrtpDecoder;
pub use mp3::Mp3Encoder;
