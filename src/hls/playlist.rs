//! HLS playlist rendering
//!
//! Standard HLS version 3, CRLF line endings, rebuilt in full on every
//! change to the segment list.

use std::fmt::Write;
use std::time::{Duration, Instant};

/// Lag from the newest point of the playlist to where a browser should
/// begin playing
const MAX_PLAY_LAG: Duration = Duration::from_secs(1);

/// One MP3 file in the rolling HLS window
#[derive(Debug, Clone)]
pub struct Segment {
    pub file_name: String,
    pub title: String,
    pub created_at: Instant,
    pub duration: Duration,
    /// Advertised in the playlist
    pub usable: bool,
    /// Old enough to be deleted from disk
    pub removable: bool,
}

/// Render the playlist for the usable segments, in list order
///
/// Returns the playlist bytes and the total advertised duration.
pub fn render(segments: &[Segment], media_sequence_number: u64) -> (Vec<u8>, Duration) {
    let usable: Vec<&Segment> = segments.iter().filter(|segment| segment.usable).collect();
    let total: Duration = usable.iter().map(|segment| segment.duration).sum();
    let max_duration = usable
        .iter()
        .map(|segment| segment.duration)
        .max()
        .unwrap_or_default();

    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\r\n");
    playlist.push_str("#EXT-X-VERSION:3\r\n");
    if !usable.is_empty() {
        let _ = write!(
            playlist,
            "#EXT-X-TARGETDURATION:{}\r\n",
            max_duration.as_secs_f64().ceil() as u64
        );
        let _ = write!(playlist, "#EXT-X-MEDIA-SEQUENCE:{}\r\n", media_sequence_number);
        if total > MAX_PLAY_LAG {
            let _ = write!(
                playlist,
                "#EXT-X-START:TIME-OFFSET=-{:.3}\r\n",
                MAX_PLAY_LAG.as_secs_f64()
            );
        }
        for segment in &usable {
            let _ = write!(
                playlist,
                "#EXTINF:{:.6}, {}\r\n{}\r\n",
                segment.duration.as_secs_f64(),
                segment.title,
                segment.file_name
            );
        }
    }
    (playlist.into_bytes(), total)
}
