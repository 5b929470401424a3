//! Segment lifecycle and playlist ownership
//!
//! The publisher keeps the rolling list of segments, ages them out of
//! the playlist, deletes them from disk once they are well past the
//! window and reports the output buffer depth back to the audio
//! pipeline every time a segment retires.
//!
//! Segment list and playlist bytes are both mutex guarded: the 100 ms
//! aging tick and the control consumer mutate them, HTTP handlers only
//! read the playlist bytes.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::audio::PipelineEvent;
use crate::error::{Error, StreamError};
use crate::hls::playlist::{self, Segment};
use crate::hls::{MediaEvent, OutputBufferState};

struct SegmentList {
    segments: Vec<Segment>,
    media_sequence_number: u64,
}

/// Owner of the segment window and the playlist
pub struct Publisher {
    list: Mutex<SegmentList>,
    playlist: Mutex<Vec<u8>>,
    live_dir: PathBuf,
    playlist_file: PathBuf,
    playlist_window: Duration,
    pipeline_tx: UnboundedSender<PipelineEvent>,
}

impl Publisher {
    /// Create the publisher and write the initial, empty playlist
    ///
    /// Failing to create the playlist file is fatal; everything else the
    /// publisher does later is retried on the next tick.
    pub fn new(
        live_dir: PathBuf,
        playlist_file: PathBuf,
        playlist_window: Duration,
        pipeline_tx: UnboundedSender<PipelineEvent>,
    ) -> Result<Self, Error> {
        let publisher = Self {
            list: Mutex::new(SegmentList {
                segments: Vec::new(),
                media_sequence_number: 0,
            }),
            playlist: Mutex::new(Vec::new()),
            live_dir,
            playlist_file,
            playlist_window,
            pipeline_tx,
        };
        {
            let list = publisher.list.lock().expect("segment list lock poisoned");
            let (_, written) = publisher.rebuild_playlist(&list);
            written.map_err(|e| StreamError::PlaylistCreate(e.to_string()))?;
        }
        Ok(publisher)
    }

    /// A copy of the current playlist bytes, for serving
    pub fn playlist_bytes(&self) -> Vec<u8> {
        self.playlist.lock().expect("playlist lock poisoned").clone()
    }

    /// Regenerate the playlist bytes and the on-disk copy
    ///
    /// Returns the total advertised duration and the outcome of the
    /// file write; only start-up treats the latter as fatal.
    fn rebuild_playlist(&self, list: &SegmentList) -> (Duration, std::io::Result<()>) {
        let (bytes, total) = playlist::render(&list.segments, list.media_sequence_number);
        let mut playlist = self.playlist.lock().expect("playlist lock poisoned");
        info!(
            segments = list.segments.iter().filter(|s| s.usable).count(),
            "made a playlist"
        );
        // Keep the debug copy on disk in step, under the same lock
        let written = std::fs::write(&self.playlist_file, &bytes);
        *playlist = bytes;
        (total, written)
    }

    /// Run the 100 ms aging and garbage collection tick forever
    pub async fn run_gc(self: std::sync::Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            self.tick(Instant::now());
        }
    }

    /// Consume control messages from the segmenter until it goes away
    pub async fn run_control(self: std::sync::Arc<Self>, mut rx: UnboundedReceiver<MediaEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                MediaEvent::NewSegment(segment) => self.add_segment(segment),
                MediaEvent::Reset => self.reset(),
            }
        }
        info!("media control channel closed, stopping");
    }

    /// Append a freshly produced segment and advertise it
    fn add_segment(&self, segment: Segment) {
        let mut list = self.list.lock().expect("segment list lock poisoned");
        info!(
            file = %segment.file_name,
            ms = segment.duration.as_millis() as u64,
            "adding new segment"
        );
        list.segments.push(segment);
        let (_, written) = self.rebuild_playlist(&list);
        if let Err(e) = written {
            warn!(error = %e, "unable to update the playlist file");
        }
    }

    /// Drop every segment, from disk and from the playlist
    fn reset(&self) {
        info!("resetting the stream");
        let mut list = self.list.lock().expect("segment list lock poisoned");
        for segment in &list.segments {
            let path = self.live_dir.join(&segment.file_name);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "unable to delete segment file");
            }
        }
        list.segments.clear();
        list.media_sequence_number = 0;
        let (_, written) = self.rebuild_playlist(&list);
        if let Err(e) = written {
            warn!(error = %e, "unable to update the playlist file");
        }
    }

    /// One aging pass over the segment list
    ///
    /// Segments older than the playlist window stop being advertised,
    /// segments older than twice the window become deletable and deleted
    /// files leave the list.
    fn tick(&self, now: Instant) {
        let mut list = self.list.lock().expect("segment list lock poisoned");
        let removable_age = self.playlist_window * 2;

        for index in 0..list.segments.len() {
            let age = now.saturating_duration_since(list.segments[index].created_at);
            if list.segments[index].usable && age > self.playlist_window {
                list.segments[index].usable = false;
                list.media_sequence_number += 1;
                info!(
                    file = %list.segments[index].file_name,
                    "segment no longer usable"
                );
                let (buffered, written) = self.rebuild_playlist(&list);
                if let Err(e) = written {
                    warn!(error = %e, "unable to update the playlist file");
                }
                // Tell the pipeline how much advertised audio is left
                let _ = self.pipeline_tx.send(PipelineEvent::OutputBuffer(
                    OutputBufferState {
                        buffered,
                        buffer_size: self.playlist_window,
                    },
                ));
            }
            if !list.segments[index].usable && age > removable_age {
                list.segments[index].removable = true;
            }
        }

        let live_dir = &self.live_dir;
        list.segments.retain(|segment| {
            if !segment.removable {
                return true;
            }
            let path = live_dir.join(&segment.file_name);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "segment file deleted");
                    false
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unable to delete segment file");
                    true
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn publisher(dir: &std::path::Path) -> (Publisher, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = Publisher::new(
            dir.to_path_buf(),
            dir.join("stream.m3u8"),
            Duration::from_secs(7),
            tx,
        )
        .unwrap();
        (publisher, rx)
    }

    fn aged_segment(dir: &std::path::Path, name: &str, age: Duration) -> Segment {
        std::fs::write(dir.join(name), b"mp3").unwrap();
        let created_at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        Segment {
            file_name: name.to_string(),
            title: "Internet of Chuffs".to_string(),
            created_at,
            duration: Duration::from_millis(972),
            usable: true,
            removable: false,
        }
    }

    #[test]
    fn test_new_writes_initial_empty_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _rx) = publisher(dir.path());
        let on_disk = std::fs::read(dir.path().join("stream.m3u8")).unwrap();
        assert_eq!(on_disk, b"#EXTM3U\r\n#EXT-X-VERSION:3\r\n");
        assert_eq!(publisher.playlist_bytes(), on_disk);
    }

    #[test]
    fn test_new_segment_is_advertised() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _rx) = publisher(dir.path());
        publisher.add_segment(aged_segment(dir.path(), "a.mp3", Duration::ZERO));
        let playlist = String::from_utf8(publisher.playlist_bytes()).unwrap();
        assert!(playlist.contains("a.mp3"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
    }

    #[test]
    fn test_aged_segment_retires_and_reports_buffer_depth() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, mut rx) = publisher(dir.path());
        publisher.add_segment(aged_segment(dir.path(), "old.mp3", Duration::from_secs(8)));
        publisher.add_segment(aged_segment(dir.path(), "new.mp3", Duration::ZERO));

        publisher.tick(Instant::now());

        let playlist = String::from_utf8(publisher.playlist_bytes()).unwrap();
        assert!(!playlist.contains("old.mp3"));
        assert!(playlist.contains("new.mp3"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:1"));
        // The file itself outlives the playlist entry
        assert!(dir.path().join("old.mp3").exists());

        match rx.try_recv().unwrap() {
            PipelineEvent::OutputBuffer(state) => {
                assert_eq!(state.buffered, Duration::from_millis(972));
                assert_eq!(state.buffer_size, Duration::from_secs(7));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_segment_deleted_after_twice_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _rx) = publisher(dir.path());
        publisher.add_segment(aged_segment(dir.path(), "ancient.mp3", Duration::from_secs(15)));

        publisher.tick(Instant::now());

        assert!(!dir.path().join("ancient.mp3").exists());
        let list = publisher.list.lock().unwrap();
        assert!(list.segments.is_empty());
        assert_eq!(list.media_sequence_number, 1);
    }

    #[test]
    fn test_media_sequence_counts_every_retirement() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _rx) = publisher(dir.path());
        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            publisher.add_segment(aged_segment(dir.path(), name, Duration::from_secs(8)));
        }
        publisher.tick(Instant::now());
        let list = publisher.list.lock().unwrap();
        assert_eq!(list.media_sequence_number, 3);
    }

    #[test]
    fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _rx) = publisher(dir.path());
        publisher.add_segment(aged_segment(dir.path(), "a.mp3", Duration::from_secs(8)));
        publisher.add_segment(aged_segment(dir.path(), "b.mp3", Duration::ZERO));
        publisher.tick(Instant::now());

        publisher.reset();

        assert!(!dir.path().join("a.mp3").exists());
        assert!(!dir.path().join("b.mp3").exists());
        let playlist = String::from_utf8(publisher.playlist_bytes()).unwrap();
        assert_eq!(playlist, "#EXTM3U\r\n#EXT-X-VERSION:3\r\n");
        let list = publisher.list.lock().unwrap();
        assert!(list.segments.is_empty());
        assert_eq!(list.media_sequence_number, 0);
    }
}
