//! Application configuration
//!
//! All settings the server needs at run time, normally filled in from the
//! command line by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port the URTP ingest listens on (UDP or TCP)
    pub ingest_port: u16,
    /// Expect the source over TCP rather than UDP
    pub ingest_tcp: bool,
    /// Port the HTTP streaming server listens on
    pub http_port: u16,
    /// Playlist path prefix; the `.m3u8` extension is appended
    pub playlist_path: PathBuf,
    /// Remove stale segment files from the live directory at start-up
    pub clear_at_start: bool,
    /// Age beyond which a segment is no longer advertised
    pub playlist_window: Duration,
    /// Nominal duration of one MP3 segment
    pub segment_duration: Duration,
    /// Directory holding static out-of-service content, if any
    pub oos_dir: Option<PathBuf>,
    /// How long the input may stay silent before the stream is reset
    pub max_oos_age: Duration,
    /// Optional sink for the raw PCM fed to the encoder
    pub raw_pcm_path: Option<PathBuf>,
    /// Optional log file
    pub log_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ingest_port: 5060,
            ingest_tcp: false,
            http_port: 8080,
            playlist_path: PathBuf::from("live/stream"),
            clear_at_start: false,
            playlist_window: Duration::from_secs(DEFAULT_PLAYLIST_WINDOW_SECS),
            segment_duration: Duration::from_millis(DEFAULT_SEGMENT_DURATION_MS as u64),
            oos_dir: None,
            max_oos_age: Duration::from_secs(DEFAULT_MAX_OOS_SECS),
            raw_pcm_path: None,
            log_path: None,
        }
    }
}

impl AppConfig {
    /// Check that the configuration makes sense
    pub fn validate(&self) -> Result<(), Error> {
        if self.segment_duration < Duration::from_millis(BLOCK_DURATION_MS as u64) {
            return Err(Error::Config(format!(
                "segment duration {} ms is shorter than one audio block ({} ms)",
                self.segment_duration.as_millis(),
                BLOCK_DURATION_MS
            )));
        }
        if self.playlist_window < self.segment_duration {
            return Err(Error::Config(format!(
                "playlist window {} s is shorter than one segment ({} ms)",
                self.playlist_window.as_secs(),
                self.segment_duration.as_millis()
            )));
        }
        if self.playlist_file_name().is_empty() {
            return Err(Error::Config(format!(
                "playlist path \"{}\" has no base file name",
                self.playlist_path.display()
            )));
        }
        Ok(())
    }

    /// Directory the playlist and segment files live in
    pub fn live_dir(&self) -> PathBuf {
        match self.playlist_path.parent() {
            Some(dir) if dir != Path::new("") => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Name of the live directory as it appears in URLs
    pub fn live_dir_name(&self) -> String {
        self.live_dir()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string())
    }

    /// Playlist file name, extension included
    pub fn playlist_file_name(&self) -> String {
        let base = self
            .playlist_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if base.is_empty() {
            base
        } else {
            format!("{}.{}", base, PLAYLIST_EXTENSION)
        }
    }

    /// Full path of the on-disk playlist file
    pub fn playlist_file_path(&self) -> PathBuf {
        self.live_dir().join(self.playlist_file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let config = AppConfig {
            playlist_path: PathBuf::from("live/stream"),
            ..Default::default()
        };
        assert_eq!(config.live_dir(), PathBuf::from("live"));
        assert_eq!(config.live_dir_name(), "live");
        assert_eq!(config.playlist_file_name(), "stream.m3u8");
        assert_eq!(config.playlist_file_path(), PathBuf::from("live/stream.m3u8"));
    }

    #[test]
    fn test_short_segment_rejected() {
        let config = AppConfig {
            segment_duration: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_shorter_than_segment_rejected() {
        let config = AppConfig {
            playlist_window: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
