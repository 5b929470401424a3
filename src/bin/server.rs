//! Streaming Server Application
//!
//! Listens for URTP audio from the source, produces MP3 segments and
//! serves them to browsers as an HLS stream.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chuff_streamer::{
    audio::Segmenter,
    config::AppConfig,
    constants::SEGMENT_EXTENSION,
    hls::{
        server::{self, StreamContext},
        Publisher,
    },
    network::{tcp, udp, Ingest},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "URTP in, HLS out: live audio streaming server")]
struct Args {
    /// Port to listen for the audio source on
    in_port: u16,

    /// Port to serve HTTP streaming requests on
    http_port: u16,

    /// Playlist path prefix; ".m3u8" is appended
    playlist_path: PathBuf,

    /// Clear stale segment files from the live directory at start-up
    #[arg(short, long)]
    clear: bool,

    /// Expect the audio source over TCP instead of UDP
    #[arg(short, long)]
    tcp: bool,

    /// Playlist window in seconds
    #[arg(short = 'p', long, default_value_t = 7)]
    playlist_window: u64,

    /// Segment duration in milliseconds
    #[arg(short = 's', long, default_value_t = 1000)]
    segment_duration: u32,

    /// Directory with static out-of-service content
    #[arg(short = 'o', long)]
    oos_dir: Option<PathBuf>,

    /// Seconds without input before the stream resets
    #[arg(short = 'O', long, default_value_t = 300)]
    max_oos_age: u64,

    /// File to copy the raw PCM stream into
    #[arg(short = 'r', long)]
    raw_pcm: Option<PathBuf>,

    /// Log file (stdout when absent)
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> AppConfig {
        AppConfig {
            ingest_port: self.in_port,
            ingest_tcp: self.tcp,
            http_port: self.http_port,
            playlist_path: self.playlist_path,
            clear_at_start: self.clear,
            playlist_window: Duration::from_secs(self.playlist_window),
            segment_duration: Duration::from_millis(self.segment_duration as u64),
            oos_dir: self.oos_dir,
            max_oos_age: Duration::from_secs(self.max_oos_age),
            raw_pcm_path: self.raw_pcm,
            log_path: self.log_file,
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("unable to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Ok(None)
        }
    }
}

/// Delete leftover segment files from a previous run
fn clear_live_dir(live_dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(live_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXTENSION) {
            tracing::info!(path = %path.display(), "removing stale segment file");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config();
    let _log_guard = init_tracing(config.log_path.as_deref())?;
    config.validate()?;

    tracing::info!("starting chuff-streamer v{}", env!("CARGO_PKG_VERSION"));

    let live_dir = config.live_dir();
    std::fs::create_dir_all(&live_dir)
        .with_context(|| format!("unable to create live directory {}", live_dir.display()))?;
    if config.clear_at_start {
        clear_live_dir(&live_dir).context("unable to clear the live directory")?;
    }

    // The two control queues: decoded records plus buffer feedback into
    // the audio pipeline, segments plus resets into the publisher
    let (pipeline_tx, pipeline_rx) = tokio::sync::mpsc::unbounded_channel();
    let (media_tx, media_rx) = tokio::sync::mpsc::unbounded_channel();

    let publisher = Arc::new(
        Publisher::new(
            live_dir.clone(),
            config.playlist_file_path(),
            config.playlist_window,
            pipeline_tx.clone(),
        )
        .context("unable to create the playlist")?,
    );

    let segmenter = Segmenter::new(
        live_dir.clone(),
        config.segment_duration,
        config.max_oos_age,
        config.raw_pcm_path.as_deref(),
        media_tx,
    )
    .context("unable to start the audio pipeline")?;

    tokio::spawn(segmenter.run(pipeline_rx));
    tokio::spawn(publisher.clone().run_gc());
    tokio::spawn(publisher.clone().run_control(media_rx));

    let ingest = Arc::new(Ingest::new(pipeline_tx));
    let ingest_port = config.ingest_port;
    let ingest_tcp = config.ingest_tcp;
    tokio::spawn(async move {
        let outcome = if ingest_tcp {
            tcp::run(ingest_port, ingest).await
        } else {
            udp::run(ingest_port, ingest).await
        };
        // The ingest loops only return on failure to bind
        if let Err(e) = outcome {
            tracing::error!(error = %e, "unable to start the ingest server");
            std::process::exit(1);
        }
    });

    let context = Arc::new(StreamContext {
        publisher,
        live_dir,
        live_dir_name: config.live_dir_name(),
        oos_dir: config.oos_dir.clone(),
    });
    server::serve(config.http_port, context)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
