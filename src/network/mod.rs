//! URTP ingest
//!
//! One UDP task and one TCP task listen for the audio source; whichever
//! transport the source uses, complete records end up in
//! [`Ingest::handle_record`], which verifies, decodes and queues them
//! for the audio pipeline and decides when a timing echo is owed to the
//! source.

pub mod reassembly;
pub mod tcp;
pub mod udp;

pub use reassembly::StreamReassembler;

use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::audio::PipelineEvent;
use crate::codec::UrtpDecoder;
use crate::constants::TIMING_DATAGRAM_PERIOD;
use crate::protocol::{timing_echo, UrtpHeader, UrtpRecord, TIMING_DATAGRAM_SIZE, URTP_HEADER_SIZE};

/// State shared by the ingest tasks
///
/// The decoder sits behind a mutex because the UDP and TCP paths both
/// feed it, though only one transport carries traffic at a time.
pub struct Ingest {
    decoder: Mutex<UrtpDecoder>,
    pipeline_tx: UnboundedSender<PipelineEvent>,
    last_echo: Mutex<Option<Instant>>,
}

impl Ingest {
    pub fn new(pipeline_tx: UnboundedSender<PipelineEvent>) -> Self {
        Self {
            decoder: Mutex::new(UrtpDecoder::new()),
            pipeline_tx,
            last_echo: Mutex::new(None),
        }
    }

    /// Verify, decode and enqueue one complete record
    ///
    /// Malformed records are logged and dropped. Returns the timing echo
    /// to send back when one is due; the caller reports a successful
    /// send through [`Self::echo_sent`].
    pub fn handle_record(&self, bytes: &[u8]) -> Option<[u8; TIMING_DATAGRAM_SIZE]> {
        let header = match UrtpHeader::parse(bytes) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "dropping malformed record");
                return None;
            }
        };

        let payload_end = (URTP_HEADER_SIZE + header.payload_size).min(bytes.len());
        let audio = {
            let mut decoder = self.decoder.lock().expect("decoder lock poisoned");
            decoder.decode(header.coding, &bytes[URTP_HEADER_SIZE..payload_end])
        };
        debug!(
            sequence = header.sequence_number,
            samples = audio.as_ref().map_or(0, |a| a.len()),
            "record received"
        );

        let _ = self.pipeline_tx.send(PipelineEvent::Record(UrtpRecord {
            sequence_number: header.sequence_number,
            timestamp: header.timestamp,
            audio,
        }));

        self.echo_due().then(|| timing_echo(bytes))
    }

    fn echo_due(&self) -> bool {
        let last = self.last_echo.lock().expect("echo lock poisoned");
        last.map_or(true, |at| at.elapsed() >= TIMING_DATAGRAM_PERIOD)
    }

    /// Record that a timing echo went out
    pub fn echo_sent(&self) {
        let mut last = self.last_echo.lock().expect("echo lock poisoned");
        *last = Some(Instant::now());
    }
}
