//! TCP ingest
//!
//! The source holds one long-lived connection and the records are
//! recovered from the byte stream by [`StreamReassembler`]. A new
//! inbound connection always wins: the previous reader task is aborted,
//! which closes its socket and discards its reassembly state.

use socket2::SockRef;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, NetworkError};
use crate::network::{Ingest, StreamReassembler};
use crate::protocol::URTP_DATAGRAM_MAX_SIZE;

/// Receive buffer sized for a record plus a burst of backlog
const TCP_RECV_BUFFER_SIZE: usize = 30_000;

/// Accept source connections forever, latest connection wins
pub async fn run(port: u16, ingest: Arc<Ingest>) -> Result<(), Error> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| NetworkError::BindFailed(format!("port {}: {}", port, e)))?;

    let mut current: Option<JoinHandle<()>> = None;
    loop {
        info!(port, "TCP server waiting for a connection from the audio source");
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Some(previous) = current.take() {
                    previous.abort();
                }
                info!(%peer, "connection made");
                configure(&stream);
                current = Some(tokio::spawn(read_connection(stream, ingest.clone())));
            }
            Err(e) => warn!(error = %e, "error accepting connection"),
        }
    }
}

fn configure(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "unable to switch off the Nagle algorithm");
    }
    if let Err(e) = SockRef::from(stream).set_recv_buffer_size(TCP_RECV_BUFFER_SIZE) {
        warn!(error = %e, "unable to set optimal receive buffer size");
    }
}

/// Drain one connection until it closes
async fn read_connection(mut stream: TcpStream, ingest: Arc<Ingest>) {
    let mut reassembler = StreamReassembler::new();
    let mut buffer = [0u8; URTP_DATAGRAM_MAX_SIZE];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => {
                info!("connection closed by the source");
                break;
            }
            Ok(len) => {
                for record in reassembler.feed(&buffer[..len]) {
                    if let Some(echo) = ingest.handle_record(&record) {
                        match stream.write_all(&echo).await {
                            Ok(()) => {
                                ingest.echo_sent();
                                debug!(bytes = echo.len(), "timing datagram sent");
                            }
                            Err(e) => warn!(error = %e, "couldn't send timing datagram"),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "TCP read failed, dropping the connection");
                break;
            }
        }
    }
}
