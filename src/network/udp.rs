//! UDP ingest
//!
//! One URTP record arrives per datagram, so framing is free; the socket
//! receive buffer is sized for a single record plus IP overhead.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::error::{Error, NetworkError};
use crate::network::Ingest;
use crate::protocol::{IP_HEADER_OVERHEAD, URTP_DATAGRAM_MAX_SIZE};

/// Bind the ingest socket with a receive buffer sized for one record
fn bind(port: u16) -> Result<UdpSocket, Error> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    if let Err(e) = socket.set_recv_buffer_size(URTP_DATAGRAM_MAX_SIZE + IP_HEADER_OVERHEAD) {
        warn!(error = %e, "unable to set optimal receive buffer size");
    }
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&address.into())
        .map_err(|e| NetworkError::BindFailed(format!("port {}: {}", port, e)))?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Receive URTP datagrams forever
pub async fn run(port: u16, ingest: Arc<Ingest>) -> Result<(), Error> {
    let socket = bind(port)?;
    info!(port, "UDP server listening for the audio source");

    let mut buffer = [0u8; URTP_DATAGRAM_MAX_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, peer)) => {
                if let Some(echo) = ingest.handle_record(&buffer[..len]) {
                    match socket.send_to(&echo, peer).await {
                        Ok(_) => {
                            ingest.echo_sent();
                            debug!(%peer, "timing datagram sent");
                        }
                        Err(e) => warn!(error = %e, "couldn't send timing datagram"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "UDP receive failed"),
        }
    }
}
