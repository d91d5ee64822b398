//! UDP transport loop
//!
//! Owns the server socket and processes datagrams strictly sequentially:
//! receive, parse, dispatch, reply to the sender, then read the next
//! datagram. Sequential dispatch makes the dispatcher the registry's only
//! writer and guarantees that every reply goes back to the endpoint that
//! sent the triggering datagram.
//!
//! Error policy: a write failure to one sender is logged and the loop
//! continues serving others. Transient read failures are logged and
//! retried; any other read failure is fatal to the loop, since no further
//! datagrams can be served.

use crate::command::Command;
use crate::dispatcher::{Dispatcher, Outcome};
use log::{error, info, warn};
use std::io::ErrorKind;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;

/// Receive buffer size. Oversized datagrams are truncated, not rejected.
const RECV_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not bind UDP socket: {0}")]
    Bind(std::io::Error),
    #[error("could not read from udp stream: {0}")]
    Read(std::io::Error),
}

/// Why the read loop returned without a transport error.
#[derive(Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// A CRASH command was dispatched; the caller must terminate the
    /// process with a non-zero exit code. No reply was written.
    Crash,
}

/// The UDP server: socket plus the dispatcher it feeds.
pub struct UdpServer {
    socket: UdpSocket,
    dispatcher: Dispatcher,
}

impl UdpServer {
    /// Binds the server socket. Bind failure is fatal to the process.
    pub async fn bind(addr: &str, dispatcher: Dispatcher) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await.map_err(TransportError::Bind)?;
        if let Ok(local) = socket.local_addr() {
            info!("Starting UDP server, listening on {}", local);
        }
        Ok(Self { socket, dispatcher })
    }

    /// The bound address, useful when binding to port 0 in tests.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the read loop until a fatal read error or a CRASH command.
    pub async fn run(&mut self) -> Result<LoopExit, TransportError> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, sender) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    warn!("Transient read failure: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Could not read from udp stream: {}", e);
                    return Err(TransportError::Read(e));
                }
            };

            let cmd = Command::parse(&buf[..len]);
            info!("Received UDP packet from {}: {}", sender, cmd.raw);

            match self.dispatcher.handle(cmd, sender).await {
                Outcome::Reply(reply) => {
                    let payload = reply.encode();
                    if let Err(e) = self.socket.send_to(payload.as_bytes(), sender).await {
                        error!("Could not write to {}: {}", sender, e);
                    }
                }
                Outcome::Crash => return Ok(LoopExit::Crash),
            }
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::ConnectionReset
    )
}
