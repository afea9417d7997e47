//! Async UDP channel to the central.
//!
//! [`PeerSocket`] is a thin wrapper around `tokio::net::UdpSocket` that
//! speaks [`crate::packet::Packet`] instead of raw bytes.  The socket is
//! connected to a single peer, so sends need no address and inbound traffic
//! from other sources is filtered by the OS.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};

use crate::packet::{Packet, PacketError};

/// Inbound datagrams are read into a buffer of this size; anything larger is
/// truncated by the OS (a legal packet is at most 32 + 1440 bytes anyway).
const RECV_BUF: usize = 2048;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from channel operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    /// The received datagram could not be decoded as a valid packet.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
    /// The hostname did not resolve to any address.
    #[error("could not resolve host {0:?}")]
    Resolve(String),
}

// ---------------------------------------------------------------------------
// PeerSocket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket connected to one peer.
///
/// All methods are `&self`; the socket holds no protocol state.
#[derive(Debug)]
pub struct PeerSocket {
    /// Peer address the socket is connected to.
    pub peer_addr: SocketAddr,
    inner: UdpSocket,
}

impl PeerSocket {
    /// Resolve `host:port` and connect a fresh ephemeral socket to it.
    pub async fn connect(host: &str, port: u16) -> Result<Self, SocketError> {
        let target = format!("{host}:{port}");
        let resolved = lookup_host(&target).await?.next();
        let peer_addr = match resolved {
            Some(addr) => addr,
            None => return Err(SocketError::Resolve(target)),
        };
        Self::connect_addr(peer_addr).await
    }

    /// Connect a fresh ephemeral socket to an already-resolved address.
    pub async fn connect_addr(peer_addr: SocketAddr) -> Result<Self, SocketError> {
        let bind_addr: SocketAddr = if peer_addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let inner = UdpSocket::bind(bind_addr).await?;
        inner.connect(peer_addr).await?;
        Ok(Self { peer_addr, inner })
    }

    /// Local address the OS assigned to this socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Encode `packet` and send it as one datagram to the peer.
    pub async fn send(&self, packet: &Packet) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        self.inner.send(&bytes).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Datagrams that fail to decode are returned as `Err` — the caller
    /// decides whether to discard and keep listening.
    pub async fn recv(&self) -> Result<Packet, SocketError> {
        let mut buf = [0u8; RECV_BUF];
        let n = self.inner.recv(&mut buf).await?;
        Ok(Packet::decode(&buf[..n])?)
    }

    /// Like [`recv`](Self::recv), but gives up after `wait` and returns
    /// `Ok(None)`.
    pub async fn recv_timeout(&self, wait: Duration) -> Result<Option<Packet>, SocketError> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
