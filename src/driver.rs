//! Session driver: the event loop binding a datagram channel to a session.
//!
//! # Architecture
//!
//! ```text
//!  user payload ──▶ Session (fragment + queue)
//!                      │ ready_to_send / mark_sent
//!                      ▼
//!                   Driver ──▶ PeerSocket ──▶ central
//!                      ▲             │
//!     Reassembler ◀────┴── inbound ◀─┘
//!         │
//!         ▼ completed payloads → sink (stdout)
//! ```
//!
//! Each loop iteration has three phases, strictly ordered:
//!
//! 1. **Transmit** — send every queue entry due for (re)transmission.
//! 2. **Disconnect** — once nothing is left to deliver, send the disconnect
//!    packet (exactly once; it is not queued).
//! 3. **Receive** — wait up to 100 ms for a datagram, then process
//!    acknowledgments, the disconnect confirmation, and data fragments
//!    (answered with a pure ACK).
//!
//! The loop ends when the peer acknowledges the disconnect packet.  Datagram
//! loss in either direction is covered by retransmission alone; there is no
//! retry ceiling.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::packet::{flags, Packet, SessionId};
use crate::persist::{PersistError, SessionRecord};
use crate::reassembly::Reassembler;
use crate::session::{Session, TxKind};
use crate::socket::{PeerSocket, SocketError};

/// Phase-3 receive tick; bounds the latency between retransmission checks.
const RECV_TICK: Duration = Duration::from_millis(100);

/// Retransmission timeout and setup parameters for one driver run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Retransmission timeout for queued packets.
    pub rto: Duration,
    /// How long to wait for the central's SETUP reply.
    pub setup_timeout: Duration,
    /// Where to snapshot the session on clean disconnect (`None` = don't).
    pub save_path: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(800),
            setup_timeout: Duration::from_millis(1500),
            save_path: None,
        }
    }
}

/// Errors that terminate a driver run.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No SETUP reply arrived within the configured window.
    #[error("no SETUP reply from the central within {0:?}")]
    SetupTimeout(Duration),
    /// The central answered the CONNECT without the ACCEPT flag.
    #[error("connection rejected by the central")]
    ConnectionRejected,
    /// Channel failure outside the per-datagram recovery path.
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// Snapshot load failure (save failures are logged, not fatal).
    #[error(transparent)]
    Persist(#[from] PersistError),
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Owns one connection end to end: channel, session, reassembly, disconnect.
///
/// Completed inbound payloads are written to `sink` (stdout in the CLI).
pub struct Driver<W: Write> {
    socket: PeerSocket,
    session: Session,
    reasm: Reassembler,
    disconnect_pending: bool,
    config: DriverConfig,
    sink: W,
}

impl<W: Write> Driver<W> {
    pub fn new(socket: PeerSocket, config: DriverConfig, sink: W) -> Self {
        Self {
            socket,
            session: Session::default(),
            reasm: Reassembler::new(),
            disconnect_pending: false,
            config,
            sink,
        }
    }

    /// The session state, for inspection after a run.
    pub fn session(&self) -> &Session {
        &self.session
    }

    // -----------------------------------------------------------------------
    // Connection establishment
    // -----------------------------------------------------------------------

    /// Open a fresh connection and queue `payload` for delivery.
    ///
    /// Sends a CONNECT (nil sid), waits for exactly one SETUP datagram, and
    /// adopts its parameters.  Call [`run`](Self::run) afterwards.
    pub async fn connect(&mut self, payload: &[u8]) -> Result<(), DriverError> {
        let connect = Packet {
            sid: SessionId::NIL,
            flags: flags::CONNECT,
            window: self.session.local_window(),
            ..Packet::default()
        };
        self.tx(&connect, "CONNECT").await;

        let setup = self
            .socket
            .recv_timeout(self.config.setup_timeout)
            .await?
            .ok_or(DriverError::SetupTimeout(self.config.setup_timeout))?;
        log::debug!("[slow] ← SETUP {setup}");

        if !setup.has_flag(flags::ACCEPT) {
            return Err(DriverError::ConnectionRejected);
        }

        self.session.establish(&setup);
        self.session.note_rx_seq(setup.seqnum);
        log::info!(
            "[slow] session {} established (sttl={} ms, peer window={})",
            self.session.sid(),
            self.session.sttl(),
            setup.window
        );

        if !payload.is_empty() {
            self.session.queue_data(payload, false);
        }
        Ok(())
    }

    /// Resume the session persisted at `path` and queue `payload` for
    /// delivery.
    ///
    /// No handshake round-trip happens here: the first packet of the queued
    /// burst carries the REVIVE flag and doubles as the handshake (a bare
    /// REVIVE|ACK packet when `payload` is empty).  Call [`run`](Self::run)
    /// afterwards.  A snapshot that cannot be loaded is fatal.
    pub fn revive(&mut self, path: &Path, payload: &[u8]) -> Result<(), DriverError> {
        let record = SessionRecord::load(path)?;
        self.session.resume(&record);
        self.session.note_rx_seq(record.last_ack);
        log::info!(
            "[slow] reviving session {} at seq {}",
            record.sid,
            record.next_seq
        );
        self.session.queue_data(payload, true);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Drive the session until the disconnect handshake completes.
    pub async fn run(&mut self) -> Result<(), DriverError> {
        loop {
            // ── Phase 1: transmit everything that is due ──────────────────
            for idx in self.session.ready_to_send(self.config.rto) {
                let tag = match self.session.classify(idx) {
                    TxKind::Revive => "REVIVE",
                    TxKind::Retransmit => "RETX",
                    TxKind::Data => "DATA/FRAG",
                };
                let pkt = self.session.outbound_packet(idx).clone();
                self.tx(&pkt, tag).await;
                self.session.mark_sent(idx);
            }

            // ── Phase 2: initiate disconnect once idle ────────────────────
            if !self.disconnect_pending && self.session.is_idle() {
                let disconnect = Packet {
                    sid: self.session.sid(),
                    sttl: self.session.sttl(),
                    flags: flags::CONNECT | flags::REVIVE | flags::ACK,
                    seqnum: self.session.take_seq(),
                    acknum: self.session.last_rx_seq(),
                    window: 0,
                    ..Packet::default()
                };
                self.tx(&disconnect, "DISCONNECT").await;
                self.disconnect_pending = true;
            }

            // ── Phase 3: bounded wait for inbound traffic ─────────────────
            let pk = match self.socket.recv_timeout(RECV_TICK).await {
                Ok(Some(pk)) => pk,
                Ok(None) => continue, // tick elapsed; re-check retransmissions
                Err(SocketError::Packet(e)) => {
                    log::warn!("[slow] ← discarding malformed datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            log::debug!("[slow] ← RX {pk}");

            self.session.note_rx_seq(pk.seqnum);
            if pk.has_flag(flags::ACK) {
                self.session.handle_ack(pk.acknum, pk.window, pk.sttl);
            }

            // The peer confirms the disconnect by acknowledging exactly its
            // sequence number.
            if self.disconnect_pending
                && pk.has_flag(flags::ACK)
                && pk.seqnum == self.session.last_ack()
            {
                self.snapshot();
                log::info!("[slow] disconnect complete");
                return Ok(());
            }

            if !pk.data.is_empty() {
                self.accept_data(&pk).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Best-effort transmit with a tagged log line; loss is covered by
    /// retransmission, so failures are only logged.
    async fn tx(&self, packet: &Packet, tag: &str) {
        match self.socket.send(packet).await {
            Ok(()) => log::debug!("[slow] → {tag} {packet}"),
            Err(e) => log::warn!("[slow] → {tag} send failed: {e}"),
        }
    }

    /// Absorb a data-carrying packet: window accounting, reassembly,
    /// delivery, and the pure-ACK answer.
    async fn accept_data(&mut self, pk: &Packet) {
        self.session.consume_local_window(pk.data.len());

        if let Some(payload) = self.reasm.accept(pk) {
            log::info!("[slow] ← payload complete ({} B)", payload.len());
            if let Err(e) = self.sink.write_all(&payload).and_then(|()| self.sink.flush()) {
                log::error!("[slow] payload delivery failed: {e}");
            }
            self.session.release_local_window(payload.len());
        }

        // Acknowledge by echoing the received sequence number into both the
        // seqnum and acknum fields; a pure ACK consumes no local sequence
        // number.
        let ack = Packet {
            sid: self.session.sid(),
            sttl: self.session.sttl(),
            flags: flags::ACK,
            seqnum: pk.seqnum,
            acknum: pk.seqnum,
            window: self.session.local_window(),
            ..Packet::default()
        };
        self.tx(&ack, "ACK-PURE").await;
    }

    /// Snapshot the session if a save path was configured.  A failed save is
    /// logged and swallowed: the peer-side disconnect has already completed.
    fn snapshot(&self) {
        let Some(path) = &self.config.save_path else {
            return;
        };
        let record = SessionRecord {
            sid: self.session.sid(),
            sttl: self.session.sttl(),
            next_seq: self.session.peek_next_seq(),
            last_ack: self.session.last_ack(),
        };
        match record.save(path) {
            Ok(()) => log::info!("[slow] session saved to {}", path.display()),
            Err(e) => log::error!("[slow] session save failed: {e}"),
        }
    }
}
