//! Per-connection send-side state machine.
//!
//! [`Session`] maintains the complete book-keeping for one SLOW connection:
//! sequence counters, both flow-control windows, and the transmit queue of
//! packets awaiting acknowledgment.
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `acknum = K` retires every queued packet with
//!   `seqnum ≤ K`.
//! - At most `remote_window` payload bytes may be in flight at once; packets
//!   carrying CONNECT or REVIVE bypass this limit ("handshake passthrough").
//! - Payloads larger than [`MAX_PAYLOAD`] are fragmented into packets sharing
//!   one fragment id, with offsets 0,1,2,… and MOREBITS on all but the last.
//! - Queued packets are transmitted strictly in sequence-number order; when a
//!   packet does not fit in the remote window, none of its successors are
//!   eligible either.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::packet::{flags, Packet, SessionId, MAX_PAYLOAD};
use crate::persist::SessionRecord;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// One queued packet awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// The packet exactly as it will go on the wire.
    pub packet: Packet,
    /// When this packet was first transmitted (`None` = never sent).
    pub first_sent: Option<Instant>,
    /// When this packet was most recently transmitted.
    pub last_sent: Option<Instant>,
}

impl Outbound {
    fn new(packet: Packet) -> Self {
        Self {
            packet,
            first_sent: None,
            last_sent: None,
        }
    }
}

/// How a scheduled packet should be reported by the transmit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// First transmission of the revive handshake.
    Revive,
    /// Already sent at least once; this is a timeout retransmission.
    Retransmit,
    /// First transmission of an ordinary data packet or fragment.
    Data,
}

// ---------------------------------------------------------------------------
// Deferred carving
// ---------------------------------------------------------------------------

/// Remainder of a payload whose carving stalled on a closed remote window.
///
/// Carving resumes from [`Session::handle_ack`] as soon as acknowledgments
/// free window space; the fragment id and next offset carry over so the
/// resumed packets continue the same fragment train.
#[derive(Debug)]
struct PendingTail {
    data: Vec<u8>,
    off: usize,
    next_fo: u8,
    fid: u8,
    fragmented: bool,
    revive_first: bool,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Send/receive book-keeping for one SLOW connection.
///
/// # Window layout
///
/// ```text
///   retired        in flight           queued, unsent
///  ───────────┬───────────────────┬──────────────────────▶ seq space
///             │                   │
///       last_ack_received      next_seq
///             │◀─ remote_window ─▶│   (byte-granular, not per-packet)
/// ```
#[derive(Debug)]
pub struct Session {
    sid: SessionId,
    sttl_ms: u32,
    next_seq: u32,
    last_ack_rcvd: u32,
    /// Greatest nonzero peer sequence number seen; echoed as our acknum.
    last_rx_seq: u32,
    /// Free bytes in our receive buffer, advertised to the peer.
    local_window: u16,
    /// The peer's most recently advertised window.
    remote_window: u16,
    /// Fragment id for the next payload that needs fragmenting.
    next_fid: u8,
    /// Packets awaiting acknowledgment, front = oldest (strictly increasing seqnum).
    txq: VecDeque<Outbound>,
    /// Un-carved payload remainder, if the remote window closed mid-payload.
    pending: Option<PendingTail>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(u16::MAX)
    }
}

impl Session {
    /// Create an idle session advertising `local_window` free receive bytes.
    pub fn new(local_window: u16) -> Self {
        Self {
            sid: SessionId::NIL,
            sttl_ms: 0,
            next_seq: 0,
            last_ack_rcvd: 0,
            last_rx_seq: 0,
            local_window,
            remote_window: 0,
            next_fid: 1,
            txq: VecDeque::new(),
            pending: None,
        }
    }

    // -----------------------------------------------------------------------
    // Setup / revive
    // -----------------------------------------------------------------------

    /// Adopt the parameters of the central's SETUP packet.
    ///
    /// Our first sequence number is the SETUP's `seqnum + 1`; the SETUP's
    /// `acknum` and `window` seed the acknowledgment and flow-control state.
    pub fn establish(&mut self, setup: &Packet) {
        self.sid = setup.sid;
        self.sttl_ms = setup.sttl;
        self.next_seq = setup.seqnum.wrapping_add(1);
        self.remote_window = setup.window;
        self.last_ack_rcvd = setup.acknum;
    }

    /// Restore a session from a persisted snapshot.
    ///
    /// Sequence numbering continues exactly where the saved session left
    /// off; the remote window starts closed until the peer advertises one.
    pub fn resume(&mut self, record: &SessionRecord) {
        self.sid = record.sid;
        self.sttl_ms = record.sttl;
        self.next_seq = record.next_seq;
        self.remote_window = 0;
        self.last_ack_rcvd = record.last_ack;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn sid(&self) -> SessionId {
        self.sid
    }

    pub fn sttl(&self) -> u32 {
        self.sttl_ms
    }

    /// Next sequence number that will be assigned, without consuming it.
    pub fn peek_next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Greatest acknowledgment number received from the peer.
    pub fn last_ack(&self) -> u32 {
        self.last_ack_rcvd
    }

    /// Greatest nonzero sequence number received from the peer.
    pub fn last_rx_seq(&self) -> u32 {
        self.last_rx_seq
    }

    /// Currently advertised free bytes of our receive buffer.
    pub fn local_window(&self) -> u16 {
        self.local_window
    }

    /// `true` when nothing remains to transmit (queue and carving tail empty).
    pub fn is_idle(&self) -> bool {
        self.txq.is_empty() && self.pending.is_none()
    }

    /// `true` when the transmit queue holds no unacknowledged packets.
    pub fn empty(&self) -> bool {
        self.txq.is_empty()
    }

    /// Return the next sequence number and advance the counter.
    pub fn take_seq(&mut self) -> u32 {
        let s = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        s
    }

    /// Record the peer's sequence number for acknowledgment echoing.
    ///
    /// Zero is ignored: the initial CONNECT/SETUP exchange carries seqnum 0
    /// and must not poison the acknum we send back.
    pub fn note_rx_seq(&mut self, s: u32) {
        if s != 0 {
            self.last_rx_seq = s;
        }
    }

    // -----------------------------------------------------------------------
    // Local window accounting
    // -----------------------------------------------------------------------

    /// Shrink the advertised local window by `n` received bytes (floor 0).
    pub fn consume_local_window(&mut self, n: usize) {
        let n = u16::try_from(n).unwrap_or(u16::MAX);
        self.local_window = self.local_window.saturating_sub(n);
    }

    /// Grow the advertised local window by `n` delivered bytes (cap 65535).
    pub fn release_local_window(&mut self, n: usize) {
        let grown = u32::from(self.local_window).saturating_add(n.min(usize::from(u16::MAX)) as u32);
        self.local_window = grown.min(u32::from(u16::MAX)) as u16;
    }

    // -----------------------------------------------------------------------
    // Enqueue & fragmentation
    // -----------------------------------------------------------------------

    /// Fragment `payload` into ≤ [`MAX_PAYLOAD`]-byte packets and append them
    /// to the transmit queue.
    ///
    /// An empty payload with `is_revive` queues the bare revive handshake
    /// (flags REVIVE|ACK, no data) instead.  When `is_revive` is set on a
    /// non-empty payload, the first carved packet doubles as the handshake.
    ///
    /// If the remote window closes while packets are still in flight, the
    /// un-carved remainder is held back and carving resumes automatically
    /// when later ACKs free window space.
    pub fn queue_data(&mut self, payload: &[u8], is_revive: bool) {
        if payload.is_empty() && is_revive {
            let pkt = Packet {
                sid: self.sid,
                sttl: self.sttl_ms,
                flags: flags::REVIVE | flags::ACK,
                seqnum: self.take_seq(),
                acknum: self.last_rx_seq,
                window: self.local_window,
                ..Packet::default()
            };
            self.txq.push_back(Outbound::new(pkt));
            return;
        }
        if payload.is_empty() {
            return;
        }

        debug_assert!(
            self.pending.is_none(),
            "queue_data called while a previous payload is still carving"
        );
        let fragmented = payload.len() > MAX_PAYLOAD;
        self.pending = Some(PendingTail {
            data: payload.to_vec(),
            off: 0,
            next_fo: 0,
            fid: if fragmented { self.next_fid } else { 0 },
            fragmented,
            revive_first: is_revive,
        });
        self.carve();
    }

    /// Carve as much of the held-back payload as the remote window allows.
    fn carve(&mut self) {
        let Some(mut tail) = self.pending.take() else {
            return;
        };

        while tail.off < tail.data.len() {
            let avail = usize::from(self.remote_window_left());
            // Window closed with packets still in flight: hold the rest back
            // until an ACK frees space.
            if avail == 0 && !self.txq.is_empty() {
                self.pending = Some(tail);
                return;
            }

            let remaining = tail.data.len() - tail.off;
            let here = if avail == 0 { MAX_PAYLOAD } else { avail }
                .min(MAX_PAYLOAD)
                .min(remaining);

            let mut fl = flags::ACK;
            if tail.revive_first && tail.off == 0 {
                fl |= flags::REVIVE;
            }
            if tail.off + here < tail.data.len() {
                fl |= flags::MOREBITS;
            }

            let pkt = Packet {
                sid: self.sid,
                sttl: self.sttl_ms,
                flags: fl,
                seqnum: self.take_seq(),
                acknum: self.last_rx_seq,
                window: self.local_window,
                fid: tail.fid,
                fo: tail.next_fo,
                data: tail.data[tail.off..tail.off + here].to_vec(),
            };
            self.txq.push_back(Outbound::new(pkt));
            tail.next_fo = tail.next_fo.wrapping_add(1);
            tail.off += here;
        }

        if tail.fragmented {
            self.next_fid = self.next_fid.wrapping_add(1);
        }
    }

    // -----------------------------------------------------------------------
    // Acknowledgment processing
    // -----------------------------------------------------------------------

    /// Process a cumulative ACK from the peer.
    ///
    /// Adopts the peer's advertised window and session TTL, then retires
    /// every queued packet with `seqnum ≤ acknum` (front of the queue only;
    /// stale ACKs below the current front are harmless no-ops).  Any payload
    /// remainder whose carving stalled is re-attempted afterwards.
    pub fn handle_ack(&mut self, acknum: u32, remote_window: u16, sttl_ms: u32) {
        self.last_ack_rcvd = acknum;
        self.remote_window = remote_window;
        self.sttl_ms = sttl_ms;

        while let Some(front) = self.txq.front() {
            if front.packet.seqnum <= acknum {
                self.txq.pop_front();
            } else {
                break;
            }
        }

        self.carve();
    }

    // -----------------------------------------------------------------------
    // Transmission scheduling
    // -----------------------------------------------------------------------

    /// Select the queue entries due for (re)transmission this round.
    ///
    /// Returns indices into the transmit queue, front to back.  An entry is
    /// due when it has never been sent or when its last transmission is older
    /// than `rto`.  Due entries are emitted while they fit in the remaining
    /// remote window; CONNECT/REVIVE handshakes are always emitted and do not
    /// consume window.  The scan stops at the first data packet that does not
    /// fit, so later packets can never overtake an earlier one.
    ///
    /// The queue must not be mutated between this call and the matching
    /// [`mark_sent`](Self::mark_sent) calls.
    pub fn ready_to_send(&self, rto: Duration) -> Vec<usize> {
        let mut due = Vec::new();
        let mut bytes_left = usize::from(self.remote_window_left());
        let now = Instant::now();

        for (i, ob) in self.txq.iter().enumerate() {
            let never_sent = ob.first_sent.is_none();
            let timed_out = match ob.last_sent {
                Some(at) => now.duration_since(at) > rto,
                None => false,
            };
            if !never_sent && !timed_out {
                continue;
            }

            let handshake = ob.packet.has_flag(flags::CONNECT | flags::REVIVE);
            if handshake {
                due.push(i);
            } else if ob.packet.data.len() <= bytes_left {
                bytes_left -= ob.packet.data.len();
                due.push(i);
            } else {
                break;
            }
        }
        due
    }

    /// How the packet at `idx` should be reported when transmitted now.
    ///
    /// Read this *before* [`mark_sent`](Self::mark_sent) — marking turns any
    /// entry into a future [`TxKind::Retransmit`].
    pub fn classify(&self, idx: usize) -> TxKind {
        let ob = &self.txq[idx];
        if ob.first_sent.is_some() {
            TxKind::Retransmit
        } else if ob.packet.has_flag(flags::REVIVE) {
            TxKind::Revive
        } else {
            TxKind::Data
        }
    }

    /// The queued packet at `idx`, as scheduled by
    /// [`ready_to_send`](Self::ready_to_send).
    pub fn outbound_packet(&self, idx: usize) -> &Packet {
        &self.txq[idx].packet
    }

    /// Record a transmission of the packet at `idx`.
    ///
    /// Stamps the last-sent time, and the first-sent time if this was the
    /// first transmission.
    pub fn mark_sent(&mut self, idx: usize) {
        let now = Instant::now();
        let ob = &mut self.txq[idx];
        ob.first_sent.get_or_insert(now);
        ob.last_sent = Some(now);
    }

    /// Remote window minus the payload bytes already in flight (floor 0).
    fn remote_window_left(&self) -> u16 {
        let in_flight: usize = self
            .txq
            .iter()
            .filter(|ob| ob.last_sent.is_some())
            .map(|ob| ob.packet.data.len())
            .sum();
        u16::try_from(usize::from(self.remote_window).saturating_sub(in_flight)).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
