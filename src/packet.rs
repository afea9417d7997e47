//! Wire-format definitions for SLOW datagrams.
//!
//! Every datagram exchanged with the central is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire layout
//!
//! All multi-byte integers are little-endian; offsets in bytes:
//!
//! ```text
//!  0        16       20       24       28     30   31   32
//!  ├── sid ──┼ packed ┼ seqnum ┼ acknum ┼ win ─┼ fid┼ fo ┼ data… (≤ 1440 B)
//! ```
//!
//! The `packed` word carries two fields in one `u32`: the 5 low bits are the
//! flag set, the 27 high bits the session time-to-live in milliseconds.

use std::fmt;

use thiserror::Error;

/// Fixed header size: 16 + 4 + 4 + 4 + 2 + 1 + 1.
pub const HEADER_LEN: usize = 32;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD: usize = 1440;

/// Bit-flag constants for the 5-bit `flags` field.
pub mod flags {
    /// Connection request (also set on the disconnect packet).
    pub const CONNECT: u8 = 1 << 4;
    /// Resume a previously persisted session.
    pub const REVIVE: u8 = 1 << 3;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 1 << 2;
    /// Set by the central on SETUP when the connection is accepted.
    pub const ACCEPT: u8 = 1 << 1;
    /// More fragments of the same payload follow.
    pub const MOREBITS: u8 = 1 << 0;
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// 16-byte opaque session identifier, assigned by the central during setup
/// and echoed on every subsequent packet of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// The all-zero id, used only on the initial CONNECT packet.
    pub const NIL: SessionId = SessionId([0u8; 16]);

    /// `true` when no session has been assigned yet.
    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    /// Dash-grouped lowercase hex, UUID style (8-4-4-4-12).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            write!(f, "{b:02x}")?;
            if matches!(i, 3 | 5 | 7 | 9) {
                write!(f, "-")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A complete SLOW datagram: fixed 32-byte header + payload bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    /// Session identifier ([`SessionId::NIL`] on the initial CONNECT).
    pub sid: SessionId,
    /// Session time-to-live in milliseconds, 27 bits.
    pub sttl: u32,
    /// Bitmask of [`flags`] constants, 5 bits.
    pub flags: u8,
    /// Sequence number of this packet.
    pub seqnum: u32,
    /// Acknowledgement number (highest peer sequence number seen).
    pub acknum: u32,
    /// Advertised free receive-buffer bytes of this packet's sender.
    pub window: u16,
    /// Fragment identifier; groups packets of one logical payload (0 = unfragmented).
    pub fid: u8,
    /// Fragment offset, ordinal of this fragment within its `fid` (from 0).
    pub fo: u8,
    /// Payload, at most [`MAX_PAYLOAD`] bytes.
    pub data: Vec<u8>,
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Output length is exactly `HEADER_LEN + data.len()`.  The `sttl` and
    /// `flags` fields are masked to their wire widths (27 and 5 bits).
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge { len: self.data.len() });
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.extend_from_slice(&self.sid.0);

        let packed = ((self.sttl & 0x07FF_FFFF) << 5) | u32::from(self.flags & 0x1F);
        buf.extend_from_slice(&packed.to_le_bytes());

        buf.extend_from_slice(&self.seqnum.to_le_bytes());
        buf.extend_from_slice(&self.acknum.to_le_bytes());
        buf.extend_from_slice(&self.window.to_le_bytes());
        buf.push(self.fid);
        buf.push(self.fo);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Everything past the fixed header is payload; datagrams shorter than
    /// [`HEADER_LEN`] are rejected.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated { len: buf.len() });
        }

        let mut sid = [0u8; 16];
        sid.copy_from_slice(&buf[0..16]);

        let packed = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let flags = (packed & 0x1F) as u8;
        let sttl = packed >> 5;

        Ok(Packet {
            sid: SessionId(sid),
            sttl,
            flags,
            seqnum: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            acknum: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            window: u16::from_le_bytes(buf[28..30].try_into().unwrap()),
            fid: buf[30],
            fo: buf[31],
            data: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// `true` when any of the given flag bits is set.
    pub fn has_flag(&self, mask: u8) -> bool {
        self.flags & mask != 0
    }
}

impl fmt::Display for Packet {
    /// One-line summary used in log output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sid={} flags=0x{:02x}(C={},R={},ACK={},A={},MB={}) sttl={}ms seq={} ack={} win={} fid={} fo={} len={}",
            self.sid,
            self.flags,
            u8::from(self.has_flag(flags::CONNECT)),
            u8::from(self.has_flag(flags::REVIVE)),
            u8::from(self.has_flag(flags::ACK)),
            u8::from(self.has_flag(flags::ACCEPT)),
            u8::from(self.has_flag(flags::MOREBITS)),
            self.sttl,
            self.seqnum,
            self.acknum,
            self.window,
            self.fid,
            self.fo,
            self.data.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when encoding or decoding a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Payload exceeds [`MAX_PAYLOAD`] bytes.
    #[error("payload too large: {len} bytes (max {MAX_PAYLOAD})")]
    PayloadTooLarge { len: usize },
    /// Datagram shorter than the fixed header.
    #[error("packet truncated: {len} bytes (header is {HEADER_LEN})")]
    Truncated { len: usize },
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn sample_packet() -> Packet {
        Packet {
            sid: SessionId([0xA5; 16]),
            sttl: 120_000,
            flags: flags::ACK | flags::MOREBITS,
            seqnum: 7,
            acknum: 3,
            window: 1024,
            fid: 2,
            fo: 1,
            data: b"abcdef".to_vec(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = sample_packet();
        let bytes = pkt.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 6);
        let back = Packet::decode(&bytes).unwrap();
        assert_eq!(back, pkt);
    }

    #[test]
    fn encode_length_is_header_plus_payload() {
        let mut pkt = sample_packet();
        pkt.data = vec![0u8; MAX_PAYLOAD];
        assert_eq!(pkt.encode().unwrap().len(), HEADER_LEN + MAX_PAYLOAD);

        pkt.data.clear();
        assert_eq!(pkt.encode().unwrap().len(), HEADER_LEN);
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut pkt = sample_packet();
        pkt.data = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(
            pkt.encode(),
            Err(PacketError::PayloadTooLarge { len: MAX_PAYLOAD + 1 })
        );
    }

    #[test]
    fn decode_truncated_rejected() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::Truncated { len: 0 }));
        let short = [0u8; HEADER_LEN - 1];
        assert_eq!(
            Packet::decode(&short),
            Err(PacketError::Truncated { len: HEADER_LEN - 1 })
        );
        // Exactly the header is a valid empty-payload packet.
        assert!(Packet::decode(&[0u8; HEADER_LEN]).is_ok());
    }

    #[test]
    fn packed_word_all_ones() {
        // sttl saturated to 27 bits and all five flags → bytes [16..20] are 0xFF.
        let pkt = Packet {
            sttl: 0x07FF_FFFF,
            flags: 0x1F,
            ..Packet::default()
        };
        let bytes = pkt.encode().unwrap();
        assert_eq!(&bytes[16..20], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn packed_word_sttl_one() {
        // sttl = 1, flags = 0 → packed word is 1 << 5 = 0x20, little-endian.
        let pkt = Packet {
            sttl: 1,
            flags: 0,
            ..Packet::default()
        };
        let bytes = pkt.encode().unwrap();
        assert_eq!(&bytes[16..20], &[0x20, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn decode_splits_packed_word() {
        let mut raw = vec![0u8; HEADER_LEN];
        let packed: u32 = (5000 << 5) | 0b10100;
        raw[16..20].copy_from_slice(&packed.to_le_bytes());
        let pkt = Packet::decode(&raw).unwrap();
        assert_eq!(pkt.sttl, 5000);
        assert_eq!(pkt.flags, 0b10100);
        assert!(pkt.has_flag(flags::CONNECT));
        assert!(pkt.has_flag(flags::ACK));
        assert!(!pkt.has_flag(flags::REVIVE));
    }

    #[test]
    fn reencode_reproduces_arbitrary_datagrams() {
        // Any byte string of at least header length decodes, and re-encoding
        // reproduces it exactly (the packed word loses no bits either way).
        let mut rng = rand::rng();
        for _ in 0..100 {
            let len = rng.random_range(HEADER_LEN..HEADER_LEN + 256);
            let raw: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let pkt = Packet::decode(&raw).unwrap();
            assert_eq!(pkt.encode().unwrap(), raw);
        }
    }

    #[test]
    fn random_packets_roundtrip() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let mut sid = [0u8; 16];
            rng.fill(&mut sid);
            let pkt = Packet {
                sid: SessionId(sid),
                sttl: rng.random_range(0..=0x07FF_FFFF),
                flags: rng.random_range(0..=0x1F),
                seqnum: rng.random(),
                acknum: rng.random(),
                window: rng.random(),
                fid: rng.random(),
                fo: rng.random(),
                data: (0..rng.random_range(0..=MAX_PAYLOAD)).map(|_| rng.random()).collect(),
            };
            let back = Packet::decode(&pkt.encode().unwrap()).unwrap();
            assert_eq!(back, pkt);
        }
    }

    #[test]
    fn session_id_display_grouping() {
        let sid = SessionId([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ]);
        assert_eq!(sid.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
        assert!(SessionId::NIL.is_nil());
        assert!(!sid.is_nil());
    }
}
