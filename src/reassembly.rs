//! Inbound fragment reassembly.
//!
//! Fragments of one logical payload share a fragment id (`fid`) and carry
//! their ordinal within it (`fo`); the last fragment is the one without
//! MOREBITS.  Fragments may arrive in any order, and fragments of different
//! fids may interleave freely — each fid reassembles independently.
//!
//! This module only manages state; acknowledging and window accounting are
//! the caller's responsibility.

use std::collections::{BTreeMap, HashMap};

use crate::packet::{flags, Packet};

/// Partial payload for one fragment id.
#[derive(Debug, Default)]
struct FragmentBuffer {
    /// Received fragments keyed by offset (a repeated offset overwrites).
    parts: BTreeMap<u8, Vec<u8>>,
    /// Whether the MOREBITS-clear fragment has arrived.
    saw_last: bool,
    /// Offset of that final fragment.
    max_offset: u8,
}

impl FragmentBuffer {
    /// The complete payload, if every offset `0..=max_offset` is present.
    fn try_finish(&self) -> Option<Vec<u8>> {
        if !self.saw_last || self.parts.len() != usize::from(self.max_offset) + 1 {
            return None;
        }
        // BTreeMap iterates in offset order; with max_offset+1 distinct u8
        // keys present the range 0..=max_offset is fully covered.
        let mut all = Vec::new();
        for part in self.parts.values() {
            all.extend_from_slice(part);
        }
        Some(all)
    }
}

/// Reorders and concatenates inbound data packets into logical payloads.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: HashMap<u8, FragmentBuffer>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one data packet.
    ///
    /// Returns the complete payload once the packet's fid has every fragment,
    /// discarding the fid's buffer in the same step; otherwise `None`.
    pub fn accept(&mut self, pkt: &Packet) -> Option<Vec<u8>> {
        let buf = self.buffers.entry(pkt.fid).or_default();
        buf.parts.insert(pkt.fo, pkt.data.clone());
        if !pkt.has_flag(flags::MOREBITS) {
            buf.saw_last = true;
            buf.max_offset = pkt.fo;
        }

        let done = buf.try_finish();
        if done.is_some() {
            self.buffers.remove(&pkt.fid);
        }
        done
    }

    /// Number of fids with an incomplete payload (test hook).
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
