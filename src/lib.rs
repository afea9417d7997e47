//! `slow-peripheral` — the peripheral (client) endpoint of the SLOW
//! protocol: reliability, ordering, flow control, and fragmentation over an
//! unreliable datagram transport, plus persistable sessions that can be
//! revived after the process (and its socket) are gone.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────┐  payload   ┌───────────┐
//!  │ user data │───────────▶│  Session  │  (windows, seqnums, tx queue,
//!  └───────────┘            └─────┬─────┘   fragmentation)
//!                                 │ scheduled packets
//!                           ┌─────▼─────┐
//!                           │  Driver   │  (TX / disconnect / RX phases,
//!                           └─────┬─────┘   pure ACKs, snapshots)
//!              ┌──────────────────┼──────────────────┐
//!        ┌─────▼──────┐    ┌──────▼─────┐    ┌───────▼───────┐
//!        │ Reassembler│    │ PeerSocket │    │ SessionRecord │
//!        │ (fid / fo) │    │ (UDP)      │    │ (28-byte file)│
//!        └────────────┘    └────────────┘    └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (encode / decode, flag bits)
//! - [`session`]    — per-connection state, windows, and the transmit queue
//! - [`reassembly`] — inbound fragment reordering and concatenation
//! - [`persist`]    — on-disk session snapshot for revive
//! - [`socket`]     — async connected-UDP channel speaking packets
//! - [`driver`]     — the event loop tying it all together

pub mod driver;
pub mod packet;
pub mod persist;
pub mod reassembly;
pub mod session;
pub mod socket;
