//! ATEM Core
//!
//! Core types and protocol primitives for the ATEM switcher control
//! protocol, a UDP session layer carrying TLV commands.
//!
//! This crate provides:
//! - Session-header framing and the command cursor ([`Packet`],
//!   [`PacketView`], [`CommandCursor`])
//! - Outbound command construction ([`Command`])
//! - Duplicate/gap detection over the 15-bit id space ([`SequenceTracker`])
//! - The mirrored switcher state and its freshness primitives
//!   ([`SwitcherState`], [`Slot`])
//! - State-change categories ([`StateEvent`], [`EventSet`])
//!
//! No I/O happens here; the session engine in `atem-client` feeds datagrams
//! in and takes frames out.

pub mod command;
pub mod error;
pub mod event;
pub mod packet;
pub mod sequence;
pub mod slot;
pub mod state;
pub mod types;

pub use command::Command;
pub use error::{Error, Result};
pub use event::{EventSet, StateEvent};
pub use packet::{CommandCursor, CommandTag, CommandView, Packet, PacketFlags, PacketView};
pub use sequence::{id_newer_than, SequenceTracker};
pub use slot::Slot;
pub use state::SwitcherState;
pub use types::*;

/// Default switcher control port
pub const DEFAULT_PORT: u16 = 9910;

/// Session id used on the hello frame, before the switcher assigns one
pub const HANDSHAKE_SESSION_ID: u16 = 0x0B06;

/// Session header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Largest packet the protocol can describe (11-bit length field)
pub const MAX_PACKET_SIZE: usize = 2047;

/// Upper bound on commands parsed out of a single packet
pub const MAX_COMMANDS_PER_PACKET: usize = 512;
