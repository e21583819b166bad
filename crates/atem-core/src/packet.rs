//! Session-header framing and the command cursor
//!
//! Packet layout:
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ Byte 0:     [7:3] Flags, [2:0] Length high bits                │
//! │ Byte 1:     Length low bits (length = bytes 0-1 & 0x07FF,      │
//! │             includes this header)                              │
//! │ Byte 2-3:   Session id (uint16 big-endian)                     │
//! │ Byte 4-5:   Acknowledged peer id                               │
//! │ Byte 6-7:   Resend-request id                                  │
//! │ Byte 8-9:   Unknown; 0x0100 when requesting a resend, else 0   │
//! │ Byte 10-11: This packet's own id                               │
//! ├────────────────────────────────────────────────────────────────┤
//! │ Commands: [len u16][0 u16][tag 4 ASCII][payload], len ≥ 8      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ids occupy the low 15 bits and wrap modulo 0x8000.

use crate::error::{Error, Result};
use crate::{HEADER_SIZE, MAX_PACKET_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::BitOr;

/// Length of the hello frame opening the handshake
pub const HELLO_PACKET_SIZE: u16 = 20;

/// Handshake status byte carried at body offset 0 of INIT frames
pub const INIT_STATUS_HELLO: u8 = 0x01;
pub const INIT_STATUS_ACCEPT: u8 = 0x02;
pub const INIT_STATUS_NO_SLOT: u8 = 0x03;

const LENGTH_MASK: u16 = 0x07FF;

/// Session-header flag bits (values after the 3-bit shift)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Peer expects an acknowledgement of this packet's id
    pub const ACK_REQUEST: PacketFlags = PacketFlags(0x01);
    /// Handshake frame; body byte 0 carries the status
    pub const INIT: PacketFlags = PacketFlags(0x02);
    /// Packet is a repeat of an earlier send
    pub const RETRANSMISSION: PacketFlags = PacketFlags(0x04);
    /// Sender wants the packet named by the resend id again
    pub const RESEND_REQUEST: PacketFlags = PacketFlags(0x08);
    /// Acknowledgement carrying an ack id
    pub const ACK_REPLY: PacketFlags = PacketFlags(0x10);

    pub fn from_byte(byte: u8) -> Self {
        PacketFlags(byte & 0x1F)
    }

    pub fn to_byte(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

/// Four-byte ASCII command name
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandTag(pub [u8; 4]);

impl CommandTag {
    pub const fn new(tag: &[u8; 4]) -> Self {
        CommandTag(*tag)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandTag({})", self)
    }
}

/// Borrowed view of one command inside a packet body
#[derive(Debug, Clone, Copy)]
pub struct CommandView<'a> {
    pub tag: CommandTag,
    pub payload: &'a [u8],
}

/// Forward-only cursor over the commands of a packet body
///
/// Stops at the declared packet length or at the first structurally invalid
/// command length (0, shorter than the 8-byte command header, or past the
/// end of the body).
#[derive(Debug, Clone)]
pub struct CommandCursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for CommandCursor<'a> {
    type Item = CommandView<'a>;

    fn next(&mut self) -> Option<CommandView<'a>> {
        let rest = &self.body[self.pos..];
        if rest.len() < 8 {
            return None;
        }

        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        if len < 8 || len > rest.len() {
            // Malformed length; everything after it is unreachable.
            self.pos = self.body.len();
            return None;
        }

        let tag = CommandTag([rest[4], rest[5], rest[6], rest[7]]);
        let payload = &rest[8..len];
        self.pos += len;

        Some(CommandView { tag, payload })
    }
}

/// Borrowed read view over a received datagram
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    data: &'a [u8],
}

impl<'a> PacketView<'a> {
    /// Wrap a datagram; fails when it cannot hold the session header
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                have: data.len(),
            });
        }
        Ok(PacketView { data })
    }

    pub fn flags(&self) -> PacketFlags {
        PacketFlags::from_byte(self.data[0] >> 3)
    }

    /// Declared total length, including the header
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]]) & LENGTH_MASK
    }

    pub fn session_id(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn ack_id(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    pub fn resend_id(&self) -> u16 {
        u16::from_be_bytes([self.data[6], self.data[7]])
    }

    /// The undocumented marker field at bytes 8-9
    pub fn unknown(&self) -> u16 {
        u16::from_be_bytes([self.data[8], self.data[9]])
    }

    /// This packet's own id
    pub fn packet_id(&self) -> u16 {
        u16::from_be_bytes([self.data[10], self.data[11]])
    }

    /// Body bytes, capped at the declared length
    pub fn body(&self) -> &'a [u8] {
        let end = (self.length() as usize).min(self.data.len());
        &self.data[HEADER_SIZE.min(end)..end]
    }

    /// Handshake status byte of an INIT frame
    pub fn init_status(&self) -> Option<u8> {
        self.body().first().copied()
    }

    pub fn commands(&self) -> CommandCursor<'a> {
        CommandCursor {
            body: self.body(),
            pos: 0,
        }
    }
}

/// Owned packet under construction
#[derive(Debug, Clone)]
pub struct Packet {
    data: BytesMut,
}

impl Packet {
    /// Create a zero-filled packet of `length` bytes (min 12) with the
    /// header fields that never change after construction
    pub fn new(flags: PacketFlags, session_id: u16, length: u16) -> Packet {
        let length = (length.max(HEADER_SIZE as u16)) & LENGTH_MASK;
        let mut data = BytesMut::zeroed(length as usize);

        data[0] = (flags.to_byte() << 3) | ((length >> 8) as u8 & 0x07);
        data[1] = (length & 0xFF) as u8;
        data[2..4].copy_from_slice(&session_id.to_be_bytes());

        Packet { data }
    }

    /// Create a packet around a prebuilt command body
    pub fn from_body(flags: PacketFlags, session_id: u16, body: &[u8]) -> Result<Packet> {
        let total = HEADER_SIZE + body.len();
        if total > MAX_PACKET_SIZE {
            return Err(Error::PacketTooLarge(total));
        }

        let mut packet = Packet::new(flags, session_id, total as u16);
        packet.data[HEADER_SIZE..].copy_from_slice(body);
        Ok(packet)
    }

    pub fn set_ack_id(&mut self, id: u16) {
        self.data[4..6].copy_from_slice(&id.to_be_bytes());
    }

    pub fn set_resend_id(&mut self, id: u16) {
        self.data[6..8].copy_from_slice(&id.to_be_bytes());
    }

    /// The undocumented marker field; 0x0100 accompanies resend requests
    pub fn set_unknown(&mut self, value: u16) {
        self.data[8..10].copy_from_slice(&value.to_be_bytes());
    }

    pub fn set_packet_id(&mut self, id: u16) {
        self.data[10..12].copy_from_slice(&id.to_be_bytes());
    }

    /// Mutable access to the body, for fixed-layout frames like the hello
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_SIZE..]
    }

    pub fn view(&self) -> PacketView<'_> {
        PacketView { data: &self.data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}

/// Append one command TLV to a body buffer
pub(crate) fn put_command_header(buf: &mut BytesMut, tag: CommandTag, total_len: u16) {
    buf.put_u16(total_len);
    buf.put_u16(0);
    buf.put_slice(tag.as_bytes());
}
