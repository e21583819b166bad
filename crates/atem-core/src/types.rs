//! Protocol vocabulary: sources, topology, and per-facility value types

use std::fmt;

/// A 16-bit video source identifier
///
/// Well-known banks follow the switcher's routing table: physical inputs
/// count from 1, generators and internal buses live in fixed ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Source(pub u16);

impl Source {
    pub const BLACK: Source = Source(0);
    pub const COLOR_BARS: Source = Source(1000);
    pub const COLOR_GEN_1: Source = Source(2001);
    pub const COLOR_GEN_2: Source = Source(2002);
    pub const SUPER_SOURCE: Source = Source(6000);
    pub const CLEAN_FEED_1: Source = Source(7001);
    pub const CLEAN_FEED_2: Source = Source(7002);

    /// Physical input `n` (1-based)
    pub const fn input(n: u16) -> Source {
        Source(n)
    }

    /// Mediaplayer `n` (1-based) fill output
    pub const fn media_player(n: u16) -> Source {
        Source(3000 + n * 10)
    }

    /// Mediaplayer `n` (1-based) key output
    pub const fn media_player_key(n: u16) -> Source {
        Source(3001 + n * 10)
    }

    /// Aux bus `n` (1-based)
    pub const fn aux(n: u16) -> Source {
        Source(8000 + n)
    }

    /// Multiviewer output `n` (1-based)
    pub const fn multiview(n: u16) -> Source {
        Source(9000 + n)
    }

    /// Program output of mix-effect `me` (0-based)
    pub const fn me_program(me: u16) -> Source {
        Source(10010 + me * 10)
    }

    /// Preview output of mix-effect `me` (0-based)
    pub const fn me_preview(me: u16) -> Source {
        Source(10011 + me * 10)
    }
}

impl From<u16> for Source {
    fn from(raw: u16) -> Source {
        Source(raw)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Firmware protocol version; ordering is lexicographic on (major, minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        ProtocolVersion { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Facility counts advertised by the switcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Topology {
    pub mix_effects: u8,
    pub sources: u8,
    pub downstream_keyers: u8,
    pub aux_outputs: u8,
    pub mixminus_outputs: u8,
    pub media_players: u8,
    pub multiviewers: u8,
    pub serial_ports: u8,
    pub hyperdecks: u8,
    pub dves: u8,
    pub stingers: u8,
    pub supersources: u8,
    pub talkback_channels: u8,
    pub camera_control_channels: u8,
}

/// Still/clip slots available in the media pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaPlayerCapacity {
    pub stills: u8,
    pub clips: u8,
}

/// Names attached to one input source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputProperty {
    /// Display name, at most 20 bytes on the wire
    pub name_long: String,
    /// Button label, at most 4 bytes on the wire
    pub name_short: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionPosition {
    pub in_transition: bool,
    /// 0..=10000
    pub position: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransitionStyle {
    Mix = 0,
    Dip = 1,
    Wipe = 2,
}

impl TransitionStyle {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(TransitionStyle::Mix),
            1 => Some(TransitionStyle::Dip),
            2 => Some(TransitionStyle::Wipe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionState {
    pub style: TransitionStyle,
    /// Bitmap of layers included in the next transition
    pub next: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FadeToBlack {
    pub fully_black: bool,
    pub in_transition: bool,
}

/// Upstream keyer compositing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyerType {
    Luma = 0,
    Chroma = 1,
    Pattern = 2,
    Dve = 3,
}

impl KeyerType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(KeyerType::Luma),
            1 => Some(KeyerType::Chroma),
            2 => Some(KeyerType::Pattern),
            3 => Some(KeyerType::Dve),
            _ => None,
        }
    }
}

/// Upstream keyer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UskState {
    pub key_type: KeyerType,
    pub fill: Source,
    pub key: Source,
    pub mask_top: i16,
    pub mask_bottom: i16,
    pub mask_left: i16,
    pub mask_right: i16,
}

/// Geometry of a keyer in DVE mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DveState {
    pub size_x: i32,
    pub size_y: i32,
    pub pos_x: i32,
    pub pos_y: i32,
    pub rotation: i32,
}

/// DVE property selector; the discriminant is the field-mask bit ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DveProperty {
    SizeX = 0,
    SizeY = 1,
    PosX = 2,
    PosY = 3,
    Rotation = 4,
}

/// Stored DVE keyframe selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DveKeyFrame {
    A = 1,
    B = 2,
    Full = 3,
    RunToInfinite = 4,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DskState {
    pub on_air: bool,
    pub in_transition: bool,
    pub auto_transitioning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DskSource {
    pub fill: Source,
    pub key: Source,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DskProperties {
    pub tie: bool,
}

/// What a mediaplayer is currently playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaSourceType {
    Still = 1,
    Clip = 2,
}

impl MediaSourceType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(MediaSourceType::Still),
            2 => Some(MediaSourceType::Clip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPlayerSource {
    pub source_type: MediaSourceType,
    pub still_index: u8,
    pub clip_index: u8,
}

/// One occupied slot of the media pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaPoolFrame {
    /// File name, at most 64 bytes on the wire
    pub name: String,
}

/// Live-stream output state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Starting,
    Streaming,
}

impl StreamState {
    pub fn from_wire(val: u8) -> Option<Self> {
        match val {
            1 => Some(StreamState::Idle),
            2 => Some(StreamState::Starting),
            4 => Some(StreamState::Streaming),
            _ => None,
        }
    }
}
