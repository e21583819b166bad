//! Outbound command construction
//!
//! A command is serialized immediately before the packet leaves, against the
//! protocol version the switcher advertised; a few layouts moved between
//! firmware generations and the version decides which variant goes out.

use crate::packet::{put_command_header, CommandTag};
use crate::types::{
    DveKeyFrame, DveProperty, KeyerType, MediaSourceType, ProtocolVersion, Source, TransitionStyle,
};
use bytes::BytesMut;

/// Firmware generation where `DDsA` moved the keyer index from payload
/// offset 0 to offset 1
const DSK_AUTO_KEYER_AT_ONE: ProtocolVersion = ProtocolVersion::new(2, 28);

/// A control command addressed to the switcher
///
/// `me` is a 0-based mix-effect index, `keyer` a 0-based keyer index within
/// it. Sources are the 16-bit routing identifiers of [`Source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the configured transition on a mix-effect
    Auto { me: u8 },
    /// Hard cut program/preview on a mix-effect
    Cut { me: u8 },
    /// Toggle fade-to-black on a mix-effect
    FadeToBlack { me: u8 },
    /// Route a source to program
    Program { me: u8, source: Source },
    /// Route a source to preview
    Preview { me: u8, source: Source },
    /// Route a source to an aux output
    AuxSource { channel: u8, source: Source },
    /// Move the manual transition slider, 0..=10000
    TransitionPosition { me: u8, position: u16 },
    /// Change transition style and/or the next-transition layer bitmap
    TransitionState {
        me: u8,
        style: Option<TransitionStyle>,
        next: Option<u8>,
    },
    /// Upstream keyer fill source
    UskFill { me: u8, keyer: u8, source: Source },
    /// Upstream keyer key (cut) source; the keyer must be in luma mode
    UskKey { me: u8, keyer: u8, source: Source },
    /// Upstream keyer type and/or flying-key enable
    UskType {
        me: u8,
        keyer: u8,
        key_type: Option<KeyerType>,
        flying: Option<bool>,
    },
    /// Upstream keyer on-air
    UskOnAir { me: u8, keyer: u8, enabled: bool },
    /// Downstream keyer fill source
    DskFill { keyer: u8, source: Source },
    /// Downstream keyer key source
    DskKey { keyer: u8, source: Source },
    /// Downstream keyer on-air
    DskOnAir { keyer: u8, on_air: bool },
    /// Tie a downstream keyer to the next transition
    DskTie { keyer: u8, tie: bool },
    /// Run the downstream keyer auto transition
    DskAuto { keyer: u8 },
    /// Set DVE geometry; only the listed properties change
    UskDveProperties {
        me: u8,
        keyer: u8,
        properties: Vec<(DveProperty, i32)>,
    },
    /// Set DVE geometry on a stored keyframe
    UskDveKeyFrameProperties {
        me: u8,
        keyer: u8,
        key_frame: DveKeyFrame,
        properties: Vec<(DveProperty, i32)>,
    },
    /// Fly the keyer to a stored keyframe
    UskDveKeyFrameRun {
        me: u8,
        keyer: u8,
        key_frame: DveKeyFrame,
        run_to_infinite: u8,
    },
    /// Select what a mediaplayer plays
    MediaPlayerSource {
        mp: u8,
        source_type: Option<MediaSourceType>,
        still: Option<u8>,
        clip: Option<u8>,
    },
    /// Persist the current state as the power-on state
    SaveStartupState,
    /// Start or stop the live stream
    StreamRequest { enable: bool },
    /// Grab a still of program into the media pool
    CaptureStill,
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        use Command::*;
        CommandTag::new(match self {
            Auto { .. } => b"DAut",
            Cut { .. } => b"DCut",
            FadeToBlack { .. } => b"FtbA",
            Program { .. } => b"CPgI",
            Preview { .. } => b"CPvI",
            AuxSource { .. } => b"CAuS",
            TransitionPosition { .. } => b"CTPs",
            TransitionState { .. } => b"CTTp",
            UskFill { .. } => b"CKeF",
            UskKey { .. } => b"CKeC",
            UskType { .. } => b"CKTp",
            UskOnAir { .. } => b"CKOn",
            DskFill { .. } => b"CDsF",
            DskKey { .. } => b"CDsC",
            DskOnAir { .. } => b"CDsL",
            DskTie { .. } => b"CDsT",
            DskAuto { .. } => b"DDsA",
            UskDveProperties { .. } => b"CKDV",
            UskDveKeyFrameProperties { .. } => b"CKFP",
            UskDveKeyFrameRun { .. } => b"RFlK",
            MediaPlayerSource { .. } => b"MPSS",
            SaveStartupState => b"SRsv",
            StreamRequest { .. } => b"StrR",
            CaptureStill => b"Capt",
        })
    }

    /// Serialized size including the 8-byte command header
    pub fn encoded_len(&self) -> u16 {
        use Command::*;
        match self {
            CaptureStill => 8,
            UskType { .. } | UskDveKeyFrameRun { .. } | MediaPlayerSource { .. } => 16,
            UskDveKeyFrameProperties { .. } => 64,
            UskDveProperties { .. } => 72,
            _ => 12,
        }
    }

    /// Append the full command TLV to `buf`
    ///
    /// `version` is the protocol version in effect at send time; it selects
    /// between firmware-dependent layouts.
    pub fn write(&self, buf: &mut BytesMut, version: ProtocolVersion) {
        use Command::*;

        let len = self.encoded_len();
        put_command_header(buf, self.tag(), len);

        let start = buf.len();
        buf.resize(start + len as usize - 8, 0);
        let p = &mut buf[start..];

        match self {
            Auto { me } | Cut { me } | FadeToBlack { me } => {
                p[0] = *me;
            }
            Program { me, source } | Preview { me, source } => {
                p[0] = *me;
                p[2..4].copy_from_slice(&source.0.to_be_bytes());
            }
            AuxSource { channel, source } => {
                p[0] = 1;
                p[1] = *channel;
                p[2..4].copy_from_slice(&source.0.to_be_bytes());
            }
            TransitionPosition { me, position } => {
                p[0] = *me;
                p[2..4].copy_from_slice(&position.to_be_bytes());
            }
            TransitionState { me, style, next } => {
                let mut mask = 0u8;
                if let Some(style) = style {
                    mask |= 0x01;
                    p[2] = *style as u8;
                }
                if let Some(next) = next {
                    mask |= 0x02;
                    p[3] = *next;
                }
                p[0] = mask;
                p[1] = *me;
            }
            UskFill { me, keyer, source } | UskKey { me, keyer, source } => {
                p[0] = *me;
                p[1] = *keyer;
                p[2..4].copy_from_slice(&source.0.to_be_bytes());
            }
            UskType {
                me,
                keyer,
                key_type,
                flying,
            } => {
                let mut mask = 0u8;
                if let Some(key_type) = key_type {
                    mask |= 0x01;
                    p[3] = *key_type as u8;
                }
                if let Some(flying) = flying {
                    mask |= 0x02;
                    p[4] = *flying as u8;
                }
                p[0] = mask;
                p[1] = *me;
                p[2] = *keyer;
            }
            UskOnAir { me, keyer, enabled } => {
                p[0] = *me;
                p[1] = *keyer;
                p[2] = *enabled as u8;
            }
            DskFill { keyer, source } | DskKey { keyer, source } => {
                p[0] = *keyer;
                p[2..4].copy_from_slice(&source.0.to_be_bytes());
            }
            DskOnAir { keyer, on_air } => {
                p[0] = *keyer;
                p[1] = *on_air as u8;
            }
            DskTie { keyer, tie } => {
                p[0] = *keyer;
                p[1] = *tie as u8;
            }
            DskAuto { keyer } => {
                // Older firmware reads the keyer index one byte earlier.
                if version >= DSK_AUTO_KEYER_AT_ONE {
                    p[1] = *keyer;
                } else {
                    p[0] = *keyer;
                }
            }
            UskDveProperties {
                me,
                keyer,
                properties,
            } => {
                put_dve_fields(p, properties);
                p[4] = *me;
                p[5] = *keyer;
            }
            UskDveKeyFrameProperties {
                me,
                keyer,
                key_frame,
                properties,
            } => {
                put_dve_fields(p, properties);
                p[4] = *me;
                p[5] = *keyer;
                p[6] = *key_frame as u8;
            }
            UskDveKeyFrameRun {
                me,
                keyer,
                key_frame,
                run_to_infinite,
            } => {
                p[1] = *me;
                p[2] = *keyer;
                p[4] = *key_frame as u8;
                p[5] = *run_to_infinite;
            }
            MediaPlayerSource {
                mp,
                source_type,
                still,
                clip,
            } => {
                let mut mask = 0u8;
                if let Some(source_type) = source_type {
                    mask |= 0x01;
                    p[2] = *source_type as u8;
                }
                if let Some(still) = still {
                    mask |= 0x02;
                    p[3] = *still;
                }
                if let Some(clip) = clip {
                    mask |= 0x04;
                    p[4] = *clip;
                }
                p[0] = mask;
                p[1] = *mp;
            }
            SaveStartupState | CaptureStill => {}
            StreamRequest { enable } => {
                p[0] = *enable as u8;
            }
        }
    }
}

/// Write the field mask and the supplied property words
///
/// Properties live at payload offset 8 + 4 per ordinal; unsupplied fields
/// stay zero and are masked out.
fn put_dve_fields(p: &mut [u8], properties: &[(DveProperty, i32)]) {
    let mut mask = 0u32;
    for &(property, value) in properties {
        mask |= 1 << property as u8;
        let off = 8 + 4 * property as usize;
        p[off..off + 4].copy_from_slice(&value.to_be_bytes());
    }
    p[0..4].copy_from_slice(&mask.to_be_bytes());
}
