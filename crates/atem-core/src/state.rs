//! Mirrored switcher state
//!
//! The store is a composition of [`Slot`]s: every field remembers the
//! packet id that wrote it, so command effects respect modular id order
//! regardless of arrival order. Inbound commands dispatch on their 4-byte
//! tag and decode fields at fixed big-endian offsets; unknown tags are the
//! caller's concern, stale writes are dropped here.
//!
//! Getters never mutate. `None` covers both "not yet received" and "index
//! out of range for the advertised topology".

use crate::event::StateEvent;
use crate::packet::CommandTag;
use crate::slot::Slot;
use crate::types::*;
use std::collections::HashMap;
use std::mem::size_of;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct UpstreamKeyer {
    state: Slot<UskState>,
    dve: Slot<DveState>,
    at_key_frame: Slot<u8>,
}

#[derive(Debug, Clone, Default)]
struct MixEffect {
    program: Slot<Source>,
    preview: Slot<Source>,
    /// Bit `k` set iff upstream keyer `k` is on air
    usk_on_air: Slot<u16>,
    transition_position: Slot<TransitionPosition>,
    transition_state: Slot<TransitionState>,
    ftb: Slot<FadeToBlack>,
    keyers: Vec<UpstreamKeyer>,
}

#[derive(Debug, Clone, Default)]
struct DownstreamKeyer {
    state: Slot<DskState>,
    source: Slot<DskSource>,
    properties: Slot<DskProperties>,
}

/// The locally mirrored state of one switcher
///
/// Created empty; filled by the boot snapshot after each handshake and
/// cleared in full on reconnect.
#[derive(Debug, Clone, Default)]
pub struct SwitcherState {
    topology: Slot<Topology>,
    version: Slot<ProtocolVersion>,
    product_id: Slot<String>,
    media_player_capacity: Slot<MediaPlayerCapacity>,
    input_properties: HashMap<Source, Slot<InputProperty>>,
    mix_effects: Vec<MixEffect>,
    downstream_keyers: Vec<DownstreamKeyer>,
    aux_outputs: Vec<Slot<Source>>,
    media_player_sources: Vec<Slot<MediaPlayerSource>>,
    media_pool: HashMap<u16, Slot<MediaPoolFrame>>,
    stream: Slot<StreamState>,
}

impl SwitcherState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything, including freshness ids; used on reconnect
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Apply one inbound command from packet `id`
    ///
    /// Returns the change category when the command was recognized and at
    /// least one write was accepted; `None` for unknown tags, malformed
    /// payloads, out-of-range indices, and stale writes.
    pub fn apply(&mut self, tag: CommandTag, payload: &[u8], id: u16) -> Option<StateEvent> {
        match tag.as_bytes() {
            b"_ver" => self.apply_version(payload, id),
            b"_pin" => self.apply_product_id(payload, id),
            b"_top" => self.apply_topology(payload, id),
            b"_MeC" => self.apply_me_config(payload),
            b"_mpl" => self.apply_media_player_capacity(payload, id),
            b"AuxS" => self.apply_aux_source(payload, id),
            b"DskB" => self.apply_dsk_source(payload, id),
            b"DskP" => self.apply_dsk_properties(payload, id),
            b"DskS" => self.apply_dsk_state(payload, id),
            b"FtbS" => self.apply_ftb_state(payload, id),
            b"InPr" => self.apply_input_property(payload, id),
            b"KeBP" => self.apply_usk_state(payload, id),
            b"KeOn" => self.apply_usk_on_air(payload, id),
            b"KeDV" => self.apply_usk_dve(payload, id),
            b"KeFS" => self.apply_usk_key_frame(payload, id),
            b"MPCE" => self.apply_media_player_source(payload, id),
            b"MPfe" => self.apply_media_pool_frame(payload, id),
            b"PrgI" => self.apply_program(payload, id),
            b"PrvI" => self.apply_preview(payload, id),
            b"StRS" => self.apply_stream_state(payload, id),
            b"TrPs" => self.apply_transition_position(payload, id),
            b"TrSS" => self.apply_transition_state(payload, id),
            _ => None,
        }
    }

    fn apply_version(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let version = ProtocolVersion::new(u16_at(p, 0)?, u16_at(p, 2)?);
        self.version
            .set(id, version)
            .then_some(StateEvent::ProtocolVersion)
    }

    fn apply_product_id(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        if p.is_empty() {
            return None;
        }
        let name = clean_text(&p[..p.len().min(45)]);
        self.product_id.set(id, name).then_some(StateEvent::ProductId)
    }

    fn apply_topology(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        if p.len() < 14 {
            debug!("short topology payload ({} bytes)", p.len());
            return None;
        }
        let topology = Topology {
            mix_effects: p[0],
            sources: p[1],
            downstream_keyers: p[2],
            aux_outputs: p[3],
            mixminus_outputs: p[4],
            media_players: p[5],
            multiviewers: p[6],
            serial_ports: p[7],
            hyperdecks: p[8],
            dves: p[9],
            stingers: p[10],
            supersources: p[11],
            talkback_channels: p[12],
            camera_control_channels: p[13],
        };

        if !self.topology.set(id, topology) {
            return None;
        }

        // Size the per-facility arrays; entries that already exist keep
        // their contents, so an early _MeC survives a later _top.
        self.mix_effects
            .resize_with(topology.mix_effects as usize, MixEffect::default);
        self.downstream_keyers
            .resize_with(topology.downstream_keyers as usize, DownstreamKeyer::default);
        self.aux_outputs
            .resize_with(topology.aux_outputs as usize, Slot::default);
        self.media_player_sources
            .resize_with(topology.media_players as usize, Slot::default);

        Some(StateEvent::Topology)
    }

    fn apply_me_config(&mut self, p: &[u8]) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let keyers = u8_at(p, 1)? as usize;

        if let Some(topology) = self.topology.get() {
            if me >= topology.mix_effects as usize {
                debug!("mix-effect config for out-of-range ME {}", me);
                return None;
            }
        } else if me >= self.mix_effects.len() {
            // Tolerate _MeC before _top by growing on demand.
            self.mix_effects.resize_with(me + 1, MixEffect::default);
        }

        self.mix_effects
            .get_mut(me)?
            .keyers
            .resize_with(keyers, UpstreamKeyer::default);
        Some(StateEvent::Topology)
    }

    fn apply_media_player_capacity(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let capacity = MediaPlayerCapacity {
            stills: u8_at(p, 0)?,
            clips: u8_at(p, 1)?,
        };
        self.media_player_capacity
            .set(id, capacity)
            .then_some(StateEvent::MediaPlayer)
    }

    fn apply_aux_source(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let channel = u8_at(p, 0)? as usize;
        let source = Source(u16_at(p, 2)?);
        self.aux_outputs
            .get_mut(channel)?
            .set(id, source)
            .then_some(StateEvent::Aux)
    }

    fn apply_dsk_source(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let keyer = u8_at(p, 0)? as usize;
        let source = DskSource {
            fill: Source(u16_at(p, 2)?),
            key: Source(u16_at(p, 4)?),
        };
        self.downstream_keyers
            .get_mut(keyer)?
            .source
            .set(id, source)
            .then_some(StateEvent::Dsk)
    }

    fn apply_dsk_properties(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let keyer = u8_at(p, 0)? as usize;
        let properties = DskProperties {
            tie: u8_at(p, 1)? != 0,
        };
        self.downstream_keyers
            .get_mut(keyer)?
            .properties
            .set(id, properties)
            .then_some(StateEvent::Dsk)
    }

    fn apply_dsk_state(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let keyer = u8_at(p, 0)? as usize;
        let state = DskState {
            on_air: u8_at(p, 1)? != 0,
            in_transition: u8_at(p, 2)? != 0,
            auto_transitioning: u8_at(p, 3)? != 0,
        };
        self.downstream_keyers
            .get_mut(keyer)?
            .state
            .set(id, state)
            .then_some(StateEvent::Dsk)
    }

    fn apply_ftb_state(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let ftb = FadeToBlack {
            fully_black: u8_at(p, 1)? != 0,
            in_transition: u8_at(p, 2)? != 0,
        };
        self.mix_effects
            .get_mut(me)?
            .ftb
            .set(id, ftb)
            .then_some(StateEvent::FadeToBlack)
    }

    fn apply_input_property(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        if p.len() < 26 {
            debug!("short input property payload ({} bytes)", p.len());
            return None;
        }
        let source = Source(u16_at(p, 0)?);
        let property = InputProperty {
            name_long: clean_text(&p[2..22]),
            name_short: clean_text(&p[22..26]),
        };
        self.input_properties
            .entry(source)
            .or_default()
            .set(id, property)
            .then_some(StateEvent::InputProperties)
    }

    fn apply_usk_state(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let keyer = u8_at(p, 1)? as usize;
        let state = UskState {
            key_type: KeyerType::from_u8(u8_at(p, 2)?)?,
            fill: Source(u16_at(p, 6)?),
            key: Source(u16_at(p, 8)?),
            mask_top: i16_at(p, 12)?,
            mask_bottom: i16_at(p, 14)?,
            mask_left: i16_at(p, 16)?,
            mask_right: i16_at(p, 18)?,
        };
        self.mix_effects
            .get_mut(me)?
            .keyers
            .get_mut(keyer)?
            .state
            .set(id, state)
            .then_some(StateEvent::Usk)
    }

    fn apply_usk_on_air(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let keyer = u8_at(p, 1)?;
        let on_air = u8_at(p, 2)? != 0;
        if keyer > 15 {
            debug!("keyer {} beyond the on-air bitmap", keyer);
            return None;
        }

        self.mix_effects
            .get_mut(me)?
            .usk_on_air
            .update(id, |old| {
                let mut mask = old.copied().unwrap_or(0);
                if on_air {
                    mask |= 1 << keyer;
                } else {
                    mask &= !(1 << keyer);
                }
                mask
            })
            .then_some(StateEvent::Usk)
    }

    fn apply_usk_dve(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let keyer = u8_at(p, 1)? as usize;
        let dve = DveState {
            size_x: i32_at(p, 4)?,
            size_y: i32_at(p, 8)?,
            pos_x: i32_at(p, 12)?,
            pos_y: i32_at(p, 16)?,
            rotation: i32_at(p, 20)?,
        };
        self.mix_effects
            .get_mut(me)?
            .keyers
            .get_mut(keyer)?
            .dve
            .set(id, dve)
            .then_some(StateEvent::UskDve)
    }

    fn apply_usk_key_frame(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let keyer = u8_at(p, 1)? as usize;
        let at_key_frame = u8_at(p, 2)?;
        self.mix_effects
            .get_mut(me)?
            .keyers
            .get_mut(keyer)?
            .at_key_frame
            .set(id, at_key_frame)
            .then_some(StateEvent::UskDve)
    }

    fn apply_media_player_source(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let mp = u8_at(p, 0)? as usize;
        let source = MediaPlayerSource {
            source_type: MediaSourceType::from_u8(u8_at(p, 1)?)?,
            still_index: u8_at(p, 2)?,
            clip_index: u8_at(p, 3)?,
        };
        self.media_player_sources
            .get_mut(mp)?
            .set(id, source)
            .then_some(StateEvent::MediaPlayer)
    }

    fn apply_media_pool_frame(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let index = u16_at(p, 2)?;
        let is_used = u8_at(p, 4)?;

        if is_used == 0 {
            return self
                .media_pool
                .remove(&index)
                .map(|_| StateEvent::MediaPool);
        }

        let name_len = u16_at(p, 22)? as usize;
        let name_bytes = p.get(24..24 + name_len.min(64))?;
        let frame = MediaPoolFrame {
            name: clean_text(name_bytes),
        };
        self.media_pool
            .entry(index)
            .or_default()
            .set(id, frame)
            .then_some(StateEvent::MediaPool)
    }

    fn apply_program(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let source = Source(u16_at(p, 2)?);
        self.mix_effects
            .get_mut(me)?
            .program
            .set(id, source)
            .then_some(StateEvent::Source)
    }

    fn apply_preview(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let source = Source(u16_at(p, 2)?);
        self.mix_effects
            .get_mut(me)?
            .preview
            .set(id, source)
            .then_some(StateEvent::Source)
    }

    fn apply_stream_state(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let state = match StreamState::from_wire(u8_at(p, 0)?) {
            Some(state) => state,
            None => {
                debug!("unknown stream state {}", p[0]);
                return None;
            }
        };
        self.stream.set(id, state).then_some(StateEvent::Stream)
    }

    fn apply_transition_position(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let position = TransitionPosition {
            in_transition: u8_at(p, 1)? & 0x01 != 0,
            position: u16_at(p, 2)?,
        };
        self.mix_effects
            .get_mut(me)?
            .transition_position
            .set(id, position)
            .then_some(StateEvent::TransitionPosition)
    }

    fn apply_transition_state(&mut self, p: &[u8], id: u16) -> Option<StateEvent> {
        let me = u8_at(p, 0)? as usize;
        let state = TransitionState {
            style: TransitionStyle::from_u8(u8_at(p, 1)?)?,
            next: u8_at(p, 2)?,
        };
        self.mix_effects
            .get_mut(me)?
            .transition_state
            .set(id, state)
            .then_some(StateEvent::TransitionState)
    }

    // Queries. All read-only; indices are checked against the arrays the
    // current topology allocated.

    pub fn topology(&self) -> Option<Topology> {
        self.topology.copied()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.version.copied()
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product_id.get().map(String::as_str)
    }

    pub fn media_player_capacity(&self) -> Option<MediaPlayerCapacity> {
        self.media_player_capacity.copied()
    }

    pub fn input_property(&self, source: Source) -> Option<&InputProperty> {
        self.input_properties.get(&source)?.get()
    }

    pub fn input_properties(&self) -> impl Iterator<Item = (Source, &InputProperty)> {
        self.input_properties
            .iter()
            .filter_map(|(source, slot)| slot.get().map(|p| (*source, p)))
    }

    pub fn program_input(&self, me: u8) -> Option<Source> {
        self.mix_effects.get(me as usize)?.program.copied()
    }

    pub fn preview_input(&self, me: u8) -> Option<Source> {
        self.mix_effects.get(me as usize)?.preview.copied()
    }

    /// On-air bitmap of a mix-effect; bit `k` is keyer `k`
    pub fn usk_on_air_mask(&self, me: u8) -> Option<u16> {
        self.mix_effects.get(me as usize)?.usk_on_air.copied()
    }

    pub fn usk_on_air(&self, me: u8, keyer: u8) -> Option<bool> {
        if keyer > 15 {
            return None;
        }
        Some(self.usk_on_air_mask(me)? & (1 << keyer) != 0)
    }

    /// Number of upstream keyers configured on a mix-effect
    pub fn usk_count(&self, me: u8) -> Option<u8> {
        Some(self.mix_effects.get(me as usize)?.keyers.len() as u8)
    }

    pub fn usk_state(&self, me: u8, keyer: u8) -> Option<&UskState> {
        self.mix_effects
            .get(me as usize)?
            .keyers
            .get(keyer as usize)?
            .state
            .get()
    }

    pub fn usk_dve(&self, me: u8, keyer: u8) -> Option<&DveState> {
        self.mix_effects
            .get(me as usize)?
            .keyers
            .get(keyer as usize)?
            .dve
            .get()
    }

    pub fn usk_at_key_frame(&self, me: u8, keyer: u8) -> Option<u8> {
        self.mix_effects
            .get(me as usize)?
            .keyers
            .get(keyer as usize)?
            .at_key_frame
            .copied()
    }

    pub fn transition_position(&self, me: u8) -> Option<TransitionPosition> {
        self.mix_effects
            .get(me as usize)?
            .transition_position
            .copied()
    }

    pub fn transition_state(&self, me: u8) -> Option<TransitionState> {
        self.mix_effects.get(me as usize)?.transition_state.copied()
    }

    pub fn ftb_state(&self, me: u8) -> Option<FadeToBlack> {
        self.mix_effects.get(me as usize)?.ftb.copied()
    }

    pub fn dsk_state(&self, keyer: u8) -> Option<DskState> {
        self.downstream_keyers.get(keyer as usize)?.state.copied()
    }

    pub fn dsk_source(&self, keyer: u8) -> Option<DskSource> {
        self.downstream_keyers.get(keyer as usize)?.source.copied()
    }

    pub fn dsk_properties(&self, keyer: u8) -> Option<DskProperties> {
        self.downstream_keyers
            .get(keyer as usize)?
            .properties
            .copied()
    }

    pub fn aux_output(&self, channel: u8) -> Option<Source> {
        self.aux_outputs.get(channel as usize)?.copied()
    }

    pub fn media_player_source(&self, mp: u8) -> Option<MediaPlayerSource> {
        self.media_player_sources.get(mp as usize)?.copied()
    }

    pub fn media_pool_frame(&self, index: u16) -> Option<&MediaPoolFrame> {
        self.media_pool.get(&index)?.get()
    }

    pub fn stream_state(&self) -> Option<StreamState> {
        self.stream.copied()
    }

    /// Approximate heap footprint of the mirror, for diagnostics
    pub fn size_in_bytes(&self) -> usize {
        let keyers: usize = self
            .mix_effects
            .iter()
            .map(|me| me.keyers.capacity() * size_of::<UpstreamKeyer>())
            .sum();
        let inputs: usize = self
            .input_properties
            .values()
            .map(|slot| {
                size_of::<(Source, Slot<InputProperty>)>()
                    + slot
                        .get()
                        .map(|p| p.name_long.capacity() + p.name_short.capacity())
                        .unwrap_or(0)
            })
            .sum();
        let pool: usize = self
            .media_pool
            .values()
            .map(|slot| {
                size_of::<(u16, Slot<MediaPoolFrame>)>()
                    + slot.get().map(|f| f.name.capacity()).unwrap_or(0)
            })
            .sum();

        size_of::<Self>()
            + self.mix_effects.capacity() * size_of::<MixEffect>()
            + keyers
            + self.downstream_keyers.capacity() * size_of::<DownstreamKeyer>()
            + self.aux_outputs.capacity() * size_of::<Slot<Source>>()
            + self.media_player_sources.capacity() * size_of::<Slot<MediaPlayerSource>>()
            + inputs
            + pool
    }
}

fn u8_at(p: &[u8], i: usize) -> Option<u8> {
    p.get(i).copied()
}

fn u16_at(p: &[u8], i: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*p.get(i)?, *p.get(i + 1)?]))
}

fn i16_at(p: &[u8], i: usize) -> Option<i16> {
    Some(i16::from_be_bytes([*p.get(i)?, *p.get(i + 1)?]))
}

fn i32_at(p: &[u8], i: usize) -> Option<i32> {
    let bytes = p.get(i..i + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Fixed-width wire strings arrive NUL-padded, sometimes with garbage after
/// the terminator
fn clean_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
