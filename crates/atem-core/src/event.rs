//! State-change categories delivered to subscribers
//!
//! Each parsed packet accumulates the categories its commands touched;
//! subscribers get at most one notification per category per packet.

/// Category of a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StateEvent {
    Aux = 0,
    Dsk,
    FadeToBlack,
    InputProperties,
    Usk,
    UskDve,
    MediaPlayer,
    MediaPool,
    ProductId,
    ProtocolVersion,
    Source,
    Stream,
    Topology,
    TransitionPosition,
    TransitionState,
}

impl StateEvent {
    pub const COUNT: usize = 15;

    pub fn from_index(index: usize) -> Option<StateEvent> {
        use StateEvent::*;
        Some(match index {
            0 => Aux,
            1 => Dsk,
            2 => FadeToBlack,
            3 => InputProperties,
            4 => Usk,
            5 => UskDve,
            6 => MediaPlayer,
            7 => MediaPool,
            8 => ProductId,
            9 => ProtocolVersion,
            10 => Source,
            11 => Stream,
            12 => Topology,
            13 => TransitionPosition,
            14 => TransitionState,
            _ => return None,
        })
    }

    fn bit(self) -> u16 {
        1 << (self as u8)
    }
}

/// Set of categories touched by one packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSet(u16);

impl EventSet {
    pub const fn new() -> Self {
        EventSet(0)
    }

    pub fn insert(&mut self, event: StateEvent) {
        self.0 |= event.bit();
    }

    pub fn contains(&self, event: StateEvent) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = StateEvent> + '_ {
        let bits = self.0;
        (0..StateEvent::COUNT)
            .filter(move |i| bits & (1 << i) != 0)
            .filter_map(StateEvent::from_index)
    }
}
