//! Retention of sent command packets for peer-requested retransmission

use atem_core::sequence::ID_MASK;
use bytes::Bytes;
use std::collections::VecDeque;

const HALF_SPAN: u16 = 0x4000;

/// How far behind an acked id an entry may trail before it is dropped
const ACK_HORIZON: u16 = 32;

/// Bounded ring of sent packets, oldest first
///
/// Entries are keyed by their 15-bit packet id. Eviction happens three
/// ways: capacity pressure (oldest out), an ACK for the exact id, and an
/// ACK that leaves the entry more than 32 ids behind.
#[derive(Debug)]
pub(crate) struct RetainedRing {
    entries: VecDeque<(u16, Bytes)>,
    capacity: usize,
}

impl RetainedRing {
    pub fn new(capacity: usize) -> Self {
        RetainedRing {
            entries: VecDeque::with_capacity(capacity.max(32)),
            capacity: capacity.max(32),
        }
    }

    pub fn push(&mut self, id: u16, packet: Bytes) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((id & ID_MASK, packet));
    }

    /// The retained packet for `id`, if still held
    pub fn get(&self, id: u16) -> Option<Bytes> {
        let id = id & ID_MASK;
        self.entries
            .iter()
            .rev()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, packet)| packet.clone())
    }

    /// Process an ACK for `id`: drop that entry and everything more than
    /// [`ACK_HORIZON`] ids behind it
    pub fn ack(&mut self, id: u16) {
        let id = id & ID_MASK;
        self.entries.retain(|(entry_id, _)| {
            let behind = id.wrapping_sub(*entry_id) & ID_MASK;
            // behind > HALF_SPAN means the entry was sent after the acked
            // id; those stay.
            behind != 0 && (behind > HALF_SPAN || behind <= ACK_HORIZON)
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, packet)| std::mem::size_of::<(u16, Bytes)>() + packet.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(id: u16) -> Bytes {
        Bytes::from(vec![id as u8; 4])
    }

    #[test]
    fn test_lookup() {
        let mut ring = RetainedRing::new(32);
        ring.push(1, packet(1));
        ring.push(2, packet(2));

        assert_eq!(ring.get(1), Some(packet(1)));
        assert_eq!(ring.get(3), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut ring = RetainedRing::new(32);
        for id in 1..=40u16 {
            ring.push(id, packet(id));
        }
        assert_eq!(ring.len(), 32);
        assert_eq!(ring.get(8), None);
        assert!(ring.get(9).is_some());
        assert!(ring.get(40).is_some());
    }

    #[test]
    fn test_ack_removes_exact_id() {
        let mut ring = RetainedRing::new(32);
        ring.push(5, packet(5));
        ring.push(6, packet(6));

        ring.ack(5);
        assert_eq!(ring.get(5), None);
        assert!(ring.get(6).is_some());
    }

    #[test]
    fn test_ack_drops_far_behind() {
        let mut ring = RetainedRing::new(64);
        for id in 1..=40u16 {
            ring.push(id, packet(id));
        }

        // Acking 40 clears 40 itself and everything behind 8.
        ring.ack(40);
        assert_eq!(ring.get(40), None);
        assert_eq!(ring.get(7), None);
        assert!(ring.get(8).is_some());
        assert!(ring.get(39).is_some());
    }

    #[test]
    fn test_ack_across_wrap() {
        let mut ring = RetainedRing::new(64);
        ring.push(0x7FFE, packet(1));
        ring.push(0x7FFF, packet(2));
        ring.push(1, packet(3));

        // Ack for an id just past the wrap: earlier entries are within the
        // horizon and survive, the acked id goes.
        ring.ack(1);
        assert!(ring.get(0x7FFE).is_some());
        assert!(ring.get(0x7FFF).is_some());
        assert_eq!(ring.get(1), None);
    }

    #[test]
    fn test_newer_entries_survive_old_ack() {
        let mut ring = RetainedRing::new(64);
        ring.push(10, packet(10));
        ring.push(11, packet(11));

        // A late ACK for 10 must not touch 11.
        ring.ack(10);
        assert!(ring.get(11).is_some());
    }

    #[test]
    fn test_clear() {
        let mut ring = RetainedRing::new(32);
        ring.push(1, packet(1));
        assert!(ring.size_in_bytes() > 0);
        ring.clear();
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.get(1), None);
    }
}
