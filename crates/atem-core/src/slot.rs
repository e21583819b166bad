//! Per-field freshness wrapper
//!
//! Every mirrored field remembers the packet id that last wrote it, so
//! frames replayed or delivered out of order can never roll state back.

use crate::sequence::{id_newer_than, ID_MASK};

/// A value plus the id of the packet that last changed it
///
/// A write is applied unless the slot already holds a strictly newer id
/// (modular order); a write from the same packet wins, preserving in-packet
/// command order.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    inner: Option<(u16, T)>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot { inner: None }
    }
}

impl<T> Slot<T> {
    pub const fn new() -> Self {
        Slot { inner: None }
    }

    /// Apply a write from packet `id`. Returns whether the slot changed.
    pub fn set(&mut self, id: u16, value: T) -> bool {
        let id = id & ID_MASK;
        if let Some((last, _)) = self.inner {
            if id_newer_than(last, id) {
                return false;
            }
        }
        self.inner = Some((id, value));
        true
    }

    /// Read-modify-write from packet `id`, for bitmap-style fields
    pub fn update(&mut self, id: u16, f: impl FnOnce(Option<&T>) -> T) -> bool {
        let id = id & ID_MASK;
        if let Some((last, _)) = self.inner {
            if id_newer_than(last, id) {
                return false;
            }
        }
        let next = f(self.inner.as_ref().map(|(_, v)| v));
        self.inner = Some((id, next));
        true
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref().map(|(_, v)| v)
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Packet id of the last accepted write
    pub fn last_change_id(&self) -> Option<u16> {
        self.inner.as_ref().map(|(id, _)| *id)
    }

    pub fn reset(&mut self) {
        self.inner = None;
    }
}

impl<T: Copy> Slot<T> {
    pub fn copied(&self) -> Option<T> {
        self.inner.as_ref().map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_accepts_any_id() {
        let mut slot = Slot::new();
        assert!(!slot.is_valid());
        assert!(slot.set(0x7000, 1u8));
        assert_eq!(slot.get(), Some(&1));
        assert_eq!(slot.last_change_id(), Some(0x7000));
    }

    #[test]
    fn test_stale_write_dropped() {
        let mut slot = Slot::new();
        assert!(slot.set(10, 'a'));
        assert!(!slot.set(9, 'b'));
        assert_eq!(slot.get(), Some(&'a'));
        assert_eq!(slot.last_change_id(), Some(10));
    }

    #[test]
    fn test_modular_freshness_across_wrap() {
        let mut slot = Slot::new();
        assert!(slot.set(0x7FFF, 1u32));
        // One behind the wrap point is stale.
        assert!(!slot.set(0x7FFE, 2));
        assert_eq!(slot.get(), Some(&1));
        // Past the wrap point is fresh.
        assert!(slot.set(1, 3));
        assert_eq!(slot.get(), Some(&3));
    }

    #[test]
    fn test_same_packet_rewrites() {
        let mut slot = Slot::new();
        assert!(slot.set(5, 1u8));
        assert!(slot.set(5, 2));
        assert_eq!(slot.get(), Some(&2));
    }

    #[test]
    fn test_reset_clears_freshness() {
        let mut slot = Slot::new();
        slot.set(100, 7u8);
        slot.reset();
        assert!(!slot.is_valid());
        assert!(slot.set(1, 8));
        assert_eq!(slot.copied(), Some(8));
    }

    #[test]
    fn test_update_merges_bits() {
        let mut slot: Slot<u16> = Slot::new();
        assert!(slot.update(3, |old| old.copied().unwrap_or(0) | 0b01));
        assert!(slot.update(4, |old| old.copied().unwrap_or(0) | 0b10));
        assert_eq!(slot.copied(), Some(0b11));
        assert!(!slot.update(2, |old| old.copied().unwrap_or(0) | 0b100));
        assert_eq!(slot.copied(), Some(0b11));
    }
}
