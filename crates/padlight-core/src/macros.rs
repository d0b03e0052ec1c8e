//! Shared macro table read and written by Switch, Refresh and MacroFilter

use std::sync::atomic::{AtomicU8, Ordering};

use crate::signal::MACRO_COUNT;

pub const MIN_MACRO: u8 = 1;
pub const MAX_MACRO: u8 = 100;

/// Four macro slots holding 1..=100
#[derive(Debug)]
pub struct MacroStore {
    slots: [AtomicU8; MACRO_COUNT],
}

impl Default for MacroStore {
    fn default() -> Self {
        Self::new([MIN_MACRO; MACRO_COUNT])
    }
}

impl MacroStore {
    pub fn new(values: [u8; MACRO_COUNT]) -> Self {
        Self {
            slots: values.map(|v| AtomicU8::new(v.clamp(MIN_MACRO, MAX_MACRO))),
        }
    }

    /// Value of `slot` (0-based), `None` for an invalid slot.
    pub fn get(&self, slot: usize) -> Option<u8> {
        self.slots.get(slot).map(|s| s.load(Ordering::SeqCst))
    }

    /// Set `slot`; invalid slots or values are ignored.
    pub fn set(&self, slot: usize, value: u8) {
        if !(MIN_MACRO..=MAX_MACRO).contains(&value) {
            return;
        }
        if let Some(s) = self.slots.get(slot) {
            s.store(value, Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> [u8; MACRO_COUNT] {
        std::array::from_fn(|i| self.slots[i].load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ignores_invalid() {
        let store = MacroStore::default();
        store.set(0, 42);
        store.set(1, 0);
        store.set(2, 101);
        store.set(9, 50);
        assert_eq!(store.snapshot(), [42, 1, 1, 1]);
        assert_eq!(store.get(9), None);
    }
}
