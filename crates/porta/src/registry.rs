use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::deps::MAX_PORTS;
use crate::eval::ValueSource;
use crate::port::Port;
use crate::value::Value;

/// The table of live ports.
///
/// A port keeps its slot for its whole life. Slots of removed ports are
/// reused by the next registration.
#[derive(Debug)]
pub struct Ports {
    slots: Vec<Option<Port>>,
    ids: HashMap<String, usize>,
}

impl Default for Ports {
    fn default() -> Self {
        Self::new()
    }
}

impl Ports {
    /// Creates an empty [`Ports`] table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            ids: HashMap::new(),
        }
    }

    /// Finds a port by identifier.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Port> {
        self.ids.get(id).and_then(|slot| self.get(*slot))
    }

    /// Finds a port by identifier.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Port> {
        let slot = *self.ids.get(id)?;
        self.get_mut(slot)
    }

    /// Returns the port in the given slot.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Port> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Returns the port in the given slot.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Port> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Returns the slot of a port.
    #[must_use]
    pub fn slot_of(&self, id: &str) -> Option<usize> {
        self.ids.get(id).copied()
    }

    /// Iterates over the live ports in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.slots.iter().flatten()
    }

    /// Iterates mutably over the live ports in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.slots.iter_mut().flatten()
    }

    /// Returns the number of live ports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Checks whether there are no live ports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    // Exclusive upper bound of the occupied slots.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the lowest free slot, or [`None`] when all
    /// [`MAX_PORTS`] slots are taken.
    #[must_use]
    pub fn free_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(Option::is_none)
            .or_else(|| (self.slots.len() < MAX_PORTS).then_some(self.slots.len()))
    }

    // Stores a port in its slot. Callers obtain the slot from `free_slot`
    // and check the identifier is unused.
    pub(crate) fn insert(&mut self, port: Port) {
        let slot = port.slot();
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || None);
        }
        let _ = self.ids.insert(port.id().to_owned(), slot);
        self.slots[slot] = Some(port);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Port> {
        let slot = self.ids.remove(id)?;
        let port = self.slots.get_mut(slot).and_then(Option::take);
        while matches!(self.slots.last(), Some(None)) {
            let _ = self.slots.pop();
        }
        port
    }
}

impl ValueSource for Ports {
    fn value_of(&self, id: &str) -> Value {
        self.find(id)
            .filter(|port| port.is_enabled())
            .and_then(Port::last_read_value)
    }
}
