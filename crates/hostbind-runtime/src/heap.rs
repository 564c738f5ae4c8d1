//! Generational arena for reference-counted host objects.

use std::fmt;

use crate::object::Object;

/// Raw reference to a host object.
///
/// This is the runtime's equivalent of an object pointer: copyable, carrying no
/// ownership of its own. Ownership is a convention between caller and callee
/// (new vs. borrowed reference), exactly as with a C-level object API.
///
/// The generation makes stale references detectable: once a slot is freed its
/// generation is bumped, so a reference to the old occupant no longer matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjRef {
    index: u32,
    generation: u32,
}

impl ObjRef {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the heap.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time this reference was handed out.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:{}", self.index, self.generation)
    }
}

/// Outcome of dropping one reference.
pub(crate) enum Released {
    /// Other references remain.
    Alive,
    /// That was the last reference; the object has been unlinked from the heap
    /// and must be disposed of by the caller once the heap borrow is gone.
    Freed(Object),
    /// The reference did not name a live object.
    Stale,
}

/// Heap storage for host objects with generational indices.
///
/// Objects are stored in a Vec with generation tracking. When an object
/// is freed, its slot is reused but the generation is incremented.
pub(crate) struct Heap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    live: usize,
}

struct HeapSlot {
    generation: u32,
    value: Option<Object>,
    ref_count: u32,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a new object with a reference count of one.
    pub(crate) fn allocate(&mut self, value: Object) -> ObjRef {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.ref_count = 1;
            ObjRef::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                value: Some(value),
                ref_count: 1,
            });
            ObjRef::new(index, 0)
        }
    }

    fn slot(&self, r: ObjRef) -> Option<&HeapSlot> {
        let slot = self.slots.get(r.index as usize)?;
        if slot.generation != r.generation || slot.value.is_none() {
            return None;
        }
        Some(slot)
    }

    fn slot_mut(&mut self, r: ObjRef) -> Option<&mut HeapSlot> {
        let slot = self.slots.get_mut(r.index as usize)?;
        if slot.generation != r.generation || slot.value.is_none() {
            return None;
        }
        Some(slot)
    }

    /// Get the object behind a reference, `None` if it is stale.
    pub(crate) fn get(&self, r: ObjRef) -> Option<&Object> {
        self.slot(r)?.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        self.slot_mut(r)?.value.as_mut()
    }

    /// Increment the reference count. Returns false for a stale reference.
    pub(crate) fn add_ref(&mut self, r: ObjRef) -> bool {
        match self.slot_mut(r) {
            Some(slot) => {
                slot.ref_count = slot.ref_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Decrement the reference count, unlinking the object when it reaches zero.
    pub(crate) fn release(&mut self, r: ObjRef) -> Released {
        let Some(slot) = self.slot_mut(r) else {
            return Released::Stale;
        };
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return Released::Alive;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(r.index);
        self.live -= 1;
        match value {
            Some(object) => Released::Freed(object),
            None => Released::Stale,
        }
    }

    pub(crate) fn ref_count(&self, r: ObjRef) -> Option<u32> {
        self.slot(r).map(|slot| slot.ref_count)
    }

    pub(crate) fn is_live(&self, r: ObjRef) -> bool {
        self.slot(r).is_some()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .field("live", &self.live)
            .finish()
    }
}
