use crate::{
    buffer::{Region, SlotPtr},
    config::{MAX_DATA, MAX_EDGES},
    sync::*,
    types::{Edge, SyncUnsafeCell},
};
use core::sync::atomic::Ordering;

#[derive(Debug)]
struct Slot {
    len: u32,
    edges: [Edge; MAX_EDGES],
}

/// Heap memory holding the ring state, for rings whose producers and consumer
/// are threads of one process.
///
/// Each cursor and each slot sits in its own cell, so with the `loom` feature
/// every access the ring protocol makes is checked for races.
#[derive(Debug)]
pub struct LocalRegion {
    terminate: AtomicU32,
    write_pos: SyncUnsafeCell<u32>,
    read_pos: SyncUnsafeCell<u32>,
    slots: Box<[SyncUnsafeCell<Slot>]>,
}

impl LocalRegion {
    #[must_use]
    pub fn new() -> Self {
        let slots = (0..MAX_DATA)
            .map(|_| {
                SyncUnsafeCell::new(Slot {
                    len: 0,
                    edges: [Edge::default(); MAX_EDGES],
                })
            })
            .collect();
        Self {
            terminate: AtomicU32::new(0),
            write_pos: SyncUnsafeCell::new(0),
            read_pos: SyncUnsafeCell::new(0),
            slots,
        }
    }
}

impl Default for LocalRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl Region for LocalRegion {
    fn raise_terminate(&self) {
        self.terminate.store(1, Ordering::Release);
    }

    fn terminate_raised(&self) -> bool {
        self.terminate.load(Ordering::Acquire) != 0
    }

    fn with_write_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T {
        self.write_pos.get_mut().with(f)
    }

    fn with_read_pos<T>(&self, f: impl FnOnce(*mut u32) -> T) -> T {
        self.read_pos.get_mut().with(f)
    }

    fn with_slot<T>(&self, slot: usize, f: impl FnOnce(SlotPtr) -> T) -> T {
        self.slots[slot].get_mut().with(|slot| {
            // SAFETY: `slot` points into a live cell; only field addresses are taken.
            let ptr = unsafe {
                SlotPtr {
                    len: &raw mut (*slot).len,
                    edges: &raw mut (*slot).edges,
                }
            };
            f(ptr)
        })
    }
}
