use crate::{
    buffer::Region,
    config::{MAX_DATA, MAX_EDGES},
    types::Edge,
};
use core::ptr;

/// Copy of one slot taken out of the ring.
pub(super) struct Taken {
    pub(super) slot: usize,
    pub(super) len: usize,
    edges: [Edge; MAX_EDGES],
}

impl Taken {
    pub(super) fn edges(&self) -> &[Edge] {
        &self.edges[..self.len]
    }
}

/// Write `edges` into the slot at the write cursor and advance the cursor.
/// Returns the slot index.
///
/// # Safety
///
/// - The caller holds the ring's mutex and one unit of its free-slot count, so
///   no other process reads or writes the slot at the write cursor.
/// - `edges.len() <= MAX_EDGES`.
pub(super) unsafe fn store(region: &impl Region, edges: &[Edge]) -> usize {
    region.with_write_pos(|write_pos| {
        // SAFETY: The cursor may have been written by another process, so it is
        // reduced to a valid slot index before use.
        unsafe {
            let slot = write_pos.read() as usize % MAX_DATA;
            region.with_slot(slot, |dst| {
                ptr::copy_nonoverlapping(edges.as_ptr(), dst.edges.cast::<Edge>(), edges.len());
                dst.len
                    .write(edges.len().try_into().expect("transfer::store: [1]"));
            });
            write_pos.write(((slot + 1) % MAX_DATA).try_into().expect("transfer::store: [2]"));
            slot
        }
    })
}

/// Copy the slot at the read cursor out of the ring and advance the cursor.
///
/// # Safety
///
/// The caller is the only reader and holds one unit of the ring's filled-slot
/// count, so the slot at the read cursor is completely written and no writer
/// touches it until the unit is returned to the free count.
pub(super) unsafe fn take(region: &impl Region) -> Taken {
    region.with_read_pos(|read_pos| {
        // SAFETY: See `store`. The edge count comes from another process and is
        // clamped to the slot capacity before it is used as a length.
        unsafe {
            let slot = read_pos.read() as usize % MAX_DATA;
            let (len, edges) = region.with_slot(slot, |src| {
                ((src.len.read() as usize).min(MAX_EDGES), src.edges.read())
            });
            read_pos.write(((slot + 1) % MAX_DATA).try_into().expect("transfer::take: [1]"));
            Taken { slot, len, edges }
        }
    })
}
