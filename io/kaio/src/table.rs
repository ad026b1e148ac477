//! In-flight request table.
//!
//! Each entry owns the submitted [`Request`] and its boxed control block. The
//! box keeps the block's address stable, which `io_cancel` needs to name the
//! request. The kernel only carries the slot index in `aio_data`; the entry
//! holds the generation it was issued under. Generations come from one
//! per-table `u64` counter, so an id is never reissued and a stale id is
//! recognised as resolved rather than confused with the slot's next occupant.

use slab::Slab;

use crate::abi::Iocb;
use crate::request::{Request, RequestId};

/// Slots allocated up front; larger tables grow on demand.
const PREALLOCATE: usize = 1024;

pub(crate) struct Entry {
    pub request: Request,
    pub iocb: Box<Iocb>,
    pub generation: u64,
    pub cancel_requested: bool,
}

/// Result of looking up an id.
pub(crate) enum Lookup<'a> {
    InFlight(&'a mut Entry),
    /// Issued by this table and since removed.
    Resolved,
    /// Never issued by this table.
    Unknown,
}

pub(crate) struct InFlightTable {
    context: u32,
    entries: Slab<Entry>,
    capacity: usize,
    /// Generation for the next insert.
    next_generation: u64,
}

impl InFlightTable {
    /// `capacity` must fit in a `u32`, since slot indices are `u32`.
    pub fn with_capacity(context: u32, capacity: usize) -> Self {
        debug_assert!(capacity <= u32::MAX as usize);
        Self {
            context,
            entries: Slab::with_capacity(capacity.min(PREALLOCATE)),
            capacity,
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Free slots remaining.
    pub fn room(&self) -> usize {
        self.capacity - self.entries.len()
    }

    /// Take ownership of `request`, encode its control block, and return the
    /// new id with a pointer to the block. The caller checks `room()` first.
    pub fn insert(&mut self, mut request: Request) -> (RequestId, *mut Iocb) {
        debug_assert!(self.room() > 0);
        let vacant = self.entries.vacant_entry();
        let id = RequestId {
            context: self.context,
            index: vacant.key() as u32,
            generation: self.next_generation,
        };
        self.next_generation += 1;

        let iocb = Box::new(request.to_iocb(id.encode()));
        let entry = vacant.insert(Entry {
            request,
            iocb,
            generation: id.generation,
            cancel_requested: false,
        });
        let ptr: *mut Iocb = &mut *entry.iocb;
        (id, ptr)
    }

    pub fn lookup(&mut self, id: RequestId) -> Lookup<'_> {
        if id.context != self.context || id.generation >= self.next_generation {
            return Lookup::Unknown;
        }
        match self.entries.get_mut(id.index as usize) {
            Some(entry) if entry.generation == id.generation => Lookup::InFlight(entry),
            _ => Lookup::Resolved,
        }
    }

    /// Remove an in-flight entry, returning ownership of its request.
    pub fn remove(&mut self, id: RequestId) -> Option<Entry> {
        if !matches!(self.lookup(id), Lookup::InFlight(_)) {
            return None;
        }
        self.entries.try_remove(id.index as usize)
    }

    /// Remove the entry whose control block carried `data` as `aio_data`.
    pub fn remove_completed(&mut self, data: u64) -> Option<(RequestId, Entry)> {
        let index = u32::try_from(data).ok()?;
        let entry = self.entries.try_remove(index as usize)?;
        let id = RequestId {
            context: self.context,
            index,
            generation: entry.generation,
        };
        Some((id, entry))
    }
}
