//! Active-destinations index.

use bridge_types::MacAddress;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Outcome of an atomic reservation attempt.
///
/// Admitted outcomes carry the slot generation the reservation stamped, see
/// [`AdmissionController::abandon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The destination was added to the source's active set.
    Reserved { generation: u64 },
    /// The destination was already active.
    AlreadyActive { generation: u64 },
    /// The source is at its limit.
    Rejected,
}

impl Reservation {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Reservation::Rejected)
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Reservation::Reserved { .. })
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            Reservation::Reserved { generation } | Reservation::AlreadyActive { generation } => {
                Some(*generation)
            }
            Reservation::Rejected => None,
        }
    }
}

/// One active destination.
///
/// `generation` changes on every reservation or admit of the pair.
/// `pending` counts reservations whose installation has not finished yet.
#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u64,
    pending: u32,
}

/// Source MAC → destination MACs with an installed, unexpired rule.
#[derive(Debug)]
pub struct AdmissionController {
    active: DashMap<MacAddress, HashMap<MacAddress, Slot>>,
    limit: usize,
    next_generation: AtomicU64,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        Self {
            active: DashMap::new(),
            limit,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn stamp(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns true if `src` may talk to `dst` under the fan-out limit.
    pub fn is_allowed(&self, src: &MacAddress, dst: &MacAddress) -> bool {
        match self.active.get(src) {
            None => true,
            Some(dsts) => dsts.contains_key(dst) || dsts.len() < self.limit,
        }
    }

    /// Checks the limit and claims `dst` in one step under the source's
    /// shard lock.
    ///
    /// An admitted reservation stays pending until [`settle`](Self::settle)
    /// or [`abandon`](Self::abandon) is called for it.
    pub fn try_reserve(&self, src: &MacAddress, dst: &MacAddress) -> Reservation {
        match self.active.entry(*src) {
            Entry::Vacant(vacant) => {
                if self.limit == 0 {
                    return Reservation::Rejected;
                }
                let generation = self.stamp();
                vacant.insert(HashMap::from([(
                    *dst,
                    Slot {
                        generation,
                        pending: 1,
                    },
                )]));
                Reservation::Reserved { generation }
            }
            Entry::Occupied(mut occupied) => {
                let dsts = occupied.get_mut();
                if let Some(slot) = dsts.get_mut(dst) {
                    slot.generation = self.stamp();
                    slot.pending += 1;
                    Reservation::AlreadyActive {
                        generation: slot.generation,
                    }
                } else if dsts.len() >= self.limit {
                    Reservation::Rejected
                } else {
                    let generation = self.stamp();
                    dsts.insert(
                        *dst,
                        Slot {
                            generation,
                            pending: 1,
                        },
                    );
                    Reservation::Reserved { generation }
                }
            }
        }
    }

    /// Marks a pending reservation of `dst` as finished. The slot stays.
    pub fn settle(&self, src: &MacAddress, dst: &MacAddress) {
        if let Some(mut dsts) = self.active.get_mut(src) {
            if let Some(slot) = dsts.get_mut(dst) {
                slot.pending = slot.pending.saturating_sub(1);
            }
        }
    }

    /// Gives back a pending reservation whose installation was dropped.
    ///
    /// A newly reserved slot is removed only if no other reservation or admit
    /// touched it since. Returns true if the slot was removed.
    pub fn abandon(&self, src: &MacAddress, dst: &MacAddress, reservation: Reservation) -> bool {
        let Some(generation) = reservation.generation() else {
            return false;
        };
        let removed = self.remove_slot_if(src, dst, |slot| {
            slot.pending = slot.pending.saturating_sub(1);
            reservation.is_new() && slot.pending == 0 && slot.generation == generation
        });
        if removed {
            debug!(src = %src, dst = %dst, "Abandoned destination slot");
        }
        removed
    }

    /// Marks `dst` active for `src` without checking the limit.
    pub fn admit(&self, src: &MacAddress, dst: &MacAddress) {
        let generation = self.stamp();
        self.active
            .entry(*src)
            .or_default()
            .entry(*dst)
            .and_modify(|slot| slot.generation = generation)
            .or_insert(Slot {
                generation,
                pending: 0,
            });
    }

    /// Current generation of the (`src`, `dst`) slot, if it is active.
    pub fn generation(&self, src: &MacAddress, dst: &MacAddress) -> Option<u64> {
        self.active
            .get(src)
            .and_then(|dsts| dsts.get(dst).map(|slot| slot.generation))
    }

    /// Retires `dst` from `src`'s active set, but only if the slot still has
    /// `generation` and no reservation of it is pending.
    pub fn retire(&self, src: &MacAddress, dst: &MacAddress, generation: u64) -> bool {
        let retired =
            self.remove_slot_if(src, dst, |slot| slot.pending == 0 && slot.generation == generation);
        if retired {
            debug!(src = %src, dst = %dst, "Retired destination slot");
        }
        retired
    }

    /// Removes `dst` from `src`'s active set unconditionally. Returns true if
    /// it was present.
    pub fn release(&self, src: &MacAddress, dst: &MacAddress) -> bool {
        let removed = self.remove_slot_if(src, dst, |_| true);
        if removed {
            debug!(src = %src, dst = %dst, "Released destination slot");
        }
        removed
    }

    /// Applies `check` to the slot under the source's entry lock and removes
    /// the slot when it returns true. An emptied source entry is dropped.
    fn remove_slot_if<F>(&self, src: &MacAddress, dst: &MacAddress, check: F) -> bool
    where
        F: FnOnce(&mut Slot) -> bool,
    {
        let Entry::Occupied(mut occupied) = self.active.entry(*src) else {
            return false;
        };
        let dsts = occupied.get_mut();
        let remove = dsts.get_mut(dst).is_some_and(check);
        if remove {
            dsts.remove(dst);
        }
        if dsts.is_empty() {
            occupied.remove();
        }
        remove
    }

    /// Snapshot of `src`'s active destinations.
    pub fn destinations(&self, src: &MacAddress) -> HashSet<MacAddress> {
        self.active
            .get(src)
            .map(|dsts| dsts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn active_count(&self, src: &MacAddress) -> usize {
        self.active.get(src).map_or(0, |dsts| dsts.len())
    }

    pub fn is_active(&self, src: &MacAddress, dst: &MacAddress) -> bool {
        self.active
            .get(src)
            .is_some_and(|dsts| dsts.contains_key(dst))
    }

    /// Number of sources with at least one active destination.
    pub fn source_count(&self) -> usize {
        self.active.len()
    }

    pub fn clear(&self) {
        self.active.clear();
    }
}
