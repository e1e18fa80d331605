//! Deliverer selection.
//!
//! Pure functions over a snapshot of deliverers. Nothing here locks or
//! writes; a selected deliverer is re-checked under lock by the
//! transaction before anything is committed.

use std::cmp::Ordering;

use records::model::{Deliverer, ZoneId};

/// Whether `d` may receive a new package in `zone_id` right now.
pub fn is_candidate(zone_id: ZoneId, d: &Deliverer) -> bool {
    d.current_zone_id == Some(zone_id) && d.is_available && d.has_free_slot()
}

/// Least-loaded first, then oldest registration, then lowest id.
fn load_order(a: &Deliverer, b: &Deliverer) -> Ordering {
    a.current_capacity
        .cmp(&b.current_capacity)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick the best candidate for `zone_id`, or `None` when nobody qualifies.
///
/// Deterministic for a given snapshot regardless of input order.
pub fn select_best(zone_id: ZoneId, deliverers: &[Deliverer]) -> Option<&Deliverer> {
    deliverers
        .iter()
        .filter(|d| is_candidate(zone_id, d))
        .min_by(|a, b| load_order(a, b))
}
