//! Booking eligibility predicates and deterministic tie-breaks.
//!
//! All pure functions over booking snapshots. The engine runs them while
//! holding the room write lock, so the answer cannot go stale before the
//! mutation that follows.

use std::cmp::Ordering;

use crate::model::{BookingState, BookingStatus, Day};

/// Check-in eligibility: confirmed, paid, assigned to this room, not yet
/// checked in, and `check_in <= today < check_out`. The window is
/// deliberately permissive of late arrivals — a booking stays eligible all
/// the way to the night before check-out, so a past-midnight check-in on
/// the night shift still lands on the right booking.
pub fn check_in_eligible(b: &BookingState, room: &str, today: Day) -> bool {
    b.status == BookingStatus::Confirmed
        && b.paid_at.is_some()
        && b.room_number.as_deref() == Some(room)
        && b.checked_in_at.is_none()
        && b.check_in <= today
        && today < b.check_out
}

/// Deterministic order among multiple check-in candidates (a data-entry
/// anomaly): earliest intended arrival, then earliest created, then lowest
/// id. The first element wins.
pub fn check_in_order(a: &BookingState, b: &BookingState) -> Ordering {
    a.check_in
        .cmp(&b.check_in)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// The "currently occupying" predicate: checked in, not yet checked out.
/// The engine's invariant is that at most one booking per room satisfies
/// this at any committed point in time.
pub fn currently_occupying(b: &BookingState, room: &str) -> bool {
    b.room_number.as_deref() == Some(room)
        && b.checked_in_at.is_some()
        && b.checked_out_at.is_none()
}

/// Deterministic order among multiple "occupying" bookings (anomaly):
/// most recently checked in first, highest id breaking ties.
pub fn check_out_order(a: &BookingState, b: &BookingState) -> Ordering {
    b.checked_in_at
        .cmp(&a.checked_in_at)
        .then(b.id.cmp(&a.id))
}

/// A booking that already completed its cycle on this room. Used to map a
/// repeated check-out to `AlreadyProcessed` instead of `NoActiveBooking`.
pub fn completed_on_room(b: &BookingState, room: &str) -> bool {
    b.room_number.as_deref() == Some(room)
        && b.status == BookingStatus::Completed
        && b.checked_out_at.is_some()
}
