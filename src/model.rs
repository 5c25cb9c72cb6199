use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type.
pub type Ms = i64;

/// Civil days since 1970-01-01 (UTC). Stay bounds compare in days.
pub type Day = i32;

pub const MS_PER_DAY: Ms = 86_400_000;

/// The civil day a timestamp falls on.
pub fn day_of(ms: Ms) -> Day {
    (ms / MS_PER_DAY) as Day
}

/// Housekeeping status of a room. The occupancy core only ever produces
/// `Occupied` (check-in) and `CheckoutDirty` (check-out); the remaining
/// states belong to the cleaning pipeline and are reached through
/// administrative status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    ReadyForGuest,
    Occupied,
    CheckoutDirty,
    Cleaning,
    OutOfService,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    pub number: String,
    pub status: RoomStatus,
    /// Derived: true iff `status == Occupied`. Never written directly.
    pub is_occupied: bool,
}

impl RoomState {
    pub fn new(number: String) -> Self {
        Self {
            number,
            status: RoomStatus::ReadyForGuest,
            is_occupied: false,
        }
    }

    /// The only writer of `status`, so `is_occupied` can never drift.
    pub fn set_status(&mut self, status: RoomStatus) {
        self.status = status;
        self.is_occupied = status == RoomStatus::Occupied;
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            number: self.number.clone(),
            status: self.status,
            is_occupied: self.is_occupied,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestRole {
    Primary,
    Companion,
}

/// Pre-arrival party member. Immutable once the owning booking is checked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMember {
    pub id: Ulid,
    pub role: GuestRole,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A booking as registered by the (external) reservation flow. Arrives
/// `Confirmed`; this subsystem only ever writes `checked_in_at`,
/// `checked_out_at` and `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingState {
    pub id: Ulid,
    pub status: BookingStatus,
    /// Assigned room, if any. Unassigned bookings are never eligible.
    pub room_number: Option<String>,
    pub check_in: Day,
    pub check_out: Day,
    /// None means unpaid — excluded by the eligibility resolver.
    pub paid_at: Option<Ms>,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub created_at: Ms,
    pub party: Vec<PartyMember>,
}

/// In-house guest record, materialized from a `PartyMember` at check-in.
/// `(booking_id, party_member_id)` is the idempotency key: at most one
/// record may ever exist per pair. Rows are never deleted; `room` going
/// to None at check-out is the only "no longer occupying" signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRecord {
    pub id: Ulid,
    pub room: Option<String>,
    pub booking_id: Ulid,
    pub party_member_id: Ulid,
    pub guest_type: GuestRole,
    pub check_in: Day,
    pub check_out: Day,
}

/// Derived guest-facing access, issued at check-in and revoked (not
/// deleted) at check-out. The reaper purges dead sessions later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSession {
    pub token: Ulid,
    pub guest_id: Ulid,
    pub active: bool,
    pub expires_at: Ms,
}

impl GuestSession {
    pub fn is_dead(&self, now: Ms) -> bool {
        !self.active || self.expires_at <= now
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// `CheckedIn`/`CheckedOut` are the live composite records (one append per
/// committed transition); `GuestRecorded`/`SessionIssued` exist so WAL
/// compaction can re-emit current rows without replaying transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        number: String,
    },
    RoomStatusSet {
        number: String,
        status: RoomStatus,
    },
    BookingRegistered {
        booking: BookingState,
    },
    BookingCancelled {
        booking_id: Ulid,
        at: Ms,
    },
    CheckedIn {
        booking_id: Ulid,
        room_number: String,
        at: Ms,
        guests: Vec<GuestRecord>,
        sessions: Vec<GuestSession>,
    },
    CheckedOut {
        booking_id: Ulid,
        room_number: String,
        at: Ms,
    },
    GuestRecorded {
        guest: GuestRecord,
    },
    SessionIssued {
        session: GuestSession,
    },
    SessionsPurged {
        tokens: Vec<Ulid>,
    },
}

// ── Query / response types ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub number: String,
    pub status: RoomStatus,
    pub is_occupied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub id: Ulid,
    pub status: BookingStatus,
    pub room_number: Option<String>,
    pub check_in: Day,
    pub check_out: Day,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub party_size: usize,
}

impl BookingSummary {
    pub fn of(b: &BookingState) -> Self {
        Self {
            id: b.id,
            status: b.status,
            room_number: b.room_number.clone(),
            check_in: b.check_in,
            check_out: b.check_out,
            checked_in_at: b.checked_in_at,
            checked_out_at: b.checked_out_at,
            party_size: b.party.len(),
        }
    }
}

/// One guest record touched by a check-in, flagged for replay visibility:
/// `created == false` means the row already existed (retried request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestTouch {
    pub guest: GuestRecord,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInReceipt {
    pub booking_id: Ulid,
    pub checked_in_at: Ms,
    pub party_size: usize,
    pub room: RoomSnapshot,
    pub guests: Vec<GuestTouch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutReceipt {
    pub booking_id: Ulid,
    pub checked_out_at: Ms,
    pub booking_status: BookingStatus,
    pub room: RoomSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_of_truncates_to_civil_day() {
        assert_eq!(day_of(0), 0);
        assert_eq!(day_of(MS_PER_DAY - 1), 0);
        assert_eq!(day_of(MS_PER_DAY), 1);
        // 2025-06-01 is day 20_240
        assert_eq!(day_of(20_240 * MS_PER_DAY + 9 * 3_600_000), 20_240);
    }

    #[test]
    fn occupied_flag_tracks_status() {
        let mut room = RoomState::new("101".into());
        assert!(!room.is_occupied);
        room.set_status(RoomStatus::Occupied);
        assert!(room.is_occupied);
        room.set_status(RoomStatus::CheckoutDirty);
        assert!(!room.is_occupied);
    }

    #[test]
    fn session_dead_when_revoked_or_expired() {
        let mut s = GuestSession {
            token: Ulid::new(),
            guest_id: Ulid::new(),
            active: true,
            expires_at: 1000,
        };
        assert!(!s.is_dead(500));
        assert!(s.is_dead(1000));
        s.active = false;
        assert!(s.is_dead(0));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::CheckedIn {
            booking_id: Ulid::new(),
            room_number: "101".into(),
            at: 1_700_000_000_000,
            guests: vec![GuestRecord {
                id: Ulid::new(),
                room: Some("101".into()),
                booking_id: Ulid::new(),
                party_member_id: Ulid::new(),
                guest_type: GuestRole::Primary,
                check_in: 20_240,
                check_out: 20_244,
            }],
            sessions: vec![],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn room_status_wire_names() {
        let json = serde_json::to_string(&RoomStatus::CheckoutDirty).unwrap();
        assert_eq!(json, "\"checkout_dirty\"");
        let back: RoomStatus = serde_json::from_str("\"ready_for_guest\"").unwrap();
        assert_eq!(back, RoomStatus::ReadyForGuest);
    }
}
