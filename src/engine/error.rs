use ulid::Ulid;

use crate::model::{Ms, RoomStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    RoomNotFound(String),
    BookingNotFound(Ulid),
    RoomAlreadyExists(String),
    /// The room is not in the state the requested transition needs.
    InvalidTransition {
        room: String,
        from: RoomStatus,
        requested: RoomStatus,
    },
    /// Check-in: nothing confirmed, paid and inside its stay window is
    /// assigned to this room. `assigned` is the number of bookings assigned
    /// to the room at all — diagnostic context for the front desk.
    NoEligibleBooking {
        room: String,
        assigned: usize,
    },
    /// Check-out: no booking is currently checked in on this room.
    NoActiveBooking {
        room: String,
    },
    /// The booking already went through this transition. Idempotent
    /// surface, not a hard failure: `at` is when it happened.
    AlreadyProcessed {
        booking_id: Ulid,
        at: Ms,
    },
    InvalidBooking(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::RoomNotFound(_) | EngineError::BookingNotFound(_) => "not_found",
            EngineError::RoomAlreadyExists(_) => "already_exists",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::NoEligibleBooking { .. } => "no_eligible_booking",
            EngineError::NoActiveBooking { .. } => "no_active_booking",
            EngineError::AlreadyProcessed { .. } => "already_processed",
            EngineError::InvalidBooking(_) => "invalid_booking",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }

    /// Whether a caller may blindly retry. Only transient persistence
    /// failures qualify; everything else needs a state refresh upstream.
    pub fn retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoomNotFound(number) => write!(f, "room not found: {number}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::RoomAlreadyExists(number) => {
                write!(f, "room already exists: {number}")
            }
            EngineError::InvalidTransition { room, from, requested } => write!(
                f,
                "room {room}: cannot go from {from:?} to {requested:?}"
            ),
            EngineError::NoEligibleBooking { room, assigned } => write!(
                f,
                "room {room}: no eligible booking ({assigned} assigned, none confirmed+paid+in window)"
            ),
            EngineError::NoActiveBooking { room } => {
                write!(f, "room {room}: no booking is currently checked in")
            }
            EngineError::AlreadyProcessed { booking_id, at } => {
                write!(f, "booking {booking_id} already processed at {at}")
            }
            EngineError::InvalidBooking(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
