//! Hard limits. Every externally reachable collection or string is bounded
//! so a single client cannot grow memory or the WAL without bound.

use crate::model::{Day, Ms};

pub const MAX_HOTELS: usize = 1024;
pub const MAX_HOTEL_NAME_LEN: usize = 256;

pub const MAX_ROOMS_PER_HOTEL: usize = 10_000;
pub const MAX_ROOM_NUMBER_LEN: usize = 32;

pub const MAX_BOOKINGS_PER_ROOM: usize = 4_096;
pub const MAX_PARTY_SIZE: usize = 16;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 256;

/// Longest allowed stay, in nights.
pub const MAX_STAY_DAYS: Day = 366;

/// Civil-day range accepted for stay bounds: 1970-01-01 .. ~2070.
pub const MIN_VALID_DAY: Day = 0;
pub const MAX_VALID_DAY: Day = 36_500;

/// Guest sessions expire a week after issue unless revoked earlier.
pub const SESSION_TTL_MS: Ms = 7 * 24 * 3_600_000;

/// Maximum wire frame length (one JSON line).
pub const MAX_LINE_LEN: usize = 64 * 1024;
