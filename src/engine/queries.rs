use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Snapshot every room, sorted by number.
    pub async fn list_rooms(&self) -> Vec<RoomSnapshot> {
        let handles: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for room in handles {
            out.push(room.read().await.snapshot());
        }
        out.sort_by(|a, b| a.number.cmp(&b.number));
        out
    }

    pub async fn room_snapshot(&self, number: &str) -> Result<RoomSnapshot, EngineError> {
        let room = self
            .get_room(number)
            .ok_or_else(|| EngineError::RoomNotFound(number.to_string()))?;
        let snapshot = room.read().await.snapshot();
        Ok(snapshot)
    }

    /// Bookings assigned to a room, registration order.
    pub async fn bookings_for_room(&self, number: &str) -> Result<Vec<BookingSummary>, EngineError> {
        if !self.rooms.contains_key(number) {
            return Err(EngineError::RoomNotFound(number.to_string()));
        }
        let ids = self
            .room_bookings
            .get(number)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(handle) = self.get_booking(&id) {
                out.push(BookingSummary::of(&*handle.read().await));
            }
        }
        Ok(out)
    }

    pub async fn booking_summary(&self, id: Ulid) -> Result<BookingSummary, EngineError> {
        let handle = self
            .get_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let summary = BookingSummary::of(&*handle.read().await);
        Ok(summary)
    }

    /// Guest records materialized for a booking. Includes archived rows —
    /// a completed stay keeps its guests, only their `room` clears.
    pub fn guests_for_booking(&self, booking_id: Ulid) -> Vec<GuestRecord> {
        let ids = self
            .booking_guests
            .get(&booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.guests.get(id).map(|e| e.value().clone()))
            .collect()
    }

    /// Guests currently in-house in a room. `guest.room` is authoritative;
    /// the room's status flag is never consulted here.
    pub fn guests_in_room(&self, number: &str) -> Vec<GuestRecord> {
        let mut out: Vec<GuestRecord> = self
            .guests
            .iter()
            .filter(|e| e.value().room.as_deref() == Some(number))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn sessions_for_guest(&self, guest_id: Ulid) -> Vec<GuestSession> {
        let mut out: Vec<GuestSession> = self
            .sessions
            .iter()
            .filter(|e| e.value().guest_id == guest_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.token.cmp(&b.token));
        out
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
