use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::resolver;
use super::transition::{housekeeping_allowed, transition_allowed};
use super::{Engine, EngineError, SharedBookingState, WalCommand};

impl Engine {
    pub async fn create_room(&self, number: &str) -> Result<RoomSnapshot, EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if number.is_empty() || number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("bad room number length"));
        }
        if self.rooms.contains_key(number) {
            return Err(EngineError::RoomAlreadyExists(number.to_string()));
        }

        let event = Event::RoomCreated { number: number.to_string() };
        self.wal_append(&event).await?;
        let room = RoomState::new(number.to_string());
        let snapshot = room.snapshot();
        self.rooms
            .insert(number.to_string(), Arc::new(RwLock::new(room)));
        self.notify_room(snapshot.clone(), &["created"]).await;
        Ok(snapshot)
    }

    /// Administrative status update for the cleaning pipeline. Never a way
    /// into `Occupied` — check-in owns that transition.
    pub async fn set_room_status(
        &self,
        number: &str,
        status: RoomStatus,
    ) -> Result<RoomSnapshot, EngineError> {
        let room = self
            .get_room(number)
            .ok_or_else(|| EngineError::RoomNotFound(number.to_string()))?;
        let mut guard = room.write().await;

        if !housekeeping_allowed(guard.status, status) {
            return Err(EngineError::InvalidTransition {
                room: number.to_string(),
                from: guard.status,
                requested: status,
            });
        }

        let event = Event::RoomStatusSet { number: number.to_string(), status };
        self.wal_append(&event).await?;
        guard.set_status(status);
        let snapshot = guard.snapshot();
        drop(guard);
        self.notify_room(snapshot.clone(), &["room_status", "is_occupied"])
            .await;
        Ok(snapshot)
    }

    /// Accept a booking from the (external) reservation flow. It must
    /// arrive `Confirmed` and untouched by the occupancy cycle; whether it
    /// is paid is the resolver's concern, not a registration error.
    pub async fn register_booking(&self, booking: BookingState) -> Result<Ulid, EngineError> {
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidBooking("must arrive confirmed"));
        }
        if booking.checked_in_at.is_some() || booking.checked_out_at.is_some() {
            return Err(EngineError::InvalidBooking("already part of an occupancy cycle"));
        }
        if self.bookings.contains_key(&booking.id) {
            return Err(EngineError::InvalidBooking("booking id already registered"));
        }
        if booking.check_in >= booking.check_out {
            return Err(EngineError::InvalidBooking("check_out must be after check_in"));
        }
        if booking.check_in < MIN_VALID_DAY || booking.check_out > MAX_VALID_DAY {
            return Err(EngineError::LimitExceeded("stay dates out of range"));
        }
        if booking.check_out - booking.check_in > MAX_STAY_DAYS {
            return Err(EngineError::LimitExceeded("stay too long"));
        }
        validate_party(&booking.party)?;
        if let Some(ref room) = booking.room_number {
            if !self.rooms.contains_key(room) {
                return Err(EngineError::RoomNotFound(room.clone()));
            }
            if self
                .room_bookings
                .get(room)
                .is_some_and(|ids| ids.len() >= MAX_BOOKINGS_PER_ROOM)
            {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
        }

        let id = booking.id;
        let event = Event::BookingRegistered { booking: booking.clone() };
        self.wal_append(&event).await?;
        self.insert_booking_rows(booking);
        Ok(id)
    }

    /// Cancel a booking that has not yet begun its occupancy cycle.
    /// Lock order when assigned: room first, then booking — same as the
    /// transitions, so cancellation can never interleave with a check-in.
    pub async fn cancel_booking(&self, id: Ulid, at: Ms) -> Result<(), EngineError> {
        let handle = self
            .get_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let room_number = handle.read().await.room_number.clone();
        let _room_guard = match room_number {
            Some(ref number) => match self.get_room(number) {
                Some(room) => Some(room.write_owned().await),
                None => None,
            },
            None => None,
        };
        let mut booking = handle.write().await;

        if booking.checked_in_at.is_some() {
            return Err(EngineError::InvalidBooking("booking already checked in"));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidBooking("booking is not confirmed"));
        }

        let event = Event::BookingCancelled { booking_id: id, at };
        self.wal_append(&event).await?;
        booking.status = BookingStatus::Cancelled;
        Ok(())
    }

    /// Check a room's eligible booking in: lock the room, resolve the one
    /// qualifying booking, lock it, re-validate, materialize the party,
    /// commit, notify. `today`/`now` are passed in so callers own the clock.
    pub async fn check_in(
        &self,
        room_number: &str,
        today: Day,
        now: Ms,
    ) -> Result<CheckInReceipt, EngineError> {
        let room = self
            .get_room(room_number)
            .ok_or_else(|| EngineError::RoomNotFound(room_number.to_string()))?;
        // Room lock first, on every path. Held through commit.
        let mut room_guard = room.write().await;

        if !transition_allowed(room_guard.status, RoomStatus::Occupied) {
            // An occupied room with a live booking means this check-in
            // already happened — idempotent surface, not a hard failure.
            if room_guard.status == RoomStatus::Occupied
                && let Some((booking_id, at)) = self.occupying_brief(room_number).await
            {
                return Err(EngineError::AlreadyProcessed { booking_id, at });
            }
            return Err(EngineError::InvalidTransition {
                room: room_number.to_string(),
                from: room_guard.status,
                requested: RoomStatus::Occupied,
            });
        }

        let (candidates, assigned) = self.check_in_candidates(room_number, today).await;
        if candidates.len() > 1 {
            tracing::warn!(
                hotel = self.hotel,
                room = room_number,
                eligible = candidates.len(),
                "multiple eligible bookings on one room; resolving deterministically"
            );
            metrics::counter!(crate::observability::MULTI_ELIGIBLE_TOTAL).increment(1);
        }
        let Some(handle) = candidates.into_iter().next() else {
            return Err(EngineError::NoEligibleBooking {
                room: room_number.to_string(),
                assigned,
            });
        };
        // Booking lock second. Re-validate: the snapshot the resolver
        // sorted on is not the locked row.
        let mut booking = handle.write().await;
        if let Some(at) = booking.checked_in_at {
            return Err(EngineError::AlreadyProcessed { booking_id: booking.id, at });
        }
        if !resolver::check_in_eligible(&booking, room_number, today) {
            return Err(EngineError::NoEligibleBooking {
                room: room_number.to_string(),
                assigned,
            });
        }

        // Materialize the party: get-or-create on (booking, member).
        // A replayed member is reported, never re-inserted.
        let mut touched = Vec::with_capacity(booking.party.len());
        let mut new_guests = Vec::new();
        let mut new_sessions = Vec::new();
        for member in &booking.party {
            if let Some(existing) = self
                .guest_index
                .get(&(booking.id, member.id))
                .map(|e| *e.value())
            {
                let guest = self
                    .guests
                    .get(&existing)
                    .map(|e| e.value().clone())
                    .expect("guest index points at a missing row");
                touched.push(GuestTouch { guest, created: false });
                continue;
            }
            let guest = GuestRecord {
                id: Ulid::new(),
                room: Some(room_number.to_string()),
                booking_id: booking.id,
                party_member_id: member.id,
                guest_type: member.role,
                check_in: booking.check_in,
                check_out: booking.check_out,
            };
            new_sessions.push(GuestSession {
                token: Ulid::new(),
                guest_id: guest.id,
                active: true,
                expires_at: now + SESSION_TTL_MS,
            });
            new_guests.push(guest.clone());
            touched.push(GuestTouch { guest, created: true });
        }

        let event = Event::CheckedIn {
            booking_id: booking.id,
            room_number: room_number.to_string(),
            at: now,
            guests: new_guests,
            sessions: new_sessions,
        };
        self.wal_append(&event).await?; // commit point
        let (guests, sessions) = match &event {
            Event::CheckedIn { guests, sessions, .. } => (guests, sessions),
            _ => unreachable!(),
        };
        self.apply_checked_in(&mut room_guard, &mut booking, now, guests, sessions);

        let receipt = CheckInReceipt {
            booking_id: booking.id,
            checked_in_at: now,
            party_size: booking.party.len(),
            room: room_guard.snapshot(),
            guests: touched,
        };
        let snapshot = room_guard.snapshot();
        drop(booking);
        drop(room_guard);
        self.notify_room(snapshot, &["room_status", "is_occupied", "guests"])
            .await;
        metrics::counter!(crate::observability::CHECK_INS_TOTAL).increment(1);
        Ok(receipt)
    }

    /// Release a room: lock it, resolve the occupying booking, lock it,
    /// archive the guests, commit, notify. Guests are detached, never
    /// deleted.
    pub async fn check_out(&self, room_number: &str, now: Ms) -> Result<CheckOutReceipt, EngineError> {
        let room = self
            .get_room(room_number)
            .ok_or_else(|| EngineError::RoomNotFound(room_number.to_string()))?;
        let mut room_guard = room.write().await;

        let occupying = self.occupying_bookings(room_number).await;
        if occupying.len() > 1 {
            tracing::warn!(
                hotel = self.hotel,
                room = room_number,
                occupying = occupying.len(),
                "more than one occupying booking on a room; resolving deterministically"
            );
            metrics::counter!(crate::observability::MULTI_OCCUPYING_TOTAL).increment(1);
        }
        let Some(handle) = occupying.into_iter().next() else {
            // Nothing in-house. A dirty room with a completed history is a
            // replayed check-out; anything else never had one.
            if room_guard.status == RoomStatus::CheckoutDirty
                && let Some((booking_id, at)) = self.last_completed_brief(room_number).await
            {
                return Err(EngineError::AlreadyProcessed { booking_id, at });
            }
            return Err(EngineError::NoActiveBooking { room: room_number.to_string() });
        };
        if !transition_allowed(room_guard.status, RoomStatus::CheckoutDirty) {
            return Err(EngineError::InvalidTransition {
                room: room_number.to_string(),
                from: room_guard.status,
                requested: RoomStatus::CheckoutDirty,
            });
        }

        let mut booking = handle.write().await;
        // Re-validate under the lock.
        if let Some(at) = booking.checked_out_at {
            return Err(EngineError::AlreadyProcessed { booking_id: booking.id, at });
        }
        if booking.checked_in_at.is_none() {
            return Err(EngineError::NoActiveBooking { room: room_number.to_string() });
        }

        let event = Event::CheckedOut {
            booking_id: booking.id,
            room_number: room_number.to_string(),
            at: now,
        };
        self.wal_append(&event).await?; // commit point
        self.apply_checked_out(&mut room_guard, &mut booking, now);

        let receipt = CheckOutReceipt {
            booking_id: booking.id,
            checked_out_at: now,
            booking_status: booking.status,
            room: room_guard.snapshot(),
        };
        let snapshot = room_guard.snapshot();
        drop(booking);
        drop(room_guard);
        self.notify_room(snapshot, &["room_status", "is_occupied", "guests"])
            .await;
        metrics::counter!(crate::observability::CHECK_OUTS_TOTAL).increment(1);
        Ok(receipt)
    }

    // ── Resolver plumbing (runs under the room write lock) ──

    /// Eligible check-in candidates in deterministic winner-first order,
    /// plus the raw count of bookings assigned to the room (diagnostics).
    async fn check_in_candidates(
        &self,
        room: &str,
        today: Day,
    ) -> (Vec<SharedBookingState>, usize) {
        let ids = self
            .room_bookings
            .get(room)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let assigned = ids.len();
        let mut eligible: Vec<(BookingState, SharedBookingState)> = Vec::new();
        for id in ids {
            if let Some(handle) = self.get_booking(&id) {
                let snap = handle.read().await.clone();
                if resolver::check_in_eligible(&snap, room, today) {
                    eligible.push((snap, handle));
                }
            }
        }
        eligible.sort_by(|a, b| resolver::check_in_order(&a.0, &b.0));
        (eligible.into_iter().map(|(_, h)| h).collect(), assigned)
    }

    /// Bookings currently occupying the room, most recent check-in first.
    async fn occupying_bookings(&self, room: &str) -> Vec<SharedBookingState> {
        let ids = self
            .room_bookings
            .get(room)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut occupying: Vec<(BookingState, SharedBookingState)> = Vec::new();
        for id in ids {
            if let Some(handle) = self.get_booking(&id) {
                let snap = handle.read().await.clone();
                if resolver::currently_occupying(&snap, room) {
                    occupying.push((snap, handle));
                }
            }
        }
        occupying.sort_by(|a, b| resolver::check_out_order(&a.0, &b.0));
        occupying.into_iter().map(|(_, h)| h).collect()
    }

    async fn occupying_brief(&self, room: &str) -> Option<(Ulid, Ms)> {
        let handle = self.occupying_bookings(room).await.into_iter().next()?;
        let booking = handle.read().await;
        booking.checked_in_at.map(|at| (booking.id, at))
    }

    /// The most recently completed booking on the room, if any.
    async fn last_completed_brief(&self, room: &str) -> Option<(Ulid, Ms)> {
        let ids = self
            .room_bookings
            .get(room)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut best: Option<(Ms, Ulid)> = None;
        for id in ids {
            if let Some(handle) = self.get_booking(&id) {
                let snap = handle.read().await;
                if resolver::completed_on_room(&snap, room)
                    && let Some(at) = snap.checked_out_at
                    && best.is_none_or(|(b_at, b_id)| (at, snap.id) > (b_at, b_id))
                {
                    best = Some((at, snap.id));
                }
            }
        }
        best.map(|(at, id)| (id, at))
    }

    // ── Session reaping ──────────────────────────────────────

    /// Tokens of sessions that are revoked or past expiry. Read-only; the
    /// reaper turns the answer into a `purge_sessions` call.
    pub fn collect_dead_sessions(&self, now: Ms) -> Vec<Ulid> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_dead(now))
            .map(|entry| *entry.key())
            .collect()
    }

    pub async fn purge_sessions(&self, tokens: Vec<Ulid>) -> Result<(), EngineError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let event = Event::SessionsPurged { tokens: tokens.clone() };
        self.wal_append(&event).await?;
        for token in &tokens {
            self.sessions.remove(token);
        }
        Ok(())
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Bookings carry their full row (including the occupancy
    /// timestamps), guests are re-emitted as rows — archived ones included,
    /// so compaction never erases the audit trail.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let room_handles: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for room in room_handles {
            let guard = room.read().await;
            events.push(Event::RoomCreated { number: guard.number.clone() });
            if guard.status != RoomStatus::ReadyForGuest {
                events.push(Event::RoomStatusSet {
                    number: guard.number.clone(),
                    status: guard.status,
                });
            }
        }

        let booking_handles: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for handle in booking_handles {
            let booking = handle.read().await.clone();
            events.push(Event::BookingRegistered { booking });
        }

        for entry in self.guests.iter() {
            events.push(Event::GuestRecorded { guest: entry.value().clone() });
        }
        for entry in self.sessions.iter() {
            if entry.value().active {
                events.push(Event::SessionIssued { session: entry.value().clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_party(party: &[PartyMember]) -> Result<(), EngineError> {
    if party.is_empty() {
        return Err(EngineError::InvalidBooking("party is empty"));
    }
    if party.len() > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    let primaries = party
        .iter()
        .filter(|m| m.role == GuestRole::Primary)
        .count();
    if primaries != 1 {
        return Err(EngineError::InvalidBooking("party needs exactly one primary guest"));
    }
    for member in party {
        if member.first_name.is_empty() || member.last_name.is_empty() {
            return Err(EngineError::InvalidBooking("party member missing a name"));
        }
        if member.first_name.len() > MAX_NAME_LEN || member.last_name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("party member name too long"));
        }
        if member.email.as_ref().is_some_and(|e| e.len() > MAX_CONTACT_LEN)
            || member.phone.as_ref().is_some_and(|p| p.len() > MAX_CONTACT_LEN)
        {
            return Err(EngineError::LimitExceeded("party member contact too long"));
        }
    }
    Ok(())
}
