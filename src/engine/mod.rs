mod error;
mod mutations;
mod queries;
mod resolver;
mod transition;

pub use error::EngineError;
pub use transition::{housekeeping_allowed, now_ms, transition_allowed};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{ChangeSink, RoomChange};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedBookingState = Arc<RwLock<BookingState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One hotel's occupancy engine.
///
/// The room's `RwLock` is the row lock: every check-in/check-out attempt on
/// a room serializes on its write guard. Booking rows carry their own lock,
/// always acquired after the room's (fixed order, no inversion). Guest and
/// session rows are only ever written by the transaction holding the room
/// lock, so plain `DashMap`s are enough for them.
pub struct Engine {
    hotel: String,
    rooms: DashMap<String, SharedRoomState>,
    bookings: DashMap<Ulid, SharedBookingState>,
    /// Room number → bookings assigned to it.
    room_bookings: DashMap<String, Vec<Ulid>>,
    guests: DashMap<Ulid, GuestRecord>,
    /// Idempotency index: `(booking_id, party_member_id)` → guest id.
    guest_index: DashMap<(Ulid, Ulid), Ulid>,
    /// Booking → its materialized guests.
    booking_guests: DashMap<Ulid, Vec<Ulid>>,
    sessions: DashMap<Ulid, GuestSession>,
    wal_tx: mpsc::Sender<WalCommand>,
    sink: Arc<dyn ChangeSink>,
}

impl Engine {
    pub fn new(
        hotel: impl Into<String>,
        wal_path: PathBuf,
        sink: Arc<dyn ChangeSink>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hotel: hotel.into(),
            rooms: DashMap::new(),
            bookings: DashMap::new(),
            room_bookings: DashMap::new(),
            guests: DashMap::new(),
            guest_index: DashMap::new(),
            booking_guests: DashMap::new(),
            sessions: DashMap::new(),
            wal_tx,
            sink,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context (lazy hotel creation).
        for event in &events {
            match event {
                Event::RoomCreated { number } => {
                    engine.rooms.insert(
                        number.clone(),
                        Arc::new(RwLock::new(RoomState::new(number.clone()))),
                    );
                }
                Event::RoomStatusSet { number, status } => {
                    if let Some(entry) = engine.rooms.get(number) {
                        let room = entry.value().clone();
                        room.try_write()
                            .expect("replay: uncontended write")
                            .set_status(*status);
                    }
                }
                Event::BookingRegistered { booking } => {
                    engine.insert_booking_rows(booking.clone());
                }
                Event::BookingCancelled { booking_id, .. } => {
                    if let Some(entry) = engine.bookings.get(booking_id) {
                        let bk = entry.value().clone();
                        bk.try_write()
                            .expect("replay: uncontended write")
                            .status = BookingStatus::Cancelled;
                    }
                }
                Event::CheckedIn {
                    booking_id,
                    room_number,
                    at,
                    guests,
                    sessions,
                } => {
                    if let (Some(room), Some(bk)) =
                        (engine.get_room(room_number), engine.get_booking(booking_id))
                    {
                        let mut room_guard =
                            room.try_write().expect("replay: uncontended write");
                        let mut bk_guard = bk.try_write().expect("replay: uncontended write");
                        engine.apply_checked_in(
                            &mut room_guard,
                            &mut bk_guard,
                            *at,
                            guests,
                            sessions,
                        );
                    }
                }
                Event::CheckedOut {
                    booking_id,
                    room_number,
                    at,
                } => {
                    if let (Some(room), Some(bk)) =
                        (engine.get_room(room_number), engine.get_booking(booking_id))
                    {
                        let mut room_guard =
                            room.try_write().expect("replay: uncontended write");
                        let mut bk_guard = bk.try_write().expect("replay: uncontended write");
                        engine.apply_checked_out(&mut room_guard, &mut bk_guard, *at);
                    }
                }
                Event::GuestRecorded { guest } => {
                    engine.insert_guest_rows(guest.clone());
                }
                Event::SessionIssued { session } => {
                    engine.sessions.insert(session.token, session.clone());
                }
                Event::SessionsPurged { tokens } => {
                    for token in tokens {
                        engine.sessions.remove(token);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn hotel(&self) -> &str {
        &self.hotel
    }

    /// Write event to WAL via the background group-commit writer.
    /// This is the commit point: state is mutated only after it returns Ok.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, number: &str) -> Option<SharedRoomState> {
        self.rooms.get(number).map(|e| e.value().clone())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBookingState> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Fire the post-commit change notification. Best-effort by contract:
    /// nothing here can roll back the committed transition.
    pub(super) async fn notify_room(&self, snapshot: RoomSnapshot, changed: &[&str]) {
        self.sink
            .room_changed(RoomChange::new(&self.hotel, snapshot, changed))
            .await;
    }

    // ── Row application (shared by live commits and replay) ──

    pub(super) fn insert_booking_rows(&self, booking: BookingState) {
        if let Some(room) = booking.room_number.clone() {
            self.room_bookings.entry(room).or_default().push(booking.id);
        }
        self.bookings
            .insert(booking.id, Arc::new(RwLock::new(booking)));
    }

    pub(super) fn insert_guest_rows(&self, guest: GuestRecord) {
        self.guest_index
            .insert((guest.booking_id, guest.party_member_id), guest.id);
        self.booking_guests
            .entry(guest.booking_id)
            .or_default()
            .push(guest.id);
        self.guests.insert(guest.id, guest);
    }

    pub(super) fn apply_checked_in(
        &self,
        room: &mut RoomState,
        booking: &mut BookingState,
        at: Ms,
        guests: &[GuestRecord],
        sessions: &[GuestSession],
    ) {
        for guest in guests {
            self.insert_guest_rows(guest.clone());
        }
        for session in sessions {
            self.sessions.insert(session.token, session.clone());
        }
        booking.checked_in_at = Some(at);
        room.set_status(RoomStatus::Occupied);
    }

    pub(super) fn apply_checked_out(
        &self,
        room: &mut RoomState,
        booking: &mut BookingState,
        at: Ms,
    ) {
        // Archival release: guest rows stay, only their `room` clears.
        let guest_ids = self
            .booking_guests
            .get(&booking.id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for guest_id in &guest_ids {
            if let Some(mut guest) = self.guests.get_mut(guest_id) {
                guest.room = None;
            }
        }
        // Revoke derived access. Best-effort side effect of the transition.
        for mut entry in self.sessions.iter_mut() {
            if guest_ids.contains(&entry.guest_id) {
                entry.active = false;
            }
        }
        booking.checked_out_at = Some(at);
        booking.status = BookingStatus::Completed;
        room.set_status(RoomStatus::CheckoutDirty);
    }
}
