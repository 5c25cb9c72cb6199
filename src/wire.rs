//! Newline-delimited JSON protocol.
//!
//! One JSON object per line. The first line must be a `hello` frame carrying
//! the shared token and the hotel name; every later line is a request with an
//! `"op"` tag. Replies are `{"ok": ...}` or `{"error": {...}}`, and watched
//! rooms push `{"change": ...}` frames as transitions commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{Instrument, info};
use ulid::Ulid;

use crate::auth;
use crate::engine::{Engine, EngineError, now_ms};
use crate::hotel::{HotelHandle, HotelManager};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::notify::RoomChange;
use crate::observability;

/// A mutation that cannot take the room lock within this window is answered
/// `busy` (retryable); the transaction itself still runs to completion.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Hello {
    token: String,
    hotel: String,
    #[serde(default)]
    staff: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateRoom { number: String },
    SetRoomStatus { number: String, status: RoomStatus },
    RegisterBooking { booking: BookingSpec },
    CancelBooking { id: Ulid },
    CheckIn { room: String },
    CheckOut { room: String },
    Rooms,
    Room { number: String },
    Bookings { room: String },
    Guests {
        #[serde(default)]
        room: Option<String>,
        #[serde(default)]
        booking: Option<Ulid>,
    },
    Watch { room: String },
    Unwatch { room: String },
}

/// Booking as presented by the reservation flow. Ids are assigned here.
#[derive(Debug, Deserialize)]
pub struct BookingSpec {
    #[serde(default)]
    pub room: Option<String>,
    pub check_in: Day,
    pub check_out: Day,
    #[serde(default)]
    pub paid_at: Option<Ms>,
    pub party: Vec<PartyMemberSpec>,
}

#[derive(Debug, Deserialize)]
pub struct PartyMemberSpec {
    pub role: GuestRole,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl BookingSpec {
    fn into_state(self) -> BookingState {
        BookingState {
            id: Ulid::new(),
            status: BookingStatus::Confirmed,
            room_number: self.room,
            check_in: self.check_in,
            check_out: self.check_out,
            paid_at: self.paid_at,
            checked_in_at: None,
            checked_out_at: None,
            created_at: now_ms(),
            party: self
                .party
                .into_iter()
                .map(|m| PartyMember {
                    id: Ulid::new(),
                    role: m.role,
                    first_name: m.first_name,
                    last_name: m.last_name,
                    email: m.email,
                    phone: m.phone,
                })
                .collect(),
        }
    }
}

fn ok_frame(value: Value) -> String {
    json!({ "ok": value }).to_string()
}

fn error_frame(code: &str, message: &str, retryable: bool) -> String {
    json!({
        "error": { "code": code, "message": message, "retryable": retryable }
    })
    .to_string()
}

fn engine_error_frame(e: &EngineError) -> String {
    error_frame(e.code(), &e.to_string(), e.retryable())
}

fn change_frame(change: &RoomChange) -> String {
    json!({ "change": change }).to_string()
}

pub async fn process_connection<S>(
    socket: S,
    hotels: Arc<HotelManager>,
    token: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    // Handshake: first line is the hello frame.
    let Some(line) = framed.next().await.transpose()? else {
        return Ok(()); // closed before hello
    };
    let hello: Hello = match serde_json::from_str(&line) {
        Ok(h) => h,
        Err(e) => {
            framed
                .send(error_frame("bad_request", &format!("bad hello: {e}"), false))
                .await?;
            return Ok(());
        }
    };
    if !auth::token_matches(&token, &hello.token) {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        framed
            .send(error_frame("auth_failed", "bad token", false))
            .await?;
        return Ok(());
    }
    let handle = match hotels.get_or_create(&hello.hotel) {
        Ok(h) => h,
        Err(e) => {
            framed
                .send(error_frame("bad_request", &e.to_string(), false))
                .await?;
            return Ok(());
        }
    };
    framed.send(ok_frame(json!({ "hotel": hello.hotel }))).await?;

    let staff = hello.staff.unwrap_or_else(|| "anonymous".into());
    let span = tracing::info_span!("session", hotel = %hello.hotel, staff = %staff);
    serve(framed, handle).instrument(span).await
}

async fn serve<S>(
    mut framed: Framed<S, LinesCodec>,
    handle: HotelHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // One forwarder task per watched room, all funneling into change_tx so
    // change frames interleave with replies on the single writer.
    let mut watches: HashMap<String, JoinHandle<()>> = HashMap::new();
    let (change_tx, mut change_rx) = mpsc::channel::<RoomChange>(256);

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&line, &handle, &mut watches, &change_tx).await;
                framed.send(reply).await?;
            }
            change = change_rx.recv() => {
                // change_tx lives in this scope, so recv can't return None
                if let Some(change) = change {
                    framed.send(change_frame(&change)).await?;
                }
            }
        }
    };

    for (_, task) in watches.drain() {
        task.abort();
    }
    result
}

async fn handle_line(
    line: &str,
    handle: &HotelHandle,
    watches: &mut HashMap<String, JoinHandle<()>>,
    change_tx: &mpsc::Sender<RoomChange>,
) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return error_frame("bad_request", &e.to_string(), false),
    };
    let op = observability::request_label(&request);
    let start = Instant::now();

    let reply = match request {
        Request::Watch { room } => {
            let mut rx = handle.hub.subscribe(&room);
            let tx = change_tx.clone();
            let task = tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(change) => {
                            if tx.send(change).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "watch lagged, frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            if let Some(old) = watches.insert(room.clone(), task) {
                old.abort();
            }
            ok_frame(json!({ "watching": room }))
        }
        Request::Unwatch { room } => {
            if let Some(task) = watches.remove(&room) {
                task.abort();
                ok_frame(json!({ "unwatched": room }))
            } else {
                error_frame("not_found", &format!("not watching room {room}"), false)
            }
        }
        other => {
            // Run the operation on its own task: a timeout answers `busy`
            // but never cancels a transaction mid-commit.
            let engine = handle.engine.clone();
            let op_task = tokio::spawn(dispatch(engine, other));
            match tokio::time::timeout(REQUEST_TIMEOUT, op_task).await {
                Ok(Ok(Ok(value))) => ok_frame(value),
                Ok(Ok(Err(e))) => engine_error_frame(&e),
                Ok(Err(join_err)) => {
                    tracing::error!("request task failed: {join_err}");
                    error_frame("internal", "request task failed", true)
                }
                Err(_) => error_frame("busy", "operation timed out, retry", true),
            }
        }
    };

    let status = if reply.starts_with("{\"ok\"") { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    info!(op, status, elapsed_ms = start.elapsed().as_millis() as u64, "request");
    reply
}

async fn dispatch(engine: Arc<Engine>, request: Request) -> Result<Value, EngineError> {
    match request {
        Request::CreateRoom { number } => {
            let snapshot = engine.create_room(&number).await?;
            Ok(json!(snapshot))
        }
        Request::SetRoomStatus { number, status } => {
            let snapshot = engine.set_room_status(&number, status).await?;
            Ok(json!(snapshot))
        }
        Request::RegisterBooking { booking } => {
            let id = engine.register_booking(booking.into_state()).await?;
            Ok(json!({ "id": id }))
        }
        Request::CancelBooking { id } => {
            engine.cancel_booking(id, now_ms()).await?;
            Ok(json!({ "id": id, "status": "cancelled" }))
        }
        Request::CheckIn { room } => {
            let now = now_ms();
            let receipt = engine.check_in(&room, day_of(now), now).await?;
            Ok(json!(receipt))
        }
        Request::CheckOut { room } => {
            let receipt = engine.check_out(&room, now_ms()).await?;
            Ok(json!(receipt))
        }
        Request::Rooms => Ok(json!(engine.list_rooms().await)),
        Request::Room { number } => {
            let snapshot = engine.room_snapshot(&number).await?;
            Ok(json!(snapshot))
        }
        Request::Bookings { room } => Ok(json!(engine.bookings_for_room(&room).await?)),
        Request::Guests { room, booking } => match (room, booking) {
            (Some(room), None) => Ok(json!(engine.guests_in_room(&room))),
            (None, Some(booking)) => Ok(json!(engine.guests_for_booking(booking))),
            _ => Err(EngineError::InvalidBooking(
                "guests takes exactly one of room or booking",
            )),
        },
        Request::Watch { .. } | Request::Unwatch { .. } => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_parse_from_tagged_json() {
        let req: Request = serde_json::from_str(r#"{"op":"create_room","number":"101"}"#).unwrap();
        assert!(matches!(req, Request::CreateRoom { ref number } if number == "101"));

        let req: Request =
            serde_json::from_str(r#"{"op":"set_room_status","number":"101","status":"cleaning"}"#)
                .unwrap();
        assert!(matches!(
            req,
            Request::SetRoomStatus { status: RoomStatus::Cleaning, .. }
        ));

        let req: Request = serde_json::from_str(
            r#"{"op":"register_booking","booking":{
                "room":"101","check_in":20240,"check_out":20243,"paid_at":1748736000000,
                "party":[{"role":"primary","first_name":"Ada","last_name":"Lovelace"}]
            }}"#,
        )
        .unwrap();
        let Request::RegisterBooking { booking } = req else {
            panic!("wrong variant");
        };
        let state = booking.into_state();
        assert_eq!(state.status, BookingStatus::Confirmed);
        assert_eq!(state.party.len(), 1);
        assert_eq!(state.party[0].role, GuestRole::Primary);

        let req: Request = serde_json::from_str(r#"{"op":"rooms"}"#).unwrap();
        assert!(matches!(req, Request::Rooms));

        let req: Request = serde_json::from_str(r#"{"op":"watch","room":"101"}"#).unwrap();
        assert!(matches!(req, Request::Watch { .. }));
    }

    #[test]
    fn unknown_op_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"op":"drop_tables"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn frames_have_stable_shape() {
        let ok = ok_frame(json!({ "hotel": "grand" }));
        assert_eq!(ok, r#"{"ok":{"hotel":"grand"}}"#);

        let err = error_frame("busy", "operation timed out, retry", true);
        let parsed: Value = serde_json::from_str(&err).unwrap();
        assert_eq!(parsed["error"]["code"], "busy");
        assert_eq!(parsed["error"]["retryable"], true);
    }
}
