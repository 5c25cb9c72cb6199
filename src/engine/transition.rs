use crate::model::{Ms, RoomStatus};

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Room state machine guard: is `requested` a legal next state?
///
/// Pure function, no side effects. Must be evaluated while the room write
/// lock is held — a pre-lock answer may be stale by the time the caller
/// acts on it.
pub fn transition_allowed(current: RoomStatus, requested: RoomStatus) -> bool {
    use RoomStatus::*;
    matches!(
        (current, requested),
        // Core occupancy cycle.
        (ReadyForGuest, Occupied)
            | (Occupied, CheckoutDirty)
            // Cleaning pipeline (administrative).
            | (CheckoutDirty, Cleaning)
            | (Cleaning, ReadyForGuest)
            // Maintenance can take any vacant room, and hand it back
            // to the pipeline.
            | (ReadyForGuest, OutOfService)
            | (CheckoutDirty, OutOfService)
            | (Cleaning, OutOfService)
            | (OutOfService, Cleaning)
            | (OutOfService, ReadyForGuest)
    )
}

/// Transitions an administrative status update may request. Entering
/// `Occupied` is excluded on every path: check-in is the only way in.
pub fn housekeeping_allowed(current: RoomStatus, requested: RoomStatus) -> bool {
    requested != RoomStatus::Occupied && transition_allowed(current, requested)
}
