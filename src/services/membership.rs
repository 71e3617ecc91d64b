//! Durable room membership on top of the storage join/leave transactions.

use crate::{
    dao::models::{JoinOutcome, RoomRow},
    dto::ws::ParticipantSummary,
    error::ServiceError,
    state::{SharedState, room::RoomCommand},
};

/// Everything the gateway needs after a successful join.
#[derive(Debug, Clone)]
pub struct JoinedRoomInfo {
    pub room: RoomRow,
    pub user_name: String,
    /// False on an idempotent re-join; suppresses the join announcement.
    pub newly_joined: bool,
    pub participants: Vec<ParticipantSummary>,
}

/// Seat `user_id` in `room_id`.
///
/// The storage transaction enforces existence, activity, capacity, and the
/// single-room-per-user invariant; this layer translates the outcome and
/// assembles the lobby snapshot (with the display name read at join time).
pub async fn join(
    state: &SharedState,
    user_id: i64,
    room_id: &str,
) -> Result<JoinedRoomInfo, ServiceError> {
    let outcome = state.store().join_room(room_id, user_id).await?;

    let (user_name, newly_joined) = match outcome {
        JoinOutcome::Joined {
            user_name,
            newly_joined,
        } => (user_name, newly_joined),
        JoinOutcome::NotFound => return Err(ServiceError::RoomNotFound(room_id.to_string())),
        JoinOutcome::Inactive => return Err(ServiceError::RoomInactive(room_id.to_string())),
        JoinOutcome::Full => return Err(ServiceError::RoomFull(room_id.to_string())),
        JoinOutcome::AlreadyInOtherRoom(other) => {
            return Err(ServiceError::AlreadyInOtherRoom(other));
        }
    };

    let room = state
        .store()
        .find_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::RoomNotFound(room_id.to_string()))?;

    let participants = state
        .store()
        .list_participants(room_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(JoinedRoomInfo {
        room,
        user_name,
        newly_joined,
        participants,
    })
}

/// Unseat `user_id` from `room_id`; idempotent.
///
/// A live room executor decides what the departure means for the quiz
/// (lobby leave frees the durable seat, mid-quiz leave forfeits). Without
/// one, the durable row is simply deleted.
pub async fn leave(state: &SharedState, user_id: i64, room_id: &str) -> Result<(), ServiceError> {
    if let Some(handle) = state.rooms().get_live(room_id) {
        if handle.send(RoomCommand::Leave { user_id }) {
            return Ok(());
        }
    }

    state.store().leave_room(room_id, user_id).await?;
    Ok(())
}
