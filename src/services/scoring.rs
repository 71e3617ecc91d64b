//! Durable scoring and rating updates driven by the quiz engine.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;

use crate::{
    dao::{
        QuizStore,
        models::{ClaimOutcome, NewClaim},
    },
    dto::ws::StandingSummary,
    error::ServiceError,
};

/// Base rating assigned to players without a persisted rating row.
pub const INITIAL_RATING: i64 = 1200;
/// Rating points earned per question won.
pub const RATING_PER_POINT: i64 = 10;

/// Rating after a finished quiz: never below the base, plus ten per point.
pub fn next_rating(prev_rating: i64, score: i64) -> i64 {
    prev_rating.max(INITIAL_RATING) + score * RATING_PER_POINT
}

/// Synthetic transaction hash recorded with every claim row.
pub fn claim_tx_hash(room_id: &str, question_index: u8, user_id: i64, unix_millis: i128) -> String {
    format!("claim_{room_id}_{question_index}_{user_id}_{unix_millis}")
}

/// Persist a winning claim: insert the claim row and bump the winner's score
/// in one transaction.
///
/// A duplicate claim means the engine's in-memory arbitration was bypassed;
/// the DB constraint already protected the invariant, so it is logged and
/// swallowed (the winner broadcast has gone out and stays authoritative for
/// clients).
pub async fn record_win(
    store: &Arc<dyn QuizStore>,
    room_id: &str,
    question_index: u8,
    user_id: i64,
) -> Result<(), ServiceError> {
    let unix_millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let claim = NewClaim {
        room_id: room_id.to_string(),
        question_index,
        user_id,
        tx_hash: claim_tx_hash(room_id, question_index, user_id, unix_millis),
    };

    match store.record_claim(claim).await? {
        ClaimOutcome::Recorded => Ok(()),
        ClaimOutcome::Duplicate => {
            warn!(
                room_id,
                question_index, user_id, "duplicate claim rejected by the unique index"
            );
            Ok(())
        }
    }
}

/// Compute, persist, and return the final standings for a room.
pub async fn final_standings(
    store: &Arc<dyn QuizStore>,
    room_id: &str,
) -> Result<Vec<StandingSummary>, ServiceError> {
    let standings = store.finalize_ratings(room_id).await?;
    Ok(standings.into_iter().map(Into::into).collect())
}
