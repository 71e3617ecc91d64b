#[cfg(test)]
pub mod memory;
pub mod models;
pub mod postgres;
pub mod storage;

use futures::future::BoxFuture;

use crate::dao::{
    models::{ClaimOutcome, JoinOutcome, NewClaim, ParticipantRow, QuestionRow, RoomRow, StandingRow},
    storage::StorageResult,
};

/// Abstraction over the relational store backing rooms, claims, and ratings.
///
/// The engine and services only see this trait; tests substitute an
/// in-memory double.
pub trait QuizStore: Send + Sync {
    fn find_room(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Option<RoomRow>>>;
    /// Seat a user in a room inside a single transaction (existence,
    /// activity, capacity, and single-room checks plus the upsert).
    fn join_room(&self, room_id: &str, user_id: i64)
    -> BoxFuture<'static, StorageResult<JoinOutcome>>;
    fn leave_room(&self, room_id: &str, user_id: i64) -> BoxFuture<'static, StorageResult<()>>;
    fn list_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantRow>>>;
    /// Read the whole question bank; sampling happens in the engine.
    fn load_question_bank(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionRow>>>;
    /// Insert the claim and increment the winner's score atomically.
    fn record_claim(&self, claim: NewClaim) -> BoxFuture<'static, StorageResult<ClaimOutcome>>;
    /// Recompute and persist ratings, returning the final standings
    /// (score descending, user id ascending).
    fn finalize_ratings(&self, room_id: &str)
    -> BoxFuture<'static, StorageResult<Vec<StandingRow>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
