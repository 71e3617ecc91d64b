//! Row types read from and written to the relational store.

use sqlx::FromRow;

use crate::dto::ws::{ParticipantSummary, QuestionSummary, StandingSummary};

/// Room metadata the core reads; rows are created by the HTTP surface.
#[derive(Debug, Clone, FromRow)]
pub struct RoomRow {
    pub id: String,
    pub host_id: i64,
    pub is_active: bool,
    pub max_players: i32,
}

/// One seated participant joined with the owning user's display name.
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub user_id: i64,
    pub user_name: String,
    pub score: i64,
}

impl From<ParticipantRow> for ParticipantSummary {
    fn from(row: ParticipantRow) -> Self {
        Self {
            user_id: row.user_id,
            user_name: row.user_name,
            score: row.score,
        }
    }
}

/// Question bank row; `options` always holds exactly four entries.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub text: String,
    pub options: Vec<String>,
    pub correct_idx: i16,
}

impl QuestionRow {
    /// Project into the wire shape, rejecting rows whose option list is
    /// not exactly four entries long.
    pub fn into_summary(self) -> Option<QuestionSummary> {
        let options: [String; 4] = self.options.try_into().ok()?;
        if !(0..4).contains(&self.correct_idx) {
            return None;
        }
        Some(QuestionSummary {
            id: self.id,
            text: self.text,
            options,
            correct_idx: self.correct_idx as u8,
        })
    }
}

/// Final standings line computed when a quiz completes.
#[derive(Debug, Clone)]
pub struct StandingRow {
    pub user_id: i64,
    pub user_name: String,
    pub score: i64,
    pub new_rating: i64,
}

impl From<StandingRow> for StandingSummary {
    fn from(row: StandingRow) -> Self {
        Self {
            user_id: row.user_id,
            user_name: row.user_name,
            score: row.score,
            new_rating: row.new_rating,
        }
    }
}

/// Durable record of a first-correct-answer claim about to be inserted.
#[derive(Debug, Clone)]
pub struct NewClaim {
    pub room_id: String,
    pub question_index: u8,
    pub user_id: i64,
    pub tx_hash: String,
}

/// Result of the join transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The user is seated; `newly_joined` is false on an idempotent re-join.
    Joined {
        user_name: String,
        newly_joined: bool,
    },
    NotFound,
    Inactive,
    Full,
    AlreadyInOtherRoom(String),
}

/// Result of the claim transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Recorded,
    /// The unique index on `(room_id, question_index)` already held a row.
    Duplicate,
}
