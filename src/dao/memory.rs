//! In-memory [`QuizStore`] double used by engine and service tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::future::BoxFuture;

use crate::{
    dao::{
        QuizStore,
        models::{
            ClaimOutcome, JoinOutcome, NewClaim, ParticipantRow, QuestionRow, RoomRow, StandingRow,
        },
        storage::{StorageError, StorageResult},
    },
    services::scoring::{INITIAL_RATING, next_rating},
};

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, RoomRow>,
    users: HashMap<i64, String>,
    /// room id -> user id -> (score, join order)
    participants: HashMap<String, HashMap<i64, (i64, u64)>>,
    join_counter: u64,
    questions: Vec<QuestionRow>,
    claims: HashMap<(String, u8), i64>,
    ratings: HashMap<i64, i64>,
    fail_claims: bool,
}

/// Shared, clonable in-memory store.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room(self, id: &str, host_id: i64, max_players: i32, is_active: bool) -> Self {
        self.inner.lock().unwrap().rooms.insert(
            id.to_string(),
            RoomRow {
                id: id.to_string(),
                host_id,
                is_active,
                max_players,
            },
        );
        self
    }

    pub fn with_user(self, id: i64, name: &str) -> Self {
        self.inner.lock().unwrap().users.insert(id, name.to_string());
        self
    }

    /// Seed `count` well-formed questions; question `i` has `correct_idx = i % 4`.
    pub fn with_questions(self, count: usize) -> Self {
        let mut inner = self.inner.lock().unwrap();
        inner.questions = (0..count as i64)
            .map(|i| QuestionRow {
                id: i + 1,
                text: format!("question {i}"),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_idx: (i % 4) as i16,
            })
            .collect();
        drop(inner);
        self
    }

    pub fn with_rating(self, user_id: i64, rating: i64) -> Self {
        self.inner.lock().unwrap().ratings.insert(user_id, rating);
        self
    }

    /// Make every subsequent claim transaction fail.
    pub fn fail_claims(&self) {
        self.inner.lock().unwrap().fail_claims = true;
    }

    pub fn claim_winner(&self, room_id: &str, question_index: u8) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .claims
            .get(&(room_id.to_string(), question_index))
            .copied()
    }

    pub fn claim_count(&self, room_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.claims.keys().filter(|(room, _)| room == room_id).count()
    }

    pub fn score(&self, room_id: &str, user_id: i64) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        inner
            .participants
            .get(room_id)
            .and_then(|members| members.get(&user_id))
            .map(|(score, _)| *score)
    }

    pub fn rating(&self, user_id: i64) -> Option<i64> {
        self.inner.lock().unwrap().ratings.get(&user_id).copied()
    }

    pub fn is_participant(&self, room_id: &str, user_id: i64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .participants
            .get(room_id)
            .is_some_and(|members| members.contains_key(&user_id))
    }

    fn corrupt() -> StorageError {
        StorageError::Inconsistent("injected failure".into())
    }
}

impl QuizStore for MemStore {
    fn find_room(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Option<RoomRow>>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Box::pin(async move { Ok(inner.lock().unwrap().rooms.get(&room_id).cloned()) })
    }

    fn join_room(
        &self,
        room_id: &str,
        user_id: i64,
    ) -> BoxFuture<'static, StorageResult<JoinOutcome>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let mut inner = inner.lock().unwrap();

            let Some(room) = inner.rooms.get(&room_id).cloned() else {
                return Ok(JoinOutcome::NotFound);
            };
            if !room.is_active {
                return Ok(JoinOutcome::Inactive);
            }

            let user_name = inner
                .users
                .get(&user_id)
                .cloned()
                .ok_or_else(|| StorageError::Inconsistent(format!("no user {user_id}")))?;

            if inner
                .participants
                .get(&room_id)
                .is_some_and(|members| members.contains_key(&user_id))
            {
                return Ok(JoinOutcome::Joined {
                    user_name,
                    newly_joined: false,
                });
            }

            let other = inner.participants.iter().find_map(|(room, members)| {
                (room != &room_id && members.contains_key(&user_id)).then(|| room.clone())
            });
            if let Some(other) = other {
                return Ok(JoinOutcome::AlreadyInOtherRoom(other));
            }

            let seated = inner
                .participants
                .get(&room_id)
                .map(|members| members.len())
                .unwrap_or(0);
            if seated >= room.max_players as usize {
                return Ok(JoinOutcome::Full);
            }

            inner.join_counter += 1;
            let order = inner.join_counter;
            inner
                .participants
                .entry(room_id)
                .or_default()
                .insert(user_id, (0, order));

            Ok(JoinOutcome::Joined {
                user_name,
                newly_joined: true,
            })
        })
    }

    fn leave_room(&self, room_id: &str, user_id: i64) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let mut inner = inner.lock().unwrap();
            if let Some(members) = inner.participants.get_mut(&room_id) {
                members.remove(&user_id);
            }
            Ok(())
        })
    }

    fn list_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantRow>>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let inner = inner.lock().unwrap();
            let mut rows: Vec<(u64, ParticipantRow)> = inner
                .participants
                .get(&room_id)
                .map(|members| {
                    members
                        .iter()
                        .map(|(&user_id, &(score, order))| {
                            (
                                order,
                                ParticipantRow {
                                    user_id,
                                    user_name: inner
                                        .users
                                        .get(&user_id)
                                        .cloned()
                                        .unwrap_or_default(),
                                    score,
                                },
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            rows.sort_by_key(|(order, _)| *order);
            Ok(rows.into_iter().map(|(_, row)| row).collect())
        })
    }

    fn load_question_bank(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionRow>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().unwrap().questions.clone()) })
    }

    fn record_claim(&self, claim: NewClaim) -> BoxFuture<'static, StorageResult<ClaimOutcome>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut inner = inner.lock().unwrap();
            if inner.fail_claims {
                return Err(MemStore::corrupt());
            }

            let key = (claim.room_id.clone(), claim.question_index);
            if inner.claims.contains_key(&key) {
                return Ok(ClaimOutcome::Duplicate);
            }
            inner.claims.insert(key, claim.user_id);

            if let Some(members) = inner.participants.get_mut(&claim.room_id) {
                if let Some((score, _)) = members.get_mut(&claim.user_id) {
                    *score += 1;
                }
            }
            Ok(ClaimOutcome::Recorded)
        })
    }

    fn finalize_ratings(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingRow>>> {
        let inner = self.inner.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let mut inner = inner.lock().unwrap();

            let mut standings: Vec<StandingRow> = inner
                .participants
                .get(&room_id)
                .map(|members| {
                    members
                        .iter()
                        .map(|(&user_id, &(score, _))| {
                            let prev = inner.ratings.get(&user_id).copied().unwrap_or(INITIAL_RATING);
                            StandingRow {
                                user_id,
                                user_name: inner
                                    .users
                                    .get(&user_id)
                                    .cloned()
                                    .unwrap_or_default(),
                                score,
                                new_rating: next_rating(prev, score),
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();

            standings.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));

            for row in &standings {
                inner.ratings.insert(row.user_id, row.new_rating);
            }

            Ok(standings)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
