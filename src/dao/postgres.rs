//! PostgreSQL implementation of [`QuizStore`] built on `sqlx`.

use futures::future::BoxFuture;
use sqlx::{PgPool, postgres::PgPoolOptions};

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

#[derive(Clone)]
pub struct PgQuizStore {
    pool: PgPool,
}

impl PgQuizStore {
    /// Open a connection pool against `database_url` and verify it responds.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|err| StorageError::unavailable("connecting to postgres", err))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|err| StorageError::unavailable("initial ping", err))?;

        Ok(Self { pool })
    }

    /// Close the pool, waiting for in-flight transactions to drain.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |err| StorageError::unavailable(context, err)
}

impl QuizStore for PgQuizStore {
    fn find_room(&self, room_id: &str) -> BoxFuture<'static, StorageResult<Option<RoomRow>>> {
        let pool = self.pool.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            sqlx::query_as::<_, RoomRow>(
                "SELECT id, host_id, is_active, max_players FROM rooms WHERE id = $1",
            )
            .bind(&room_id)
            .fetch_optional(&pool)
            .await
            .map_err(db_err("loading room"))
        })
    }

    fn join_room(
        &self,
        room_id: &str,
        user_id: i64,
    ) -> BoxFuture<'static, StorageResult<JoinOutcome>> {
        let pool = self.pool.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(db_err("opening join tx"))?;

            // Row lock serializes concurrent joins against the capacity check.
            let room = sqlx::query_as::<_, RoomRow>(
                "SELECT id, host_id, is_active, max_players FROM rooms WHERE id = $1 FOR UPDATE",
            )
            .bind(&room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("locking room"))?;

            let Some(room) = room else {
                return Ok(JoinOutcome::NotFound);
            };
            if !room.is_active {
                return Ok(JoinOutcome::Inactive);
            }

            let user_name = sqlx::query_scalar::<_, String>("SELECT name FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("loading user name"))?
                .ok_or_else(|| {
                    StorageError::Inconsistent(format!("authenticated user {user_id} has no row"))
                })?;

            let already_seated = sqlx::query_scalar::<_, i64>(
                "SELECT count(*) FROM room_participants WHERE room_id = $1 AND user_id = $2",
            )
            .bind(&room_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("checking membership"))?
                > 0;

            if already_seated {
                tx.commit().await.map_err(db_err("committing join tx"))?;
                return Ok(JoinOutcome::Joined {
                    user_name,
                    newly_joined: false,
                });
            }

            let other_room = sqlx::query_scalar::<_, String>(
                "SELECT room_id FROM room_participants WHERE user_id = $1 AND room_id <> $2 LIMIT 1",
            )
            .bind(user_id)
            .bind(&room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("checking other rooms"))?;

            if let Some(other) = other_room {
                return Ok(JoinOutcome::AlreadyInOtherRoom(other));
            }

            let seated = sqlx::query_scalar::<_, i64>(
                "SELECT count(*) FROM room_participants WHERE room_id = $1",
            )
            .bind(&room_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("counting participants"))?;

            if seated >= i64::from(room.max_players) {
                return Ok(JoinOutcome::Full);
            }

            sqlx::query(
                "INSERT INTO room_participants (room_id, user_id, score, joined_at) \
                 VALUES ($1, $2, 0, now()) \
                 ON CONFLICT (room_id, user_id) DO NOTHING",
            )
            .bind(&room_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("inserting participant"))?;

            tx.commit().await.map_err(db_err("committing join tx"))?;

            Ok(JoinOutcome::Joined {
                user_name,
                newly_joined: true,
            })
        })
    }

    fn leave_room(&self, room_id: &str, user_id: i64) -> BoxFuture<'static, StorageResult<()>> {
        let pool = self.pool.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM room_participants WHERE room_id = $1 AND user_id = $2")
                .bind(&room_id)
                .bind(user_id)
                .execute(&pool)
                .await
                .map_err(db_err("deleting participant"))?;
            Ok(())
        })
    }

    fn list_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantRow>>> {
        let pool = self.pool.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            sqlx::query_as::<_, ParticipantRow>(
                "SELECT p.user_id, u.name AS user_name, p.score \
                 FROM room_participants p \
                 JOIN users u ON u.id = p.user_id \
                 WHERE p.room_id = $1 \
                 ORDER BY p.joined_at",
            )
            .bind(&room_id)
            .fetch_all(&pool)
            .await
            .map_err(db_err("listing participants"))
        })
    }

    fn load_question_bank(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionRow>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query_as::<_, QuestionRow>(
                "SELECT id, text, options, correct_idx FROM questions",
            )
            .fetch_all(&pool)
            .await
            .map_err(db_err("loading question bank"))
        })
    }

    fn record_claim(&self, claim: NewClaim) -> BoxFuture<'static, StorageResult<ClaimOutcome>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(db_err("opening claim tx"))?;

            // The unique index on (room_id, question_index) is the durable
            // backstop for the one-winner invariant.
            let inserted = sqlx::query(
                "INSERT INTO answer_claims (room_id, question_index, user_id, tx_hash, created_at) \
                 VALUES ($1, $2, $3, $4, now()) \
                 ON CONFLICT (room_id, question_index) DO NOTHING",
            )
            .bind(&claim.room_id)
            .bind(i16::from(claim.question_index))
            .bind(claim.user_id)
            .bind(&claim.tx_hash)
            .execute(&mut *tx)
            .await
            .map_err(db_err("inserting claim"))?
            .rows_affected();

            if inserted == 0 {
                return Ok(ClaimOutcome::Duplicate);
            }

            sqlx::query(
                "UPDATE room_participants SET score = score + 1 \
                 WHERE room_id = $1 AND user_id = $2",
            )
            .bind(&claim.room_id)
            .bind(claim.user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("incrementing score"))?;

            tx.commit().await.map_err(db_err("committing claim tx"))?;
            Ok(ClaimOutcome::Recorded)
        })
    }

    fn finalize_ratings(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingRow>>> {
        let pool = self.pool.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(db_err("opening rating tx"))?;

            let rows = sqlx::query_as::<_, (i64, String, i64, i64)>(
                "SELECT p.user_id, u.name, p.score, COALESCE(r.rating, $2) \
                 FROM room_participants p \
                 JOIN users u ON u.id = p.user_id \
                 LEFT JOIN player_ratings r ON r.user_id = p.user_id \
                 WHERE p.room_id = $1 \
                 ORDER BY p.score DESC, p.user_id ASC",
            )
            .bind(&room_id)
            .bind(INITIAL_RATING)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err("loading standings"))?;

            let mut standings = Vec::with_capacity(rows.len());
            for (user_id, user_name, score, prev_rating) in rows {
                let new_rating = next_rating(prev_rating, score);

                sqlx::query(
                    "INSERT INTO player_ratings (user_id, rating, updated_at) \
                     VALUES ($1, $2, now()) \
                     ON CONFLICT (user_id) DO UPDATE \
                     SET rating = EXCLUDED.rating, updated_at = EXCLUDED.updated_at",
                )
                .bind(user_id)
                .bind(new_rating)
                .execute(&mut *tx)
                .await
                .map_err(db_err("upserting rating"))?;

                standings.push(StandingRow {
                    user_id,
                    user_name,
                    score,
                    new_rating,
                });
            }

            tx.commit().await.map_err(db_err("committing rating tx"))?;
            Ok(standings)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .map_err(db_err("health ping"))?;
            Ok(())
        })
    }
}
