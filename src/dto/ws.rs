//! Wire messages exchanged with quiz clients.
//!
//! Frames are UTF-8 text of the shape `{"type": <string>, "payload": <object>}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{config::MAX_FRAME_BYTES, dto::validation::validate_room_id, error::ErrorCode};

/// Close code sent on auth failure or connection-cap rejection.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent to every live connection during graceful shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code reserved for server-side bugs.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Rejection raised while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    PayloadTooLarge,
    #[error("malformed frame: {0}")]
    BadFrame(String),
    #[error("invalid payload: {0}")]
    BadPayload(String),
}

impl FrameError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::PayloadTooLarge => ErrorCode::PayloadTooLarge,
            FrameError::BadFrame(_) => ErrorCode::BadFrame,
            FrameError::BadPayload(_) => ErrorCode::BadPayload,
        }
    }
}

/// Messages accepted from quiz clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Join {
        room_id: String,
    },
    StartQuiz {
        room_id: String,
    },
    SubmitAnswer {
        room_id: String,
        question_index: u8,
        choice_idx: u8,
    },
    LeaveRoom {
        room_id: String,
    },
}

impl ClientMessage {
    /// Decode and bounds-check a single inbound text frame.
    pub fn from_json_str(text: &str) -> Result<Self, FrameError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(FrameError::PayloadTooLarge);
        }

        let message: Self =
            serde_json::from_str(text).map_err(|err| FrameError::BadFrame(err.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), FrameError> {
        let room_id = match self {
            ClientMessage::Join { room_id }
            | ClientMessage::StartQuiz { room_id }
            | ClientMessage::LeaveRoom { room_id } => room_id,
            ClientMessage::SubmitAnswer {
                room_id,
                question_index,
                choice_idx,
            } => {
                if *question_index > 9 {
                    return Err(FrameError::BadPayload(format!(
                        "questionIndex must be in [0,9] (got {question_index})"
                    )));
                }
                if *choice_idx > 3 {
                    return Err(FrameError::BadPayload(format!(
                        "choiceIdx must be in [0,3] (got {choice_idx})"
                    )));
                }
                room_id
            }
        };

        validate_room_id(room_id)
            .map_err(|err| FrameError::BadPayload(err.message.unwrap_or_default().into_owned()))
    }
}

/// One seated participant, as shown in lobby snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub user_id: i64,
    pub user_name: String,
    pub score: i64,
}

/// Question projection pushed with `nextQuestion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSummary {
    pub id: i64,
    pub text: String,
    #[schema(value_type = Vec<String>)]
    pub options: [String; 4],
    pub correct_idx: u8,
}

/// Final per-player line of the `quizFinished` standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandingSummary {
    pub user_id: i64,
    pub user_name: String,
    pub score: i64,
    pub new_rating: i64,
}

/// Messages pushed to quiz clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Connected {
        user_id: i64,
    },
    JoinedRoom {
        room_id: String,
        participants: Vec<ParticipantSummary>,
    },
    ParticipantJoined {
        room_id: String,
        user_id: i64,
        user_name: String,
    },
    ParticipantLeft {
        room_id: String,
        user_id: i64,
    },
    QuizStarting {
        room_id: String,
        /// RFC 3339 instant at which the first question opens.
        starts_at: String,
    },
    NextQuestion {
        question_index: u8,
        question: QuestionSummary,
        started_at: String,
        expires_at: String,
    },
    EndQuestion {
        question_index: u8,
        correct_idx: u8,
        /// Absent when the question timed out with no correct answer.
        winner_user_id: Option<i64>,
    },
    QuizFinished {
        standings: Vec<StandingSummary>,
    },
    Error {
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    /// Build an `error` frame from a category and human-readable message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.code(),
            message: message.into(),
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join() {
        let msg = ClientMessage::from_json_str(r#"{"type":"join","payload":{"roomId":"r1"}}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                room_id: "r1".into()
            }
        );
    }

    #[test]
    fn parses_submit_answer() {
        let msg = ClientMessage::from_json_str(
            r#"{"type":"submitAnswer","payload":{"roomId":"r1","questionIndex":3,"choiceIdx":2}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubmitAnswer {
                room_id: "r1".into(),
                question_index: 3,
                choice_idx: 2,
            }
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ClientMessage::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, FrameError::BadFrame(_)));
    }

    #[test]
    fn rejects_missing_type() {
        let err = ClientMessage::from_json_str(r#"{"payload":{"roomId":"r1"}}"#).unwrap_err();
        assert!(matches!(err, FrameError::BadFrame(_)));
    }

    #[test]
    fn rejects_unknown_type() {
        let err =
            ClientMessage::from_json_str(r#"{"type":"dance","payload":{}}"#).unwrap_err();
        assert!(matches!(err, FrameError::BadFrame(_)));
    }

    #[test]
    fn rejects_out_of_range_question_index() {
        let err = ClientMessage::from_json_str(
            r#"{"type":"submitAnswer","payload":{"roomId":"r1","questionIndex":10,"choiceIdx":0}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::BadPayload(_)));
    }

    #[test]
    fn rejects_out_of_range_choice() {
        let err = ClientMessage::from_json_str(
            r#"{"type":"submitAnswer","payload":{"roomId":"r1","questionIndex":0,"choiceIdx":4}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::BadPayload(_)));
    }

    #[test]
    fn rejects_empty_room_id() {
        let err = ClientMessage::from_json_str(r#"{"type":"join","payload":{"roomId":""}}"#)
            .unwrap_err();
        assert!(matches!(err, FrameError::BadPayload(_)));
    }

    #[test]
    fn rejects_oversized_frame() {
        let padding = "x".repeat(MAX_FRAME_BYTES);
        let frame = format!(r#"{{"type":"join","payload":{{"roomId":"{padding}"}}}}"#);
        assert_eq!(
            ClientMessage::from_json_str(&frame),
            Err(FrameError::PayloadTooLarge)
        );
    }

    #[test]
    fn serializes_end_question_timeout_with_null_winner() {
        let json = ServerMessage::EndQuestion {
            question_index: 4,
            correct_idx: 1,
            winner_user_id: None,
        }
        .to_json()
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"endQuestion","payload":{"questionIndex":4,"correctIdx":1,"winnerUserId":null}}"#
        );
    }

    #[test]
    fn serializes_error_frame() {
        let json = ServerMessage::error(ErrorCode::RateLimited, "slow down")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","payload":{"code":429,"message":"slow down"}}"#
        );
    }
}
