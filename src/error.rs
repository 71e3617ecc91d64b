use thiserror::Error;

use crate::dao::storage::StorageError;

/// Stable numeric categories surfaced to clients inside `error` frames.
///
/// Several variants share a numeric code; the frame's `message` carries the
/// specific condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadFrame,
    BadPayload,
    Unauthenticated,
    NotParticipant,
    NotHost,
    RoomNotFound,
    QuizAlreadyRunning,
    QuestionNotActive,
    QuestionExpired,
    PayloadTooLarge,
    ConnectionLimit,
    RateLimited,
    Internal,
}

impl ErrorCode {
    /// Numeric category carried on the wire.
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::BadFrame | ErrorCode::BadPayload => 400,
            ErrorCode::Unauthenticated => 401,
            ErrorCode::NotParticipant | ErrorCode::NotHost => 403,
            ErrorCode::RoomNotFound => 404,
            ErrorCode::QuizAlreadyRunning | ErrorCode::QuestionNotActive => 409,
            ErrorCode::QuestionExpired => 410,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::ConnectionLimit | ErrorCode::RateLimited => 429,
            ErrorCode::Internal => 500,
        }
    }
}

/// Domain failures raised by the membership store, the quiz engine, and the
/// scoring updater.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    #[error("room `{0}` is not active")]
    RoomInactive(String),
    #[error("room `{0}` is full")]
    RoomFull(String),
    #[error("already seated in room `{0}`")]
    AlreadyInOtherRoom(String),
    #[error("not a participant of room `{0}`")]
    NotParticipant(String),
    #[error("only the host may start the quiz")]
    NotHost,
    #[error("a quiz is already running in room `{0}`")]
    QuizAlreadyRunning(String),
    #[error("question {0} is not currently open")]
    QuestionNotActive(u8),
    #[error("question {0} is past its deadline")]
    QuestionExpired(u8),
    #[error("question bank holds fewer than {0} questions")]
    InsufficientQuestions(usize),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Category used when reporting this failure in an `error` frame.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServiceError::RoomNotFound(_) | ServiceError::RoomInactive(_) => ErrorCode::RoomNotFound,
            ServiceError::RoomFull(_)
            | ServiceError::AlreadyInOtherRoom(_)
            | ServiceError::InsufficientQuestions(_) => ErrorCode::QuizAlreadyRunning,
            ServiceError::NotParticipant(_) => ErrorCode::NotParticipant,
            ServiceError::NotHost => ErrorCode::NotHost,
            ServiceError::QuizAlreadyRunning(_) => ErrorCode::QuizAlreadyRunning,
            ServiceError::QuestionNotActive(_) => ErrorCode::QuestionNotActive,
            ServiceError::QuestionExpired(_) => ErrorCode::QuestionExpired,
            ServiceError::Storage(_) | ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_the_protocol_table() {
        assert_eq!(ErrorCode::BadFrame.code(), 400);
        assert_eq!(ErrorCode::Unauthenticated.code(), 401);
        assert_eq!(ErrorCode::NotHost.code(), 403);
        assert_eq!(ErrorCode::RoomNotFound.code(), 404);
        assert_eq!(ErrorCode::QuestionNotActive.code(), 409);
        assert_eq!(ErrorCode::QuestionExpired.code(), 410);
        assert_eq!(ErrorCode::PayloadTooLarge.code(), 413);
        assert_eq!(ErrorCode::RateLimited.code(), 429);
        assert_eq!(ErrorCode::Internal.code(), 500);
    }

    #[test]
    fn capacity_failures_report_conflict() {
        let err = ServiceError::RoomFull("r1".into());
        assert_eq!(err.error_code().code(), 409);
    }
}
