//! Validation helpers for wire payloads.

use validator::ValidationError;

/// Longest room identifier accepted on the wire.
pub const MAX_ROOM_ID_LEN: usize = 50;

/// Validates that a room id is non-empty and at most 50 characters.
pub fn validate_room_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        let mut err = ValidationError::new("room_id_empty");
        err.message = Some("room id must not be empty".into());
        return Err(err);
    }

    if id.chars().count() > MAX_ROOM_ID_LEN {
        let mut err = ValidationError::new("room_id_length");
        err.message = Some(
            format!(
                "room id must be at most {MAX_ROOM_ID_LEN} characters (got {})",
                id.chars().count()
            )
            .into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        assert!(validate_room_id("lobby-7").is_ok());
        assert!(validate_room_id("a").is_ok());
        assert!(validate_room_id(&"x".repeat(50)).is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_room_id("").is_err());
    }

    #[test]
    fn rejects_overlong() {
        assert!(validate_room_id(&"x".repeat(51)).is_err());
    }
}
