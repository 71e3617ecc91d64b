use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use utoipa::ToSchema;

/// Payload returned by the `/health` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// RFC 3339 instant the response was produced.
    pub timestamp: String,
    /// Number of live client connections.
    pub connections: usize,
}

impl HealthResponse {
    pub fn ok(connections: usize) -> Self {
        Self::with_status("ok", connections)
    }

    pub fn degraded(connections: usize) -> Self {
        Self::with_status("degraded", connections)
    }

    fn with_status(status: &str, connections: usize) -> Self {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            status: status.to_string(),
            timestamp,
            connections,
        }
    }
}
