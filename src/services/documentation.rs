use utoipa::OpenApi;

use crate::dto::{
    health::HealthResponse,
    ws::{ClientMessage, ParticipantSummary, QuestionSummary, ServerMessage, StandingSummary},
};

/// OpenAPI document covering the HTTP surface and the WebSocket frame shapes.
#[derive(OpenApi)]
#[openapi(
    paths(crate::routes::health::health, crate::routes::websocket::ws_handler),
    components(schemas(
        HealthResponse,
        ClientMessage,
        ServerMessage,
        ParticipantSummary,
        QuestionSummary,
        StandingSummary,
    ))
)]
pub struct ApiDoc;
