use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use crate::{
    auth::{AuthFailure, SessionClaims, extract_bearer_token},
    services::gateway,
    state::SharedState,
};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/ws",
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade the HTTP connection into an authenticated quiz session.
///
/// The bearer token comes from the `Authorization` header or the `token`
/// query parameter; verification happens before the socket loop starts and
/// a rejected token closes the socket with a policy-violation code.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let auth = authenticate(&state, &headers, query.token.as_deref());
    ws.on_upgrade(move |socket| gateway::handle_socket(state, socket, auth))
}

fn authenticate(
    state: &SharedState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<SessionClaims, AuthFailure> {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token);

    let token = header_token.or(query_token).ok_or(AuthFailure::Missing)?;
    state.verifier().verify(token)
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
