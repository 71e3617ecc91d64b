pub mod registry;
pub mod room;
pub mod state_machine;

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};

use crate::{
    auth::SessionVerifier,
    config::ServerConfig,
    dao::QuizStore,
    dto::ws::CLOSE_GOING_AWAY,
    state::{registry::ConnectionRegistry, room::RoomRegistry},
};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the storage handle, the live
/// connection registry, and the room executors.
pub struct AppState {
    config: ServerConfig,
    store: Arc<dyn QuizStore>,
    verifier: Arc<dyn SessionVerifier>,
    registry: Arc<ConnectionRegistry>,
    rooms: RoomRegistry,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply into every connection task.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn QuizStore>,
        verifier: Arc<dyn SessionVerifier>,
    ) -> SharedState {
        Arc::new(Self {
            config,
            store,
            verifier,
            registry: Arc::new(ConnectionRegistry::new()),
            rooms: RoomRegistry::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QuizStore> {
        &self.store
    }

    pub fn verifier(&self) -> &Arc<dyn SessionVerifier> {
        &self.verifier
    }

    /// Registry of live client sockets and fan-out sets.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Registry of live room executors.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Begin the graceful drain: retire every room executor and push a
    /// going-away close frame to every live connection.
    pub fn begin_shutdown(&self) {
        self.rooms.shutdown_all();
        self.registry.close_all(Message::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: "server shutting down".into(),
        })));
    }
}
