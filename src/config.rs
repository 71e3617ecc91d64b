//! Environment-driven configuration and the build-time protocol constants.

use std::{env, time::Duration};

use thiserror::Error;

/// Listen port used when `PORT` is not set.
const DEFAULT_PORT: u16 = 3001;

/// How long a question stays open for answers.
pub const QUESTION_TIME_LIMIT: Duration = Duration::from_secs(10);
/// Countdown between the host pressing start and the first question.
pub const QUIZ_START_DELAY: Duration = Duration::from_secs(5);
/// Reveal window between a question closing and the next one opening.
pub const NEXT_QUESTION_DELAY: Duration = Duration::from_secs(3);
/// Number of questions drawn from the bank for one quiz.
pub const QUESTIONS_PER_QUIZ: usize = 10;
/// Maximum simultaneous sockets a single user may hold.
pub const MAX_CONNECTIONS_PER_USER: usize = 3;
/// Sliding window used by the per-connection rate limiter.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);
/// Maximum inbound frames per connection within [`RATE_LIMIT_WINDOW`].
pub const RATE_LIMIT_MAX: usize = 10;
/// Hard cap on a decoded inbound text frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 1024;
/// Cadence of the background sweep (rate-limit windows, dead rooms).
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Dead rooms older than this are expunged by the sweep.
pub const DEAD_ROOM_RETENTION: Duration = Duration::from_secs(30 * 60);
/// Upper bound on the graceful shutdown drain.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Error raised when the environment is missing required settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is required")]
    Missing(&'static str),
    #[error("environment variable `{0}` must not be empty")]
    Empty(&'static str),
    #[error("environment variable `{0}` has an invalid value: {1}")]
    Invalid(&'static str, String),
}

/// Immutable runtime configuration resolved once at boot.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub session_secret: String,
}

impl ServerConfig {
    /// Resolve the configuration from the process environment.
    ///
    /// `DATABASE_URL` and a non-empty `SESSION_SECRET` are mandatory;
    /// boot fails without them.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|err| ConfigError::Invalid("PORT", err.to_string()))?,
            Err(_) => DEFAULT_PORT,
        };

        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let session_secret =
            env::var("SESSION_SECRET").map_err(|_| ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.trim().is_empty() {
            return Err(ConfigError::Empty("SESSION_SECRET"));
        }

        Ok(Self {
            port,
            database_url,
            session_secret,
        })
    }
}
