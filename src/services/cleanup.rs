//! Periodic background sweep for rate-limit windows and dead rooms.

use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::{config::CLEANUP_INTERVAL, state::SharedState};

/// Run the sweep loop until the process shuts down.
pub async fn run(state: SharedState) {
    let mut ticker = interval(CLEANUP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        state.registry().sweep_rate_windows();
        state.rooms().sweep();
        debug!(
            connections = state.registry().connection_count(),
            rooms = state.rooms().len(),
            "cleanup sweep finished"
        );
    }
}
