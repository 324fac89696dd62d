use std::time::Duration;

use tracing::{info, warn};

use parley_api::auth::AppState;

/// Background task that clears expired pins in every conversation.
///
/// Reads already sweep lazily, so this only keeps idle conversations tidy.
/// Unpin events are fanned out the same way as a lazy sweep's.
pub async fn run_pin_sweep_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep_once(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Pin sweep: cleared {} expired pins", count);
                }
            }
            Err(e) => {
                warn!("Pin sweep error: {}", e);
            }
        }
    }
}

async fn sweep_once(state: &AppState) -> parley_core::Result<usize> {
    let outcome = state.messages.sweep_expired_pins().await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Ok(outcome.value)
}
