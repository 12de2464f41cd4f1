//! Readiness probe for the generation server.
//!
//! The server takes a while to load models after container start. The
//! worker waits for `/system_stats` to answer before consuming jobs, but
//! a server that never becomes ready is a warning, not a startup
//! failure — the first invocation will surface the real error.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;

/// Default number of probe attempts before giving up.
pub const DEFAULT_READY_ATTEMPTS: u32 = 90;

/// Default delay between probe attempts.
pub const DEFAULT_READY_DELAY: Duration = Duration::from_secs(2);

/// Wait until the server answers the readiness probe.
///
/// Returns `true` once any attempt succeeds, `false` when the attempt
/// budget is exhausted or `cancel` fires first.
pub async fn wait_until_ready(
    api: &ComfyUIApi,
    max_attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return false;
        }

        match api.system_stats().await {
            Ok(()) => {
                tracing::info!(attempt, "ComfyUI is ready");
                return true;
            }
            Err(e) => {
                tracing::info!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Waiting for ComfyUI",
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_stops_the_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let api = ComfyUIApi::new("http://127.0.0.1:9".to_string());
        let ready = wait_until_ready(&api, 5, Duration::from_millis(10), &cancel).await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn unreachable_server_exhausts_attempts() {
        let cancel = CancellationToken::new();
        // Port 9 (discard) refuses connections immediately.
        let api = ComfyUIApi::new("http://127.0.0.1:9".to_string());
        let ready = wait_until_ready(&api, 2, Duration::from_millis(10), &cancel).await;
        assert!(!ready);
    }
}
