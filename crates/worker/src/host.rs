//! Host queue consumption loop.
//!
//! The invocation host hands out jobs over HTTP: `GET {queue}/next`
//! returns a job or 204 when idle, and the handler's response object is
//! posted back to `POST {queue}/{id}/result`. One job is in flight at a
//! time; the host runs multiple workers for parallelism.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::handler::Worker;

/// Delay between polls when the queue is empty or unreachable.
pub const IDLE_POLL_DELAY: Duration = Duration::from_secs(1);

/// Timeout for queue requests.
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// One job handed out by the host.
#[derive(Debug, Deserialize)]
pub struct HostJob {
    pub id: String,
    #[serde(default)]
    pub input: Value,
}

/// Client for the host's queue endpoints.
pub struct HostQueue {
    client: reqwest::Client,
    queue_url: String,
}

impl HostQueue {
    pub fn new(queue_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            queue_url,
        }
    }

    /// Ask the host for the next job. `None` means the queue is empty.
    pub async fn take(&self) -> Result<Option<HostJob>, reqwest::Error> {
        let response = self
            .client
            .get(format!("{}/next", self.queue_url))
            .timeout(QUEUE_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Unexpected queue response");
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    /// Deliver a job's response object back to the host.
    pub async fn complete(&self, job_id: &str, result: &Value) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/{}/result", self.queue_url, job_id))
            .timeout(QUEUE_TIMEOUT)
            .json(result)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Consume jobs until `cancel` fires.
///
/// Result delivery is at-most-once: a failed post is logged and dropped,
/// and the host times the invocation out on its side.
pub async fn run(queue: &HostQueue, worker: &mut Worker, cancel: &CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            tracing::info!("Queue loop stopped");
            return;
        }

        match queue.take().await {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job.id, "Job received");
                let response = worker.handle(&job.input).await;
                if let Err(e) = queue.complete(&job.id, &response).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to deliver job result");
                }
            }
            Ok(None) => {
                idle_wait(cancel).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to poll host queue");
                idle_wait(cancel).await;
            }
        }
    }
}

async fn idle_wait(cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(IDLE_POLL_DELAY) => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn host_job_parses_with_and_without_input() {
        let job: HostJob =
            serde_json::from_value(json!({"id": "j-1", "input": {"workflow": {}}})).unwrap();
        assert_eq!(job.id, "j-1");
        assert!(job.input.is_object());

        let bare: HostJob = serde_json::from_value(json!({"id": "j-2"})).unwrap();
        assert!(bare.input.is_null());
    }
}
