use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

// ─── PacedClient ──────────────────────────────────────────────────────────────

/// Transport-level failures, before any source context is attached. The
/// rate-limit case is carried separately because the caller must stop
/// calling the source for the rest of the run rather than treat it as a
/// transient error.
#[derive(Debug)]
pub enum HttpFailure {
    /// HTTP 429. The only quota signal the remote contract currently
    /// defines; if the service ever moves to a body-embedded message this
    /// match is the single place to update.
    RateLimited,
    Status { status: u16, body: String },
    Network(String),
}

/// Thin wrapper over `reqwest` that paces consecutive requests and bounds
/// each one with a hard timeout. Deliberately retry-free: every failure is
/// reported upward exactly once per run.
pub struct PacedClient {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl PacedClient {
    pub fn new(min_interval: Duration, timeout: Duration, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    async fn wait_for_pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn get(&self, url: &str) -> std::result::Result<String, HttpFailure> {
        self.wait_for_pace().await;

        let resp = self.client.get(url).send().await;
        match resp {
            Ok(r) if r.status() == 429 => Err(HttpFailure::RateLimited),
            Ok(r) if !r.status().is_success() => {
                let status = r.status().as_u16();
                let body = r.text().await.unwrap_or_default();
                Err(HttpFailure::Status { status, body })
            }
            Ok(r) => r
                .text()
                .await
                .map_err(|e| HttpFailure::Network(e.to_string())),
            Err(e) if e.is_timeout() => Err(HttpFailure::Network("request timed out".to_string())),
            Err(e) => Err(HttpFailure::Network(e.to_string())),
        }
    }
}
