//! HTTPS Pool.
//!
//! Bounded-concurrency pool over a single upstream host. `reqwest::Client`
//! already gives us session reuse (keep-alive) and TLS; this module adds
//! the concurrency gate, failure classification, and a standalone retry
//! timer on top of that.

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

pub struct HttpsPool {
    client: Client,
    host: String,
    api_key: String,
    semaphore: Arc<Semaphore>,
}

impl HttpsPool {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>, pool_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(pool_size.max(1))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("building HttpsPool client")?;

        Ok(Self {
            client,
            host: host.into(),
            api_key: api_key.into(),
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
        })
    }

    /// POSTs `body` to `<host><path>`. At most `pool_size` requests from
    /// this pool are ever in flight; excess callers queue FIFO on the
    /// semaphore. Any transport failure (DNS/TCP/TLS/write/read/timeout)
    /// is surfaced as `Ok(String::new())` rather than an `Err` — the
    /// pool never retries on its own, the caller decides.
    pub async fn post(&self, path: &str, body: serde_json::Value) -> String {
        let _permit = match self.semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => return String::new(),
        };

        let url = format!("{}{}", self.host, path);
        let result = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) => match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, url = %url, "http read failure");
                    String::new()
                }
            },
            Err(e) => {
                warn!(error = %e, url = %url, "http transport failure");
                String::new()
            }
        }
    }

    /// Arms a single-shot timer that fires `f` after `delay`, independent
    /// of the pool's own concurrency state — it must fire even when the
    /// pool has no in-flight requests.
    pub fn schedule_retry<F>(&self, delay: Duration, f: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_request_yields_empty_body_not_error() {
        let pool = HttpsPool::new("http://127.0.0.1:1", "key", 2).unwrap();
        let body = pool.post("/nonexistent-port", serde_json::json!({})).await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn schedule_retry_fires_after_delay() {
        let pool = HttpsPool::new("http://example.invalid", "key", 1).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.schedule_retry(Duration::from_millis(10), async move {
            let _ = tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    }
}
