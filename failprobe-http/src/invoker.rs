//! In-process load invoker

use crate::config::LoadClientConfig;
use crate::errors::HttpError;
use async_trait::async_trait;
use failprobe_core::{BurstReport, BurstStatus, LoadInvoker};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Issues each burst as `total_requests` GET requests with at most
/// `concurrency` in flight
///
/// A new client (and connection pool) is built for every burst, so no
/// connection outlives the burst that opened it.
#[derive(Debug, Clone, Default)]
pub struct HttpLoadInvoker {
    config: LoadClientConfig,
}

impl HttpLoadInvoker {
    /// Create an invoker with default client settings
    pub fn new() -> Self {
        Self::with_config(LoadClientConfig::default())
    }

    /// Create an invoker with specific client settings
    pub fn with_config(config: LoadClientConfig) -> Self {
        debug!(
            "Creating HttpLoadInvoker with timeout: {}s",
            config.timeout.as_secs()
        );
        Self { config }
    }

    pub fn config(&self) -> &LoadClientConfig {
        &self.config
    }

    fn build_client(&self) -> Result<Client, HttpError> {
        let client = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .danger_accept_invalid_certs(!self.config.verify_ssl)
            .pool_max_idle_per_host(self.config.max_idle_per_host)
            .build()?;
        Ok(client)
    }
}

#[async_trait]
impl LoadInvoker for HttpLoadInvoker {
    async fn invoke(
        &self,
        target: &Url,
        concurrency: u32,
        total_requests: u64,
    ) -> failprobe_core::Result<BurstReport> {
        if !matches!(target.scheme(), "http" | "https") {
            return Err(HttpError::InvalidUrl(format!(
                "{} (only http and https targets are supported)",
                target
            ))
            .into());
        }

        let client = self.build_client()?;
        let width = concurrency.max(1) as usize;
        let started = Instant::now();

        let mut succeeded = 0u64;
        let mut failed = 0u64;
        let mut first_error: Option<String> = None;

        let mut responses = stream::iter(0..total_requests)
            .map(|_| send_one(&client, target))
            .buffer_unordered(width);

        while let Some(outcome) = responses.next().await {
            match outcome {
                Ok(()) => succeeded += 1,
                Err(message) => {
                    failed += 1;
                    first_error.get_or_insert(message);
                }
            }
        }

        let elapsed = started.elapsed();
        debug!(
            concurrency,
            total_requests, succeeded, failed, "Burst finished in {:?}", elapsed
        );

        let exit_status = match first_error {
            Some(message) if succeeded == 0 => BurstStatus::Failed {
                code: None,
                message,
            },
            _ => BurstStatus::Success,
        };

        Ok(BurstReport {
            elapsed,
            exit_status,
            succeeded: Some(succeeded),
            failed: Some(failed),
        })
    }
}

async fn send_one(client: &Client, target: &Url) -> Result<(), String> {
    let response = client
        .get(target.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();

    // Drain the body so the connection can be reused
    let body = response.bytes().await;

    if !status.is_success() {
        return Err(format!("HTTP {}", status));
    }
    body.map(|_| ())
        .map_err(|e| format!("reading response body failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use failprobe_core::HarnessError;

    #[tokio::test]
    async fn test_rejects_non_http_target() {
        let invoker = HttpLoadInvoker::new();
        let target = Url::parse("mongodb://localhost:27017").unwrap();

        let err = invoker.invoke(&target, 4, 8).await.unwrap_err();
        assert!(matches!(err, HarnessError::Load(_)));
    }

    #[tokio::test]
    async fn test_unreachable_target_reports_failed_burst() {
        let invoker = HttpLoadInvoker::with_config(LoadClientConfig {
            timeout: std::time::Duration::from_secs(2),
            ..LoadClientConfig::default()
        });
        // Port 9 (discard) is closed on test machines
        let target = Url::parse("http://127.0.0.1:9/").unwrap();

        let report = invoker.invoke(&target, 2, 4).await.unwrap();
        assert!(!report.exit_status.is_success());
        assert_eq!(report.succeeded, Some(0));
        assert_eq!(report.failed, Some(4));
    }

    #[test]
    fn test_config_from_file_config() {
        let file_config = failprobe_config::HttpConfig {
            user_agent: "probe-test".to_string(),
            verify_ssl: false,
            ..Default::default()
        };
        let config = LoadClientConfig::from(file_config);
        assert_eq!(config.user_agent, "probe-test");
        assert!(!config.verify_ssl);
    }
}
