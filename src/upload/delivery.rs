//! Batch delivery with fixed-delay retry.
//!
//! A batch gets one initial attempt plus up to `max_retries` retries, with
//! `retry_delay` between consecutive attempts. Any transport error or
//! non-2xx status counts as a failed attempt. Once the budget is spent the
//! batch is dropped and the failure is returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::batch::Batch;
use super::transport::{OutboundRequest, Transport};
use crate::config::SdkConfig;
use crate::error::{Result, SdkError};

/// Final state of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Retries exhausted; the batch was discarded.
    Failed { error: String },
}

/// Outcome of delivering one batch, as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batch_id: String,
    pub session_id: Option<String>,
    pub event_count: usize,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn delivered(batch: &Batch, attempts: u32) -> Self {
        DeliveryReport {
            batch_id: batch.batch_id.clone(),
            session_id: batch.session_id.clone(),
            event_count: batch.event_count(),
            attempts,
            outcome: DeliveryOutcome::Delivered,
        }
    }

    pub fn failed(batch: &Batch, error: &SdkError) -> Self {
        let attempts = match error {
            SdkError::Delivery { attempts, .. } => *attempts,
            _ => 0,
        };
        DeliveryReport {
            batch_id: batch.batch_id.clone(),
            session_id: batch.session_id.clone(),
            event_count: batch.event_count(),
            attempts,
            outcome: DeliveryOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
    headers: Vec<(String, String)>,
    max_retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("endpoint", &self.endpoint)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl DeliveryClient {
    pub fn new(config: &SdkConfig, transport: Arc<dyn Transport>) -> Self {
        // Custom headers first so the API key header cannot be overridden.
        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case(&config.api_key_header))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.push((config.api_key_header.clone(), config.api_key.clone()));

        DeliveryClient {
            transport,
            endpoint: config.endpoint.to_string(),
            headers,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }

    /// Deliver one batch, retrying within the configured budget.
    pub async fn send(&self, batch: &Batch) -> Result<DeliveryReport> {
        let body = batch.to_json().map_err(|e| SdkError::Delivery {
            attempts: 0,
            last_error: e,
        })?;

        let total_attempts = self.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            let request = OutboundRequest {
                url: self.endpoint.clone(),
                headers: self.headers.clone(),
                body: body.clone(),
            };

            match self.transport.post(request).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(
                        "Batch {} delivered ({} events, attempt {})",
                        batch.batch_id,
                        batch.event_count(),
                        attempt
                    );
                    return Ok(DeliveryReport::delivered(batch, attempt));
                }
                Ok(status) => last_error = format!("HTTP {}", status),
                Err(e) => last_error = e,
            }

            if attempt < total_attempts {
                warn!(
                    "Batch {} attempt {}/{} failed: {}; retrying in {}ms",
                    batch.batch_id,
                    attempt,
                    total_attempts,
                    last_error,
                    self.retry_delay.as_millis()
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(SdkError::Delivery {
            attempts: total_attempts,
            last_error,
        })
    }
}
