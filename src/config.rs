//! # SDK Configuration
//!
//! Caller-supplied [`SdkOptions`] are merged over defaults and validated
//! exactly once by [`SdkConfig::resolve`]. The resulting [`SdkConfig`] is
//! immutable for the lifetime of an `init`; only the user id and attributes
//! change at runtime, through the session manager's setters.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use serde::Deserialize;

use crate::error::{Result, SdkError};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api/v1/sessions";
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";
pub const DEFAULT_UPLOAD_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 50_000;
pub const DEFAULT_BLOCK_CLASS: &str = "rr-block";

/// What to do when the buffer is at capacity and another event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event to make room.
    #[default]
    DropOldest,
    /// Reject the incoming event.
    DropNewest,
}

/// Per input-type redaction switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaskInputOptions {
    pub password: bool,
    pub email: bool,
    pub tel: bool,
    pub text: bool,
    pub textarea: bool,
    pub select: bool,
    pub number: bool,
    pub search: bool,
    pub url: bool,
}

impl Default for MaskInputOptions {
    fn default() -> Self {
        MaskInputOptions {
            password: true,
            email: false,
            tel: false,
            text: false,
            textarea: false,
            select: false,
            number: false,
            search: false,
            url: false,
        }
    }
}

impl MaskInputOptions {
    /// Mask every supported input type.
    pub fn all() -> Self {
        MaskInputOptions {
            password: true,
            email: true,
            tel: true,
            text: true,
            textarea: true,
            select: true,
            number: true,
            search: true,
            url: true,
        }
    }

    /// Whether values of the given input type (case-insensitive) are redacted.
    pub fn masks(&self, input_type: &str) -> bool {
        match input_type.to_ascii_lowercase().as_str() {
            "password" => self.password,
            "email" => self.email,
            "tel" => self.tel,
            "text" => self.text,
            "textarea" => self.textarea,
            "select" => self.select,
            "number" => self.number,
            "search" => self.search,
            "url" => self.url,
            _ => false,
        }
    }
}

/// Options handed to the event producer and the privacy gate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordOptions {
    pub mousemove: bool,
    pub mouse_interaction: bool,
    pub scroll: bool,
    pub input: bool,
    pub viewport_resize: bool,
    pub canvas: bool,
    pub console: bool,
    pub network: bool,
    /// Admission probability for mouse-movement events, in `[0, 1]`.
    pub mousemove_sampling: f64,
    pub block_class: String,
    pub block_selector: Option<String>,
    pub mask_input_options: MaskInputOptions,
}

impl Default for RecordOptions {
    fn default() -> Self {
        RecordOptions {
            mousemove: true,
            mouse_interaction: true,
            scroll: true,
            input: true,
            viewport_resize: true,
            canvas: false,
            console: true,
            network: true,
            mousemove_sampling: 1.0,
            block_class: DEFAULT_BLOCK_CLASS.to_string(),
            block_selector: None,
            mask_input_options: MaskInputOptions::default(),
        }
    }
}

/// Caller-supplied overrides. Unset fields take the documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SdkOptions {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_header: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub upload_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    /// `Some(None)` disables the cap entirely.
    pub max_buffered_events: Option<Option<usize>>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub record: RecordOptions,
}

impl SdkOptions {
    /// Options carrying only an API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        SdkOptions {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Read deployment settings from `SESSION_SDK_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = SdkOptions {
            api_key: std::env::var("SESSION_SDK_API_KEY").ok(),
            endpoint: std::env::var("SESSION_SDK_ENDPOINT").ok(),
            ..Default::default()
        };
        if let Ok(raw) = std::env::var("SESSION_SDK_UPLOAD_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => options.upload_interval_ms = Some(ms),
                Err(e) => log::warn!("Ignoring SESSION_SDK_UPLOAD_INTERVAL_MS={}: {}", raw, e),
            }
        }
        options
    }
}

/// Validated, immutable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SdkConfig {
    pub api_key: String,
    pub endpoint: Url,
    pub api_key_header: String,
    pub headers: BTreeMap<String, String>,
    pub upload_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub max_buffered_events: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub record: RecordOptions,
}

impl SdkConfig {
    /// Merge `options` over defaults and validate the result.
    pub fn resolve(options: SdkOptions) -> Result<Self> {
        let api_key = options
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SdkError::Configuration("apiKey is required".to_string()))?;

        let raw_endpoint = options
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&raw_endpoint)
            .map_err(|e| SdkError::Configuration(format!("invalid endpoint {}: {}", raw_endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SdkError::Configuration(format!(
                "endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }

        let api_key_header = options
            .api_key_header
            .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
        if api_key_header.trim().is_empty() {
            return Err(SdkError::Configuration("apiKeyHeader must not be empty".to_string()));
        }
        validate_header(&api_key_header, &api_key)?;
        for (name, value) in &options.headers {
            validate_header(name, value)?;
        }

        let max_retries = options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(SdkError::Configuration(format!(
                "maxRetries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, max_retries
            )));
        }

        let upload_interval_ms = options
            .upload_interval_ms
            .unwrap_or(DEFAULT_UPLOAD_INTERVAL_MS);
        if upload_interval_ms == 0 {
            return Err(SdkError::Configuration("uploadInterval must be positive".to_string()));
        }

        let sampling = options.record.mousemove_sampling;
        if !(0.0..=1.0).contains(&sampling) {
            return Err(SdkError::Configuration(format!(
                "mousemoveSampling must be within [0, 1], got {}",
                sampling
            )));
        }

        let max_buffered_events = options
            .max_buffered_events
            .unwrap_or(Some(DEFAULT_MAX_BUFFERED_EVENTS));
        if max_buffered_events == Some(0) {
            return Err(SdkError::Configuration("maxBufferedEvents must be positive".to_string()));
        }

        Ok(SdkConfig {
            api_key,
            endpoint,
            api_key_header,
            headers: options.headers,
            upload_interval: Duration::from_millis(upload_interval_ms),
            max_retries,
            retry_delay: Duration::from_millis(options.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            request_timeout: Duration::from_millis(
                options.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            max_buffered_events,
            overflow_policy: options.overflow_policy.unwrap_or_default(),
            record: options.record,
        })
    }

    /// Upper bound on time spent waiting between attempts for one batch.
    pub fn retry_budget(&self) -> Duration {
        self.retry_delay
            .checked_mul(self.max_retries)
            .unwrap_or(Duration::MAX)
    }
}

/// Reject headers reqwest would refuse at send time.
fn validate_header(name: &str, value: &str) -> Result<()> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| SdkError::Configuration(format!("invalid header name: {:?}", name)))?;
    // The value may be the API key, so it stays out of the message.
    HeaderValue::from_str(value)
        .map_err(|_| SdkError::Configuration(format!("invalid value for header {}", name)))?;
    Ok(())
}
