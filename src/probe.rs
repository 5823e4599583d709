//! Diagnosis backend health probe.
//!
//! Tries each candidate base URL in order with `GET {url}/health` and reports
//! what came back. The client uses the first working backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BACKENDS: &[&str] = &[
    "http://127.0.0.1:5000",
    "http://localhost:5000",
    "http://192.168.0.103:5000",
];

/// Longest error detail kept in a report.
const ERROR_DETAIL_CHARS: usize = 30;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid health response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Deserialize)]
struct HealthBody {
    #[serde(default)]
    num_models: Option<u32>,
}

/// Outcome for one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendStatus {
    Working { num_models: Option<u32> },
    Failed { code: u16 },
    Error { message: String },
}

impl BackendStatus {
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working { .. })
    }

    /// Human-readable one-liner.
    pub fn label(&self) -> String {
        match self {
            Self::Working { num_models: Some(n) } => format!("\u{2705} Working ({n} models)"),
            Self::Working { num_models: None } => "\u{2705} Working".into(),
            Self::Failed { .. } => "\u{274C} Failed".into(),
            Self::Error { message } => format!("\u{274C} Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendReport {
    pub url: String,
    #[serde(flatten)]
    pub status: BackendStatus,
}

/// Probes a fixed list of backends.
#[derive(Debug, Clone)]
pub struct BackendProbe {
    urls: Vec<String>,
    timeout: Duration,
}

impl BackendProbe {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Self {
        Self { urls, timeout }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Probe every backend in order. Blocking.
    pub fn run(&self) -> Vec<BackendReport> {
        self.urls
            .iter()
            .map(|url| {
                let status = match check_health(url, self.timeout) {
                    Ok(num_models) => BackendStatus::Working { num_models },
                    Err(ProbeError::Status(code)) => BackendStatus::Failed { code },
                    Err(e) => BackendStatus::Error {
                        message: truncate_detail(&e.to_string()),
                    },
                };
                info!(url = %url, status = %status.label(), "backend probed");
                BackendReport {
                    url: url.clone(),
                    status,
                }
            })
            .collect()
    }

    /// First backend whose health check succeeds, probing in order and
    /// stopping at the first hit.
    pub fn first_healthy(&self) -> Option<String> {
        for url in &self.urls {
            match check_health(url, self.timeout) {
                Ok(_) => return Some(url.clone()),
                Err(e) => debug!(url = %url, error = %e, "backend unhealthy"),
            }
        }
        warn!("no healthy backend among {} candidates", self.urls.len());
        None
    }
}

/// `GET {base}/health`; returns the advertised model count.
pub fn check_health(base: &str, timeout: Duration) -> Result<Option<u32>, ProbeError> {
    let url = health_url(base);
    let response = ureq::get(&url)
        .set("Accept", "application/json")
        .timeout(timeout)
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => ProbeError::Status(code),
            ureq::Error::Transport(t) => ProbeError::Network(t.to_string()),
        })?;

    let body: HealthBody = response
        .into_json()
        .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;
    Ok(body.num_models)
}

fn health_url(base: &str) -> String {
    format!("{}/health", base.trim_end_matches('/'))
}

/// First `ERROR_DETAIL_CHARS` characters, always followed by `...`.
fn truncate_detail(msg: &str) -> String {
    let cut: String = msg.chars().take(ERROR_DETAIL_CHARS).collect();
    format!("{cut}...")
}
