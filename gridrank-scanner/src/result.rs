use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single proxy liveness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProxyStatus {
    pub fn reachable(id: String, host: String, port: u16, latency: Duration) -> Self {
        Self {
            id,
            host,
            port,
            success: true,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn failed(id: String, host: String, port: u16, error: String) -> Self {
        Self {
            id,
            host,
            port,
            success: false,
            latency_ms: None,
            error: Some(error),
            checked_at: Utc::now(),
        }
    }
}

/// What a ranking lookup observed from one vantage point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// 1-based position of the tracked business, `None` when absent.
    pub rank: Option<u32>,
    pub total_results: usize,
    /// Raw JSON of the matched listing.
    pub payload: Option<String>,
    pub response_time: Duration,
}

impl ProbeOutcome {
    pub fn not_found(total_results: usize, response_time: Duration) -> Self {
        Self {
            rank: None,
            total_results,
            payload: None,
            response_time,
        }
    }
}
