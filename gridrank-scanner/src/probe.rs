use crate::error::{Result, ScanError};
use crate::geo::GeoPoint;
use crate::proxy::Vantage;
use crate::result::ProbeOutcome;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// What to look for, and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankQuery {
    pub keyword: String,
    pub business_name: Option<String>,
    pub point: GeoPoint,
}

impl RankQuery {
    /// The listing name being tracked; falls back to the keyword.
    pub fn target(&self) -> &str {
        self.business_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.keyword)
    }
}

/// Performs one ranking lookup from a vantage point.
#[async_trait]
pub trait RankProbe: Send + Sync {
    async fn probe(&self, query: &RankQuery, vantage: &Vantage) -> Result<ProbeOutcome>;
}

/// Rank lookup against a JSON local-search endpoint.
///
/// The endpoint receives `q`, `lat` and `lng` query parameters and answers
/// with either a bare array of listings or `{"results": [...]}`. Each listing
/// carries a `name` (or `title`).
#[derive(Debug, Clone)]
pub struct HttpRankProbe {
    endpoint: Url,
    timeout: Duration,
    direct: Client,
}

impl HttpRankProbe {
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
        let direct = Self::client_builder(timeout).build()?;
        Ok(Self {
            endpoint,
            timeout,
            direct,
        })
    }

    fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent("gridrank/0.1")
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .redirect(reqwest::redirect::Policy::limited(5))
    }

    fn client_for(&self, vantage: &Vantage) -> Result<Client> {
        match vantage {
            Vantage::Direct => Ok(self.direct.clone()),
            Vantage::Proxy(candidate) => Ok(Self::client_builder(self.timeout)
                .proxy(candidate.to_proxy()?)
                .build()?),
        }
    }
}

#[async_trait]
impl RankProbe for HttpRankProbe {
    async fn probe(&self, query: &RankQuery, vantage: &Vantage) -> Result<ProbeOutcome> {
        let client = self.client_for(vantage)?;
        debug!(
            "Probing '{}' at {} via {}",
            query.keyword,
            query.point,
            vantage.label()
        );

        let start = Instant::now();
        let request = client.get(self.endpoint.clone()).query(&[
            ("q", query.keyword.clone()),
            ("lat", query.point.lat.to_string()),
            ("lng", query.point.lng.to_string()),
        ]);

        let body: Value = tokio::time::timeout(self.timeout, async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ScanError::Status(status.as_u16()));
            }
            Ok::<Value, ScanError>(response.json::<Value>().await?)
        })
        .await
        .map_err(|_| ScanError::Timeout(self.timeout.as_millis()))??;
        let response_time = start.elapsed();

        let listings = extract_listings(&body)?;
        let outcome = match find_rank(listings, query.target()) {
            Some((rank, listing)) => ProbeOutcome {
                rank: Some(rank),
                total_results: listings.len(),
                payload: Some(listing.to_string()),
                response_time,
            },
            None => ProbeOutcome::not_found(listings.len(), response_time),
        };
        Ok(outcome)
    }
}

/// Pull the listing array out of a search response.
pub fn extract_listings(body: &Value) -> Result<&Vec<Value>> {
    match body {
        Value::Array(listings) => Ok(listings),
        Value::Object(map) => map
            .get("results")
            .or_else(|| map.get("local_results"))
            .and_then(Value::as_array)
            .ok_or_else(|| ScanError::ParseError("response has no results array".to_string())),
        _ => Err(ScanError::ParseError(
            "response is neither an array nor an object".to_string(),
        )),
    }
}

/// 1-based position of the first listing whose name contains `target`, case-insensitively.
pub fn find_rank<'a>(listings: &'a [Value], target: &str) -> Option<(u32, &'a Value)> {
    let needle = target.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    listings
        .iter()
        .enumerate()
        .find(|(_, listing)| {
            listing
                .get("name")
                .or_else(|| listing.get("title"))
                .and_then(Value::as_str)
                .map(|name| name.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .map(|(index, listing)| ((index + 1) as u32, listing))
}
