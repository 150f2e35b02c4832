use crate::error::{Result, ScanError};
use crate::result::ProxyStatus;
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lightweight endpoint answering `204 No Content`.
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(5);

const TIMEOUT_REASON: &str = "TIMEOUT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyCandidate {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Builds the reqwest proxy routing every scheme through this candidate.
    pub fn to_proxy(&self) -> Result<Proxy> {
        let mut proxy = Proxy::all(self.proxy_url())
            .map_err(|e| ScanError::InvalidProxy(format!("{}: {}", self, e)))?;
        if let Some(ref username) = self.username {
            proxy = proxy.basic_auth(username, self.password.as_deref().unwrap_or(""));
        }
        Ok(proxy)
    }

    /// Parse `host:port` or `host:port:user:pass`. Blank lines and `#` comments yield `None`.
    pub fn parse_line(id: impl Into<String>, line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let parts: Vec<&str> = line.split(':').map(str::trim).collect();
        let (host, port) = match parts.as_slice() {
            [host, port] | [host, port, _, _] => (*host, port.parse::<u16>().ok()?),
            _ => return None,
        };
        if host.is_empty() {
            return None;
        }

        let candidate = Self::new(id, host, port);
        match parts.as_slice() {
            [_, _, user, pass] => Some(candidate.with_credentials(*user, *pass)),
            _ => Some(candidate),
        }
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Checks proxy candidates for liveness with a bounded worker pool.
#[derive(Debug, Clone)]
pub struct ProxyValidator {
    test_url: String,
    timeout: Duration,
}

impl ProxyValidator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PROXY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            test_url: DEFAULT_TEST_URL.to_string(),
            timeout,
        }
    }

    pub fn with_test_url(mut self, test_url: impl Into<String>) -> Self {
        self.test_url = test_url.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validate every candidate using `min(concurrency, candidates.len())` workers.
    ///
    /// Exactly one status is returned per candidate, in completion order.
    pub async fn validate_batch(
        &self,
        candidates: Vec<ProxyCandidate>,
        concurrency: usize,
    ) -> Vec<ProxyStatus> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let workers = concurrency.max(1).min(candidates.len());
        info!(
            "Validating {} proxies with {} workers against {}",
            candidates.len(),
            workers,
            self.test_url
        );

        let queue: Arc<Mutex<VecDeque<(usize, ProxyCandidate)>>> = Arc::new(Mutex::new(
            candidates.iter().cloned().enumerate().collect(),
        ));
        let results: Arc<Mutex<Vec<(usize, ProxyStatus)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(candidates.len())));

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let results = results.clone();
            let validator = self.clone();

            let handle = tokio::spawn(async move {
                debug!("Proxy worker {} started", worker_id);
                loop {
                    let work_item = {
                        let mut queue = queue.lock().await;
                        queue.pop_front()
                    };
                    let Some((index, candidate)) = work_item else {
                        break;
                    };

                    let status = validator.check(&candidate).await;
                    debug!(
                        "[Worker {}] {} -> success={} error={:?}",
                        worker_id, candidate, status.success, status.error
                    );
                    results.lock().await.push((index, status));
                }
                debug!("Proxy worker {} finished", worker_id);
            });
            worker_handles.push(handle);
        }

        for handle in worker_handles {
            if let Err(e) = handle.await {
                warn!("Proxy worker task failed: {}", e);
            }
        }

        let mut recorded = std::mem::take(&mut *results.lock().await);

        // A worker that died mid-probe loses its candidate; report it rather than drop it.
        if recorded.len() < candidates.len() {
            let seen: HashSet<usize> = recorded.iter().map(|(index, _)| *index).collect();
            for (index, candidate) in candidates.iter().enumerate() {
                if !seen.contains(&index) {
                    recorded.push((
                        index,
                        ProxyStatus::failed(
                            candidate.id.clone(),
                            candidate.host.clone(),
                            candidate.port,
                            "worker aborted".to_string(),
                        ),
                    ));
                }
            }
        }

        let reachable = recorded.iter().filter(|(_, s)| s.success).count();
        info!(
            "Proxy validation complete: {}/{} reachable",
            reachable,
            recorded.len()
        );

        recorded.into_iter().map(|(_, status)| status).collect()
    }

    /// Probe one candidate. Never fails; problems are captured in the status.
    pub async fn check(&self, candidate: &ProxyCandidate) -> ProxyStatus {
        let failed = |reason: String| {
            ProxyStatus::failed(
                candidate.id.clone(),
                candidate.host.clone(),
                candidate.port,
                reason,
            )
        };

        let client = match self.client_for(candidate) {
            Ok(client) => client,
            Err(e) => return failed(e.to_string()),
        };

        let start = Instant::now();
        match tokio::time::timeout(self.timeout, client.get(&self.test_url).send()).await {
            Err(_) => failed(TIMEOUT_REASON.to_string()),
            Ok(Err(e)) if e.is_timeout() => failed(TIMEOUT_REASON.to_string()),
            Ok(Err(e)) => failed(e.to_string()),
            Ok(Ok(response)) => {
                let latency = start.elapsed();
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    ProxyStatus::reachable(
                        candidate.id.clone(),
                        candidate.host.clone(),
                        candidate.port,
                        latency,
                    )
                } else {
                    failed(format!("HTTP {}", status.as_u16()))
                }
            }
        }
    }

    fn client_for(&self, candidate: &ProxyCandidate) -> Result<Client> {
        let client = Client::builder()
            .proxy(candidate.to_proxy()?)
            .user_agent("gridrank/0.1 (proxy check)")
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(client)
    }
}

impl Default for ProxyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Network origin of a rank probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vantage {
    Direct,
    Proxy(ProxyCandidate),
}

impl Vantage {
    pub fn label(&self) -> String {
        match self {
            Vantage::Direct => "direct".to_string(),
            Vantage::Proxy(candidate) => format!("proxy {}", candidate),
        }
    }
}

/// Round-robin selection over the proxies that passed the latest validation batch.
#[derive(Debug, Default)]
pub struct VantagePool {
    proxies: RwLock<Vec<ProxyCandidate>>,
    cursor: AtomicUsize,
}

impl VantagePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_batch(candidates: &[ProxyCandidate], statuses: &[ProxyStatus]) -> Self {
        let pool = Self::new();
        pool.refresh(candidates, statuses);
        pool
    }

    /// Replace the pool with the reachable candidates of a batch, fastest first.
    /// Returns the number of usable proxies.
    pub fn refresh(&self, candidates: &[ProxyCandidate], statuses: &[ProxyStatus]) -> usize {
        let mut reachable: Vec<(u64, ProxyCandidate)> = statuses
            .iter()
            .filter(|status| status.success)
            .filter_map(|status| {
                candidates
                    .iter()
                    .find(|c| c.id == status.id && c.host == status.host && c.port == status.port)
                    .map(|c| (status.latency_ms.unwrap_or(u64::MAX), c.clone()))
            })
            .collect();
        reachable.sort_by_key(|(latency, _)| *latency);

        let usable: Vec<ProxyCandidate> = reachable.into_iter().map(|(_, c)| c).collect();
        let count = usable.len();
        *self.proxies.write().unwrap_or_else(|e| e.into_inner()) = usable;
        self.cursor.store(0, Ordering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.proxies.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next vantage point; `Direct` when no proxy is usable.
    pub fn next(&self) -> Vantage {
        let proxies = self.proxies.read().unwrap_or_else(|e| e.into_inner());
        if proxies.is_empty() {
            return Vantage::Direct;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % proxies.len();
        Vantage::Proxy(proxies[index].clone())
    }
}
