// Tiered fetching. Requests start cheap (direct) and escalate through the
// proxy gateway tiers on block signals. A host that needed tier N is
// remembered so later requests skip the tiers that already failed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use driftnet_common::{FetchPolicy, IngestError, Result};

/// Per-host tier memory cap. Last-writer-wins; the tier is advisory.
const HOST_CACHE_CAPACITY: usize = 1024;

/// HTTP statuses that signal blocking rather than absence.
const PROMOTE_STATUSES: [u16; 3] = [403, 429, 503];

/// Escalation ladder, ordered by cost and capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProxyTier {
    Direct,
    Standard,
    Premium,
    Stealth,
}

impl ProxyTier {
    pub fn next(self) -> Option<ProxyTier> {
        match self {
            ProxyTier::Direct => Some(ProxyTier::Standard),
            ProxyTier::Standard => Some(ProxyTier::Premium),
            ProxyTier::Premium => Some(ProxyTier::Stealth),
            ProxyTier::Stealth => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProxyTier::Direct => "direct",
            ProxyTier::Standard => "standard",
            ProxyTier::Premium => "premium",
            ProxyTier::Stealth => "stealth",
        }
    }
}

/// Whether an HTTP status should push the fetcher to the next tier.
pub fn promotes(status: u16) -> bool {
    PROMOTE_STATUSES.contains(&status)
}

/// Predicate rejecting responses that are 200 but semantically empty
/// (login walls, script placeholders). Rejection promotes the tier.
pub type ContentChecker = dyn Fn(&[u8]) -> bool + Send + Sync;

pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub policy: &'a FetchPolicy,
    pub timeout: Duration,
    pub content_checker: Option<&'a ContentChecker>,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    pub final_url: String,
    pub tier: ProxyTier,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse>;
}

/// Query-parameter proxy gateway credentials.
#[derive(Debug, Clone)]
pub struct ProxyGateway {
    pub base_url: String,
    pub api_key: String,
}

pub struct TieredFetcher {
    client: reqwest::Client,
    gateway: Option<ProxyGateway>,
    default_country: String,
    max_body_bytes: usize,
    host_tiers: Mutex<HashMap<String, ProxyTier>>,
}

enum AttemptOutcome {
    Success(FetchResponse),
    /// Block signal or empty/rejected content: try the next tier.
    Promote(String),
    /// Hard failure that escalation cannot fix.
    Fail(IngestError),
}

impl TieredFetcher {
    pub fn new(
        gateway: Option<ProxyGateway>,
        default_country: &str,
        max_body_bytes: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            gateway,
            default_country: default_country.to_string(),
            max_body_bytes,
            host_tiers: Mutex::new(HashMap::new()),
        }
    }

    /// Where to start for a host: the remembered tier if we have one, but
    /// never below what the policy asks for.
    fn start_tier(&self, host: &str, policy: &FetchPolicy) -> ProxyTier {
        let policy_start = if policy.premium {
            ProxyTier::Premium
        } else {
            ProxyTier::Direct
        };
        let remembered = self
            .host_tiers
            .lock()
            .expect("lock poisoned")
            .get(host)
            .copied()
            .unwrap_or(ProxyTier::Direct);
        remembered.max(policy_start)
    }

    fn remember(&self, host: &str, tier: ProxyTier) {
        let mut tiers = self.host_tiers.lock().expect("lock poisoned");
        if tiers.len() >= HOST_CACHE_CAPACITY && !tiers.contains_key(host) {
            if let Some(evict) = tiers.keys().next().cloned() {
                tiers.remove(&evict);
            }
        }
        tiers.insert(host.to_string(), tier);
    }

    /// Remembered tier for a host, if any.
    pub fn cached_tier(&self, host: &str) -> Option<ProxyTier> {
        self.host_tiers
            .lock()
            .expect("lock poisoned")
            .get(host)
            .copied()
    }

    fn highest_tier(&self, policy: &FetchPolicy) -> ProxyTier {
        if self.gateway.is_none() {
            return ProxyTier::Direct;
        }
        if policy.stealth {
            ProxyTier::Stealth
        } else {
            ProxyTier::Premium
        }
    }

    fn build_request(
        &self,
        url: &str,
        tier: ProxyTier,
        policy: &FetchPolicy,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder> {
        if tier == ProxyTier::Direct {
            if let Some(own_proxy) = &policy.own_proxy_url {
                // The caller-operated proxy needs its own client.
                let proxy = reqwest::Proxy::all(own_proxy)
                    .map_err(|e| IngestError::Validation(format!("bad proxy URL: {e}")))?;
                let client = reqwest::Client::builder()
                    .proxy(proxy)
                    .build()
                    .map_err(|e| IngestError::Transient(format!("proxy client: {e}")))?;
                return Ok(client.get(url).timeout(timeout));
            }
            return Ok(self.client.get(url).timeout(timeout));
        }

        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| IngestError::Transient("no proxy gateway configured".into()))?;
        let country = policy
            .country_code
            .clone()
            .unwrap_or_else(|| self.default_country.clone());
        let mut params: Vec<(&str, String)> = vec![
            ("api_key", gateway.api_key.clone()),
            ("url", url.to_string()),
            ("render", policy.render_js.to_string()),
            ("country_code", country),
            ("premium_proxy", (tier >= ProxyTier::Premium).to_string()),
            ("stealth_proxy", (tier == ProxyTier::Stealth).to_string()),
        ];
        if policy.block_resources {
            params.push(("block_resources", "true".to_string()));
        }
        if policy.block_ads {
            params.push(("block_ads", "true".to_string()));
        }
        if policy.forward_headers {
            params.push(("forward_headers", "true".to_string()));
        }
        if let Some(profile) = &policy.scraping_profile {
            params.push(("profile", profile.clone()));
        }
        Ok(self
            .client
            .get(&gateway.base_url)
            .query(&params)
            .timeout(timeout))
    }

    async fn attempt(&self, request: &FetchRequest<'_>, tier: ProxyTier) -> AttemptOutcome {
        let builder = match self.build_request(request.url, tier, request.policy, request.timeout)
        {
            Ok(builder) => builder,
            Err(e) => return AttemptOutcome::Fail(e),
        };

        let send = builder.send();
        let response = tokio::select! {
            _ = request.cancel.cancelled() => return AttemptOutcome::Fail(IngestError::Cancelled),
            result = send => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // Timeouts, refused connections, and handshake failures
                // are exactly what the higher tiers exist for.
                return AttemptOutcome::Promote(format!("transport error: {e}"));
            }
        };

        let status = response.status().as_u16();
        if promotes(status) {
            return AttemptOutcome::Promote(format!("HTTP {status}"));
        }
        if !(200..300).contains(&status) {
            return AttemptOutcome::Fail(if status >= 500 {
                IngestError::Transient(format!("HTTP {status} from {}", request.url))
            } else {
                IngestError::Validation(format!("HTTP {status} from {}", request.url))
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let final_url = response.url().to_string();

        let body = tokio::select! {
            _ = request.cancel.cancelled() => return AttemptOutcome::Fail(IngestError::Cancelled),
            result = response.bytes() => match result {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => return AttemptOutcome::Promote(format!("body read: {e}")),
            },
        };

        if body.len() > self.max_body_bytes {
            return AttemptOutcome::Fail(IngestError::Validation(format!(
                "response body of {} bytes exceeds the {} byte limit",
                body.len(),
                self.max_body_bytes
            )));
        }
        if body.is_empty() {
            return AttemptOutcome::Promote("empty response body".to_string());
        }
        if let Some(checker) = request.content_checker {
            if !checker(&body) {
                return AttemptOutcome::Promote("content checker rejected body".to_string());
            }
        }

        AttemptOutcome::Success(FetchResponse {
            status_code: status,
            body,
            content_type,
            final_url,
            tier,
        })
    }
}

#[async_trait]
impl Fetcher for TieredFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse> {
        let host = url::Url::parse(request.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| IngestError::Validation(format!("invalid URL: {}", request.url)))?;

        let mut tier = self.start_tier(&host, request.policy);
        let highest = self.highest_tier(request.policy);
        let mut last_reason = String::new();

        loop {
            tracing::debug!(url = request.url, tier = tier.as_str(), "Fetch attempt");
            match self.attempt(&request, tier).await {
                AttemptOutcome::Success(response) => {
                    self.remember(&host, tier);
                    tracing::info!(
                        url = request.url,
                        tier = tier.as_str(),
                        status = response.status_code,
                        bytes = response.body.len(),
                        "Fetched"
                    );
                    return Ok(response);
                }
                AttemptOutcome::Fail(e) => return Err(e),
                AttemptOutcome::Promote(reason) => {
                    tracing::debug!(
                        url = request.url,
                        tier = tier.as_str(),
                        reason,
                        "Promoting to next tier"
                    );
                    last_reason = reason;
                    match tier.next() {
                        Some(next) if next <= highest => tier = next,
                        _ => break,
                    }
                }
            }
        }

        if last_reason == "empty response body" {
            return Err(IngestError::Validation(format!(
                "empty response body from {}",
                request.url
            )));
        }
        Err(IngestError::Transient(format!(
            "all fetch tiers exhausted for {}: {last_reason}",
            request.url
        )))
    }
}
