//! HTTP client for the NationStates API
//!
//! Every call passes two gates before hitting the network: the
//! per-category [`RateLimitLedger`] and a process-wide `governor` quota
//! for the API's global request ceiling.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, StatusCode};

use super::xml::{self, NationInfo};
use super::{ActionCategory, Gateway, RateLimitLedger, API_VERSION};
use crate::config::{ApiConfig, RateLimitConfig};
use crate::metrics;
use crate::utils::error::ApiError;
use crate::utils::{to_id, truncate_text};

// ============================================================================
// Request Shapes
// ============================================================================

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `q=newnations&v=9`
pub fn new_nations_query() -> String {
    format!("q=newnations&v={API_VERSION}")
}

/// `region={id}&q=nations&v=9`
pub fn region_nations_query(region: &str) -> String {
    format!("region={}&q=nations&v={API_VERSION}", encode(&to_id(region)))
}

/// `nation={id}&q=tgcanrecruit&from={region}&v=9`
pub fn can_recruit_query(nation: &str, from_region: &str) -> String {
    format!(
        "nation={}&q=tgcanrecruit&from={}&v={API_VERSION}",
        encode(&to_id(nation)),
        encode(&to_id(from_region))
    )
}

/// `a=sendTG&client={client}&tgid={tgid}&key={key}&to={id}`
pub fn send_telegram_query(client_key: &str, telegram_id: &str, secret_key: &str, to: &str) -> String {
    format!(
        "a=sendTG&client={}&tgid={}&key={}&to={}",
        encode(client_key),
        encode(telegram_id),
        encode(secret_key),
        encode(&to_id(to))
    )
}

/// `nation={id}&q=name+region+founded+lastactivity&v=9`
pub fn nation_info_query(nation: &str) -> String {
    format!(
        "nation={}&q=name+region+founded+lastactivity&v={API_VERSION}",
        encode(&to_id(nation))
    )
}

/// Map a non-success status to an error
///
/// Timeouts, throttling and server errors are transport problems. Any other
/// 4xx is the API answering about this request (unknown nation, bad key).
fn status_error(status: StatusCode, body: &str) -> ApiError {
    let code = status.as_u16();
    if status.is_server_error() || matches!(code, 408 | 429) {
        ApiError::Status(code)
    } else {
        ApiError::Application(format!("HTTP {code}: {}", truncate_text(body.trim(), 120)))
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Http(err)
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
struct TelegramCredentials {
    client_key: String,
    telegram_id: String,
    secret_key: String,
}

/// NationStates API client
pub struct NationStatesClient {
    /// HTTP client with timeout, gzip and the identifying User-Agent
    client: Client,

    /// Per-category interval ledger
    ledger: RateLimitLedger,

    /// Global request ceiling
    global: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// API endpoint, overridable for mock servers
    base_url: String,

    /// Home region id used for can-recruit probes
    home_region: String,

    /// Client key, also needed for non-recruitment telegrams
    client_key: Option<String>,

    /// Recruitment telegram credentials
    recruitment: Option<TelegramCredentials>,
}

impl NationStatesClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Http` if the HTTP client cannot be created
    pub fn new(api: &ApiConfig, limits: &RateLimitConfig) -> Result<Self, ApiError> {
        let user_agent = format!(
            "nsrecruit/{} (contact: {})",
            env!("CARGO_PKG_VERSION"),
            api.contact.trim()
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .gzip(true)
            .user_agent(user_agent)
            .build()?;

        let recruitment = match (&api.client_key, &api.telegram_id, &api.secret_key) {
            (Some(client_key), Some(telegram_id), Some(secret_key)) => Some(TelegramCredentials {
                client_key: client_key.clone(),
                telegram_id: telegram_id.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            client,
            ledger: RateLimitLedger::new(limits),
            global: RateLimiter::direct(global_quota(limits)),
            base_url: api.base_url.clone(),
            home_region: to_id(&api.region_name),
            client_key: api.client_key.clone(),
            recruitment,
        })
    }

    /// Point the client at another endpoint (mock servers in tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the interval ledger
    pub fn with_ledger(mut self, ledger: RateLimitLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &RateLimitLedger {
        &self.ledger
    }

    pub fn home_region(&self) -> &str {
        &self.home_region
    }

    /// Issue one query once both rate gates allow it
    pub async fn execute(
        &self,
        query: &str,
        category: ActionCategory,
        automated: bool,
    ) -> Result<String, ApiError> {
        self.ledger.await_ready(category, automated).await;
        self.global.until_ready().await;

        let url = format!("{}?{}", self.base_url, query);
        let started = Instant::now();
        let result = self.fetch(&url).await;
        self.ledger.mark_executed(category);

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_api_request(category.as_str(), outcome, started.elapsed().as_secs_f64());
        tracing::debug!(category = %category, outcome, "API request completed");

        result
    }

    async fn fetch(&self, url: &str) -> Result<String, ApiError> {
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response.text().await.map_err(transport_error)
    }

    /// Send a non-recruitment telegram with an explicit template
    pub async fn send_telegram(
        &self,
        nation: &str,
        telegram_id: &str,
        secret_key: &str,
    ) -> Result<(), ApiError> {
        let client_key = self
            .client_key
            .as_deref()
            .ok_or_else(|| ApiError::InvalidRequest("api.client_key is not configured".into()))?;
        let query = send_telegram_query(client_key, telegram_id, secret_key, nation);
        let body = self.execute(&query, ActionCategory::Telegram, true).await?;
        xml::check_send_queued(&body)
    }

    /// Public details of one nation
    pub async fn nation_info(&self, nation: &str) -> Result<NationInfo, ApiError> {
        let body = self
            .execute(&nation_info_query(nation), ActionCategory::Generic, false)
            .await?;
        xml::parse_nation_info(&body)
    }
}

/// Quota spreading `global_max_requests` over the window, with the full
/// window available as burst
fn global_quota(limits: &RateLimitConfig) -> Quota {
    let max = NonZeroU32::new(limits.global_max_requests).unwrap_or(NonZeroU32::MIN);
    let period = limits.global_window() / max.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(max))
        .allow_burst(max)
}

#[async_trait]
impl Gateway for NationStatesClient {
    async fn new_nations(&self, automated: bool) -> Result<Vec<String>, ApiError> {
        let body = self
            .execute(&new_nations_query(), ActionCategory::NewNations, automated)
            .await?;
        xml::parse_new_nations(&body)
    }

    async fn region_nations(
        &self,
        region: &str,
        automated: bool,
    ) -> Result<Vec<String>, ApiError> {
        let body = self
            .execute(
                &region_nations_query(region),
                ActionCategory::RegionNations,
                automated,
            )
            .await?;
        xml::parse_region_nations(&body)
    }

    async fn would_receive(&self, nation: &str) -> Result<bool, ApiError> {
        let query = can_recruit_query(nation, &self.home_region);
        let body = self.execute(&query, ActionCategory::Generic, true).await?;
        xml::parse_can_recruit(&body)
    }

    async fn send_recruitment_telegram(&self, nation: &str) -> Result<(), ApiError> {
        let creds = self.recruitment.as_ref().ok_or_else(|| {
            ApiError::InvalidRequest("recruitment telegram credentials are not configured".into())
        })?;
        let query = send_telegram_query(
            &creds.client_key,
            &creds.telegram_id,
            &creds.secret_key,
            nation,
        );
        let body = self
            .execute(&query, ActionCategory::RecruitmentTelegram, true)
            .await?;
        xml::check_send_queued(&body)
    }

    async fn wait_until_ready(&self, category: ActionCategory, automated: bool) {
        self.ledger.wait_until_ready(category, automated).await;
    }

    fn seed_last_execution(&self, category: ActionCategory, at: DateTime<Utc>) {
        self.ledger.seed(category, at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shapes() {
        assert_eq!(new_nations_query(), "q=newnations&v=9");
        assert_eq!(region_nations_query("The Pacific"), "region=the_pacific&q=nations&v=9");
        assert_eq!(
            can_recruit_query("North Dakota", "Home Region"),
            "nation=north_dakota&q=tgcanrecruit&from=home_region&v=9"
        );
        assert_eq!(
            nation_info_query("testlandia"),
            "nation=testlandia&q=name+region+founded+lastactivity&v=9"
        );
    }

    #[test]
    fn test_send_query_encodes_credentials() {
        assert_eq!(
            send_telegram_query("abc", "1234", "k+y/=", "Some Nation"),
            "a=sendTG&client=abc&tgid=1234&key=k%2By%2F%3D&to=some_nation"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transport());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transport());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "").is_transport());

        let not_found = status_error(StatusCode::NOT_FOUND, "Unknown nation");
        assert!(!not_found.is_transport());
        assert!(not_found.to_string().contains("404"));
    }

    #[test]
    fn test_client_creation() {
        let api = ApiConfig {
            contact: "ops@example.org".into(),
            region_name: "Home Region".into(),
            ..ApiConfig::default()
        };
        let client = NationStatesClient::new(&api, &RateLimitConfig::default()).unwrap();
        assert_eq!(client.home_region(), "home_region");
        assert!(client.recruitment.is_none());

        let client = client.with_base_url("http://localhost:9999/cgi-bin/api.cgi");
        assert_eq!(client.base_url, "http://localhost:9999/cgi-bin/api.cgi");
    }

    #[test]
    fn test_global_quota_survives_zero() {
        let limits = RateLimitConfig {
            global_max_requests: 0,
            ..RateLimitConfig::default()
        };
        let _ = global_quota(&limits);
    }
}
