//! Shopify Admin GraphQL adapters.
//!
//! [`AdminClient`] posts GraphQL documents to the Admin API with retry on
//! transient failures. [`ShopifyMetafieldStore`] and
//! [`ShopifyDiscountService`] build on it to implement the ledger's store
//! and discount seams.

mod discount;
mod store;
#[cfg(test)]
mod test_server;

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

pub use discount::ShopifyDiscountService;
pub use store::ShopifyMetafieldStore;

pub const DEFAULT_API_VERSION: &str = "2024-10";
pub const DEFAULT_NAMESPACE: &str = "loyalty";
/// Longest wait between retries of one Admin API call.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors from the Admin API transport.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Admin API not configured: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Admin API unavailable: {0}")]
    Unavailable(String),

    #[error("Admin API rejected request: {0}")]
    Rejected(String),

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl AdminError {
    /// Timeouts, connection failures, throttling and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            AdminError::Http(e) => e.is_timeout() || e.is_connect(),
            AdminError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Admin API connection settings.
#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    /// Shop domain, e.g. `example.myshopify.com`. A value with an explicit
    /// `http://` or `https://` scheme is used as the base URL unchanged.
    pub shop_domain: String,

    /// Admin API access token.
    pub access_token: String,

    pub api_version: String,

    /// Metafield namespace holding the ledger fields.
    pub namespace: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Retries on transient failures.
    pub max_retries: usize,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self {
            shop_domain: String::new(),
            access_token: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl AdminClientConfig {
    pub fn with_shop_domain(mut self, shop_domain: impl Into<String>) -> Self {
        self.shop_domain = shop_domain.into();
        self
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = access_token.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// GraphQL endpoint for the configured shop and API version.
    pub fn endpoint(&self) -> String {
        let domain = self.shop_domain.trim_end_matches('/');
        let base = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{}", domain)
        };
        format!("{}/admin/api/{}/graphql.json", base, self.api_version)
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Mutation-level validation error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

/// Join `userErrors` into one message, or `None` when there are none.
pub(crate) fn user_errors(payload: &Value) -> Option<String> {
    let errors: Vec<UserError> = payload
        .get("userErrors")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    if errors.is_empty() {
        return None;
    }
    Some(
        errors
            .iter()
            .map(|e| match &e.field {
                Some(field) if !field.is_empty() => format!("{}: {}", field.join("."), e.message),
                _ => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Shopify Admin GraphQL client.
pub struct AdminClient {
    client: Client,
    config: AdminClientConfig,
}

impl AdminClient {
    pub fn new(config: AdminClientConfig) -> Result<Self, AdminError> {
        if config.shop_domain.is_empty() {
            return Err(AdminError::Config("shop domain not configured".to_string()));
        }
        if config.access_token.is_empty() {
            return Err(AdminError::Config("access token not configured".to_string()));
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AdminClientConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(MAX_RETRY_DELAY)
            .with_max_times(self.config.max_retries)
            .with_jitter()
    }

    fn is_retryable_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// Run a GraphQL document and return its `data` object.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, AdminError> {
        let body = json!({ "query": query, "variables": variables });

        (|| async { self.post(&body).await })
            .retry(self.backoff())
            .when(AdminError::is_transient)
            .notify(|e, delay| {
                warn!(error = %e, delay = ?delay, "Retrying Admin API request");
            })
            .await
    }

    async fn post(&self, body: &Value) -> Result<Value, AdminError> {
        let response = self
            .client
            .post(self.config.endpoint())
            .header("X-Shopify-Access-Token", &self.config.access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            if Self::is_retryable_status(status) {
                warn!(status = %status, body = %excerpt, "Admin API returned retryable status");
                return Err(AdminError::Unavailable(format!("HTTP {} - {}", status, excerpt)));
            }
            error!(status = %status, body = %excerpt, "Admin API request failed");
            return Err(AdminError::Rejected(format!("HTTP {} - {}", status, excerpt)));
        }

        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| AdminError::Malformed(e.to_string()))?;

        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            let joined = messages.join("; ");
            // Shopify reports cost-based throttling as a GraphQL error.
            if joined.contains("Throttled") {
                return Err(AdminError::Unavailable(joined));
            }
            return Err(AdminError::GraphQl(joined));
        }

        debug!(endpoint = %self.config.endpoint(), "Admin API request succeeded");
        parsed
            .data
            .ok_or_else(|| AdminError::Malformed("response has no data".to_string()))
    }
}
