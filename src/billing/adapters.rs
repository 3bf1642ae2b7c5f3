use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::events::parse_gateway_timestamp;

/// Bearer tokens are refreshed well before the gateway's one hour expiry.
const TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("gateway api key is not configured")]
    MissingCredentials,
}

/// Normalised view of a gateway transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub id: i64,
    pub amount_cents: i64,
    pub success: bool,
    pub pending: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub currency: Option<String>,
    pub card_pan: Option<String>,
    pub card_brand: Option<String>,
    pub error_occurred: bool,
    pub is_refunded: bool,
    pub is_voided: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardOnFile {
    pub brand: Option<String>,
    pub masked_pan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionHistory {
    pub transactions: Vec<TransactionSummary>,
    pub card: Option<CardOnFile>,
}

impl TransactionHistory {
    pub fn from_summaries(transactions: Vec<TransactionSummary>) -> Self {
        let card = transactions
            .iter()
            .find(|tx| tx.card_pan.is_some() || tx.card_brand.is_some())
            .map(|tx| CardOnFile {
                brand: tx.card_brand.clone(),
                masked_pan: tx.card_pan.clone(),
            });
        Self { transactions, card }
    }
}

/// key: billing-adapter -> payment gateway integration
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Idempotent: PUTs the absolute amount, never a delta.
    async fn update_amount(&self, external_id: i64, amount_cents: i64) -> Result<(), GatewayError>;
    async fn list_transactions(&self, external_id: i64) -> Result<TransactionHistory, GatewayError>;
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// key: billing-adapter-http -> reqwest client with token exchange
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn bearer_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < TOKEN_LIFETIME {
                return Ok(token.value.clone());
            }
        }

        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GatewayError::MissingCredentials)?;
        let response = self
            .client
            .post(self.endpoint("auth/tokens"))
            .json(&json!({ "api_key": api_key }))
            .send()
            .await?;
        let response = ensure_success(response, "token exchange").await?;
        let body: TokenResponse = response.json().await?;
        debug!("refreshed gateway bearer token");

        *cached = Some(CachedToken {
            value: body.token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body.token)
    }

    async fn forget_token(&self) {
        self.token.lock().await.take();
    }

    async fn authorized(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, GatewayError> {
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(operation, "gateway rejected bearer token; dropping cached token");
            self.forget_token().await;
        }
        ensure_success(response, operation).await
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn update_amount(&self, external_id: i64, amount_cents: i64) -> Result<(), GatewayError> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .put(self.endpoint(&format!("subscriptions/{external_id}")))
            .bearer_auth(token)
            .json(&json!({ "amount_cents": amount_cents }))
            .send()
            .await?;
        self.authorized(response, "amount update").await?;
        Ok(())
    }

    async fn list_transactions(&self, external_id: i64) -> Result<TransactionHistory, GatewayError> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .get(self.endpoint(&format!("subscriptions/{external_id}/transactions")))
            .bearer_auth(token)
            .send()
            .await?;
        let response = self.authorized(response, "transaction listing").await?;
        let listing: RawTransactionList = response.json().await?;
        let summaries = listing
            .into_vec()
            .into_iter()
            .map(RawTransaction::normalize)
            .collect();
        Ok(TransactionHistory::from_summaries(summaries))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Rejected {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTransactionList {
    Bare(Vec<RawTransaction>),
    Paged { results: Vec<RawTransaction> },
}

impl RawTransactionList {
    fn into_vec(self) -> Vec<RawTransaction> {
        match self {
            RawTransactionList::Bare(items) => items,
            RawTransactionList::Paged { results } => results,
        }
    }
}

#[derive(Deserialize)]
struct RawTransaction {
    id: i64,
    #[serde(default)]
    amount_cents: i64,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pending: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    source_data: Option<RawSourceData>,
    #[serde(default, alias = "error_occured")]
    error_occurred: bool,
    #[serde(default)]
    is_refunded: bool,
    #[serde(default)]
    is_voided: bool,
}

#[derive(Deserialize)]
struct RawSourceData {
    #[serde(default)]
    pan: Option<String>,
    #[serde(default)]
    sub_type: Option<String>,
}

impl RawTransaction {
    fn normalize(self) -> TransactionSummary {
        let (card_pan, card_brand) = match self.source_data {
            Some(source) => (
                source.pan.filter(|pan| !pan.is_empty()),
                source.sub_type.filter(|brand| !brand.is_empty()),
            ),
            None => (None, None),
        };
        TransactionSummary {
            id: self.id,
            amount_cents: self.amount_cents,
            success: self.success,
            pending: self.pending,
            created_at: self.created_at.as_deref().and_then(parse_gateway_timestamp),
            paid_at: self.paid_at.as_deref().and_then(parse_gateway_timestamp),
            currency: self.currency,
            card_pan,
            card_brand,
            error_occurred: self.error_occurred,
            is_refunded: self.is_refunded,
            is_voided: self.is_voided,
        }
    }
}
