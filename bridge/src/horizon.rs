// Copyright (c) ThreeFold Tech
// SPDX-License-Identifier: Apache-2.0

// Minimal async client for the Horizon REST API. Only the handful of
// endpoints the bridge needs: account lookup, the paged payment history of
// the custody account, transaction lookup and envelope submission.

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HorizonError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("horizon {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

pub type HorizonResult<T> = Result<T, HorizonError>;

#[derive(Debug, Clone, Deserialize)]
pub struct HorizonAccount {
    pub id: String,
    pub sequence: String,
}

impl HorizonAccount {
    pub fn sequence_number(&self) -> HorizonResult<i64> {
        self.sequence
            .parse()
            .map_err(|e| HorizonError::Decode(format!("account sequence: {e}")))
    }
}

/// One record of `/accounts/{id}/payments`. Fields that only exist for
/// some record types are optional; the monitor filters on them.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub paging_token: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

impl PaymentRecord {
    /// Horizon renders amounts as a decimal string with seven fractional
    /// digits. Convert to stroops.
    pub fn amount_stroops(&self) -> HorizonResult<u64> {
        let amount = self
            .amount
            .as_deref()
            .ok_or_else(|| HorizonError::Decode("payment without amount".to_string()))?;
        parse_amount_stroops(amount)
    }
}

pub fn parse_amount_stroops(amount: &str) -> HorizonResult<u64> {
    let invalid = || HorizonError::Decode(format!("malformed amount: {amount}"));
    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };
    if fraction.len() > 7 || whole.is_empty() {
        return Err(invalid());
    }
    let whole: u64 = whole.parse().map_err(|_| invalid())?;
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<7}");
        padded.parse().map_err(|_| invalid())?
    };
    whole
        .checked_mul(10_000_000)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(invalid)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub paging_token: String,
    #[serde(default = "default_memo_type")]
    pub memo_type: String,
    #[serde(default)]
    pub memo: Option<String>,
}

fn default_memo_type() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize)]
struct EmbeddedRecords<T> {
    _embedded: Embedded<T>,
}

#[derive(Debug, Deserialize)]
struct Embedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorExtras {
    #[serde(default)]
    result_codes: ResultCodes,
}

#[derive(Debug, Deserialize, Default)]
struct ResultCodes {
    #[serde(default)]
    transaction: String,
}

#[derive(Debug, Deserialize)]
struct HorizonProblem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extras: Option<ErrorExtras>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the network, hash of the transaction.
    Accepted(String),
    /// The envelope's sequence number was already consumed: another
    /// validator submitted the identical envelope first.
    AlreadySubmitted,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: String,
}

#[derive(Debug, Clone)]
pub struct HorizonClient {
    http: reqwest::Client,
    base_url: String,
}

fn shared_http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .tcp_keepalive(Some(Duration::from_secs(30)))
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build reqwest client")
        })
        .clone()
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("connection closed")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
        || msg.contains("unexpected eof")
}

impl HorizonClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: shared_http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> HorizonResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts = 3;
        let mut last_err = None;
        for attempt in 0..max_attempts {
            let response = match self.http.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 < max_attempts && is_transient_transport_error(&err) {
                        tracing::warn!(
                            "[horizon] transport error on GET {} (attempt {}/{}), retrying",
                            path,
                            attempt + 1,
                            max_attempts
                        );
                        last_err = Some(HorizonError::Transport(err.to_string()));
                        tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1)))
                            .await;
                        continue;
                    }
                    return Err(HorizonError::Transport(err.to_string()));
                }
            };
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| HorizonError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(HorizonError::Api {
                    status: status.as_u16(),
                    detail: body,
                });
            }
            return serde_json::from_str(&body).map_err(|e| HorizonError::Decode(e.to_string()));
        }
        Err(last_err.unwrap_or_else(|| HorizonError::Transport("request failed".to_string())))
    }

    pub async fn get_account(&self, account_id: &str) -> HorizonResult<HorizonAccount> {
        match self
            .get_json::<HorizonAccount>(&format!("/accounts/{account_id}"))
            .await
        {
            Err(HorizonError::Api { status: 404, .. }) => {
                Err(HorizonError::AccountNotFound(account_id.to_string()))
            }
            other => other,
        }
    }

    /// Ascending page of payments into/out of an account, resuming after
    /// `cursor` (exclusive). An empty cursor starts from the beginning of
    /// the account's history.
    pub async fn payments(
        &self,
        account_id: &str,
        cursor: &str,
        limit: u32,
    ) -> HorizonResult<Vec<PaymentRecord>> {
        let path = format!(
            "/accounts/{account_id}/payments?order=asc&limit={limit}&cursor={cursor}&include_failed=false"
        );
        let page: EmbeddedRecords<PaymentRecord> = self.get_json(&path).await?;
        Ok(page._embedded.records)
    }

    pub async fn transaction(&self, hash: &str) -> HorizonResult<TransactionRecord> {
        self.get_json(&format!("/transactions/{hash}")).await
    }

    /// Submit a signed envelope. `tx_bad_seq` reports the deterministic
    /// envelope's sequence as consumed, which means an identical submission
    /// already went through.
    pub async fn submit_transaction(&self, envelope_base64: &str) -> HorizonResult<SubmitOutcome> {
        let url = format!("{}/transactions", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[("tx", envelope_base64)])
            .send()
            .await
            .map_err(|e| HorizonError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HorizonError::Transport(e.to_string()))?;

        if status.is_success() {
            let submitted: SubmitResponse =
                serde_json::from_str(&body).map_err(|e| HorizonError::Decode(e.to_string()))?;
            return Ok(SubmitOutcome::Accepted(submitted.hash));
        }

        if let Ok(problem) = serde_json::from_str::<HorizonProblem>(&body) {
            let code = problem
                .extras
                .unwrap_or_default()
                .result_codes
                .transaction;
            if code == "tx_bad_seq" {
                return Ok(SubmitOutcome::AlreadySubmitted);
            }
            return Err(HorizonError::Api {
                status: status.as_u16(),
                detail: format!("{} ({code})", problem.title),
            });
        }
        Err(HorizonError::Api {
            status: status.as_u16(),
            detail: body,
        })
    }
}
