//! Network provider boundary and its HTTP implementation.
//!
//! The core needs four things from the network: the sender's nonce, a
//! broadcast call, per-hash status, and read-only view queries. [`Gateway`]
//! captures exactly that; [`HttpGateway`] talks to a MultiversX-style REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transaction::{SignedTransaction, TxHash};

/// Execution status of one transaction as reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTxStatus {
    /// Known but not yet executed (or not yet indexed).
    Pending,
    /// Executed successfully.
    Success,
    /// Executed with an error, or rejected as invalid.
    Failed,
}

impl ChainTxStatus {
    /// Map the API's status label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "success" | "executed" => Self::Success,
            "fail" | "failed" | "invalid" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Read-only contract view request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmQuery {
    pub sc_address: String,
    pub func_name: String,
    /// Hex-encoded top-encoded arguments.
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

/// Raw view response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmQueryResult {
    /// Base64 entries, one per returned value.
    pub return_data: Vec<String>,
    pub return_code: String,
    pub return_message: String,
}

impl VmQueryResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.return_code.is_empty() || self.return_code == "ok"
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Next nonce for `address`.
    async fn account_nonce(&self, address: &str) -> Result<u64>;

    /// Broadcast signed transactions, returning their hashes in order.
    async fn send_transactions(&self, transactions: &[SignedTransaction]) -> Result<Vec<TxHash>>;

    /// Current status of a broadcast transaction.
    async fn transaction_status(&self, hash: &TxHash) -> Result<ChainTxStatus>;

    /// Run a read-only contract view.
    async fn query(&self, query: &VmQuery) -> Result<VmQueryResult>;
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    nonce: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    tx_hash: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// Gateway over HTTP+JSON.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::NetworkUnavailable(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> Error {
    Error::NetworkUnavailable(format!("{context}: {err}"))
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn account_nonce(&self, address: &str) -> Result<u64> {
        let response = self
            .client
            .get(self.endpoint(&format!("accounts/{address}")))
            .send()
            .await
            .map_err(|err| unavailable("account lookup", err))?;
        let response = response
            .error_for_status()
            .map_err(|err| unavailable("account lookup", err))?;
        let account: AccountResponse = response
            .json()
            .await
            .map_err(|err| unavailable("account response", err))?;
        Ok(account.nonce)
    }

    async fn send_transactions(&self, transactions: &[SignedTransaction]) -> Result<Vec<TxHash>> {
        let mut hashes = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let response = self
                .client
                .post(self.endpoint("transactions"))
                .json(tx)
                .send()
                .await
                .map_err(|err| Error::BroadcastFailed(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::BroadcastFailed(format!("{status}: {body}")));
            }
            let sent: SendResponse = response
                .json()
                .await
                .map_err(|err| Error::BroadcastFailed(format!("unreadable response: {err}")))?;
            debug!(tx_hash = %sent.tx_hash, nonce = tx.transaction.nonce, "transaction broadcast");
            hashes.push(TxHash(sent.tx_hash));
        }
        Ok(hashes)
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<ChainTxStatus> {
        let response = self
            .client
            .get(self.endpoint(&format!("transactions/{hash}")))
            .query(&[("fields", "status")])
            .send()
            .await
            .map_err(|err| unavailable("status lookup", err))?;
        if response.status() == StatusCode::NOT_FOUND {
            // Freshly broadcast transactions are not indexed yet.
            return Ok(ChainTxStatus::Pending);
        }
        let response = response
            .error_for_status()
            .map_err(|err| unavailable("status lookup", err))?;
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|err| unavailable("status response", err))?;
        Ok(ChainTxStatus::from_label(&body.status))
    }

    async fn query(&self, query: &VmQuery) -> Result<VmQueryResult> {
        let response = self
            .client
            .post(self.endpoint("query"))
            .json(query)
            .send()
            .await
            .map_err(|err| unavailable("view query", err))?;
        let status = response.status();
        let result: VmQueryResult = response
            .json()
            .await
            .map_err(|err| unavailable("view response", err))?;
        if !status.is_success() && result.is_ok() {
            warn!(function = %query.func_name, %status, "view query failed without return code");
            return Err(Error::NetworkUnavailable(format!(
                "view {} answered {status}",
                query.func_name
            )));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_map_to_chain_status() {
        assert_eq!(ChainTxStatus::from_label("success"), ChainTxStatus::Success);
        assert_eq!(ChainTxStatus::from_label("fail"), ChainTxStatus::Failed);
        assert_eq!(ChainTxStatus::from_label("invalid"), ChainTxStatus::Failed);
        assert_eq!(ChainTxStatus::from_label("pending"), ChainTxStatus::Pending);
        assert_eq!(ChainTxStatus::from_label("received"), ChainTxStatus::Pending);
    }

    #[test]
    fn query_serializes_camel_case() {
        let query = VmQuery {
            sc_address: "erd1contract".into(),
            func_name: "getCandidateFee".into(),
            args: vec![],
            caller: None,
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["scAddress"], "erd1contract");
        assert_eq!(json["funcName"], "getCandidateFee");
        assert!(json.get("caller").is_none());
    }

    #[test]
    fn query_result_tolerates_missing_fields() {
        let result: VmQueryResult = serde_json::from_str(r#"{"returnData":["AQ=="]}"#).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.return_data, vec!["AQ==".to_string()]);

        let failed: VmQueryResult =
            serde_json::from_str(r#"{"returnCode":"user error","returnMessage":"nope"}"#).unwrap();
        assert!(!failed.is_ok());
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let gateway =
            HttpGateway::new("https://devnet-api.multiversx.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            gateway.endpoint("/transactions"),
            "https://devnet-api.multiversx.com/transactions"
        );
    }
}
