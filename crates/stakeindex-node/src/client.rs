//! HTTP node client backed by `reqwest`.
//!
//! Every request carries a bounded timeout and transient failures retry
//! with exponential backoff; unbounded retry is the observer's job, not the
//! client's.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use stakeindex_core::error::IndexerError;
use stakeindex_core::node::{NodeContract, NodeDelegate, NodeHeader, NodeRight, NodeSource};
use stakeindex_core::types::{CycleIndex, Level, Mutez};

use crate::retry::{RetryConfig, RetryPolicy};

/// Configuration for [`HttpNodeClient`].
#[derive(Debug, Clone)]
pub struct NodeClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self { retry: RetryConfig::default(), request_timeout: Duration::from_secs(30) }
    }
}

/// Client for a chain node's REST API.
pub struct HttpNodeClient {
    base_url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpNodeClient {
    /// Create a new client for the given node base URL.
    pub fn new(base_url: impl Into<String>, config: NodeClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build reqwest client");
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http, retry: RetryPolicy::new(config.retry) }
    }

    /// Create with default configuration.
    pub fn default_for(base_url: impl Into<String>) -> Self {
        Self::new(base_url, NodeClientConfig::default())
    }

    async fn get_once(&self, path: &str) -> Result<Value, IndexerError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::Node(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Node(format!("GET {path}: HTTP {status}: {body}")));
        }
        resp.json::<Value>().await.map_err(|e| IndexerError::Node(e.to_string()))
    }

    /// GET with retry for transient failures.
    async fn get_json(&self, path: &str) -> Result<Value, IndexerError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_once(path).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.next_delay(attempt).unwrap_or_default();
                    tracing::debug!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying node request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─── Response parsing ────────────────────────────────────────────────────────

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, IndexerError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| IndexerError::Wire(format!("missing field `{field}`")))
}

fn required_i64(value: &Value, field: &str) -> Result<i64, IndexerError> {
    value
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| IndexerError::Wire(format!("missing field `{field}`")))
}

/// Amounts arrive either as JSON numbers or decimal strings.
fn required_mutez(value: &Value, field: &str) -> Result<Mutez, IndexerError> {
    match value.get(field) {
        Some(Value::Number(n)) => {
            n.as_i64().ok_or_else(|| IndexerError::Wire(format!("field `{field}` overflows")))
        }
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| IndexerError::Wire(format!("field `{field}` is not an amount"))),
        _ => Err(IndexerError::Wire(format!("missing field `{field}`"))),
    }
}

/// Timestamps arrive as RFC 3339 strings or unix seconds.
fn required_timestamp(value: &Value, field: &str) -> Result<i64, IndexerError> {
    match value.get(field) {
        Some(Value::Number(n)) => {
            n.as_i64().ok_or_else(|| IndexerError::Wire(format!("field `{field}` overflows")))
        }
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp())
            .map_err(|_| IndexerError::Wire(format!("field `{field}` is not a timestamp"))),
        _ => Err(IndexerError::Wire(format!("missing field `{field}`"))),
    }
}

fn header_from_json(value: &Value) -> Result<NodeHeader, IndexerError> {
    Ok(NodeHeader {
        level: required_i64(value, "level")?,
        hash: required_str(value, "hash")?.to_string(),
        predecessor: required_str(value, "predecessor")?.to_string(),
        timestamp: required_timestamp(value, "timestamp")?,
        protocol: required_str(value, "protocol")?.to_string(),
    })
}

#[async_trait]
impl NodeSource for HttpNodeClient {
    async fn get_head(&self) -> Result<NodeHeader, IndexerError> {
        let value = self.get_json("/chains/main/blocks/head/header").await?;
        header_from_json(&value)
    }

    async fn get_header(&self, level: Level) -> Result<NodeHeader, IndexerError> {
        let value = self.get_json(&format!("/chains/main/blocks/{level}/header")).await?;
        header_from_json(&value)
    }

    async fn get_block(&self, level: Level) -> Result<Value, IndexerError> {
        self.get_json(&format!("/chains/main/blocks/{level}")).await
    }

    async fn get_baking_rights(&self, cycle: CycleIndex) -> Result<Vec<NodeRight>, IndexerError> {
        let value = self
            .get_json(&format!(
                "/chains/main/blocks/head/helpers/baking_rights?cycle={cycle}"
            ))
            .await?;
        rights_from_json(&value, "round")
    }

    async fn get_attesting_rights(
        &self,
        cycle: CycleIndex,
    ) -> Result<Vec<NodeRight>, IndexerError> {
        let value = self
            .get_json(&format!(
                "/chains/main/blocks/head/helpers/attestation_rights?cycle={cycle}"
            ))
            .await?;
        rights_from_json(&value, "slot")
    }

    async fn get_delegate(
        &self,
        level: Level,
        address: &str,
    ) -> Result<NodeDelegate, IndexerError> {
        let value = self
            .get_json(&format!("/chains/main/blocks/{level}/context/delegates/{address}"))
            .await?;
        Ok(NodeDelegate {
            address: address.to_string(),
            balance: required_mutez(&value, "balance")?,
            staking_balance: required_mutez(&value, "staking_balance")?,
            frozen_deposits: required_mutez(&value, "frozen_deposits")?,
        })
    }

    async fn get_contract(
        &self,
        level: Level,
        address: &str,
    ) -> Result<NodeContract, IndexerError> {
        let value = self
            .get_json(&format!("/chains/main/blocks/{level}/context/contracts/{address}"))
            .await?;
        Ok(NodeContract {
            address: address.to_string(),
            balance: required_mutez(&value, "balance")?,
            counter: required_mutez(&value, "counter")?,
        })
    }
}

/// Rights lists share a shape except for the slot/round field name.
fn rights_from_json(value: &Value, round_field: &str) -> Result<Vec<NodeRight>, IndexerError> {
    let list = value
        .as_array()
        .ok_or_else(|| IndexerError::Wire("rights: expected an array".into()))?;
    list.iter()
        .map(|entry| {
            Ok(NodeRight {
                level: required_i64(entry, "level")?,
                round: required_i64(entry, round_field)? as i32,
                delegate: required_str(entry, "delegate")?.to_string(),
            })
        })
        .collect()
}
