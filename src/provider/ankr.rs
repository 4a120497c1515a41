use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{HolderProvider, HolderRecord, HoldersRequest, TokenHolders};
use crate::config::Config;
use crate::error::FetchError;

/// Public multichain endpoint of the Ankr Advanced API
pub const ANKR_MULTICHAIN_URL: &str = "https://rpc.ankr.com/multichain";

const GET_TOKEN_HOLDERS: &str = "ankr_getTokenHolders";

/// JSON-RPC "invalid params"
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenHoldersReply {
    #[serde(default)]
    holders: Vec<HolderRecord>,
    holders_count: u64,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Holder lookups through Ankr's `ankr_getTokenHolders` JSON-RPC method.
pub struct AnkrProvider {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl AnkrProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        // Request timeouts are enforced by the tracker, not the client
        let client = reqwest::Client::builder().build()?;

        let endpoint = endpoint_url(&config.api_url, config.api_key.as_deref());
        info!("Using holder provider at {}", config.api_url);

        Ok(Self::new(client, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl HolderProvider for AnkrProvider {
    async fn token_holders(&self, request: HoldersRequest) -> Result<TokenHolders, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": GET_TOKEN_HOLDERS,
            "params": {
                "blockchain": request.blockchain,
                "contractAddress": request.contract_address,
            }
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let payload = response.bytes().await?;

        match decode_reply(&payload) {
            // A non-2xx answer that isn't JSON-RPC is an HTTP-level failure
            Err(FetchError::MalformedResponse(_)) if !status.is_success() => {
                Err(FetchError::Transport(format!("HTTP {}", status)))
            }
            other => other,
        }
    }
}

/// Appends the API key as the last path segment, the way Ankr expects it.
pub fn endpoint_url(base: &str, api_key: Option<&str>) -> String {
    match api_key.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => base.to_string(),
    }
}

/// Decodes a raw `ankr_getTokenHolders` response body.
pub fn decode_reply(payload: &[u8]) -> Result<TokenHolders, FetchError> {
    let response: RpcResponse<TokenHoldersReply> = serde_json::from_slice(payload)?;

    if let Some(err) = response.error {
        return Err(if err.code == INVALID_PARAMS {
            FetchError::InvalidInput(err.message)
        } else {
            FetchError::Provider {
                code: err.code,
                message: err.message,
            }
        });
    }

    let reply = response
        .result
        .ok_or_else(|| FetchError::MalformedResponse("response has neither result nor error".to_string()))?;

    if reply.next_page_token.as_deref().is_some_and(|token| !token.is_empty()) {
        debug!(
            "Provider has more pages ({} of {} holders returned), not following",
            reply.holders.len(),
            reply.holders_count
        );
    }

    Ok(TokenHolders {
        holders: reply.holders,
        holders_count: reply.holders_count,
    })
}
