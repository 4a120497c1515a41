use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub mod ankr;

pub use ankr::AnkrProvider;

/// Network queried when nothing else is configured.
pub const DEFAULT_BLOCKCHAIN: &str = "eth";

/// Developer DAO's $CODE token
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xb24cd494fae4c180a89975f1328eab2a7d5d8f11";

/// One address's position in a token, exactly as the provider reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderRecord {
    pub holder_address: String,
    /// Decimal-adjusted balance, pre-formatted upstream
    pub balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_raw_integer: Option<String>,
}

impl HolderRecord {
    pub fn new(holder_address: impl Into<String>, balance: impl Into<String>) -> Self {
        Self {
            holder_address: holder_address.into(),
            balance: balance.into(),
            balance_raw_integer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenHolders {
    pub holders: Vec<HolderRecord>,
    /// Provider-reported total; may exceed `holders.len()` when the upstream pages
    pub holders_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldersRequest {
    pub contract_address: String,
    pub blockchain: String,
}

/// External service that aggregates on-chain balances for a token contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HolderProvider: Send + Sync {
    async fn token_holders(&self, request: HoldersRequest) -> Result<TokenHolders, FetchError>;
}

/// Looks up the holders of `contract_address` on the default network.
pub async fn get_token_holders<P>(
    provider: &P,
    contract_address: &str,
) -> Result<TokenHolders, FetchError>
where
    P: HolderProvider + ?Sized,
{
    get_token_holders_on(provider, DEFAULT_BLOCKCHAIN, contract_address).await
}

/// Same as [`get_token_holders`] against an explicit network.
///
/// The provider's answer is returned untouched: no filtering, no sorting, and
/// provider errors pass through as they are.
pub async fn get_token_holders_on<P>(
    provider: &P,
    blockchain: &str,
    contract_address: &str,
) -> Result<TokenHolders, FetchError>
where
    P: HolderProvider + ?Sized,
{
    if contract_address.is_empty() {
        return Err(FetchError::InvalidInput(
            "contract address is empty".to_string(),
        ));
    }

    let holders = provider
        .token_holders(HoldersRequest {
            contract_address: contract_address.to_string(),
            blockchain: blockchain.to_string(),
        })
        .await?;

    debug!("Holders of {} on {}: {:?}", contract_address, blockchain, holders.holders);

    Ok(holders)
}
