use alloy::primitives::Address;
use async_trait::async_trait;

use crate::error::FetchError;
use crate::models::{BalanceSnapshot, FlowSet, TokenId};

/// Source of truth for balances and flows. Every call must go to the backend;
/// implementations must not serve cached answers.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Flows where `account` is owner or recipient, for the given tokens
    async fn fetch_flows(&self, account: &Address, tokens: &[TokenId]) -> Result<FlowSet, FetchError>;

    /// Current balance of `account` in `token`, stamped with its observation time
    async fn fetch_balance(&self, account: &Address, token: &TokenId) -> Result<BalanceSnapshot, FetchError>;
}
