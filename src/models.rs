// src/models.rs
use alloy::primitives::Address;
use serde::Serialize;

use crate::error::MalformedRecordError;

/// Super token identifier (lower-cased contract address)
pub type TokenId = String;

/// A single constant-rate stream between two accounts, as read from the subgraph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub id: String,
    pub owner: Address,
    pub recipient: Address,
    pub token_id: Option<TokenId>, // None = malformed, excluded from aggregation
    pub flow_rate: i128,           // smallest unit per second
}

/// Super token metadata returned alongside the flows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub id: TokenId,
    pub symbol: String,
}

impl TokenInfo {
    /// Super tokens are named after their underlying with a trailing `x` (DAIx -> DAI)
    pub fn underlying_symbol(&self) -> &str {
        self.symbol.strip_suffix('x').unwrap_or("UNKNOWN")
    }
}

/// Result of one flow fetch; replaces the previous set wholesale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSet {
    pub tokens: Vec<TokenInfo>,
    pub records: Vec<FlowRecord>,
    /// Records the decoder could not turn into a `FlowRecord`
    pub rejected: Vec<MalformedRecordError>,
}

/// Aggregated rates for one token from one account's perspective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetflowEntry {
    pub token_id: TokenId,
    pub net_rate: i128, // positive = accruing
    pub inflow_sum: i128,
    pub outflow_sum: i128,
    pub inflow_count: usize,
    pub outflow_count: usize,
}

impl NetflowEntry {
    pub fn zero(token_id: &str) -> Self {
        Self {
            token_id: token_id.to_string(),
            net_rate: 0,
            inflow_sum: 0,
            outflow_sum: 0,
            inflow_count: 0,
            outflow_count: 0,
        }
    }
}

/// Authoritative balance reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub token_id: TokenId,
    pub raw_balance: u128,
    pub observed_at: i64, // epoch millis
}

/// Interpolated balance handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedBalance {
    pub token_id: TokenId,
    pub value: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underlying_symbol_strips_trailing_x() {
        let dai = TokenInfo { id: "0xabc".into(), symbol: "fDAIx".into() };
        assert_eq!(dai.underlying_symbol(), "fDAI");

        let odd = TokenInfo { id: "0xdef".into(), symbol: "WETH".into() };
        assert_eq!(odd.underlying_symbol(), "UNKNOWN");
    }
}
