// src/parser.rs
use alloy::primitives::Address;
use serde::Deserialize;
use tracing::warn;

use crate::error::{FetchError, MalformedRecordError};
use crate::models::{FlowRecord, FlowSet, TokenInfo};

/// `data` payload of the token flows query
#[derive(Debug, Deserialize)]
pub struct TokenFlowsData {
    pub tokens: Vec<RawToken>,
}

#[derive(Debug, Deserialize)]
pub struct RawToken {
    pub id: Option<String>,
    pub symbol: Option<String>,
    #[serde(default)]
    pub outflows: Vec<RawFlow>,
    #[serde(default)]
    pub inflows: Vec<RawFlow>,
}

#[derive(Debug, Deserialize)]
pub struct RawFlow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "flowRate")]
    pub flow_rate: Option<String>, // int96 as decimal string
    #[serde(default)]
    pub owner: Option<RawAccount>,
    #[serde(default)]
    pub recipient: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
pub struct RawAccount {
    #[serde(default)]
    pub id: Option<String>,
}

fn parse_address(account: Option<&RawAccount>) -> Option<Address> {
    account?.id.as_deref()?.trim().parse::<Address>().ok()
}

/// Decode one subgraph flow. Outflows omit the owner and inflows omit the
/// recipient; both are the queried account.
fn decode_flow(
    raw: &RawFlow,
    token_id: Option<&str>,
    account: &Address,
    outgoing: bool,
) -> Result<FlowRecord, MalformedRecordError> {
    let Some(id) = raw.id.as_deref().filter(|id| !id.is_empty()) else {
        return Err(MalformedRecordError::new("<unknown>", "id"));
    };

    let flow_rate = raw
        .flow_rate
        .as_deref()
        .and_then(|r| r.trim().parse::<i128>().ok())
        .ok_or_else(|| MalformedRecordError::new(id, "flowRate"))?;

    let (owner, recipient) = if outgoing {
        let recipient = parse_address(raw.recipient.as_ref())
            .ok_or_else(|| MalformedRecordError::new(id, "recipient"))?;
        (*account, recipient)
    } else {
        let owner = parse_address(raw.owner.as_ref())
            .ok_or_else(|| MalformedRecordError::new(id, "owner"))?;
        (owner, *account)
    };

    Ok(FlowRecord {
        id: id.to_string(),
        owner,
        recipient,
        token_id: token_id.map(|t| t.to_lowercase()),
        flow_rate,
    })
}

/// Flatten the per-token query result into a `FlowSet`. Flows that cannot be
/// decoded land in `rejected` instead of failing the whole payload.
pub fn decode_flows(data: &TokenFlowsData, account: &Address) -> FlowSet {
    let mut set = FlowSet::default();

    for token in &data.tokens {
        let token_id = token.id.as_deref().filter(|id| !id.is_empty());

        if let Some(id) = token_id {
            set.tokens.push(TokenInfo {
                id: id.to_lowercase(),
                symbol: token.symbol.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            });
        }

        let outgoing = token.outflows.iter().map(|f| (f, true));
        let incoming = token.inflows.iter().map(|f| (f, false));
        for (raw, is_outflow) in outgoing.chain(incoming) {
            match decode_flow(raw, token_id, account, is_outflow) {
                Ok(record) => set.records.push(record),
                Err(e) => {
                    warn!("Skipping {}", e);
                    set.rejected.push(e);
                }
            }
        }
    }

    set
}

/// Decode a 32-byte `uint256` returned by `eth_call`
pub fn decode_uint(result_hex: &str) -> Result<u128, FetchError> {
    let digits = result_hex.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 32 {
        return Err(FetchError::Unexpected(format!("balance exceeds u128: {}", result_hex)));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| FetchError::Unexpected(format!("bad uint {}: {}", result_hex, e)))
}

/// `balanceOf(address)` calldata
pub fn balance_of_calldata(account: &Address) -> String {
    format!("0x70a08231{:0>64}", hex::encode(account.as_slice()))
}
