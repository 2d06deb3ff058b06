// src/rpc.rs
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::FetchError;
use crate::models::{BalanceSnapshot, FlowSet, TokenId};
use crate::parser::{self, TokenFlowsData};
use crate::source::BalanceSource;

/// Flows of one account for a set of super tokens, both directions
pub const TOKEN_FLOWS_QUERY: &str = r#"
query getTokenFlows($owner: String!, $tokens: [String!]!) {
  tokens(where: {id_in: $tokens}) {
    id
    symbol
    outflows: flows(where: {owner: $owner}) {
      id
      flowRate
      recipient { id }
    }
    inflows: flows(where: {recipient: $owner}) {
      id
      flowRate
      owner { id }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Success { result: T },
    Error { error: RpcError },
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Reads flows from the Superfluid subgraph and balances from a JSON-RPC node.
/// No response caching: every call is a fresh request.
#[derive(Debug, Clone)]
pub struct SubgraphSource {
    client: Client,
    subgraph_url: String,
    rpc_url: String,
}

impl SubgraphSource {
    pub fn new(subgraph_url: &str, rpc_url: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            subgraph_url: subgraph_url.to_string(),
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, payload: &Value) -> Result<T, FetchError> {
        let resp = self.client.post(url).json(payload).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(FetchError::Status(resp.status()));
        }
        let text = resp.text().await?;
        debug!("📩 Raw response from {}: {}", url, text);
        Ok(serde_json::from_str(&text)?)
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, FetchError> {
        let payload = json!({ "query": query, "variables": variables });
        let parsed: GraphQlResponse<T> = self.post(&self.subgraph_url, &payload).await?;
        if !parsed.errors.is_empty() {
            return Err(FetchError::GraphQl(
                parsed.errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        parsed
            .data
            .ok_or_else(|| FetchError::Unexpected("graphql response without data".into()))
    }

    async fn eth_call(&self, to: &str, data: &str) -> Result<String, FetchError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": to, "data": data }, "latest"]
        });
        match self.post::<RpcResponse<String>>(&self.rpc_url, &payload).await? {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => Err(FetchError::Rpc {
                code: error.code,
                message: error.message,
            }),
        }
    }
}

/// The subgraph stores ids lower-cased and matches case sensitively
fn subgraph_id(account: &Address) -> String {
    account.to_string().to_lowercase()
}

#[async_trait]
impl BalanceSource for SubgraphSource {
    async fn fetch_flows(&self, account: &Address, tokens: &[TokenId]) -> Result<FlowSet, FetchError> {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        debug!("📡 Querying flows for {} ({} tokens)", account, tokens.len());

        let data: TokenFlowsData = self
            .graphql(
                TOKEN_FLOWS_QUERY,
                json!({ "owner": subgraph_id(account), "tokens": tokens }),
            )
            .await?;
        Ok(parser::decode_flows(&data, account))
    }

    async fn fetch_balance(&self, account: &Address, token: &TokenId) -> Result<BalanceSnapshot, FetchError> {
        // stamped at request time so a slow reply sorts before a newer request
        let observed_at = Utc::now().timestamp_millis();
        debug!("📡 eth_call balanceOf({}) on {}", account, token);

        let result = self.eth_call(token, &parser::balance_of_calldata(account)).await?;
        Ok(BalanceSnapshot {
            token_id: token.to_lowercase(),
            raw_balance: parser::decode_uint(&result)?,
            observed_at,
        })
    }
}
