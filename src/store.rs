// src/store.rs
use alloy::primitives::Address;

use crate::models::{FlowRecord, FlowSet, TokenInfo};

/// Flow records for one account as of the last successful fetch.
/// Each fetch replaces the whole set; records are never patched.
#[derive(Debug, Clone)]
pub struct FlowStore {
    account: Address,
    current: FlowSet,
}

impl FlowStore {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            current: FlowSet::default(),
        }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn replace(&mut self, flows: FlowSet) {
        self.current = flows;
    }

    /// The last fetched set, including records the decoder rejected
    pub fn current(&self) -> &FlowSet {
        &self.current
    }

    pub fn records(&self) -> &[FlowRecord] {
        &self.current.records
    }

    pub fn tokens(&self) -> &[TokenInfo] {
        &self.current.tokens
    }

    pub fn token(&self, id: &str) -> Option<&TokenInfo> {
        self.current.tokens.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalformedRecordError;

    fn record(id: &str, rate: i128) -> FlowRecord {
        FlowRecord {
            id: id.into(),
            owner: Address::repeat_byte(1),
            recipient: Address::repeat_byte(2),
            token_id: Some("0xtoken".into()),
            flow_rate: rate,
        }
    }

    #[test]
    fn replace_supersedes_previous_set() {
        let mut store = FlowStore::new(Address::repeat_byte(1));
        assert!(store.records().is_empty());

        store.replace(FlowSet {
            tokens: vec![TokenInfo { id: "0xtoken".into(), symbol: "DAIx".into() }],
            records: vec![record("a", 5), record("b", 7)],
            rejected: vec![MalformedRecordError::new("x", "flowRate")],
        });
        assert_eq!(store.records().len(), 2);
        assert_eq!(store.token("0xtoken").map(|t| t.symbol.as_str()), Some("DAIx"));

        store.replace(FlowSet { records: vec![record("c", 1)], ..Default::default() });
        assert_eq!(store.records(), &[record("c", 1)]);
        assert!(store.token("0xtoken").is_none());
        assert!(store.current().rejected.is_empty());
    }
}
