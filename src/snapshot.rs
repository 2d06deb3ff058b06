use std::collections::HashMap;

use tracing::debug;

use crate::error::StaleSnapshotRejected;
use crate::models::{BalanceSnapshot, TokenId};

/// Last authoritative balance per token. Last write wins by `observed_at`;
/// strictly older readings are rejected so a slow reply cannot regress the display.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCache {
    entries: HashMap<TokenId, BalanceSnapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_snapshot(
        &mut self,
        token_id: &str,
        raw_balance: u128,
        observed_at: i64,
    ) -> Result<BalanceSnapshot, StaleSnapshotRejected> {
        if let Some(cached) = self.entries.get(token_id) {
            if observed_at < cached.observed_at {
                debug!(
                    "Dropping stale snapshot for {} ({} < {})",
                    token_id, observed_at, cached.observed_at
                );
                return Err(StaleSnapshotRejected {
                    token_id: token_id.to_string(),
                    observed_at,
                    cached_at: cached.observed_at,
                });
            }
        }

        let snapshot = BalanceSnapshot {
            token_id: token_id.to_string(),
            raw_balance,
            observed_at,
        };
        self.entries.insert(token_id.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub fn get(&self, token_id: &str) -> Option<&BalanceSnapshot> {
        self.entries.get(token_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_or_equal_snapshots_replace_cached_value() {
        let mut cache = SnapshotCache::new();
        assert!(cache.get("dai").is_none());

        cache.update_snapshot("dai", 100, 1_000).unwrap();
        cache.update_snapshot("dai", 150, 2_000).unwrap();
        assert_eq!(cache.get("dai").unwrap().raw_balance, 150);

        // same timestamp: last write wins
        cache.update_snapshot("dai", 160, 2_000).unwrap();
        assert_eq!(cache.get("dai").unwrap().raw_balance, 160);
    }

    #[test]
    fn older_snapshot_is_rejected() {
        let mut cache = SnapshotCache::new();
        cache.update_snapshot("dai", 500, 5_000).unwrap();

        let err = cache.update_snapshot("dai", 1, 4_999).unwrap_err();
        assert_eq!(err.cached_at, 5_000);
        assert_eq!(cache.get("dai").unwrap().raw_balance, 500);
    }

    #[test]
    fn tokens_are_independent() {
        let mut cache = SnapshotCache::new();
        cache.update_snapshot("dai", 1, 9_000).unwrap();
        assert!(cache.update_snapshot("usdc", 2, 10).is_ok());
    }
}
