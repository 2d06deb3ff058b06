use tracing::debug;

use crate::engine::EngineState;
use crate::format::format_units;
use crate::models::{NetflowEntry, TokenInfo};

/// What caused a displayed-balance notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// First snapshot arrived
    Initialized,
    /// Interpolation tick moved the value
    Ticked,
    /// Drift exceeded tolerance and the value snapped to the snapshot
    HardResync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub token_id: String,
    pub value: u128,
    pub net_rate: i128,
    pub state: EngineState,
    pub change: BalanceChange,
}

/// Receives every mutation of a subscription's displayed balance.
/// Called synchronously on the subscription task; keep it cheap.
pub trait BalanceObserver: Send + Sync {
    fn on_balance(&self, update: &BalanceUpdate);

    fn on_netflow(&self, _entry: &NetflowEntry, _token: Option<&TokenInfo>) {}
}

impl<F> BalanceObserver for F
where
    F: Fn(&BalanceUpdate) + Send + Sync,
{
    fn on_balance(&self, update: &BalanceUpdate) {
        self(update)
    }
}

/// Logs every update at debug level in display units
pub struct LogObserver {
    decimals: u32,
    precision: u32,
}

impl LogObserver {
    pub fn new(decimals: u32, precision: u32) -> Self {
        Self { decimals, precision }
    }
}

impl BalanceObserver for LogObserver {
    fn on_balance(&self, update: &BalanceUpdate) {
        let shown = format_units(update.value, self.decimals, self.precision)
            .unwrap_or_else(|_| update.value.to_string());
        debug!(
            "{} {:?} -> {} ({}/s, {:?})",
            update.token_id, update.change, shown, update.net_rate, update.state
        );
    }

    fn on_netflow(&self, entry: &NetflowEntry, token: Option<&TokenInfo>) {
        let symbol = token.map(|t| t.symbol.as_str()).unwrap_or("?");
        debug!("{} ({}) netflow {}/s", entry.token_id, symbol, entry.net_rate);
    }
}
