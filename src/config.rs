use dotenvy::dotenv;
use eyre::{eyre, Result};
use std::{env, time::Duration};
use alloy::primitives::Address;
use tracing::info;

use crate::engine::EngineSettings;
use crate::format::display_unit;

pub const DEFAULT_SUBGRAPH_URL: &str =
    "https://api.thegraph.com/subgraphs/name/superfluid-finance/protocol-v1-mumbai";

#[derive(Debug, Clone)]
pub struct Config {
    pub subgraph_url: String,
    pub rpc_http_url: String,
    pub account: Address,
    pub tokens: Vec<String>,       // super token addresses, lower-cased
    pub refresh_interval_secs: u64,
    pub tolerance_factor: u64,
    pub fast_tick_ms: u64,
    pub slow_tick_ms: u64,
    pub display_decimals: u32,
    pub display_precision: u32,
    pub port: u16,
}

impl Config {
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            tolerance_factor: self.tolerance_factor,
            fast_tick: Duration::from_millis(self.fast_tick_ms),
            slow_tick: Duration::from_millis(self.slow_tick_ms),
            display_unit: display_unit(self.display_decimals, self.display_precision)?,
        })
    }
}

/// Parse a numeric variable, falling back to `default` when unset or invalid
fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // Load from .env file

    let cfg = from_lookup(|key| env::var(key).ok())?;

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}

/// Build the config from any key lookup (process env in production)
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let subgraph_url = get("SUBGRAPH_URL").unwrap_or_else(|| DEFAULT_SUBGRAPH_URL.to_string());

    // prefer RPC_HTTP_URL, fallback to polygon-rpc.com
    let rpc_http_url = get("RPC_HTTP_URL")
        .or_else(|| get("POLYGON_RPC")) // alias support
        .unwrap_or_else(|| "https://polygon-rpc.com".to_string());

    let account = get("ACCOUNT")
        .ok_or_else(|| eyre!("ACCOUNT is not set"))?
        .trim()
        .parse::<Address>()
        .map_err(|e| eyre!("ACCOUNT is not a valid address: {}", e))?;

    let tokens: Vec<String> = get("TOKENS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(eyre!("TOKENS must list at least one super token address"));
    }

    // zero periods would make the timers spin
    let refresh_interval_secs = parse_or(get("REFRESH_INTERVAL_SECS"), 30u64).max(1);
    let tolerance_factor = parse_or(get("TOLERANCE_FACTOR"), 100u64);
    let fast_tick_ms = parse_or(get("FAST_TICK_MS"), 250u64).max(1);
    let slow_tick_ms = parse_or(get("SLOW_TICK_MS"), 1_000u64).max(1);
    let display_decimals = parse_or(get("DISPLAY_DECIMALS"), 18u32);
    let display_precision = parse_or(get("DISPLAY_PRECISION"), 6u32);
    let port = parse_or(get("PORT"), 8080u16);

    Ok(Config {
        subgraph_url,
        rpc_http_url,
        account,
        tokens,
        refresh_interval_secs,
        tolerance_factor,
        fast_tick_ms,
        slow_tick_ms,
        display_decimals,
        display_precision,
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = from_lookup(lookup(&[("ACCOUNT", ACCOUNT), ("TOKENS", "0xAAA, 0xbbb,")])).unwrap();

        assert_eq!(cfg.tokens, vec!["0xaaa".to_string(), "0xbbb".to_string()]);
        assert_eq!(cfg.subgraph_url, DEFAULT_SUBGRAPH_URL);
        assert_eq!(cfg.rpc_http_url, "https://polygon-rpc.com");
        assert_eq!(cfg.refresh_interval_secs, 30);
        assert_eq!(cfg.tolerance_factor, 100);
        assert_eq!(cfg.port, 8080);

        let settings = cfg.engine_settings().unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn overrides_and_fallbacks() {
        let cfg = from_lookup(lookup(&[
            ("ACCOUNT", ACCOUNT),
            ("TOKENS", "0xaaa"),
            ("POLYGON_RPC", "http://localhost:8545"),
            ("REFRESH_INTERVAL_SECS", "0"),
            ("TOLERANCE_FACTOR", "25"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap();

        assert_eq!(cfg.rpc_http_url, "http://localhost:8545");
        assert_eq!(cfg.refresh_interval_secs, 1);
        assert_eq!(cfg.tolerance_factor, 25);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn account_and_tokens_are_required() {
        assert!(from_lookup(lookup(&[("TOKENS", "0xaaa")])).is_err());
        assert!(from_lookup(lookup(&[("ACCOUNT", "nope"), ("TOKENS", "0xaaa")])).is_err());
        assert!(from_lookup(lookup(&[("ACCOUNT", ACCOUNT)])).is_err());
    }
}
