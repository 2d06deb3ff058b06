use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::engine::EngineState;
use crate::format::{format_signed_units, format_units};
use crate::models::{NetflowEntry, TokenInfo};
use crate::observer::{BalanceObserver, BalanceUpdate};

#[derive(Deserialize)]
pub struct NetflowQuery {
    pub token: String,
}

/// Display row for one tracked token
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BalanceView {
    pub token: String,
    pub symbol: Option<String>,
    pub underlying: Option<String>,
    pub raw_balance: String, // keep as String (u128 is too wide for JSON clients)
    pub balance: String,
    pub net_rate: String,
    pub state: EngineState,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetflowView {
    pub token: String,
    pub symbol: Option<String>,
    pub inflow: String,
    pub outflow: String,
    pub netflow: String,
    pub inflows: usize,
    pub outflows: usize,
}

#[derive(Debug, Default)]
struct BoardInner {
    balances: BTreeMap<String, BalanceUpdate>,
    netflows: BTreeMap<String, NetflowEntry>,
    tokens: BTreeMap<String, TokenInfo>,
    updated_at: BTreeMap<String, i64>,
}

/// Latest balances and netflows of every subscription, for the HTTP API.
/// Registered as an observer on each subscription.
#[derive(Debug, Clone)]
pub struct BalanceBoard {
    inner: Arc<Mutex<BoardInner>>,
    decimals: u32,
    precision: u32,
}

impl BalanceBoard {
    pub fn new(decimals: u32, precision: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BoardInner::default())),
            decimals,
            precision,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fmt(&self, value: u128) -> String {
        format_units(value, self.decimals, self.precision).unwrap_or_else(|_| value.to_string())
    }

    fn fmt_signed(&self, value: i128) -> String {
        format_signed_units(value, self.decimals, self.precision).unwrap_or_else(|_| value.to_string())
    }

    pub fn balances(&self) -> Vec<BalanceView> {
        let inner = self.lock();
        inner
            .balances
            .values()
            .map(|u| {
                let token = inner.tokens.get(&u.token_id);
                BalanceView {
                    token: u.token_id.clone(),
                    symbol: token.map(|t| t.symbol.clone()),
                    underlying: token.map(|t| t.underlying_symbol().to_string()),
                    raw_balance: u.value.to_string(),
                    balance: self.fmt(u.value),
                    net_rate: u.net_rate.to_string(),
                    state: u.state,
                    updated_at: inner.updated_at.get(&u.token_id).copied().unwrap_or_default(),
                }
            })
            .collect()
    }

    pub fn netflow(&self, token: &str) -> Option<NetflowView> {
        let inner = self.lock();
        let entry = inner.netflows.get(&token.to_lowercase())?;
        Some(NetflowView {
            token: entry.token_id.clone(),
            symbol: inner.tokens.get(&entry.token_id).map(|t| t.symbol.clone()),
            inflow: self.fmt_signed(entry.inflow_sum),
            outflow: self.fmt_signed(entry.outflow_sum),
            netflow: entry.net_rate.to_string(),
            inflows: entry.inflow_count,
            outflows: entry.outflow_count,
        })
    }
}

impl BalanceObserver for BalanceBoard {
    fn on_balance(&self, update: &BalanceUpdate) {
        let mut inner = self.lock();
        inner
            .updated_at
            .insert(update.token_id.clone(), Utc::now().timestamp_millis());
        inner.balances.insert(update.token_id.clone(), update.clone());
    }

    fn on_netflow(&self, entry: &NetflowEntry, token: Option<&TokenInfo>) {
        let mut inner = self.lock();
        if let Some(token) = token {
            inner.tokens.insert(token.id.clone(), token.clone());
        }
        inner.netflows.insert(entry.token_id.clone(), entry.clone());
    }
}

pub fn router(board: BalanceBoard) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Flow balance API running" }))
        .route("/balances", get(get_balances))
        .route("/netflow", get(get_netflow))
        .layer(cors)
        .with_state(board)
}

pub async fn serve(cfg: Config, board: BalanceBoard) -> eyre::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(board).into_make_service()).await?;

    Ok(())
}

async fn get_balances(State(board): State<BalanceBoard>) -> Json<Vec<BalanceView>> {
    Json(board.balances())
}

async fn get_netflow(
    State(board): State<BalanceBoard>,
    Query(q): Query<NetflowQuery>,
) -> Result<Json<NetflowView>, StatusCode> {
    board.netflow(&q.token).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::BalanceChange;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn update(value: u128) -> BalanceUpdate {
        BalanceUpdate {
            token_id: "0xdaix".into(),
            value,
            net_rate: 385_802_469_135,
            state: EngineState::Tracking,
            change: BalanceChange::Ticked,
        }
    }

    #[test]
    fn board_keeps_latest_update_per_token() {
        let board = BalanceBoard::new(18, 6);
        board.on_netflow(
            &NetflowEntry { net_rate: 385_802_469_135, inflow_sum: 385_802_469_135, inflow_count: 1, ..NetflowEntry::zero("0xdaix") },
            Some(&TokenInfo { id: "0xdaix".into(), symbol: "fDAIx".into() }),
        );
        board.on_balance(&update(ONE));
        board.on_balance(&update(ONE * 3 / 2));

        let rows = board.balances();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].balance, "1.5");
        assert_eq!(rows[0].symbol.as_deref(), Some("fDAIx"));
        assert_eq!(rows[0].underlying.as_deref(), Some("fDAI"));
        assert_eq!(rows[0].raw_balance, (ONE * 3 / 2).to_string());
    }

    #[test]
    fn netflow_lookup_is_case_insensitive() {
        let board = BalanceBoard::new(18, 6);
        board.on_netflow(
            &NetflowEntry { net_rate: -7, outflow_sum: 7, outflow_count: 1, ..NetflowEntry::zero("0xdaix") },
            None,
        );

        let view = board.netflow("0xDAIX").unwrap();
        assert_eq!(view.netflow, "-7");
        assert_eq!(view.outflows, 1);
        assert!(board.netflow("0xusdcx").is_none());
    }
}
