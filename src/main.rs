use std::sync::Arc;

use flow_balance::{
    api::{self, BalanceBoard},
    clock::TokioClock,
    config,
    observer::LogObserver,
    rpc::SubgraphSource,
    BalanceObserver, BalanceSource, Subscription,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Flow balance tracker starting...");

    let cfg = config::load()?;
    info!("  Subgraph: {}", cfg.subgraph_url);
    info!("  RPC URL: {}", cfg.rpc_http_url);
    info!("  Account: {}", cfg.account);
    info!("  Tokens tracked: {:?}", cfg.tokens);
    info!("  Refresh every {}s, tolerance x{}", cfg.refresh_interval_secs, cfg.tolerance_factor);

    let settings = cfg.engine_settings()?;
    let source: Arc<dyn BalanceSource> =
        Arc::new(SubgraphSource::new(&cfg.subgraph_url, &cfg.rpc_http_url)?);
    let board = BalanceBoard::new(cfg.display_decimals, cfg.display_precision);
    let log: Arc<dyn BalanceObserver> =
        Arc::new(LogObserver::new(cfg.display_decimals, cfg.display_precision));

    // one subscription per token
    let handles: Vec<_> = cfg
        .tokens
        .iter()
        .map(|token| {
            Subscription::new(cfg.account, token.as_str(), settings)
                .observe(Arc::new(board.clone()))
                .observe(Arc::clone(&log))
                .spawn(Arc::clone(&source), Arc::new(TokioClock))
        })
        .collect();

    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        let board = board.clone();
        async move { api::serve(cfg, board).await }
    });

    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    for handle in handles {
        handle.shutdown().await;
    }

    info!("Flow balance tracker stopped.");
    Ok(())
}
