//! One-shot fetch of flows and balances for the configured account, printed to stdout.

use flow_balance::{
    compute_netflow_set, config,
    format::{format_signed_units, format_units},
    rpc::SubgraphSource,
    BalanceSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load().map_err(|e| anyhow::anyhow!("{e}"))?;
    let source = SubgraphSource::new(&cfg.subgraph_url, &cfg.rpc_http_url)?;

    println!("Fetching flows for {}...", cfg.account);
    let flows = source.fetch_flows(&cfg.account, &cfg.tokens).await?;
    println!("Fetched {} flow records", flows.records.len());

    let netflows = compute_netflow_set(&flows, &cfg.account, cfg.tokens.iter().map(String::as_str));
    for malformed in &netflows.malformed {
        println!("Skipped: {}", malformed);
    }

    for (token, entry) in &netflows.entries {
        let symbol = flows
            .tokens
            .iter()
            .find(|t| &t.id == token)
            .map(|t| t.symbol.as_str())
            .unwrap_or("?");
        let rate = format_signed_units(entry.net_rate, cfg.display_decimals, cfg.display_precision)?;
        println!(
            "{} ({}) | in {} x{} | out {} x{} | net {}/s",
            token, symbol, entry.inflow_sum, entry.inflow_count, entry.outflow_sum, entry.outflow_count, rate
        );

        match source.fetch_balance(&cfg.account, token).await {
            Ok(snapshot) => println!(
                "  balance {} (raw {}, at {})",
                format_units(snapshot.raw_balance, cfg.display_decimals, cfg.display_precision)?,
                snapshot.raw_balance,
                snapshot.observed_at
            ),
            Err(e) => eprintln!("  balance fetch failed: {}", e),
        }
    }

    Ok(())
}
