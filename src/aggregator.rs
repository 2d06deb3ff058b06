use std::collections::BTreeMap;

use alloy::primitives::Address;
use tracing::{debug, warn};

use crate::error::MalformedRecordError;
use crate::models::{FlowRecord, FlowSet, NetflowEntry, TokenId};

/// Output of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netflows {
    pub entries: BTreeMap<TokenId, NetflowEntry>,
    pub malformed: Vec<MalformedRecordError>,
}

impl Netflows {
    pub fn get(&self, token_id: &str) -> Option<&NetflowEntry> {
        self.entries.get(token_id)
    }

    /// Net rate for a token, 0 when the token has no flows
    pub fn net_rate(&self, token_id: &str) -> i128 {
        self.entries.get(token_id).map(|e| e.net_rate).unwrap_or(0)
    }
}

/// Reduce flow records into one signed net rate per token, seen from `perspective`.
pub fn compute_netflow(flows: &[FlowRecord], perspective: &Address) -> Netflows {
    compute_netflow_for(flows, perspective, std::iter::empty::<&str>())
}

/// Same as [`compute_netflow`], but every token in `tracked` gets an entry even
/// when no flow references it.
pub fn compute_netflow_for<'a>(
    flows: &[FlowRecord],
    perspective: &Address,
    tracked: impl IntoIterator<Item = &'a str>,
) -> Netflows {
    aggregate(flows, perspective, tracked, Vec::new())
}

/// Aggregate a decoded [`FlowSet`]. Records the decoder rejected are carried
/// into `malformed` next to the ones without a token.
pub fn compute_netflow_set<'a>(
    set: &FlowSet,
    perspective: &Address,
    tracked: impl IntoIterator<Item = &'a str>,
) -> Netflows {
    aggregate(&set.records, perspective, tracked, set.rejected.clone())
}

fn aggregate<'a>(
    flows: &[FlowRecord],
    perspective: &Address,
    tracked: impl IntoIterator<Item = &'a str>,
    malformed: Vec<MalformedRecordError>,
) -> Netflows {
    let mut out = Netflows { entries: BTreeMap::new(), malformed };

    for token in tracked {
        out.entries
            .entry(token.to_string())
            .or_insert_with(|| NetflowEntry::zero(token));
    }

    for flow in flows {
        let Some(token) = flow.token_id.as_deref() else {
            out.malformed.push(MalformedRecordError::new(flow.id.clone(), "token id"));
            continue;
        };

        let entry = out
            .entries
            .entry(token.to_string())
            .or_insert_with(|| NetflowEntry::zero(token));

        // a self-stream counts on both sides and nets to zero
        if flow.recipient == *perspective {
            entry.inflow_sum = accumulate(entry.inflow_sum, flow.flow_rate, &flow.id);
            entry.inflow_count += 1;
        }
        if flow.owner == *perspective {
            entry.outflow_sum = accumulate(entry.outflow_sum, flow.flow_rate, &flow.id);
            entry.outflow_count += 1;
        }
    }

    for entry in out.entries.values_mut() {
        entry.net_rate = entry
            .inflow_sum
            .checked_sub(entry.outflow_sum)
            .unwrap_or_else(|| {
                warn!("Netflow overflow for {}, saturating", entry.token_id);
                entry.inflow_sum.saturating_sub(entry.outflow_sum)
            });
        debug!(
            "Netflow {} => {} (in {} x{}, out {} x{})",
            entry.token_id,
            entry.net_rate,
            entry.inflow_sum,
            entry.inflow_count,
            entry.outflow_sum,
            entry.outflow_count
        );
    }

    if !out.malformed.is_empty() {
        warn!(
            "Excluded {} malformed flow record(s) from aggregation",
            out.malformed.len()
        );
    }

    out
}

fn accumulate(sum: i128, rate: i128, flow_id: &str) -> i128 {
    sum.checked_add(rate).unwrap_or_else(|| {
        warn!("Flow rate sum overflow at record {}, saturating", flow_id);
        sum.saturating_add(rate)
    })
}
