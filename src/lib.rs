//! Near-real-time balances for accounts receiving or sending constant-rate token streams.
//!
//! Authoritative balances and flows are polled from the subgraph and an RPC node;
//! between polls each (account, token) subscription interpolates the balance from
//! the net flow rate.

pub mod aggregator;
pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod models;
pub mod observer;
pub mod parser;
pub mod rpc;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod store;

pub use aggregator::{compute_netflow, compute_netflow_for, compute_netflow_set, Netflows};
pub use engine::{BalanceAction, EngineSettings, EngineState, InterpolationEngine, Outcome, TickCadence};
pub use error::{FetchError, FormatError, MalformedRecordError, StaleSnapshotRejected};
pub use models::{BalanceSnapshot, DisplayedBalance, FlowRecord, FlowSet, NetflowEntry, TokenInfo};
pub use observer::{BalanceChange, BalanceObserver, BalanceUpdate};
pub use scheduler::{Subscription, SubscriptionHandle};
pub use snapshot::SnapshotCache;
pub use source::BalanceSource;
