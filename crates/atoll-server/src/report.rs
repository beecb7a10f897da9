//! Periodic read-only state reporting.
//!
//! Every `report_period` the central task builds an immutable snapshot of
//! its peers and hands it to the configured [`Reporter`]. Reporters are
//! sinks: they observe, they never mutate.

use serde::Serialize;
use tracing::debug;

use atoll_wire::Role;

use crate::metrics;

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub alias: u64,
    pub role: Role,
    pub is_authenticated: bool,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerSnapshot {
    /// This server's own alias (0 until the coordinator WELCOME arrives).
    pub alias: u64,
    pub peers: Vec<PeerReport>,
    pub topic_count: usize,
}

pub trait Reporter: Send {
    fn report(&self, snapshot: &BrokerSnapshot);
}

/// Default reporter: publishes the peer and topic gauges.
#[derive(Debug, Default)]
pub struct MetricsReporter;

impl Reporter for MetricsReporter {
    fn report(&self, snapshot: &BrokerSnapshot) {
        metrics::peers_connected(snapshot.peers.len());
        metrics::topics_active(snapshot.topic_count);
    }
}

/// Logs each snapshot as one JSON line at debug level. Handy when chasing
/// subscription state on a node without a metrics sink attached.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, snapshot: &BrokerSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(json) => debug!(target: "atoll_server::report", %json, "broker snapshot"),
            Err(e) => debug!("cannot serialize snapshot: {e}"),
        }
    }
}
