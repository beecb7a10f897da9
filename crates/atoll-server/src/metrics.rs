//! Metric name constants and recording helpers for the comm-server.

use metrics::{counter, gauge};

/// Currently connected peers (gauge).
pub const PEERS_CONNECTED: &str = "atoll_server_peers_connected";
/// Topics with at least one local subscriber (gauge).
pub const TOPICS_ACTIVE: &str = "atoll_server_topics_active";
/// Topic frames delivered to recipient queues (counter).
pub const FANOUT_DELIVERIES: &str = "atoll_server_fanout_deliveries_total";
/// Unreliable frames evicted by the drop-oldest policy (counter).
pub const UNRELIABLE_DROPPED: &str = "atoll_server_unreliable_frames_dropped_total";
/// Peers disconnected because their reliable queue overflowed (counter).
pub const RELIABLE_OVERFLOWS: &str = "atoll_server_reliable_overflows_total";
/// Peers dropped for failing to authenticate in time (counter).
pub const AUTH_TIMEOUTS: &str = "atoll_server_auth_timeouts_total";
/// Peers dropped for bad credentials or a bad first frame (counter).
pub const AUTH_FAILURES: &str = "atoll_server_auth_failures_total";

#[inline]
pub fn peers_connected(count: usize) {
    gauge!(PEERS_CONNECTED).set(count as f64);
}

#[inline]
pub fn topics_active(count: usize) {
    gauge!(TOPICS_ACTIVE).set(count as f64);
}

#[inline]
pub fn fanout_delivery() {
    counter!(FANOUT_DELIVERIES).increment(1);
}

#[inline]
pub fn unreliable_dropped() {
    counter!(UNRELIABLE_DROPPED).increment(1);
}

#[inline]
pub fn reliable_overflow() {
    counter!(RELIABLE_OVERFLOWS).increment(1);
}

#[inline]
pub fn auth_timeout() {
    counter!(AUTH_TIMEOUTS).increment(1);
}

#[inline]
pub fn auth_failure() {
    counter!(AUTH_FAILURES).increment(1);
}
