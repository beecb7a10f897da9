//! Metric name constants and recording helpers.
//!
//! Call sites use these constants rather than raw strings so renames stay
//! centralized.

use metrics::{counter, gauge};

use atoll_wire::Role;

/// Currently registered peers, labelled by role (gauge).
pub const PEERS_CONNECTED: &str = "atoll_coordinator_peers_connected";
/// Signaling frames relayed between peers (counter).
pub const FRAMES_RELAYED: &str = "atoll_coordinator_frames_relayed_total";
/// Relay frames dropped because the target alias was unknown (counter).
pub const RELAY_DROPPED: &str = "atoll_coordinator_relay_dropped_total";
/// Peers disconnected because their outbound queue overflowed (counter).
pub const QUEUE_OVERFLOWS: &str = "atoll_coordinator_queue_overflows_total";
/// Authentication rejections and timeouts (counter).
pub const AUTH_FAILURES: &str = "atoll_coordinator_auth_failures_total";

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Client => "client",
        Role::CommunicationServer => "server",
        Role::Unknown => "unknown",
    }
}

#[inline]
pub fn peers_connected(role: Role, count: usize) {
    gauge!(PEERS_CONNECTED, "role" => role_label(role)).set(count as f64);
}

#[inline]
pub fn frame_relayed() {
    counter!(FRAMES_RELAYED).increment(1);
}

#[inline]
pub fn relay_dropped() {
    counter!(RELAY_DROPPED).increment(1);
}

#[inline]
pub fn queue_overflow() {
    counter!(QUEUE_OVERFLOWS).increment(1);
}

#[inline]
pub fn auth_failure() {
    counter!(AUTH_FAILURES).increment(1);
}
