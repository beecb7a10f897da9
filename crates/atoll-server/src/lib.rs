//! Communication server — the atoll mesh node.
//!
//! A comm-server registers with the coordinator over WebSocket, terminates
//! WebRTC data channels for clients and for the other servers in the mesh,
//! tracks topic subscriptions, and fans each topic frame out to every
//! directly connected subscriber. Forwarding between servers is single-hop:
//! a frame that arrived from another server is only delivered to local
//! clients, which keeps the mesh loop-free without per-message dedup state.
//!
//! All broker state (peer registry, subscription index) is owned by one
//! central task; WebRTC callbacks and socket pumps communicate with it
//! exclusively through [`broker::ServerCommand`]s.

pub mod broker;
pub mod config;
pub mod coordination;
pub mod metrics;
pub mod peer;
pub mod queue;
pub mod report;
pub mod rtc;
pub mod topics;
