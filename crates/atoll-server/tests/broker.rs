//! Broker behavior tests: authentication, subscription bookkeeping, fan-out,
//! backpressure, and teardown — driven through the central task's command
//! handlers with in-process peers, no sockets and no WebRTC stack.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use atoll_auth::{AllowAllAuthenticator, AuthRegistry};
use atoll_server::broker::{BrokerState, CloseReason, ServerCommand};
use atoll_server::config::ServerConfig;
use atoll_server::peer::ChannelKind;
use atoll_server::queue::{FrameQueue, PushError};
use atoll_server::report::{BrokerSnapshot, Reporter};
use atoll_wire::{decode, encode, Message, Role, TopicEncoding};

struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _snapshot: &BrokerSnapshot) {}
}

struct RecordingReporter(Arc<Mutex<Vec<BrokerSnapshot>>>);

impl Reporter for RecordingReporter {
    fn report(&self, snapshot: &BrokerSnapshot) {
        self.0.lock().unwrap().push(snapshot.clone());
    }
}

struct TestBroker {
    state: BrokerState,
    /// Frames the broker sends toward the coordinator.
    signal_rx: mpsc::Receiver<Bytes>,
}

fn make_broker(config: ServerConfig) -> TestBroker {
    make_broker_with_reporter(config, Box::new(NullReporter))
}

fn make_broker_with_reporter(config: ServerConfig, reporter: Box<dyn Reporter>) -> TestBroker {
    let mut auth = AuthRegistry::new();
    auth.add_or_update("allow-all", Arc::new(AllowAllAuthenticator::new("allow-all")));
    let (signal_tx, signal_rx) = mpsc::channel(64);
    let (cmd_tx, _cmd_rx) = mpsc::channel(64);
    // The command receiver is dropped: these tests call the handlers
    // directly instead of spawning the run loop.
    let state = BrokerState::new(config, Arc::new(auth), reporter, signal_tx, cmd_tx);
    TestBroker { state, signal_rx }
}

fn small_queues() -> ServerConfig {
    ServerConfig {
        reliable_queue_size: 4,
        unreliable_queue_size: 4,
        ..ServerConfig::default()
    }
}

fn auth_frame(role: Role) -> Vec<u8> {
    encode(&Message::Auth {
        role,
        method: "allow-all".into(),
        body: Bytes::new(),
    })
    .to_vec()
}

fn subscription_frame(topics: &[&str]) -> Vec<u8> {
    encode(&Message::TopicSubscription {
        format: TopicEncoding::Plain,
        topics: atoll_wire::encode_topic_set(topics.iter().copied(), TopicEncoding::Plain)
            .unwrap(),
    })
    .to_vec()
}

fn topic_frame(topic: &str, body: &[u8]) -> Vec<u8> {
    encode(&Message::Topic {
        from_alias: 0,
        topic: topic.into(),
        body: Bytes::copy_from_slice(body),
    })
    .to_vec()
}

impl TestBroker {
    /// Register + authenticate a client peer end to end.
    async fn add_client(&mut self, alias: u64) {
        self.state.add_peer(alias, Role::Unknown);
        self.state
            .handle(ServerCommand::PeerFrame {
                alias,
                kind: ChannelKind::Reliable,
                frame: auth_frame(Role::Client),
            })
            .await;
        assert!(self.state.peer(alias).unwrap().is_authenticated);
    }

    /// Register + authenticate a peer comm-server (it AUTHs with the server
    /// role, the way mesh neighbors do).
    async fn add_server(&mut self, alias: u64) {
        self.state.add_peer(alias, Role::Unknown);
        self.state
            .handle(ServerCommand::PeerFrame {
                alias,
                kind: ChannelKind::Reliable,
                frame: auth_frame(Role::CommunicationServer),
            })
            .await;
        assert!(self.state.peer(alias).unwrap().is_authenticated);
    }

    async fn subscribe(&mut self, alias: u64, topics: &[&str]) {
        self.state
            .handle(ServerCommand::PeerFrame {
                alias,
                kind: ChannelKind::Reliable,
                frame: subscription_frame(topics),
            })
            .await;
    }

    async fn publish(&mut self, alias: u64, kind: ChannelKind, topic: &str, body: &[u8]) {
        self.state
            .handle(ServerCommand::PeerFrame {
                alias,
                kind,
                frame: topic_frame(topic, body),
            })
            .await;
    }

    fn queue(&self, alias: u64, kind: ChannelKind) -> Arc<FrameQueue> {
        Arc::clone(self.state.peer(alias).unwrap().queue(kind))
    }
}

async fn next_message(queue: &FrameQueue) -> Message {
    let frame = tokio::time::timeout(Duration::from_secs(1), queue.pop())
        .await
        .expect("timed out waiting for frame")
        .expect("queue closed");
    decode(&frame).unwrap()
}

// ── Authentication ──────────────────────────────────────────────────────

#[tokio::test]
async fn first_reliable_frame_must_be_auth() {
    let mut broker = make_broker(small_queues());
    broker.state.add_peer(7, Role::Unknown);
    broker
        .state
        .handle(ServerCommand::PeerFrame {
            alias: 7,
            kind: ChannelKind::Reliable,
            frame: subscription_frame(&["profile"]),
        })
        .await;
    assert!(broker.state.peer(7).is_none(), "bad first frame closes the peer");
}

#[tokio::test]
async fn unreliable_frames_before_auth_are_discarded_silently() {
    let mut broker = make_broker(small_queues());
    broker.state.add_peer(7, Role::Unknown);
    broker
        .state
        .handle(ServerCommand::PeerFrame {
            alias: 7,
            kind: ChannelKind::Unreliable,
            frame: topic_frame("profile", b"x"),
        })
        .await;
    let peer = broker.state.peer(7).expect("peer survives stray unreliable frames");
    assert!(!peer.is_authenticated);
}

#[tokio::test]
async fn auth_records_declared_role() {
    let mut broker = make_broker(small_queues());
    broker.add_client(3).await;
    assert_eq!(broker.state.peer(3).unwrap().role, Role::Client);
}

#[tokio::test]
async fn server_auth_is_answered_with_our_own() {
    let mut broker = make_broker(small_queues());
    broker.add_server(9).await;

    // Our reply AUTH must already sit in the neighbor's reliable queue.
    let queue = broker.queue(9, ChannelKind::Reliable);
    match next_message(&queue).await {
        Message::Auth { role, method, .. } => {
            assert_eq!(role, Role::CommunicationServer);
            assert_eq!(method, "allow-all");
        }
        other => panic!("expected our AUTH reply, got {other:?}"),
    }
}

#[tokio::test]
async fn role_mismatch_in_auth_closes_peer() {
    let mut broker = make_broker(small_queues());
    // Dialed as a server (role known a priori)…
    broker.state.add_peer(4, Role::CommunicationServer);
    // …but AUTH claims to be a client.
    broker
        .state
        .handle(ServerCommand::PeerFrame {
            alias: 4,
            kind: ChannelKind::Reliable,
            frame: auth_frame(Role::Client),
        })
        .await;
    assert!(broker.state.peer(4).is_none());
}

#[tokio::test(start_paused = true)]
async fn auth_deadline_sweeps_silent_peers() {
    let config = ServerConfig {
        auth_timeout: Duration::from_millis(200),
        ..small_queues()
    };
    let mut broker = make_broker(config);
    broker.state.add_peer(5, Role::Unknown);

    tokio::time::advance(Duration::from_millis(500)).await;
    broker.state.sweep_auth_deadlines();
    assert!(broker.state.peer(5).is_none(), "silent peer swept");
    assert!(!broker.state.index().contains_alias(5), "no index residue");
}

// ── Subscriptions ───────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_is_set_replace_not_merge() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;

    broker.subscribe(1, &["a", "b"]).await;
    assert!(broker.state.index().subscribers("a").is_some());
    assert!(broker.state.index().subscribers("b").is_some());

    broker.subscribe(1, &["b", "c"]).await;
    assert!(broker.state.index().subscribers("a").is_none(), "a replaced away");
    assert!(broker.state.index().subscribers("b").is_some());
    assert!(broker.state.index().subscribers("c").is_some());

    let peer = broker.state.peer(1).unwrap();
    assert_eq!(peer.topics.len(), 2);
}

#[tokio::test]
async fn empty_subscription_clears_everything() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.subscribe(1, &["profile", "position"]).await;
    broker.subscribe(1, &[]).await;

    assert_eq!(broker.state.index().topic_count(), 0);
    assert!(broker.state.peer(1).unwrap().topics.is_empty());
}

#[tokio::test]
async fn duplicate_topics_in_one_frame_count_once() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker
        .state
        .handle(ServerCommand::PeerFrame {
            alias: 1,
            kind: ChannelKind::Reliable,
            frame: encode(&Message::TopicSubscription {
                format: TopicEncoding::Plain,
                topics: Bytes::from_static(b"profile profile"),
            })
            .to_vec(),
        })
        .await;
    assert_eq!(broker.state.peer(1).unwrap().topics.len(), 1);
}

#[tokio::test]
async fn gzip_subscription_accepted() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    let topics =
        atoll_wire::encode_topic_set(["profile", "chat"], TopicEncoding::Gzip).unwrap();
    broker
        .state
        .handle(ServerCommand::PeerFrame {
            alias: 1,
            kind: ChannelKind::Reliable,
            frame: encode(&Message::TopicSubscription {
                format: TopicEncoding::Gzip,
                topics,
            })
            .to_vec(),
        })
        .await;
    assert_eq!(broker.state.peer(1).unwrap().topics.len(), 2);
}

#[tokio::test]
async fn corrupt_subscription_payload_closes_peer() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker
        .state
        .handle(ServerCommand::PeerFrame {
            alias: 1,
            kind: ChannelKind::Reliable,
            frame: encode(&Message::TopicSubscription {
                format: TopicEncoding::Gzip,
                topics: Bytes::from_static(b"definitely not gzip"),
            })
            .to_vec(),
        })
        .await;
    assert!(broker.state.peer(1).is_none());
}

// ── Fan-out ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn reliable_publish_reaches_subscriber_with_stamped_sender() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(1, &["profile"]).await;
    broker.subscribe(2, &["profile"]).await;

    broker
        .publish(1, ChannelKind::Reliable, "profile", b"hello")
        .await;

    let queue = broker.queue(2, ChannelKind::Reliable);
    match next_message(&queue).await {
        Message::Topic {
            from_alias,
            topic,
            body,
        } => {
            assert_eq!(from_alias, 1, "broker stamps the sender alias");
            assert_eq!(topic, "profile");
            assert_eq!(&body[..], b"hello");
        }
        other => panic!("expected Topic, got {other:?}"),
    }

    // No self-echo and nothing on the wrong channel.
    assert!(broker.queue(1, ChannelKind::Reliable).is_empty());
    assert!(broker.queue(2, ChannelKind::Unreliable).is_empty());
}

#[tokio::test]
async fn unreliable_publish_uses_unreliable_queue() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(2, &["position"]).await;

    broker
        .publish(1, ChannelKind::Unreliable, "position", b"xyz")
        .await;

    assert!(broker.queue(2, ChannelKind::Reliable).is_empty());
    let queue = broker.queue(2, ChannelKind::Unreliable);
    assert!(matches!(next_message(&queue).await, Message::Topic { .. }));
}

#[tokio::test]
async fn publish_without_subscribers_is_a_noop() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker
        .publish(1, ChannelKind::Reliable, "nobody-home", b"x")
        .await;
    assert!(broker.state.peer(1).is_some());
}

#[tokio::test]
async fn unsubscribed_peer_stops_receiving() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(1, &["profile"]).await;
    broker.subscribe(2, &["profile"]).await;

    broker.subscribe(2, &[]).await;
    broker.publish(1, ChannelKind::Reliable, "profile", b"x").await;

    assert!(broker.queue(2, ChannelKind::Reliable).is_empty());
    assert!(
        broker.state.index().subscribers("profile").is_none(),
        "topic key removed once the last local subscriber left"
    );
}

#[tokio::test]
async fn server_sourced_frames_stop_at_local_clients() {
    let mut broker = make_broker(small_queues());
    broker.add_server(10).await; // mesh neighbor A
    broker.add_server(11).await; // mesh neighbor B
    broker.add_client(1).await;
    broker.subscribe(10, &["t"]).await;
    broker.subscribe(11, &["t"]).await;
    broker.subscribe(1, &["t"]).await;

    // Drain the handshake traffic: our AUTH reply from each server
    // handshake, plus the interest advertisement that the local client's
    // subscription pushed to both neighbors.
    for server in [10, 11] {
        let queue = broker.queue(server, ChannelKind::Reliable);
        assert!(matches!(next_message(&queue).await, Message::Auth { .. }));
        assert!(matches!(
            next_message(&queue).await,
            Message::TopicSubscription { .. }
        ));
    }

    // Frame arriving FROM server 10 goes to the local client only —
    // never back onto the mesh toward server 11.
    broker.publish(10, ChannelKind::Reliable, "t", b"x").await;

    assert!(matches!(
        next_message(&broker.queue(1, ChannelKind::Reliable)).await,
        Message::Topic { from_alias: 10, .. }
    ));
    assert!(broker.queue(11, ChannelKind::Reliable).is_empty());

    // A client-sourced frame, in contrast, reaches both servers and nobody
    // gets two copies.
    broker.publish(1, ChannelKind::Reliable, "t", b"y").await;
    assert!(matches!(
        next_message(&broker.queue(10, ChannelKind::Reliable)).await,
        Message::Topic { from_alias: 1, .. }
    ));
    assert!(matches!(
        next_message(&broker.queue(11, ChannelKind::Reliable)).await,
        Message::Topic { from_alias: 1, .. }
    ));
    assert!(broker.queue(10, ChannelKind::Reliable).is_empty());
    assert!(broker.queue(11, ChannelKind::Reliable).is_empty());
}

// ── Mesh interest propagation ───────────────────────────────────────────

#[tokio::test]
async fn client_subscriptions_are_advertised_to_mesh_neighbors() {
    let mut broker = make_broker(small_queues());
    broker.add_server(10).await;
    let neighbor = broker.queue(10, ChannelKind::Reliable);
    assert!(matches!(next_message(&neighbor).await, Message::Auth { .. }));

    broker.add_client(1).await;
    broker.subscribe(1, &["profile"]).await;

    // The neighbor hears about the new local interest without any client
    // of its own doing anything.
    match next_message(&neighbor).await {
        Message::TopicSubscription { format, topics } => {
            let set = atoll_wire::decode_topic_set(&topics, format).unwrap();
            assert_eq!(set, HashSet::from(["profile".to_string()]));
        }
        other => panic!("expected TopicSubscription, got {other:?}"),
    }

    // Re-sending an identical set changes nothing, so nothing is re-sent.
    broker.subscribe(1, &["profile"]).await;
    assert!(neighbor.is_empty());
}

#[tokio::test]
async fn departing_client_interest_is_withdrawn_from_mesh() {
    let mut broker = make_broker(small_queues());
    broker.add_server(10).await;
    let neighbor = broker.queue(10, ChannelKind::Reliable);
    assert!(matches!(next_message(&neighbor).await, Message::Auth { .. }));

    broker.add_client(1).await;
    broker.subscribe(1, &["t"]).await;
    assert!(matches!(
        next_message(&neighbor).await,
        Message::TopicSubscription { .. }
    ));

    broker.state.close_peer(1, CloseReason::TransportError);

    // The last local subscriber left, so the neighbor gets an empty set.
    match next_message(&neighbor).await {
        Message::TopicSubscription { format, topics } => {
            let set = atoll_wire::decode_topic_set(&topics, format).unwrap();
            assert!(set.is_empty());
        }
        other => panic!("expected TopicSubscription, got {other:?}"),
    }
}

#[tokio::test]
async fn late_joining_server_learns_current_interest() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.subscribe(1, &["profile", "chat"]).await;

    // A neighbor authenticating after the fact still needs the picture.
    broker.add_server(10).await;
    let neighbor = broker.queue(10, ChannelKind::Reliable);
    assert!(
        matches!(next_message(&neighbor).await, Message::Auth { .. }),
        "our AUTH reply precedes the interest frame"
    );
    match next_message(&neighbor).await {
        Message::TopicSubscription { format, topics } => {
            let set = atoll_wire::decode_topic_set(&topics, format).unwrap();
            assert_eq!(
                set,
                HashSet::from(["profile".to_string(), "chat".to_string()])
            );
        }
        other => panic!("expected TopicSubscription, got {other:?}"),
    }
}

#[tokio::test]
async fn neighbor_server_interest_is_not_echoed_back() {
    let mut broker = make_broker(small_queues());
    broker.add_server(10).await;
    broker.add_server(11).await;
    let queue10 = broker.queue(10, ChannelKind::Reliable);
    let queue11 = broker.queue(11, ChannelKind::Reliable);
    assert!(matches!(next_message(&queue10).await, Message::Auth { .. }));
    assert!(matches!(next_message(&queue11).await, Message::Auth { .. }));

    // One neighbor advertises its clients' interest to us. That interest is
    // theirs, not ours — mirroring it onward would bounce subscriptions
    // across the mesh.
    broker.subscribe(10, &["remote-topic"]).await;

    assert!(queue10.is_empty());
    assert!(queue11.is_empty());
}

#[tokio::test]
async fn advertised_interest_draws_remote_publications_to_the_mesh_link() {
    let mut broker = make_broker(small_queues());
    broker.add_server(10).await;
    let neighbor = broker.queue(10, ChannelKind::Reliable);
    assert!(matches!(next_message(&neighbor).await, Message::Auth { .. }));

    // The neighbor's advertisement arrives on the same receive path our
    // own advertisements use on the far side.
    broker.subscribe(10, &["t"]).await;

    broker.add_client(1).await;
    broker.publish(1, ChannelKind::Reliable, "t", b"x").await;
    assert!(matches!(
        next_message(&neighbor).await,
        Message::Topic { from_alias: 1, .. }
    ));
}

// ── Backpressure ────────────────────────────────────────────────────────

#[tokio::test]
async fn reliable_overflow_disconnects_slow_peer() {
    let config = ServerConfig {
        reliable_queue_size: 2,
        ..ServerConfig::default()
    };
    let mut broker = make_broker(config);
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(2, &["t"]).await;

    for _ in 0..3 {
        broker.publish(1, ChannelKind::Reliable, "t", b"x").await;
    }
    assert!(
        broker.state.peer(2).is_none(),
        "overflowing the reliable queue disconnects the peer"
    );
    assert!(!broker.state.index().contains_alias(2));
}

#[tokio::test]
async fn unreliable_overflow_drops_oldest_keeps_peer() {
    let config = ServerConfig {
        unreliable_queue_size: 2,
        ..ServerConfig::default()
    };
    let mut broker = make_broker(config);
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(2, &["t"]).await;

    for body in [&b"one"[..], b"two", b"three"] {
        broker.publish(1, ChannelKind::Unreliable, "t", body).await;
    }

    let peer_alive = broker.state.peer(2).is_some();
    assert!(peer_alive, "best-effort channel never disconnects on overflow");

    let queue = broker.queue(2, ChannelKind::Unreliable);
    let bodies: Vec<Bytes> = vec![
        match next_message(&queue).await {
            Message::Topic { body, .. } => body,
            other => panic!("{other:?}"),
        },
        match next_message(&queue).await {
            Message::Topic { body, .. } => body,
            other => panic!("{other:?}"),
        },
    ];
    assert_eq!(&bodies[0][..], b"two", "oldest frame was evicted");
    assert_eq!(&bodies[1][..], b"three");
    assert!(queue.is_empty(), "no frame is ever delivered twice");
}

// ── Teardown ────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_removes_peer_index_entries_and_seals_queues() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(2, &["a", "b"]).await;

    let reliable = broker.queue(2, ChannelKind::Reliable);
    let unreliable = broker.queue(2, ChannelKind::Unreliable);

    broker.state.close_peer(2, CloseReason::TransportError);

    assert!(broker.state.peer(2).is_none());
    assert!(!broker.state.index().contains_alias(2));
    assert_eq!(broker.state.index().topic_count(), 0);
    assert_eq!(reliable.push(Bytes::from_static(b"x")), Err(PushError::Closed));
    assert_eq!(unreliable.push(Bytes::from_static(b"x")), Err(PushError::Closed));

    // Publishing to the departed peer's old topic delivers nowhere and
    // doesn't disturb the sender.
    broker.publish(1, ChannelKind::Reliable, "a", b"x").await;
    assert!(broker.state.peer(1).is_some());
}

#[tokio::test]
async fn reconnected_peer_gets_fresh_state_under_new_alias() {
    let mut broker = make_broker(small_queues());
    broker.add_client(1).await;
    broker.add_client(2).await;
    broker.subscribe(1, &["profile"]).await;
    broker.subscribe(2, &["profile"]).await;

    // Peer 2 drops and comes back as alias 3 (aliases are never reused).
    broker.state.close_peer(2, CloseReason::ConnectionFailed);
    broker.add_client(3).await;
    broker.subscribe(3, &["profile"]).await;

    broker.publish(1, ChannelKind::Reliable, "profile", b"hi").await;
    assert!(matches!(
        next_message(&broker.queue(3, ChannelKind::Reliable)).await,
        Message::Topic { from_alias: 1, .. }
    ));
}

// ── Coordinator protocol ────────────────────────────────────────────────

#[tokio::test]
async fn welcome_stores_alias_and_dials_listed_servers() {
    let mut broker = make_broker(small_queues());
    broker
        .state
        .handle(ServerCommand::CoordinatorFrame(
            encode(&Message::Welcome {
                alias: 5,
                available_servers: vec![2, 3],
            })
            .to_vec(),
        ))
        .await;

    assert_eq!(broker.state.alias, 5);
    for expected in [2u64, 3] {
        let frame = broker.signal_rx.try_recv().expect("CONNECT queued");
        match decode(&frame).unwrap() {
            Message::Connect {
                from_alias,
                to_alias,
            } => {
                assert_eq!(from_alias, 5);
                assert_eq!(to_alias, expected);
            }
            other => panic!("expected Connect, got {other:?}"),
        }
    }
    assert!(broker.signal_rx.try_recv().is_err());
}

#[tokio::test]
async fn local_ice_candidates_are_relayed_to_the_peer() {
    let mut broker = make_broker(small_queues());
    broker
        .state
        .handle(ServerCommand::CoordinatorFrame(
            encode(&Message::Welcome {
                alias: 5,
                available_servers: vec![],
            })
            .to_vec(),
        ))
        .await;

    broker
        .state
        .handle(ServerCommand::LocalIceCandidate {
            alias: 8,
            candidate: "candidate:1 1 UDP 1 10.0.0.1 5000 typ host".into(),
        })
        .await;

    let frame = broker.signal_rx.try_recv().unwrap();
    match decode(&frame).unwrap() {
        Message::WebRtcIceCandidate {
            from_alias,
            to_alias,
            ..
        } => {
            assert_eq!(from_alias, 5);
            assert_eq!(to_alias, 8);
        }
        other => panic!("expected ICE candidate, got {other:?}"),
    }
}

// ── Reporting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn report_snapshot_reflects_peers_and_topics() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut broker = make_broker_with_reporter(
        small_queues(),
        Box::new(RecordingReporter(Arc::clone(&seen))),
    );
    broker.add_client(1).await;
    broker.subscribe(1, &["profile"]).await;

    broker.state.report();

    let snapshots = seen.lock().unwrap();
    let snapshot = snapshots.last().expect("one report");
    assert_eq!(snapshot.peers.len(), 1);
    assert_eq!(snapshot.peers[0].alias, 1);
    assert!(snapshot.peers[0].is_authenticated);
    assert_eq!(snapshot.peers[0].topics, vec!["profile".to_string()]);
    assert_eq!(snapshot.topic_count, 1);
}
