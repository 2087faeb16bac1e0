//! Integration tests for room membership over the signaling router.
//!
//! Each test drives one or more scripted clients through the router against
//! a recording media engine and checks what every client was sent.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::time::Duration;

use groupcall_service::errors::GroupCallError;
use groupcall_service::media::MediaKind;
use groupcall_service::signaling::{InboundMessage, OutboundMessage};
use groupcall_test_utils::{
    answer_for, arrived, existing, join, left, receive_video, test_router, MockMediaEngine,
    TestClient,
};
use tokio::time::timeout;

/// Wait until `condition` holds, failing the test after two seconds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn error_codes(messages: &[OutboundMessage]) -> Vec<i32> {
    messages
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Error { code, .. } => Some(*code),
            _ => None,
        })
        .collect()
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_two_participants_join_subscribe_and_leave() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    let mut b = TestClient::connect(&router, "session-b");

    a.send(join("A", "R1")).await;
    b.send(join("B", "R1")).await;

    assert_eq!(a.take_messages().await, vec![existing(&[]), arrived("B")]);
    assert_eq!(b.take_messages().await, vec![existing(&["A"])]);

    b.send(receive_video("A", "offer-O")).await;

    // A's outgoing camera feeds B's new incoming endpoint for A
    let a_camera = a.participant().outgoing(MediaKind::Camera).id().to_string();
    let b_incoming = b
        .participant()
        .incoming_endpoint("A", MediaKind::Camera)
        .await
        .expect("incoming endpoint for A");
    assert_eq!(engine.sinks_of(&a_camera), vec![b_incoming.id().to_string()]);
    assert_eq!(
        b.take_messages().await,
        vec![OutboundMessage::ReceiveVideoAnswer {
            name: "A".to_string(),
            sdp_answer: answer_for("offer-O"),
        }]
    );
    assert_eq!(
        engine.endpoint(b_incoming.id()).unwrap().offers(),
        vec!["offer-O"]
    );

    a.send(InboundMessage::LeaveRoom).await;
    assert_eq!(b.take_messages().await, vec![left("A")]);

    // R1 persists while B is present
    let room = registry.get_room("R1".to_string()).await.unwrap();
    let state = room.get_state().await.unwrap();
    assert_eq!(state.participants, vec!["B".to_string()]);
    assert!(!state.is_closed);

    b.send(InboundMessage::LeaveRoom).await;
    let result = registry.get_room("R1".to_string()).await;
    assert!(matches!(result, Err(GroupCallError::RoomNotFound(_))));

    // B dropped its subscription to A without releasing it (keep-alive
    // cancel policy); everything else is released once, then the pipeline.
    let subscription = b_incoming.id().to_string();
    eventually(|| {
        engine.pipeline_releases() == 1
            && engine
                .endpoints()
                .iter()
                .filter(|e| e.id != subscription)
                .all(|e| e.releases() == 1)
    })
    .await;
    assert_eq!(engine.pipelines_created(), 1);
    assert_eq!(engine.endpoint(&subscription).unwrap().releases(), 0);

    registry.cancel();
}

// ============================================================================
// Membership consistency
// ============================================================================

#[tokio::test]
async fn test_existing_participants_match_delivered_arrivals() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    let mut b = TestClient::connect(&router, "session-b");
    let mut c = TestClient::connect(&router, "session-c");

    a.send(join("alice", "R1")).await;
    b.send(join("bob", "R1")).await;
    c.send(join("carol", "R1")).await;

    assert_eq!(c.take_messages().await, vec![existing(&["alice", "bob"])]);
    assert_eq!(
        a.take_messages().await,
        vec![existing(&[]), arrived("bob"), arrived("carol")]
    );
    assert_eq!(
        b.take_messages().await,
        vec![existing(&["alice"]), arrived("carol")]
    );

    c.disconnect().await;
    assert_eq!(a.take_messages().await, vec![left("carol")]);
    assert_eq!(b.take_messages().await, vec![left("carol")]);

    let mut d = TestClient::connect(&router, "session-d");
    d.send(join("dave", "R1")).await;
    assert_eq!(d.take_messages().await, vec![existing(&["alice", "bob"])]);

    registry.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_see_each_peer_exactly_once() {
    let engine = MockMediaEngine::builder()
        .creation_delay(Duration::from_millis(5))
        .build();
    let (router, registry) = test_router(&engine);

    let names: Vec<String> = (0..6).map(|i| format!("p{i}")).collect();
    let mut tasks = Vec::new();
    for name in &names {
        let router = router.clone();
        let name = name.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = TestClient::connect(&router, &format!("session-{name}"));
            client.send(join(&name, "busy-room")).await;
            (name, client)
        }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    for (name, client) in &clients {
        let messages = client.messages().await;
        let mut seen = HashSet::new();
        let mut first = true;
        for message in messages {
            match message {
                OutboundMessage::ExistingParticipants { data } => {
                    assert!(first, "existingParticipants must come first");
                    for peer in data {
                        assert!(seen.insert(peer), "duplicate peer in existing list");
                    }
                }
                OutboundMessage::NewParticipantArrived { name: peer } => {
                    assert!(seen.insert(peer), "peer announced twice");
                }
                other => panic!("unexpected message {other:?}"),
            }
            first = false;
        }

        let expected: HashSet<String> = names.iter().filter(|n| *n != name).cloned().collect();
        assert_eq!(seen, expected, "{name} should learn of every other peer once");
    }

    // Exactly one room and one pipeline served all joins
    assert_eq!(engine.pipelines_created(), 1);
    let status = registry.get_status().await.unwrap();
    assert_eq!(status.room_count, 1);

    registry.cancel();
}

#[tokio::test]
async fn test_rooms_are_independent() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    let mut b = TestClient::connect(&router, "session-b");

    a.send(join("alice", "R1")).await;
    b.send(join("alice", "R2")).await;

    assert_eq!(a.messages().await, vec![existing(&[])]);
    assert_eq!(b.messages().await, vec![existing(&[])]);
    assert_eq!(engine.pipelines_created(), 2);

    registry.cancel();
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_duplicate_name_rejected_without_side_effects() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    let mut impostor = TestClient::connect(&router, "session-x");

    a.send(join("alice", "R1")).await;
    let endpoints_before = engine.endpoints_created();

    impostor.send(join("alice", "R1")).await;

    assert_eq!(error_codes(&impostor.messages().await), vec![5]);
    assert!(!impostor.is_joined());
    assert_eq!(engine.endpoints_created(), endpoints_before);
    // The original member was not told about anyone
    assert_eq!(a.messages().await, vec![existing(&[])]);

    let state = registry
        .get_room("R1".to_string())
        .await
        .unwrap()
        .get_state()
        .await
        .unwrap();
    assert_eq!(state.participants, vec!["alice".to_string()]);

    registry.cancel();
}

#[tokio::test]
async fn test_invalid_and_out_of_order_messages_reported() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut client = TestClient::connect(&router, "session-a");

    client.send_text("not json at all").await;
    client.send_text(r#"{"id":"presenter","sdpOffer":"x"}"#).await;
    client.send(receive_video("bob", "offer")).await;
    client.send(join("alice", "R1")).await;
    client.send(join("alice", "R2")).await;

    let messages = client.messages().await;
    assert_eq!(error_codes(&messages), vec![1, 1, 1, 1]);
    assert!(messages.contains(&existing(&[])));

    registry.cancel();
}

#[tokio::test]
async fn test_receive_from_unknown_sender_is_not_found() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut client = TestClient::connect(&router, "session-a");
    client.send(join("alice", "R1")).await;
    client.take_messages().await;

    client.send(receive_video("nobody", "offer")).await;

    assert_eq!(error_codes(&client.messages().await), vec![4]);
    assert_eq!(
        client.participant().incoming_count(MediaKind::Camera).await,
        0
    );

    registry.cancel();
}

// ============================================================================
// Stop / disconnect / room lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_notifies_peers_and_allows_resubscribe() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    let mut b = TestClient::connect(&router, "session-b");
    a.send(join("alice", "R1")).await;
    b.send(join("bob", "R1")).await;
    b.send(receive_video("alice", "offer-1")).await;
    a.take_messages().await;
    b.take_messages().await;

    a.send(InboundMessage::Stop).await;

    assert_eq!(
        b.take_messages().await,
        vec![OutboundMessage::StopCommunication {
            name: "alice".to_string()
        }]
    );
    assert!(a.take_messages().await.is_empty());
    assert_eq!(b.participant().incoming_count(MediaKind::Camera).await, 0);

    // alice is still a member; bob can subscribe again on a fresh endpoint
    let before = engine.endpoints_created();
    b.send(receive_video("alice", "offer-2")).await;
    assert_eq!(engine.endpoints_created(), before + 1);
    assert_eq!(b.participant().incoming_count(MediaKind::Camera).await, 1);

    registry.cancel();
}

#[tokio::test]
async fn test_disconnect_performs_implicit_leave() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    let mut b = TestClient::connect(&router, "session-b");
    a.send(join("alice", "R1")).await;
    b.send(join("bob", "R1")).await;
    a.take_messages().await;

    b.disconnect().await;

    assert_eq!(a.take_messages().await, vec![left("bob")]);
    eventually(|| b.recorder().is_closed()).await;

    registry.cancel();
}

#[tokio::test]
async fn test_room_recreated_after_destruction() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    let mut a = TestClient::connect(&router, "session-a");
    a.send(join("alice", "R1")).await;
    a.send(InboundMessage::LeaveRoom).await;
    assert!(matches!(
        registry.get_room("R1".to_string()).await,
        Err(GroupCallError::RoomNotFound(_))
    ));

    a.send(join("alice", "R1")).await;
    assert!(a.is_joined());
    assert_eq!(engine.pipelines_created(), 2);
    assert_eq!(
        a.messages().await,
        vec![existing(&[]), existing(&[])],
        "the second join starts from an empty room"
    );

    registry.cancel();
}

#[tokio::test]
async fn test_failed_first_join_closes_empty_room() {
    let engine = MockMediaEngine::new();
    let (router, registry) = test_router(&engine);

    engine.set_fail_endpoint_creation(true);
    let mut a = TestClient::connect(&router, "session-a");
    a.send(join("alice", "R1")).await;

    assert_eq!(error_codes(&a.take_messages().await), vec![6]);
    assert!(!a.is_joined());
    assert!(matches!(
        registry.get_room("R1".to_string()).await,
        Err(GroupCallError::RoomNotFound(_))
    ));
    eventually(|| engine.pipeline_releases() == 1).await;

    engine.set_fail_endpoint_creation(false);
    a.send(join("alice", "R1")).await;
    assert!(a.is_joined());
    assert_eq!(a.take_messages().await, vec![existing(&[])]);

    registry.cancel();
}
