//! Integration tests for admission control and node placement.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use pc_service::errors::{PcError, ADMISSION_DENIED, NO_CAPACITY};
use pc_test_utils::{command, participant, MockMediaEngine, TestHarness};

#[tokio::test]
async fn test_authorization_rule_admits_matching_caller() {
    let harness = TestHarness::builder()
        .nodes(1)
        .auth_pattern("^special.*")
        .build();

    harness
        .start(&participant("p-1", "specialAlice"))
        .await
        .unwrap();

    let err = harness.start(&participant("p-2", "bob")).await.unwrap_err();
    assert!(matches!(err, PcError::AdmissionDenied(_)));

    let error = err.to_error_object();
    assert_eq!(error.code, ADMISSION_DENIED);
    assert_eq!(error.message, "User cannot create a new session");

    assert_eq!(harness.loads(), vec![1]);
    assert!(!harness.sessions.contains("p-2"));
}

#[tokio::test]
async fn test_authorization_rule_is_case_insensitive_full_match() {
    let harness = TestHarness::builder().nodes(1).auth_pattern("vip-[a-z]+").build();

    harness.start(&participant("p-1", "VIP-carol")).await.unwrap();
    assert!(harness
        .start(&participant("p-2", "vip-carol-extra1"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_standard_callers_round_robin() {
    let harness = TestHarness::new(3);

    for i in 0..3 {
        harness
            .start(&participant(&format!("p-{i}"), "bob"))
            .await
            .unwrap();
    }
    assert_eq!(harness.loads(), vec![1, 1, 1]);

    harness.start(&participant("p-3", "bob")).await.unwrap();
    assert_eq!(harness.loads(), vec![2, 1, 1]);
}

#[tokio::test]
async fn test_privileged_caller_gets_least_loaded_node() {
    let harness = TestHarness::new(3);

    // Round robin puts these on nodes 0 and 1.
    harness.start(&participant("p-0", "bob")).await.unwrap();
    harness.start(&participant("p-1", "bob")).await.unwrap();

    harness
        .start(&participant("p-2", "specialAlice"))
        .await
        .unwrap();

    assert_eq!(harness.loads(), vec![1, 1, 1]);
    let summary = harness.sessions.get("p-2").unwrap().summary().await.unwrap();
    assert_eq!(summary.node_index, 2);
}

#[tokio::test]
async fn test_full_round_robin_candidate_overflows_to_least_loaded() {
    let harness = TestHarness::builder()
        .node(MockMediaEngine::new(), Some(1))
        .node(MockMediaEngine::new(), None)
        .node(MockMediaEngine::new(), None)
        .build();

    // Privileged callers fill node 0 without moving the round-robin cursor.
    harness
        .start(&participant("p-0", "specialAlice"))
        .await
        .unwrap();
    assert_eq!(harness.loads(), vec![1, 0, 0]);

    // Cursor points at node 0, which is full: overflow to the least loaded.
    harness.start(&participant("p-1", "bob")).await.unwrap();
    assert_eq!(harness.loads(), vec![1, 1, 0]);
}

#[tokio::test]
async fn test_no_capacity_rejects_start() {
    let harness = TestHarness::builder()
        .node(MockMediaEngine::new(), Some(1))
        .build();

    harness.start(&participant("p-0", "bob")).await.unwrap();
    let err = harness.start(&participant("p-1", "bob")).await.unwrap_err();

    assert!(matches!(err, PcError::NoCapacity { .. }));
    let error = err.to_error_object();
    assert_eq!(error.code, NO_CAPACITY);
    assert_eq!(error.message, "No resources left to create new session");
    assert_eq!(harness.loads(), vec![1]);
    assert!(harness.engine(0).call_count("create_pipeline") == 1);
}

#[tokio::test]
async fn test_capacity_freed_by_stop_is_reusable() {
    let harness = TestHarness::builder()
        .node(MockMediaEngine::new(), Some(1))
        .build();
    let first = participant("p-0", "bob");

    harness.start(&first).await.unwrap();
    harness.send(&first, command("stop")).await.unwrap();

    harness.start(&participant("p-1", "bob")).await.unwrap();
    assert_eq!(harness.loads(), vec![1]);
}

#[tokio::test]
async fn test_concurrent_starts_never_exceed_capacity() {
    let harness = TestHarness::builder()
        .node(MockMediaEngine::new(), Some(2))
        .node(MockMediaEngine::new(), Some(2))
        .build();

    let participants: Vec<_> = (0..10)
        .map(|i| participant(&format!("p-{i}"), "bob"))
        .collect();
    let results =
        futures_util::future::join_all(participants.iter().map(|p| harness.start(p))).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 4);
    assert_eq!(harness.loads(), vec![2, 2]);
    assert_eq!(harness.sessions.len(), 4);
}
