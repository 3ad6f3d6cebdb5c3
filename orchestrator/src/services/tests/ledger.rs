//! Tests for the SQLite progress ledger
//!
//! Covers lazy record creation, ordering of claims, the transition rules,
//! crash recovery and the layout guard.

use tempfile::tempdir;
use tokio_test::{assert_err, assert_ok};

use crate::error::OrchestratorError;
use crate::services::ledger::{LedgerLayout, SqliteProgressStore, INTERRUPTED_REASON};
use crate::traits::ProgressStore;
use shared::ProgressStatus;

fn layout(space_size: u64) -> LedgerLayout {
    LedgerLayout {
        signature: format!("test:size={space_size}"),
        space_size,
    }
}

fn store(space_size: u64, max_attempts: u32) -> SqliteProgressStore {
    SqliteProgressStore::in_memory(layout(space_size), max_attempts).expect("in-memory ledger")
}

#[tokio::test]
async fn test_fresh_ledger_claims_in_index_order() {
    let ledger = store(3, 3);

    let first = ledger.claim_next(None).await.unwrap().unwrap();
    assert_eq!(first.index, 0);
    assert_eq!(first.status, ProgressStatus::InProgress);
    assert_eq!(first.attempts, 1);

    let second = ledger.claim_next(Some(first.index)).await.unwrap().unwrap();
    assert_eq!(second.index, 1);

    // Index 0 is in progress, so a scan from the start skips it
    let third = ledger.claim_next(None).await.unwrap().unwrap();
    assert_eq!(third.index, 2);

    assert!(ledger.claim_next(None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_past_end_of_space_is_none() {
    let ledger = store(2, 3);
    assert!(ledger.claim_next(Some(1)).await.unwrap().is_none());
    assert!(ledger.claim_next(Some(u64::MAX)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_space_has_nothing_to_claim() {
    let ledger = store(0, 3);
    assert!(ledger.claim_next(None).await.unwrap().is_none());

    let counts = ledger.count_by_status().await.unwrap();
    assert_eq!(counts.space_size, 0);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn test_gaps_between_observed_records_are_claimable() {
    let ledger = store(6, 3);

    let zero = ledger.claim_next(None).await.unwrap().unwrap();
    ledger.mark_completed(zero.index, "output/cat_0.png", None).await.unwrap();

    let four = ledger.claim_next(Some(3)).await.unwrap().unwrap();
    assert_eq!(four.index, 4);
    ledger.mark_completed(four.index, "output/cat_4.png", None).await.unwrap();

    // 1 was never observed and sits between two completed records
    let one = ledger.claim_next(None).await.unwrap().unwrap();
    assert_eq!(one.index, 1);

    // From 4 onwards only 5 is left
    let five = ledger.claim_next(Some(4)).await.unwrap().unwrap();
    assert_eq!(five.index, 5);
}

#[tokio::test]
async fn test_mark_completed_is_idempotent() {
    let ledger = store(2, 3);
    let claimed = ledger.claim_next(None).await.unwrap().unwrap();

    let done = ledger
        .mark_completed(claimed.index, "output/cat_0.png", Some("0xabc".into()))
        .await
        .unwrap();
    assert_eq!(done.status, ProgressStatus::Completed);
    assert_eq!(done.artifact_ref.as_deref(), Some("output/cat_0.png"));
    assert_eq!(done.storage_ref.as_deref(), Some("0xabc"));

    let again = ledger
        .mark_completed(claimed.index, "output/cat_0.png", Some("0xabc".into()))
        .await
        .unwrap();
    assert_eq!(again, done);

    let conflicting = ledger.mark_completed(claimed.index, "output/other.png", None).await;
    assert!(matches!(
        conflicting,
        Err(OrchestratorError::InvalidTransition {
            from: ProgressStatus::Completed,
            to: ProgressStatus::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_completed_records_are_never_reclaimed() {
    let ledger = store(1, 3);
    let claimed = ledger.claim_next(None).await.unwrap().unwrap();
    ledger.mark_completed(claimed.index, "output/cat_0.png", None).await.unwrap();

    assert!(ledger.claim_next(None).await.unwrap().is_none());

    let failing = ledger.mark_failed(claimed.index, "late failure").await;
    assert!(matches!(failing, Err(OrchestratorError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_transitions_require_a_claim() {
    let ledger = store(3, 3);

    let unknown = assert_err!(ledger.mark_completed(2, "output/cat_2.png", None).await);
    assert!(matches!(unknown, OrchestratorError::PersistenceError { .. }));
}

#[tokio::test]
async fn test_failed_records_retry_until_attempts_exhausted() {
    let ledger = store(1, 2);

    let first = ledger.claim_next(None).await.unwrap().unwrap();
    let failed = ledger.mark_failed(first.index, "backend error").await.unwrap();
    assert_eq!(failed.status, ProgressStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("backend error"));

    let retry = ledger.claim_next(None).await.unwrap().unwrap();
    assert_eq!(retry.index, 0);
    assert_eq!(retry.attempts, 2);
    ledger.mark_failed(retry.index, "backend error again").await.unwrap();

    assert!(ledger.claim_next(None).await.unwrap().is_none());

    let counts = ledger.count_by_status().await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.retries_exhausted, 1);
    assert!(ledger.get(0).await.unwrap().unwrap().retries_exhausted(2));
}

#[tokio::test]
async fn test_failure_keeps_earlier_artifact_reference() {
    let ledger = store(1, 3);
    let claimed = ledger.claim_next(None).await.unwrap().unwrap();
    let failed = ledger.mark_failed(claimed.index, "boom").await.unwrap();
    assert!(failed.artifact_ref.is_none());
    assert_eq!(failed.attempts, 1);
}

#[tokio::test]
async fn test_recover_interrupted_returns_claims_to_pending() {
    let ledger = store(3, 3);
    ledger.claim_next(None).await.unwrap().unwrap();
    ledger.claim_next(Some(0)).await.unwrap().unwrap();

    assert_eq!(ledger.recover_interrupted().await.unwrap(), 2);
    assert_eq!(ledger.recover_interrupted().await.unwrap(), 0);

    let record = ledger.get(1).await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Pending);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.last_error.as_deref(), Some(INTERRUPTED_REASON));

    let reclaimed = ledger.claim_next(None).await.unwrap().unwrap();
    assert_eq!(reclaimed.index, 0);
    assert_eq!(reclaimed.attempts, 1);
}

#[tokio::test]
async fn test_recovery_keeps_attempts_from_real_failures() {
    let ledger = store(1, 3);
    let first = ledger.claim_next(None).await.unwrap().unwrap();
    ledger.mark_failed(first.index, "backend error").await.unwrap();
    ledger.claim_next(None).await.unwrap().unwrap();

    assert_ok!(ledger.recover_interrupted().await);
    let record = ledger.get(0).await.unwrap().unwrap();
    assert_eq!(record.status, ProgressStatus::Pending);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_crash_on_last_attempt_stays_claimable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("generations.db");

    {
        let ledger = SqliteProgressStore::open(&path, layout(2), 1).unwrap();
        let claimed = ledger.claim_next(None).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
    }

    let reopened = SqliteProgressStore::open(&path, layout(2), 1).unwrap();
    assert_eq!(assert_ok!(reopened.recover_interrupted().await), 1);

    let next = reopened.claim_next(None).await.unwrap().unwrap();
    assert_eq!(next.index, 0);
    assert_eq!(next.attempts, 1);
}

#[tokio::test]
async fn test_repeated_interruptions_never_exhaust_attempts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("generations.db");

    for _ in 0..3 {
        let ledger = SqliteProgressStore::open(&path, layout(2), 3).unwrap();
        ledger.recover_interrupted().await.unwrap();
        let claimed = ledger.claim_next(None).await.unwrap().unwrap();
        assert_eq!(claimed.index, 0);
        assert_eq!(claimed.attempts, 1);
    }

    let ledger = SqliteProgressStore::open(&path, layout(2), 3).unwrap();
    ledger.recover_interrupted().await.unwrap();
    let counts = ledger.count_by_status().await.unwrap();
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.pending, 2);
    assert_eq!(ledger.claim_next(None).await.unwrap().unwrap().index, 0);
}

#[tokio::test]
async fn test_frontier_skips_observed_islands_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("generations.db");

    {
        let ledger = SqliteProgressStore::open(&path, layout(6), 3).unwrap();
        assert_eq!(ledger.claim_next(None).await.unwrap().unwrap().index, 0);
        assert_eq!(ledger.claim_next(Some(2)).await.unwrap().unwrap().index, 3);
    }

    // 0 and 3 stay in progress; everything else is claimed lowest first
    let reopened = SqliteProgressStore::open(&path, layout(6), 3).unwrap();
    let mut order = Vec::new();
    while let Some(record) = reopened.claim_next(None).await.unwrap() {
        order.push(record.index);
    }
    assert_eq!(order, vec![1, 2, 4, 5]);
    assert_eq!(reopened.count_by_status().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_counts_treat_unobserved_indices_as_pending() {
    let ledger = store(10, 3);
    let zero = ledger.claim_next(None).await.unwrap().unwrap();
    ledger.mark_completed(zero.index, "output/cat_0.png", None).await.unwrap();
    let one = ledger.claim_next(None).await.unwrap().unwrap();
    ledger.mark_failed(one.index, "boom").await.unwrap();
    ledger.claim_next(Some(1)).await.unwrap().unwrap();

    let counts = ledger.count_by_status().await.unwrap();
    assert_eq!(counts.space_size, 10);
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.in_progress, 1);
    assert_eq!(counts.pending, 7);
    assert_eq!(counts.retries_exhausted, 0);
    assert_eq!(
        counts.pending + counts.in_progress + counts.completed + counts.failed,
        counts.space_size
    );
}

#[tokio::test]
async fn test_get_unknown_index_is_none() {
    let ledger = store(5, 3);
    assert!(ledger.get(4).await.unwrap().is_none());
}

#[tokio::test]
async fn test_progress_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("generations.db");

    {
        let ledger = SqliteProgressStore::open(&path, layout(4), 3).unwrap();
        let claimed = ledger.claim_next(None).await.unwrap().unwrap();
        ledger.mark_completed(claimed.index, "output/cat_0.png", None).await.unwrap();
        // Simulated crash: claimed but never finished
        ledger.claim_next(Some(0)).await.unwrap().unwrap();
    }

    let reopened = SqliteProgressStore::open(&path, layout(4), 3).unwrap();
    let counts = reopened.count_by_status().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.in_progress, 1);

    assert_eq!(reopened.recover_interrupted().await.unwrap(), 1);
    let next = reopened.claim_next(None).await.unwrap().unwrap();
    assert_eq!(next.index, 1);
    assert_eq!(next.attempts, 1);
}

#[tokio::test]
async fn test_layout_mismatch_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("generations.db");

    assert_ok!(SqliteProgressStore::open(&path, layout(4), 3));
    let result = SqliteProgressStore::open(&path, layout(5), 3);

    match result {
        Err(err @ OrchestratorError::LayoutMismatch { .. }) => assert!(err.is_fatal()),
        Err(other) => panic!("expected layout mismatch, got {other}"),
        Ok(_) => panic!("expected layout mismatch"),
    }
}
