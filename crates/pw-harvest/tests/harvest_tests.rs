// SPDX-License-Identifier: MIT OR Apache-2.0
//! Behavioural tests for `Harvest`.

use pw_cancel::{CancelReason, CancelToken};
use pw_harvest::{Harvest, HarvestError};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct Boom(u32);

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// cancel on first failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_error_cancels_and_waits_for_unwinding() {
    let side_effects = Arc::new(Mutex::new(Vec::new()));
    let effects = side_effects.clone();

    let result = Harvest::<(), Boom>::new()
        .with(|_| async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err(Boom(7))
        })
        .with(move |scope| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                _ = scope.cancelled() => {
                    // Cleanup that itself suspends.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    effects.lock().unwrap().push(1);
                }
            }
            Ok(())
        })
        .join()
        .await;

    match result {
        Err(HarvestError::Failed(Boom(7))) => {}
        other => panic!("expected Failed(Boom(7)), got {other:?}"),
    }
    assert_eq!(*side_effects.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn sibling_sees_failure_reason() {
    let seen = Arc::new(Mutex::new(None));
    let seen2 = seen.clone();

    let _ = Harvest::<(), Boom>::new()
        .with(|_| async { Err(Boom(1)) })
        .with(move |scope| async move {
            scope.cancelled().await;
            *seen2.lock().unwrap() = scope.reason();
            Ok(())
        })
        .join()
        .await;

    assert_eq!(*seen.lock().unwrap(), Some(CancelReason::Failure));
}

#[tokio::test]
async fn values_come_back_in_push_order() {
    let values = Harvest::<u32, Boom>::new()
        .with(|_| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(1)
        })
        .with(|_| async { Ok(2) })
        .with(|_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(3)
        })
        .join()
        .await
        .unwrap();
    assert_eq!(values, vec![1, 2, 3]);
}

#[tokio::test]
async fn empty_harvest_is_ok() {
    let values = Harvest::<u32, Boom>::new().join().await.unwrap();
    assert!(values.is_empty());
}

// ---------------------------------------------------------------------------
// settled mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn settled_returns_every_slot() {
    let results = Harvest::<u32, Boom>::new()
        .with(|_| async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err(Boom(7))
        })
        .with(|scope| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = scope.cancelled() => return Ok(0),
            }
            Ok(99)
        })
        .join_settled()
        .await
        .expect("operation errors are not raised in settled mode");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Err(Boom(7)));
    assert_eq!(results[1], Ok(99), "sibling must not be cancelled");
}

// ---------------------------------------------------------------------------
// deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deadline_cancels_everything() {
    let unwound = Arc::new(Mutex::new(0u32));

    let mut harvest = Harvest::<(), Boom>::new().timeout(Duration::from_millis(100));
    for _ in 0..2 {
        let unwound = unwound.clone();
        harvest.push(move |scope| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                _ = scope.cancelled() => {
                    assert_eq!(scope.reason(), Some(CancelReason::Deadline));
                    *unwound.lock().unwrap() += 1;
                }
            }
            Ok(())
        });
    }

    let err = harvest.join().await.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert_eq!(*unwound.lock().unwrap(), 2, "both operations unwound");
}

#[tokio::test]
async fn deadline_applies_in_settled_mode() {
    let err = Harvest::<(), Boom>::new()
        .timeout(Duration::from_millis(20))
        .with(|scope| async move {
            scope.cancelled().await;
            Ok(())
        })
        .join_settled()
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::Timeout(d) if d == Duration::from_millis(20)));
}

// ---------------------------------------------------------------------------
// external cancellation and drop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn parent_cancellation_is_reported() {
    let parent = CancelToken::new();
    let trigger = parent.clone();

    let join = Harvest::<(), Boom>::with_scope(&parent)
        .with(|scope| async move {
            scope.cancelled().await;
            Ok(())
        })
        .join();

    let canceller = async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    };

    let (result, ()) = tokio::join!(join, canceller);
    assert!(matches!(result, Err(HarvestError::Cancelled)));
}

#[tokio::test]
async fn harvest_failure_does_not_cancel_parent() {
    let parent = CancelToken::new();
    let _ = Harvest::<(), Boom>::with_scope(&parent)
        .with(|_| async { Err(Boom(3)) })
        .join()
        .await;
    assert!(!parent.is_cancelled());
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn dropping_join_drops_operations() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = DropFlag(dropped.clone());

    let join = Harvest::<(), Boom>::new()
        .with(move |_| async move {
            let _flag = flag;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .join();

    let outer = tokio::time::timeout(Duration::from_millis(20), join).await;
    assert!(outer.is_err());
    assert!(dropped.load(Ordering::SeqCst), "operation dropped with join");
}
