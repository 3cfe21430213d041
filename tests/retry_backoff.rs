//! Retry-with-backoff behavior under a paused tokio clock
//!
//! Time is paused so the sleeps between attempts complete instantly while
//! `tokio::time::Instant` still reports the virtual time that elapsed.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tripguard::metrics::{Metrics, RetryOutcome};
use tripguard::retry::{RetryError, RetryPolicy, base_delay, compute_delay, retry_with_backoff};

fn no_jitter(attempts: u32, base_ms: u64) -> RetryPolicy<String> {
    RetryPolicy::new(attempts, base_ms)
        .unwrap()
        .with_jitter_ratio(0.0)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn succeeds_on_third_attempt_after_doubling_delays() {
    let calls = AtomicU32::new(0);
    let policy = no_jitter(3, 100);
    let start = Instant::now();

    let result = retry_with_backoff(&policy, |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 3 {
                Err(format!("transient failure {}", attempt))
            } else {
                Ok("done")
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 100ms after attempt 1, 200ms after attempt 2
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_return_last_error() {
    let policy = no_jitter(4, 50);
    let start = Instant::now();

    let err = retry_with_backoff(&policy, |attempt| async move {
        Err::<(), _>(format!("failure {}", attempt))
    })
    .await
    .unwrap_err();

    assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
    assert_eq!(err.error(), "failure 4");
    // No sleep after the final attempt
    assert_eq!(start.elapsed(), Duration::from_millis(50 + 100 + 200));
}

#[tokio::test(start_paused = true)]
async fn single_attempt_never_sleeps() {
    let policy = no_jitter(1, 10_000);
    let start = Instant::now();

    let err = retry_with_backoff(&policy, |_| async { Err::<(), _>("nope".to_string()) })
        .await
        .unwrap_err();

    assert_eq!(err.attempts(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn predicate_stops_retrying_permanent_errors() {
    let calls = AtomicU32::new(0);
    let policy = no_jitter(5, 100).retry_if(|error: &String, _| !error.starts_with("HTTP 4"));

    let err = retry_with_backoff(&policy, |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 1 {
                Err::<(), _>("HTTP 503".to_string())
            } else {
                Err("HTTP 404".to_string())
            }
        }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, RetryError::NotRetryable { attempt: 2, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn observer_sees_each_retry_with_its_delay() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = seen.clone();
    let metrics = Metrics::new().unwrap();
    let policy = no_jitter(3, 200)
        .on_retry(move |event| {
            observed
                .lock()
                .unwrap()
                .push((event.attempt, event.delay_ms, event.error.clone()));
        })
        .with_metrics(metrics.clone());

    let _ = retry_with_backoff(&policy, |attempt| async move {
        Err::<(), _>(format!("e{}", attempt))
    })
    .await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(1, 200, "e1".to_string()), (2, 400, "e2".to_string())]
    );
    assert_eq!(metrics.retry_count(RetryOutcome::Retried), 2);
    assert_eq!(metrics.retry_count(RetryOutcome::Exhausted), 1);
}

#[tokio::test(start_paused = true)]
async fn jittered_delays_stay_within_bounds() {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let recorded = delays.clone();
    let policy = RetryPolicy::new(6, 1_000)
        .unwrap()
        .with_jitter_ratio(0.2)
        .unwrap()
        .with_max_delay_ms(4_000)
        .on_retry(move |event| recorded.lock().unwrap().push(event.delay_ms));

    let _ = retry_with_backoff(&policy, |_| async { Err::<(), _>("x".to_string()) }).await;

    let delays = delays.lock().unwrap().clone();
    assert_eq!(delays.len(), 5);
    for (i, delay) in delays.iter().enumerate() {
        let base = base_delay(&policy, i as u32 + 1);
        assert!(
            *delay >= base - base / 10 && *delay <= base + base / 10,
            "retry {} delay {} outside {} ± 10%",
            i + 1,
            delay,
            base
        );
    }
}

proptest! {
    #[test]
    fn compute_delay_is_within_half_jitter_of_base(
        attempt in 1u32..12,
        base_ms in 1u64..5_000,
        jitter in 0.0f64..=1.0,
        unit in 0.0f64..=1.0,
    ) {
        let policy: RetryPolicy<String> = RetryPolicy::new(12, base_ms)
            .unwrap()
            .with_jitter_ratio(jitter)
            .unwrap();
        let base = base_delay(&policy, attempt) as f64;
        let delay = compute_delay(&policy, attempt, unit) as f64;
        let half_spread = base * jitter / 2.0;

        // Rounding may move the result by at most half a millisecond
        prop_assert!(delay >= base - half_spread - 0.5);
        prop_assert!(delay <= base + half_spread + 0.5);
    }
}
