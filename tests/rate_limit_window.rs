//! Rate limiter admission across window boundaries

use std::sync::Arc;
use tripguard::metrics::{Admission, Metrics};
use tripguard::ratelimit::{Algorithm, Clock, ManualClock, RateLimiter, RouteLimit, RouteLimits};
use tripguard::store::MemoryStore;
use tripguard::telemetry::Telemetry;

const ROUTE: &str = "search:places";

fn limiter(clock: &ManualClock, metrics: &Metrics) -> RateLimiter {
    RateLimiter::new(
        RouteLimits::default(),
        Telemetry::default().with_metrics(metrics.clone()),
    )
    .with_clock(Arc::new(clock.clone()))
}

#[tokio::test]
async fn eleventh_request_in_window_is_rejected() {
    // Start mid-window so the reset time is in the future
    let clock = ManualClock::new(1_700_000_010_000);
    let metrics = Metrics::new().unwrap();
    let limiter = limiter(&clock, &metrics);
    let store = MemoryStore::new();

    for i in 1..=10u32 {
        let verdict = limiter.enforce(ROUTE, "user:1", Some(&store)).await.unwrap();
        assert!(verdict.allowed, "request {} should be admitted", i);
        assert_eq!(verdict.limit, 10);
        assert_eq!(verdict.remaining, 10 - i);
    }

    let denied = limiter.enforce(ROUTE, "user:1", Some(&store)).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.reset_at_epoch_ms > clock_now(&clock));
    assert_eq!(denied.retry_after_secs, 30);

    assert_eq!(metrics.admissions_count(ROUTE, Admission::Allowed), 10);
    assert_eq!(metrics.admissions_count(ROUTE, Admission::Denied), 1);
}

fn clock_now(clock: &ManualClock) -> u64 {
    clock.now_ms()
}

#[tokio::test]
async fn request_after_window_expiry_is_allowed() {
    let clock = ManualClock::new(1_700_000_040_000);
    let metrics = Metrics::new().unwrap();
    let limiter = limiter(&clock, &metrics);
    let store = MemoryStore::new();

    for _ in 0..11 {
        limiter.enforce(ROUTE, "user:1", Some(&store)).await;
    }
    let denied = limiter.enforce(ROUTE, "user:1", Some(&store)).await.unwrap();
    assert!(!denied.allowed);

    clock.set_ms(denied.reset_at_epoch_ms);
    let next = limiter.enforce(ROUTE, "user:1", Some(&store)).await.unwrap();
    assert!(next.allowed);
    assert_eq!(next.remaining, 9);
}

#[tokio::test]
async fn routes_have_independent_budgets() {
    let clock = ManualClock::new(0);
    let metrics = Metrics::new().unwrap();
    let limiter = RateLimiter::new(
        RouteLimits::empty()
            .insert("a", RouteLimit::per_minute(1))
            .insert("b", RouteLimit::per_minute(1)),
        Telemetry::default().with_metrics(metrics),
    )
    .with_clock(Arc::new(clock.clone()));
    let store = MemoryStore::new();

    assert!(limiter.enforce("a", "user:1", Some(&store)).await.unwrap().allowed);
    assert!(limiter.enforce("b", "user:1", Some(&store)).await.unwrap().allowed);
    assert!(!limiter.enforce("a", "user:1", Some(&store)).await.unwrap().allowed);
}

#[tokio::test]
async fn sliding_window_smooths_the_boundary_burst() {
    let clock = ManualClock::new(59_000);
    let metrics = Metrics::new().unwrap();
    let sliding = limiter(&clock, &metrics).with_algorithm(Algorithm::Sliding);
    let fixed = limiter(&clock, &metrics);
    let sliding_store = MemoryStore::new();
    let fixed_store = MemoryStore::new();

    for _ in 0..10 {
        assert!(sliding.enforce(ROUTE, "user:1", Some(&sliding_store)).await.unwrap().allowed);
        assert!(fixed.enforce(ROUTE, "user:1", Some(&fixed_store)).await.unwrap().allowed);
    }

    // One second into the next window, 9 of the 10 earlier requests still count
    clock.set_ms(61_000);
    let last = sliding.enforce(ROUTE, "user:1", Some(&sliding_store)).await.unwrap();
    assert!(last.allowed);
    assert_eq!(last.remaining, 0);
    assert!(!sliding.enforce(ROUTE, "user:1", Some(&sliding_store)).await.unwrap().allowed);

    // The fixed window has already reset
    for _ in 0..10 {
        assert!(fixed.enforce(ROUTE, "user:1", Some(&fixed_store)).await.unwrap().allowed);
    }
}

#[tokio::test]
async fn concurrent_requests_are_counted_exactly_once() {
    let clock = ManualClock::new(0);
    let metrics = Metrics::new().unwrap();
    let limiter = Arc::new(limiter(&clock, &metrics));
    let store = Arc::new(MemoryStore::new());

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let limiter = limiter.clone();
            let store = store.clone();
            tokio::spawn(async move {
                limiter
                    .enforce(ROUTE, "user:burst", Some(&*store))
                    .await
                    .map(|v| v.allowed)
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() == Some(true) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}
