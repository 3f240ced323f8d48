use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hydrocache::query::{
    CacheConfig, CacheStats, DehydrateOptions, DehydratedState, EventKind, FetchError,
    HydrateOptions, Inspector, QueryClient, QueryFilters, QueryFn, QueryKey, QueryOptions,
    QueryResult, QueryStatus, RetryPolicy,
};
use serde_json::{Value, json};

type Log = Arc<Mutex<Vec<(&'static str, QueryStatus, Option<Value>, bool)>>>;

fn recorder(name: &'static str, log: &Log) -> impl Fn(&QueryResult) + Send + Sync + 'static {
    let log = log.clone();
    move |result: &QueryResult| {
        log.lock().expect("log lock").push((
            name,
            result.status,
            result.data.clone(),
            result.is_fetching(),
        ));
    }
}

fn delayed_fn(calls: Arc<AtomicUsize>, value: Value, delay: Duration) -> QueryFn {
    QueryFn::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, FetchError>(value)
        }
    })
}

#[test]
fn reordered_object_fields_hash_identically() {
    let left = QueryKey::from(json!(["todos", {"page": 1, "filter": {"done": true, "tag": "x"}}]));
    let right = QueryKey::from(json!(["todos", {"filter": {"tag": "x", "done": true}, "page": 1}]));
    assert_eq!(left.hash(), right.hash());

    let reversed = QueryKey::from(json!([{"page": 1}, "todos"]));
    assert_ne!(left.hash(), reversed.hash());
}

#[tokio::test(start_paused = true)]
async fn two_observers_share_one_fetch_in_subscription_order() {
    let client = QueryClient::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let query_fn = delayed_fn(calls.clone(), json!("test"), Duration::from_millis(10));

    let _first = client
        .watch("check", query_fn.clone(), QueryOptions::new(), recorder("a", &log))
        .expect("runtime available");
    let _second = client
        .watch("check", query_fn, QueryOptions::new(), recorder("b", &log))
        .expect("runtime available");

    assert_eq!(
        *log.lock().expect("log lock"),
        vec![
            ("a", QueryStatus::Loading, None, true),
            ("b", QueryStatus::Loading, None, true),
        ]
    );

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        log.lock().expect("log lock")[2..],
        [
            ("a", QueryStatus::Success, Some(json!("test")), false),
            ("b", QueryStatus::Success, Some(json!("test")), false),
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_subscribers_run_a_single_fetch() {
    let client = QueryClient::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let query_fn = delayed_fn(calls.clone(), json!([1, 2, 3]), Duration::from_millis(50));

    let watchers: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let query_fn = query_fn.clone();
            tokio::spawn(async move {
                client
                    .watch(
                        json!(["list", {"page": 1}]),
                        query_fn,
                        QueryOptions::new().stale_time(Duration::from_secs(60)),
                        |_: &QueryResult| {},
                    )
                    .expect("runtime available")
            })
        })
        .collect();
    let fetchers: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let query_fn = query_fn.clone();
            tokio::spawn(async move {
                client
                    .fetch_query(
                        json!(["list", {"page": 1}]),
                        query_fn,
                        QueryOptions::new().stale_time(Duration::from_secs(60)),
                    )
                    .await
            })
        })
        .collect();

    let mut observers = Vec::new();
    for watcher in watchers {
        observers.push(watcher.await.expect("watch task"));
    }
    for fetcher in fetchers {
        assert_eq!(fetcher.await.expect("fetch task"), Ok(json!([1, 2, 3])));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        observers
            .iter()
            .all(|observer| observer.current_result().data == Some(json!([1, 2, 3])))
    );
}

#[tokio::test(start_paused = true)]
async fn inspection_counts_follow_staleness() {
    let client = QueryClient::new(CacheConfig::default());
    let inspector = Inspector::attach(client.cache(), 64);

    let _observer = client
        .watch(
            "fresh",
            QueryFn::constant(json!(1)),
            QueryOptions::new().stale_time(Duration::from_millis(300)),
            |_: &QueryResult| {},
        )
        .expect("runtime available");
    tokio::time::sleep(Duration::from_millis(1)).await;

    let CacheStats { fresh, stale, .. } = inspector.stats();
    assert_eq!((fresh, stale), (1, 0));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let CacheStats { fresh, stale, .. } = inspector.stats();
    assert_eq!((fresh, stale), (0, 1));
    let last = inspector.drain(64).pop().expect("events recorded");
    assert_eq!(last.kind, EventKind::ObserverResultsUpdated);
    assert!(last.query.is_stale);
}

#[tokio::test(start_paused = true)]
async fn inspection_counts_follow_staleness_without_observers() {
    let client = QueryClient::new(CacheConfig {
        stale_time_ms: 300,
        ..CacheConfig::default()
    });
    let inspector = Inspector::attach(client.cache(), 64);

    client.set_query_data("seeded", json!("value"));
    let CacheStats { fresh, stale, .. } = inspector.stats();
    assert_eq!((fresh, stale), (1, 0));

    tokio::time::sleep(Duration::from_millis(301)).await;

    assert_eq!(inspector.stats(), client.cache().stats());
    let CacheStats { fresh, stale, .. } = inspector.stats();
    assert_eq!((fresh, stale), (0, 1));
    let last = inspector.drain(64).pop().expect("events recorded");
    assert_eq!(last.kind, EventKind::ObserverResultsUpdated);
    assert!(last.query.is_stale);
}

#[tokio::test(start_paused = true)]
async fn unobserved_entry_is_evicted_after_cache_time() {
    let client = QueryClient::new(CacheConfig::default());
    let key = QueryKey::from("short-lived");
    let observer = client
        .watch(
            key.clone(),
            QueryFn::constant(json!("value")),
            QueryOptions::new().cache_time(Duration::from_millis(100)),
            |_: &QueryResult| {},
        )
        .expect("runtime available");
    tokio::time::sleep(Duration::from_millis(1)).await;

    drop(observer);
    tokio::time::sleep(Duration::from_millis(99)).await;
    assert!(client.cache().find_by_key(&key).is_some());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(client.cache().find_by_key(&key).is_none());
    assert!(client.get_query_data(key).is_none());
}

#[tokio::test(start_paused = true)]
async fn overwriting_an_unobserved_fetch_still_evicts_the_entry() {
    let client = QueryClient::new(CacheConfig {
        cache_time_ms: Some(100),
        ..CacheConfig::default()
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let prefetch = tokio::spawn({
        let client = client.clone();
        let query_fn = delayed_fn(calls.clone(), json!("slow"), Duration::from_millis(500));
        async move {
            client
                .prefetch_query("overwritten", query_fn, QueryOptions::new())
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.is_fetching(&QueryFilters::new().key("overwritten")), 1);
    client.set_query_data("overwritten", json!("manual"));
    assert_eq!(prefetch.await.expect("prefetch task"), Ok(()));

    tokio::time::sleep(Duration::from_millis(90)).await;
    assert_eq!(client.get_query_data("overwritten"), Some(json!("manual")));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(client.cache().find_by_key(&QueryKey::from("overwritten")).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn last_observer_leaving_mid_fetch_reverts_the_entry() {
    let client = QueryClient::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let observer = client
        .watch(
            "abandoned",
            delayed_fn(calls.clone(), json!("late"), Duration::from_millis(50)),
            QueryOptions::new(),
            recorder("a", &log),
        )
        .expect("runtime available");

    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(observer);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = client.get_query_state("abandoned").expect("entry kept for cache time");
    assert_eq!(state.status, QueryStatus::Idle);
    assert!(state.data.is_none());
    assert_eq!(client.is_fetching(&QueryFilters::new()), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(log.lock().expect("log lock").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resubscribing_before_cache_time_keeps_the_entry() {
    let client = QueryClient::new(CacheConfig::default());
    let options = QueryOptions::new()
        .cache_time(Duration::from_millis(100))
        .stale_time(Duration::MAX);
    let observer = client
        .watch("kept", QueryFn::constant(json!(1)), options.clone(), |_: &QueryResult| {})
        .expect("runtime available");
    tokio::time::sleep(Duration::from_millis(1)).await;
    drop(observer);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _again = client
        .watch("kept", QueryFn::constant(json!(2)), options, |_: &QueryResult| {})
        .expect("runtime available");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(client.get_query_data("kept"), Some(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn server_prefetch_hydrates_without_refetching() {
    let server = QueryClient::new(CacheConfig::server());
    server
        .prefetch_query(
            "success",
            QueryFn::constant(json!("prefetched")),
            QueryOptions::new(),
        )
        .await
        .expect("prefetch settles");
    let wire = server
        .dehydrate(&DehydrateOptions::new())
        .to_json()
        .expect("serializable snapshot");

    let client = QueryClient::new(CacheConfig::default());
    let snapshot = DehydratedState::from_json(&wire).expect("decodable snapshot");
    assert_eq!(client.hydrate(&snapshot, &HydrateOptions::new()), Ok(1));

    let calls = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let _observer = client
        .watch(
            "success",
            delayed_fn(calls.clone(), json!("refetched"), Duration::from_millis(5)),
            QueryOptions::new().stale_time(Duration::from_secs(60)),
            recorder("consumer", &log),
        )
        .expect("runtime available");

    assert_eq!(
        *log.lock().expect("log lock"),
        vec![(
            "consumer",
            QueryStatus::Success,
            Some(json!("prefetched")),
            false
        )]
    );
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(client.notify_window_focus(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.get_query_data("success"), Some(json!("refetched")));
}

#[tokio::test(start_paused = true)]
async fn hydrating_a_cache_with_its_own_snapshot_changes_nothing() {
    let client = QueryClient::new(CacheConfig::default());
    client.set_query_data("a", json!({"id": 1}));
    client.set_query_data(json!(["b", 2]), json!(null));
    let before = client.dehydrate(&DehydrateOptions::new());

    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    let _subscription = client.cache().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(client.hydrate(&before, &HydrateOptions::new()), Ok(0));
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert_eq!(client.dehydrate(&DehydrateOptions::new()), before);
}

#[tokio::test(start_paused = true)]
async fn snapshot_round_trips_through_json() {
    let client = QueryClient::new(CacheConfig::server());
    client.set_query_data(json!(["todos", {"done": false}]), json!([{"id": 1, "title": "a"}]));
    client.set_query_data("count", json!(42));
    client.set_query_data("nothing", Value::Null);

    let state = client.dehydrate(&DehydrateOptions::new());
    let text = state.to_json().expect("serializable");
    assert_eq!(DehydratedState::from_json(&text), Ok(state));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_as_error_state() {
    let client = QueryClient::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let failing = QueryFn::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<Value, _>(FetchError::with_code("upstream down", "unavailable")) }
    });
    let log: Log = Arc::default();
    let observer = client
        .watch(
            "flaky",
            failing,
            QueryOptions::new().retry(RetryPolicy::new(2).with_base_delay(Duration::from_millis(100))),
            recorder("a", &log),
        )
        .expect("runtime available");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let statuses: Vec<QueryStatus> = log
        .lock()
        .expect("log lock")
        .iter()
        .map(|(_, status, _, _)| *status)
        .collect();
    assert!(statuses.iter().all(|status| *status == QueryStatus::Loading));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let result = observer.current_result();
    assert!(result.is_error());
    assert!(!result.is_fetching());
    assert_eq!(result.failure_count, 3);
    assert_eq!(
        result.error.as_ref().and_then(|err| err.code.as_deref()),
        Some("unavailable")
    );
}

#[tokio::test(start_paused = true)]
async fn removing_an_entry_discards_its_fetch() {
    let client = QueryClient::new(CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let _observer = client
        .watch(
            "doomed",
            delayed_fn(calls.clone(), json!("late"), Duration::from_millis(50)),
            QueryOptions::new(),
            recorder("a", &log),
        )
        .expect("runtime available");

    assert_eq!(client.remove_queries(&QueryFilters::new().key("doomed")), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(log.lock().expect("log lock").len(), 1);
    assert!(client.get_query_state("doomed").is_none());
}
