//! Tests for positional reconciliation and result aggregation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use query_group::{QueriesObserver, QueryClient, QueryKey, QueryOptions, QueryResult, QueryStatus};
use tokio::time::sleep;

type States = Arc<Mutex<Vec<Vec<QueryResult>>>>;

fn capture(states: &States, observer: &QueriesObserver) -> query_group::Subscription {
    let states = Arc::clone(states);
    observer.subscribe(move |results| states.lock().push(results))
}

fn datas(results: &[QueryResult]) -> Vec<Option<i32>> {
    results.iter().map(|r| r.data_as::<i32>().map(|v| *v)).collect()
}

#[tokio::test(start_paused = true)]
async fn results_arrive_in_settlement_order() {
    let client = QueryClient::new();
    let observer = QueriesObserver::new(
        &client,
        vec![
            QueryOptions::new("a", || async {
                sleep(Duration::from_millis(5)).await;
                Ok(1)
            }),
            QueryOptions::new("b", || async {
                sleep(Duration::from_millis(10)).await;
                Ok(2)
            }),
        ],
    );

    let states: States = Arc::new(Mutex::new(Vec::new()));
    // Render-time read, before any subscription tick.
    states.lock().push(observer.current_result());
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(30)).await;

    let states = states.lock();
    assert_eq!(states.len(), 3);
    assert_eq!(datas(&states[0]), vec![None, None]);
    assert_eq!(datas(&states[1]), vec![Some(1), None]);
    assert_eq!(datas(&states[2]), vec![Some(1), Some(2)]);
    // Alignment holds on every notification.
    for state in states.iter() {
        assert_eq!(state.len(), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn optimistic_read_shows_loading_not_idle() {
    let client = QueryClient::new();
    let observer = QueriesObserver::new(
        &client,
        vec![QueryOptions::new("opt", || async { Ok(1) })],
    );
    let result = &observer.current_result()[0];
    assert_eq!(result.status, QueryStatus::Loading);
    assert!(result.is_fetching);
}

fn counted_descriptors(count: i32) -> Vec<QueryOptions> {
    let key1 = QueryKey::from("prev-a").with(count.to_string());
    let key2 = QueryKey::from("prev-b").with(count.to_string());
    vec![
        QueryOptions::new(key1, move || async move {
            sleep(Duration::from_millis(5)).await;
            Ok(count * 2)
        })
        .keep_previous_data(true),
        QueryOptions::new(key2, move || async move {
            sleep(Duration::from_millis(10)).await;
            Ok(count * 5)
        })
        .keep_previous_data(true),
    ]
}

#[tokio::test(start_paused = true)]
async fn keeps_previous_data_when_cardinality_is_unchanged() {
    let client = QueryClient::new();
    let observer = QueriesObserver::new(&client, counted_descriptors(1));
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(30)).await;
    assert_eq!(datas(&observer.current_result()), vec![Some(2), Some(5)]);

    observer.set_queries(counted_descriptors(2), false);

    // Both positions keep showing old data, flagged, while refetching.
    let swapped = observer.current_result();
    assert_eq!(datas(&swapped), vec![Some(2), Some(5)]);
    for result in &swapped {
        assert_eq!(result.status, QueryStatus::Success);
        assert!(result.is_previous_data);
        assert!(result.is_fetching);
    }

    sleep(Duration::from_millis(30)).await;

    let states = states.lock();
    // The first position settled before the second: positions fetch
    // independently, and the set reflects whichever have settled.
    assert!(states
        .iter()
        .any(|s| datas(s) == vec![Some(4), Some(5)] && s[1].is_previous_data));
    let last = states.last().expect("no notifications captured");
    assert_eq!(datas(last), vec![Some(4), Some(10)]);
    assert!(!last[0].is_previous_data);
    assert!(!last[1].is_previous_data);
}

#[tokio::test(start_paused = true)]
async fn growth_adds_a_loading_position_without_disturbing_others() {
    fn sized_descriptors(count: i32) -> Vec<QueryOptions> {
        (1..=count)
            .map(|i| {
                let key = QueryKey::from("grow").with(count.to_string()).with(i.to_string());
                QueryOptions::new(key, move || async move {
                    sleep(Duration::from_millis(5 * i as u64)).await;
                    Ok(i * count * 2)
                })
                .keep_previous_data(true)
            })
            .collect()
    }

    let client = QueryClient::new();
    let observer = QueriesObserver::new(&client, sized_descriptors(2));
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(30)).await;
    assert_eq!(datas(&observer.current_result()), vec![Some(4), Some(8)]);

    observer.set_queries(sized_descriptors(3), false);

    let grown = observer.current_result();
    assert_eq!(grown.len(), 3);
    // Existing positions retain their data; the new one borrows nothing.
    assert!(grown[0].is_previous_data && grown[0].is_fetching);
    assert!(grown[1].is_previous_data && grown[1].is_fetching);
    assert_eq!(grown[2].status, QueryStatus::Loading);
    assert!(!grown[2].is_previous_data);
    assert_eq!(datas(&grown), vec![Some(4), Some(8), None]);

    sleep(Duration::from_millis(30)).await;
    let last = observer.current_result();
    assert_eq!(datas(&last), vec![Some(6), Some(12), Some(18)]);
    assert!(last.iter().all(|r| !r.is_previous_data));
}

#[tokio::test(start_paused = true)]
async fn shrinking_discards_trailing_positions() {
    fn descriptor(i: i32) -> QueryOptions {
        QueryOptions::new(QueryKey::from("shrink").with(i.to_string()), move || async move {
            sleep(Duration::from_millis(10)).await;
            Ok(i)
        })
    }

    let client = QueryClient::new();
    let observer = QueriesObserver::new(&client, vec![descriptor(1), descriptor(2), descriptor(3)]);
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub = capture(&states, &observer);

    observer.set_queries(vec![descriptor(1)], false);
    assert_eq!(observer.current_result().len(), 1);

    sleep(Duration::from_millis(30)).await;

    // Settlements of discarded positions never resurface.
    let states = states.lock();
    assert!(states.iter().all(|s| s.len() == 1));
    assert_eq!(datas(&observer.current_result()), vec![Some(1)]);
}

#[tokio::test(start_paused = true)]
async fn disabled_queries_stay_idle() {
    let client = QueryClient::new();
    let observer = QueriesObserver::new(
        &client,
        vec![
            QueryOptions::new("disabled", || async {
                sleep(Duration::from_millis(5)).await;
                Ok(1)
            })
            .enabled(false),
            QueryOptions::new("enabled", || async {
                sleep(Duration::from_millis(10)).await;
                Ok(2)
            }),
        ],
    );
    let states: States = Arc::new(Mutex::new(Vec::new()));
    states.lock().push(observer.current_result());
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(30)).await;

    let states = states.lock();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0][0].status, QueryStatus::Idle);
    assert_eq!(states[0][1].status, QueryStatus::Loading);
    assert_eq!(states[1][0].status, QueryStatus::Idle);
    assert_eq!(states[1][1].status, QueryStatus::Success);
    assert_eq!(datas(&states[1]), vec![None, Some(2)]);
}

#[tokio::test(start_paused = true)]
async fn one_settlement_notifies_a_group_once() {
    fn descriptor() -> QueryOptions {
        QueryOptions::new("dup", || async {
            sleep(Duration::from_millis(5)).await;
            Ok(7)
        })
    }

    let client = QueryClient::new();
    // Two positions over one cache entry: its settlement fans out to both
    // children back-to-back.
    let observer = QueriesObserver::new(&client, vec![descriptor(), descriptor()]);
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(20)).await;

    let states = states.lock();
    // The burst coalesces into one downstream call carrying the final set,
    // never an intermediate one with a single position updated.
    assert_eq!(states.len(), 1);
    assert_eq!(datas(&states[0]), vec![Some(7), Some(7)]);
}

#[tokio::test(start_paused = true)]
async fn enabling_a_position_starts_its_fetch() {
    fn descriptors(enabled: bool) -> Vec<QueryOptions> {
        vec![QueryOptions::new("flip", || async {
            sleep(Duration::from_millis(5)).await;
            Ok(9)
        })
        .enabled(enabled)]
    }

    let client = QueryClient::new();
    let observer = QueriesObserver::new(&client, descriptors(false));
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(observer.current_result()[0].status, QueryStatus::Idle);

    observer.set_queries(descriptors(true), false);
    sleep(Duration::from_millis(20)).await;

    let states = states.lock();
    assert!(states.iter().any(|s| s[0].status == QueryStatus::Loading));
    let last = states.last().expect("no notifications captured");
    assert_eq!(last[0].status, QueryStatus::Success);
    assert_eq!(datas(last), vec![Some(9)]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_descriptor_list_does_not_notify() {
    fn descriptors() -> Vec<QueryOptions> {
        vec![
            QueryOptions::new("idem-a", || async { Ok(1) }),
            QueryOptions::new("idem-b", || async { Ok(2) }),
        ]
    }

    let client = QueryClient::new();
    let observer = QueriesObserver::new(&client, descriptors());
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub = capture(&states, &observer);

    sleep(Duration::from_millis(10)).await;
    let settled = states.lock().len();

    observer.set_queries(descriptors(), false);
    sleep(Duration::from_millis(10)).await;

    assert_eq!(states.lock().len(), settled);
    assert_eq!(datas(&observer.current_result()), vec![Some(1), Some(2)]);
}

#[tokio::test(start_paused = true)]
async fn no_notifications_after_unsubscribe() {
    let client = QueryClient::new();
    let observer = QueriesObserver::new(
        &client,
        vec![QueryOptions::new("teardown", || async {
            sleep(Duration::from_millis(10)).await;
            Ok(1)
        })],
    );
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let sub = capture(&states, &observer);

    sleep(Duration::from_millis(2)).await;
    sub.unsubscribe();
    sleep(Duration::from_millis(30)).await;

    assert!(states.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn observers_with_equal_keys_share_one_fetch() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let fetches = Arc::new(AtomicU32::new(0));
    let descriptor = {
        let fetches = Arc::clone(&fetches);
        QueryOptions::new("shared", move || {
            let fetches = Arc::clone(&fetches);
            async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                Ok(7)
            }
        })
    };

    let client = QueryClient::new();
    let first = QueriesObserver::new(&client, vec![descriptor.clone()]);
    let second = QueriesObserver::new(&client, vec![descriptor]);
    let states: States = Arc::new(Mutex::new(Vec::new()));
    let _sub_a = capture(&states, &first);
    let _sub_b = capture(&states, &second);

    sleep(Duration::from_millis(20)).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(datas(&first.current_result()), vec![Some(7)]);
    assert_eq!(datas(&second.current_result()), vec![Some(7)]);
}
