use std::time::Duration;
use taskvault::{paginate, FetchError, Page, PageSink, PagedFetcher, RetryObserver, RetryPolicy};

/// 250 records served 100 at a time come back as one sequence in the original
/// order, after exactly three page calls.
#[test]
fn fetch_all_flattens_every_page_in_order() {
    let all: Vec<u32> = (0..250).collect();
    let fetcher = PagedFetcher::new(RetryPolicy::default());
    let mut calls = 0;
    let got = fetcher
        .fetch_all(
            "numbers",
            |cursor| {
                calls += 1;
                paginate(&all, cursor, 100)
            },
            &mut (),
        )
        .unwrap();
    assert_eq!(got, all);
    assert_eq!(calls, 3);
}

/// A page that fails transiently R times ends the walk after exactly R calls,
/// with the last error wrapped as exhausted.
#[test]
fn retry_budget_is_per_page_and_bounded() {
    let fetcher = PagedFetcher::new(RetryPolicy::new(3, Duration::ZERO));
    let mut calls = 0;
    let err = fetcher
        .fetch_all(
            "flaky",
            |_cursor: Option<&str>| -> Result<Page<u32>, FetchError> {
                calls += 1;
                Err(FetchError::Transient(format!("HTTP 503 #{calls}")))
            },
            &mut (),
        )
        .unwrap_err();
    assert_eq!(calls, 3);
    let fe = err.downcast_ref::<FetchError>().unwrap();
    assert_eq!(fe, &FetchError::Exhausted { what: "flaky".into(), attempts: 3, last: "HTTP 503 #3".into() });
}

/// Two failures before each page still succeed with R = 3: success resets the budget.
#[test]
fn success_resets_the_budget_for_the_next_page() {
    let all: Vec<u32> = (0..20).collect();
    let fetcher = PagedFetcher::new(RetryPolicy::new(3, Duration::ZERO));
    let mut failures_left = 2;
    let mut calls = 0;
    let got = fetcher
        .fetch_all(
            "numbers",
            |cursor| {
                calls += 1;
                if failures_left > 0 {
                    failures_left -= 1;
                    return Err(FetchError::Transient("timeout".into()));
                }
                failures_left = 2;
                paginate(&all, cursor, 10)
            },
            &mut (),
        )
        .unwrap();
    assert_eq!(got, all);
    assert_eq!(calls, 6);
}

struct Collect {
    pages: Vec<Vec<u32>>,
    retries: Vec<u32>,
    fail_heartbeat: bool,
}

impl RetryObserver for Collect {
    fn retrying(&mut self, attempts_left: u32, _err: &FetchError) -> anyhow::Result<()> {
        self.retries.push(attempts_left);
        if self.fail_heartbeat {
            anyhow::bail!("heartbeat lost");
        }
        Ok(())
    }
}

impl PageSink<u32> for Collect {
    fn page(&mut self, items: Vec<u32>) -> anyhow::Result<()> {
        self.pages.push(items);
        Ok(())
    }
}

/// The sink sees every page before the next is fetched and is told about each retry.
#[test]
fn for_each_page_streams_and_reports_retries() {
    let all: Vec<u32> = (0..5).collect();
    let fetcher = PagedFetcher::new(RetryPolicy::new(3, Duration::ZERO));
    let mut sink = Collect { pages: vec![], retries: vec![], fail_heartbeat: false };
    let mut first = true;
    let n = fetcher
        .for_each_page(
            "numbers",
            |cursor| {
                if first {
                    first = false;
                    return Err(FetchError::Transient("reset".into()));
                }
                paginate(&all, cursor, 2)
            },
            &mut sink,
        )
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(sink.pages, vec![vec![0, 1], vec![2, 3], vec![4]]);
    assert_eq!(sink.retries, vec![2]);
}

/// A failing retry observer stops the walk with its own error, not the fetch error.
#[test]
fn observer_failure_ends_the_walk() {
    let fetcher = PagedFetcher::new(RetryPolicy::new(5, Duration::ZERO));
    let mut sink = Collect { pages: vec![], retries: vec![], fail_heartbeat: true };
    let err = fetcher
        .for_each_page(
            "numbers",
            |_cursor: Option<&str>| -> Result<Page<u32>, FetchError> { Err(FetchError::Transient("reset".into())) },
            &mut sink,
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "heartbeat lost");
    assert_eq!(sink.retries.len(), 1);
    assert!(sink.pages.is_empty());
}

/// Quota errors skip the retry budget entirely.
#[test]
fn quota_errors_are_not_retried() {
    let fetcher = PagedFetcher::new(RetryPolicy::new(5, Duration::ZERO));
    let mut calls = 0;
    let err = fetcher
        .fetch_all(
            "lists",
            |_cursor: Option<&str>| -> Result<Page<u32>, FetchError> {
                calls += 1;
                Err(FetchError::QuotaExceeded("HTTP 403".into()))
            },
            &mut (),
        )
        .unwrap_err();
    assert_eq!(calls, 1);
    assert!(matches!(err.downcast_ref::<FetchError>(), Some(FetchError::QuotaExceeded(_))));
}
