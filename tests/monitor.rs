#[path = "common/mod.rs"]
mod common;

use common::*;
use std::time::Duration;
use taskvault::{
    DisplayStatus, ExportOptions, FixtureApi, ItemFilters, JobRecord, JobStatus, ProgressMonitor,
};

fn building_job(progress_at_offset: Duration) -> JobRecord {
    let mut job = JobRecord::new(USER, ItemFilters::default(), T0);
    job.begin(T0).unwrap();
    job.advance(JobStatus::Building, T0 + progress_at_offset).unwrap();
    job.total_progress = 40;
    job.current_list_progress = 2;
    job
}

/// Stalled exactly when more than max_stall has passed since the last progress
/// write on a running job.
#[test]
fn stall_is_flagged_strictly_after_max_stall() {
    let monitor = ProgressMonitor::default();
    let job = building_job(Duration::ZERO);

    let at_limit = monitor.evaluate(&job, T0 + Duration::from_secs(300));
    assert_eq!(at_limit.status, DisplayStatus::Job(JobStatus::Building));
    assert_eq!(at_limit.progress, 42);
    assert_eq!(at_limit.elapsed_since_progress, Some(Duration::from_secs(300)));

    let over = monitor.evaluate(&job, T0 + Duration::from_secs(301));
    assert_eq!(over.status, DisplayStatus::Stalled);
    assert_eq!(over.detail.as_deref(), Some("Status was Building, progress = 42"));
    assert!(over.status.is_final());
}

/// Running past the maximum duration wins over a stall.
#[test]
fn max_time_takes_precedence() {
    let monitor = ProgressMonitor::default();
    let job = building_job(Duration::from_secs(3_500));
    let view = monitor.evaluate(&job, T0 + Duration::from_secs(3_601));
    assert_eq!(view.status, DisplayStatus::ExceededMaxTime);
    assert_eq!(view.elapsed_since_start, Some(Duration::from_secs(3_601)));

    let stale = building_job(Duration::ZERO);
    let view = monitor.evaluate(&stale, T0 + Duration::from_secs(4_000));
    assert_eq!(view.status, DisplayStatus::ExceededMaxTime);
}

/// A job never picked up is reported as not started, then as stalled.
#[test]
fn unstarted_job_is_reported() {
    let monitor = ProgressMonitor::from_options(&ExportOptions::default().with_max_start_delay(Duration::from_secs(60)));
    let job = JobRecord::new(USER, ItemFilters::default(), T0);

    let early = monitor.evaluate(&job, T0 + Duration::from_secs(30));
    assert_eq!(early.status, DisplayStatus::Job(JobStatus::Starting));
    assert_eq!(early.elapsed_since_start, None);

    let late = monitor.evaluate(&job, T0 + Duration::from_secs(61));
    assert_eq!(late.status, DisplayStatus::NotStarted);
    assert_eq!(late.detail.as_deref(), Some("Status was Starting, progress = 0"));

    let stale = monitor.evaluate(&job, T0 + Duration::from_secs(301));
    assert_eq!(stale.status, DisplayStatus::Stalled);
}

/// Terminal jobs pass through untouched, however old.
#[test]
fn terminal_jobs_pass_through() {
    let monitor = ProgressMonitor::default();
    let mut job = building_job(Duration::ZERO);
    job.fail("Server error: boom", T0);
    let view = monitor.evaluate(&job, T0 + Duration::from_secs(100_000));
    assert_eq!(view.status, DisplayStatus::Job(JobStatus::Error));
    assert_eq!(view.error_message.as_deref(), Some("Server error: boom"));
    assert_eq!(view.elapsed_since_progress, None);
    assert!(view.detail.is_none());
}

/// Polling through the service never changes the stored record.
#[test]
fn polling_is_read_only() {
    let api = ScriptedApi::new(FixtureApi::new(vec![]));
    let h = harness(&api, creds_for(USER), test_options());
    h.service.start_job(USER, ItemFilters::default()).unwrap();
    let before = h.service.job(USER).unwrap().unwrap();
    let writes = h.store.job_writes().len();

    h.clock.advance(Duration::from_secs(1_000));
    let view = h.service.get_progress(USER).unwrap().unwrap();
    assert_eq!(view.status, DisplayStatus::Stalled);
    assert_eq!(h.service.job(USER).unwrap().unwrap(), before);
    assert_eq!(h.store.job_writes().len(), writes);
    assert!(h.service.get_progress("nobody@example.com").unwrap().is_none());
}
