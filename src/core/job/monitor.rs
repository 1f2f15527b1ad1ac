//! Export job monitor
//!
//! [`monitor_job`] turns status polling into a lazy stream of [`MonitorEvent`]s.
//! One poll per item; the stream sleeps `poll_interval` before every poll but
//! the first, and ends after yielding an event for a complete or failed job, or
//! the first event observed past the deadline. Poll errors are yielded and
//! polling continues.

use crate::adapters::bulkdata::BulkDataClient;
use crate::domain::{BulkFetchError, JobStatus};
use futures::stream::{self, Stream};
use std::time::Duration;
use tokio::time::Instant;

/// One polling observation
#[derive(Debug)]
pub struct MonitorEvent {
    /// Last known status (carried over when this poll failed)
    pub status: JobStatus,

    /// Error raised by this poll, if any
    pub error: Option<BulkFetchError>,

    /// Time since monitoring started
    pub elapsed: Duration,
}

impl MonitorEvent {
    /// Whether the job is complete as of this event
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}

struct MonitorState<'a> {
    client: &'a dyn BulkDataClient,
    job_url: &'a str,
    poll_interval: Duration,
    timeout: Duration,
    started: Instant,
    last: JobStatus,
    polls: usize,
    finished: bool,
}

/// Poll `job_url` until the job is terminal or `timeout` has passed
///
/// The clock starts when this function is called. The stream is not
/// restartable; consume it once.
///
/// # Arguments
///
/// * `client` - Bulk data client used for status polls
/// * `job_url` - Job status URL
/// * `poll_interval` - Sleep between polls
/// * `timeout` - Deadline measured from the call
pub fn monitor_job<'a>(
    client: &'a dyn BulkDataClient,
    job_url: &'a str,
    poll_interval: Duration,
    timeout: Duration,
) -> impl Stream<Item = MonitorEvent> + Send + 'a {
    let state = MonitorState {
        client,
        job_url,
        poll_interval,
        timeout,
        started: Instant::now(),
        last: JobStatus::default(),
        polls: 0,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        if state.polls > 0 {
            tokio::time::sleep(state.poll_interval).await;
        }
        state.polls += 1;

        let error = match state.client.job_status(state.job_url).await {
            Ok(status) => {
                state.last = status;
                None
            }
            Err(e) => {
                tracing::warn!(job_url = %state.job_url, error = %e, "Job status poll failed");
                Some(e)
            }
        };

        let elapsed = state.started.elapsed();
        if state.last.state.is_terminal() || elapsed >= state.timeout {
            state.finished = true;
        }

        tracing::debug!(
            job_url = %state.job_url,
            poll = state.polls,
            state = ?state.last.state,
            percent_complete = ?state.last.percent_complete,
            "Polled export job"
        );

        let event = MonitorEvent {
            status: state.last.clone(),
            error,
            elapsed,
        };
        Some((event, state))
    })
}
