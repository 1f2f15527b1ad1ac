//! Export job lifecycle: status monitoring and result file downloads

pub mod fetcher;
pub mod monitor;

pub use fetcher::{ResilientFetcher, DEFAULT_FETCH_BACKOFF, MAX_FETCH_RETRIES};
pub use monitor::{monitor_job, MonitorEvent};
