//! Fetch coordinator - main orchestrator for one run
//!
//! This module drives a run from configuration to checkpoint commit. All steps
//! are sequential: the job is polled, then each result file is downloaded and
//! streamed record by record through the pipeline. The new transaction time is
//! stored only after every sink has committed.

use crate::adapters::bulkdata::{BulkDataClient, HttpBulkDataClient};
use crate::adapters::fhirstore::FhirStoreSink;
use crate::adapters::ndjson::NdjsonFileSink;
use crate::adapters::postgresql::PostgresSink;
use crate::config::BulkFetchConfig;
use crate::core::export::records::{ndjson_records, RecordLimits};
use crate::core::export::summary::RunSummary;
use crate::core::export::RunState;
use crate::core::job::{monitor_job, ResilientFetcher};
use crate::core::pipeline::{Pipeline, Processor, RectifyProcessor, Sink};
use crate::core::state::TransactionTimeStore;
use crate::domain::instant::format_instant;
use crate::domain::{
    BulkDataError, BulkFetchError, ExportGroup, ExportJob, JobState, JobStatus, ResourceType,
    Result, TransactionTime,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{pin_mut, StreamExt};
use std::time::{Duration, Instant};

/// Immutable run parameters derived from configuration
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Resource types requested from the server
    pub resource_types: Vec<ResourceType>,

    /// Export group
    pub group: ExportGroup,

    /// Existing job to attach to instead of starting one
    pub pending_job_url: Option<String>,

    /// Sleep between job status polls
    pub poll_interval: Duration,

    /// Deadline for the job to complete
    pub timeout: Duration,

    /// Sleep before each download retry
    pub fetch_backoff: Duration,

    /// NDJSON line bounds
    pub limits: RecordLimits,
}

impl RunSettings {
    /// Derive run parameters from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a resource type is invalid.
    pub fn from_config(config: &BulkFetchConfig) -> Result<Self> {
        Ok(Self {
            resource_types: config
                .server
                .parsed_resource_types()
                .map_err(BulkFetchError::Configuration)?,
            group: config.server.export_group(),
            pending_job_url: config
                .server
                .pending_job_url
                .clone()
                .filter(|url| !url.is_empty()),
            poll_interval: config.job.poll_interval(),
            timeout: config.job.timeout(),
            fetch_backoff: config.job.fetch_backoff(),
            limits: RecordLimits {
                max_record_bytes: config.job.max_record_bytes,
                initial_buffer_bytes: config.job.initial_buffer_bytes,
            },
        })
    }
}

/// Builds the output pipeline for a run
///
/// Sinks that stamp output with the transaction time keep the box and read it
/// once records start arriving.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Build processors and sinks
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no sink is configured, or the error
    /// of a sink that cannot be created.
    async fn build(&self, transaction_time: &TransactionTime) -> Result<Pipeline>;
}

/// Builds the pipeline named by `[output]`, `[fhir_store]` and `[postgresql]`
pub struct ConfigPipelineFactory {
    config: BulkFetchConfig,
}

impl ConfigPipelineFactory {
    /// Create a factory for `config`
    pub fn new(config: BulkFetchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PipelineFactory for ConfigPipelineFactory {
    async fn build(&self, transaction_time: &TransactionTime) -> Result<Pipeline> {
        let mut processors: Vec<Box<dyn Processor>> = Vec::new();
        if self.config.output.rectify {
            processors.push(Box::new(RectifyProcessor::new()));
        }

        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        if let Some(prefix) = self.config.output.file_prefix() {
            sinks.push(Box::new(NdjsonFileSink::new(prefix)));
        }
        if let Some(ref store) = self.config.fhir_store {
            let sink = FhirStoreSink::from_config(store, &self.config.gcs, transaction_time)?
                .with_error_tolerance(self.config.output.no_fail_on_upload_errors);
            sinks.push(Box::new(sink));
        }
        if let Some(ref pg) = self.config.postgresql {
            sinks.push(Box::new(PostgresSink::connect(pg, transaction_time).await?));
        }

        Pipeline::new(processors, sinks)
    }
}

/// Fetch coordinator
pub struct FetchCoordinator {
    settings: RunSettings,
    client: Box<dyn BulkDataClient>,
    store: TransactionTimeStore,
    pipelines: Box<dyn PipelineFactory>,
    fetcher: ResilientFetcher,
    state: RunState,
}

impl FetchCoordinator {
    /// Create a coordinator from configuration
    ///
    /// Validation happens here, before any client is built, so a bad
    /// configuration never reaches the network.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid or contradictory settings.
    pub fn from_config(config: BulkFetchConfig) -> Result<Self> {
        config.validate().map_err(BulkFetchError::Configuration)?;

        let settings = RunSettings::from_config(&config)?;
        let client = HttpBulkDataClient::new(&config.server)?;
        let store = TransactionTimeStore::from_config(&config)?;
        let pipelines = ConfigPipelineFactory::new(config);

        Ok(Self::new(
            settings,
            Box::new(client),
            store,
            Box::new(pipelines),
        ))
    }

    /// Create a coordinator from explicit parts
    pub fn new(
        settings: RunSettings,
        client: Box<dyn BulkDataClient>,
        store: TransactionTimeStore,
        pipelines: Box<dyn PipelineFactory>,
    ) -> Self {
        let fetcher = ResilientFetcher::new(settings.fetch_backoff);
        Self {
            settings,
            client,
            store,
            pipelines,
            fetcher,
            state: RunState::Configuring,
        }
    }

    /// Current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = %self.state, to = %next, "Run state transition");
        self.state = next;
    }

    /// Execute one run
    ///
    /// # Errors
    ///
    /// Returns the error that moved the run to `Failed`. The checkpoint is not
    /// advanced in that case.
    pub async fn execute(&mut self) -> Result<RunSummary> {
        if self.state != RunState::Configuring {
            return Err(BulkFetchError::State(format!(
                "a coordinator runs once; current state is {}",
                self.state
            )));
        }

        let started = Instant::now();
        let mut summary = RunSummary::new();
        tracing::info!(
            resource_types = ?self.settings.resource_types,
            group = %self.settings.group,
            checkpoint = %self.store.describe(),
            "Starting fetch run"
        );

        let result = self.run(&mut summary).await;
        summary.duration = started.elapsed();

        match result {
            Ok(()) => {
                self.transition(RunState::Done);
                summary.final_state = RunState::Done;
                summary.log_summary();
                Ok(summary)
            }
            Err(e) => {
                self.transition(RunState::Failed(e.to_string()));
                summary.final_state = self.state.clone();
                tracing::error!(error = %e, "Fetch run failed");
                summary.log_summary();
                Err(e)
            }
        }
    }

    async fn run(&mut self, summary: &mut RunSummary) -> Result<()> {
        let transaction_time = TransactionTime::new();
        let mut pipeline = self.pipelines.build(&transaction_time).await?;
        tracing::info!(sinks = ?pipeline.sink_names(), "Output pipeline ready");

        self.transition(RunState::JobResolving);
        self.client.authenticate().await?;
        let since = self.store.load().await?;
        summary.since = since;
        let mut job = self.resolve_job(since).await?;
        summary.job_url = Some(job.url().to_string());
        summary.attached_job = job.is_attached();

        self.transition(RunState::JobPolling);
        let status = self.await_completion(&mut job).await?;
        let completed_at = status.transaction_time.ok_or_else(|| BulkFetchError::JobFailed {
            job_url: job.url().to_string(),
            message: "complete job reported no transactionTime".to_string(),
        })?;
        transaction_time.set(completed_at)?;
        summary.transaction_time = Some(completed_at);
        tracing::info!(
            job_url = %job.url(),
            transaction_time = %format_instant(&completed_at),
            files = status.result_file_count(),
            "Export job complete"
        );

        self.transition(RunState::Downloading);
        for (resource_type, urls) in &status.result_urls {
            for url in urls {
                self.download_into(&mut pipeline, resource_type, url).await?;
                summary.urls_fetched += 1;
            }
        }

        self.transition(RunState::Finalizing);
        let report = pipeline.finalize().await?;
        summary.records = pipeline.record_counts().clone();
        summary.warnings = pipeline.warnings().to_vec();
        tracing::info!(
            finalized = ?report.finalized,
            failed = report.failures.len(),
            "Output pipeline finalized"
        );

        self.transition(RunState::CheckpointCommitting);
        self.store.store(transaction_time.require()?).await?;
        summary.checkpoint_committed = true;
        Ok(())
    }

    async fn resolve_job(&self, since: Option<DateTime<Utc>>) -> Result<ExportJob> {
        if let Some(ref url) = self.settings.pending_job_url {
            tracing::info!(job_url = %url, "Attaching to pending export job");
            return Ok(ExportJob::attached(url.clone()));
        }

        let url = self
            .client
            .start_export(&self.settings.resource_types, since, &self.settings.group)
            .await?;
        tracing::info!(
            job_url = %url,
            since = %since.as_ref().map(format_instant).unwrap_or_else(|| "-".to_string()),
            "Started export job"
        );
        Ok(ExportJob::started(url))
    }

    /// Monitor `job` until it is terminal or the job timeout has passed
    ///
    /// A status poll rejected as unauthorized (an expired token on a long
    /// job) re-authenticates and resumes monitoring against the same
    /// deadline.
    async fn await_completion(&mut self, job: &mut ExportJob) -> Result<JobStatus> {
        let job_url = job.url().to_string();
        let deadline = Instant::now() + self.settings.timeout;

        loop {
            let mut token_expired = false;
            {
                let events = monitor_job(
                    self.client.as_ref(),
                    &job_url,
                    self.settings.poll_interval,
                    deadline.saturating_duration_since(Instant::now()),
                );
                pin_mut!(events);

                while let Some(event) = events.next().await {
                    if let Some(ref error) = event.error {
                        if is_unauthorized_poll(error) && !event.status.state.is_terminal() {
                            token_expired = true;
                            break;
                        }
                        continue;
                    }
                    if event.status != *job.status() {
                        tracing::info!(
                            job_url = %job_url,
                            state = ?event.status.state,
                            percent_complete = ?event.status.percent_complete,
                            elapsed_secs = event.elapsed.as_secs(),
                            "Export job progress"
                        );
                    }
                    job.apply(event.status)?;
                }
            }

            if !token_expired || Instant::now() >= deadline {
                break;
            }
            tracing::info!(job_url = %job_url, "Status poll unauthorized, re-authenticating");
            self.client.authenticate().await?;
        }

        let status = job.status().clone();
        match status.state {
            JobState::Complete => Ok(status),
            JobState::Failed => Err(BulkFetchError::JobFailed {
                job_url,
                message: status
                    .error
                    .unwrap_or_else(|| "no error reported".to_string()),
            }),
            JobState::Pending | JobState::InProgress => Err(BulkFetchError::JobTimeout {
                job_url,
                timeout: self.settings.timeout,
            }),
        }
    }

    async fn download_into(
        &mut self,
        pipeline: &mut Pipeline,
        resource_type: &ResourceType,
        url: &str,
    ) -> Result<()> {
        tracing::info!(resource_type = %resource_type, url = %url, "Downloading result file");
        let reader = self.fetcher.fetch(self.client.as_mut(), url).await?;

        let records = ndjson_records(reader, resource_type, url, self.settings.limits);
        pin_mut!(records);

        let mut count = 0usize;
        while let Some(payload) = records.next().await {
            pipeline.process(resource_type, url, payload?).await?;
            count += 1;
        }

        tracing::info!(
            resource_type = %resource_type,
            url = %url,
            records = count,
            "Result file processed"
        );
        Ok(())
    }
}

fn is_unauthorized_poll(error: &BulkFetchError) -> bool {
    matches!(
        error,
        BulkFetchError::StatusPoll {
            source: BulkDataError::Unauthorized(_),
            ..
        }
    )
}
