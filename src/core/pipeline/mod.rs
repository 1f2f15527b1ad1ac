//! Record processing pipeline
//!
//! A [`Pipeline`] applies an ordered list of [`Processor`]s to each record and
//! fans the result out to every [`Sink`]. After the last record,
//! [`Pipeline::finalize`] commits every sink.
//!
//! # Error tolerance
//!
//! Tolerance belongs to the sink ([`Sink::tolerates_errors`]). An error from
//! a sink that does not tolerate errors aborts the run. Errors from a
//! tolerant sink are collected as warnings, the remaining sinks still receive
//! the record, and its failed finalize does not fail the run. Processor
//! errors are always fatal.

pub mod processor;
pub mod sink;

use crate::domain::{BulkFetchError, Record, ResourceType, Result, SinkFailure};
use bytes::Bytes;
use std::collections::BTreeMap;

pub use processor::{Processor, RectifyProcessor};
pub use sink::Sink;

/// Outcome of [`Pipeline::finalize`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Sinks that committed successfully
    pub finalized: Vec<String>,

    /// Tolerant sinks whose finalize failed
    pub failures: Vec<SinkFailure>,
}

/// Ordered processors feeding a set of sinks
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<Box<dyn Sink>>,
    warnings: Vec<SinkFailure>,
    records: BTreeMap<ResourceType, usize>,
    finalized: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("sinks", &self.sink_names())
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline
    ///
    /// # Arguments
    ///
    /// * `processors` - Applied in order; may be empty
    /// * `sinks` - Every record is delivered to each of these
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `sinks` is empty.
    pub fn new(processors: Vec<Box<dyn Processor>>, sinks: Vec<Box<dyn Sink>>) -> Result<Self> {
        if sinks.is_empty() {
            return Err(BulkFetchError::Configuration(
                "the output pipeline needs at least one sink".to_string(),
            ));
        }
        Ok(Self {
            processors,
            sinks,
            warnings: Vec::new(),
            records: BTreeMap::new(),
            finalized: false,
        })
    }

    /// Names of the configured sinks, in delivery order
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Sink errors tolerated so far
    pub fn warnings(&self) -> &[SinkFailure] {
        &self.warnings
    }

    /// Records submitted per resource type
    pub fn record_counts(&self) -> &BTreeMap<ResourceType, usize> {
        &self.records
    }

    /// Process one raw record
    ///
    /// # Errors
    ///
    /// Returns the first processor error, or the first error from a sink
    /// that does not tolerate errors.
    pub async fn process(
        &mut self,
        resource_type: &ResourceType,
        source_url: &str,
        payload: Bytes,
    ) -> Result<()> {
        if self.finalized {
            return Err(BulkFetchError::State(
                "record submitted after the pipeline was finalized".to_string(),
            ));
        }

        let mut record = Record::new(resource_type.clone(), source_url, payload);
        for processor in &self.processors {
            record = processor.process(record)?;
        }

        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.process(&record).await {
                if !sink.tolerates_errors() {
                    return Err(e);
                }
                tracing::warn!(
                    sink = %sink.name(),
                    url = %source_url,
                    resource_type = %resource_type,
                    error = %e,
                    "Sink rejected record, continuing"
                );
                self.warnings.push(SinkFailure::new(sink.name(), e.to_string()));
            }
        }

        *self.records.entry(resource_type.clone()).or_default() += 1;
        Ok(())
    }

    /// Finalize every sink, in order
    ///
    /// Every sink is finalized even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns [`BulkFetchError::PipelineFinalize`] listing every failed sink
    /// if any of them does not tolerate errors, or a state error on a second
    /// call.
    pub async fn finalize(&mut self) -> Result<FinalizeReport> {
        if self.finalized {
            return Err(BulkFetchError::State(
                "pipeline already finalized".to_string(),
            ));
        }
        self.finalized = true;

        let mut report = FinalizeReport::default();
        let mut fatal = false;
        for sink in self.sinks.iter_mut() {
            match sink.finalize().await {
                Ok(()) => {
                    tracing::debug!(sink = %sink.name(), "Sink finalized");
                    report.finalized.push(sink.name().to_string());
                }
                Err(e) => {
                    tracing::error!(sink = %sink.name(), error = %e, "Sink finalize failed");
                    fatal |= !sink.tolerates_errors();
                    report
                        .failures
                        .push(SinkFailure::new(sink.name(), e.to_string()));
                }
            }
        }

        if fatal {
            return Err(BulkFetchError::PipelineFinalize(report.failures));
        }
        self.warnings.extend(report.failures.iter().cloned());

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        records: Vec<Record>,
        finalized: usize,
    }

    struct RecordingSink {
        name: String,
        seen: Arc<Mutex<Recorded>>,
        fail_process: bool,
        fail_finalize: bool,
        tolerant: bool,
    }

    impl RecordingSink {
        fn new(name: &str) -> (Self, Arc<Mutex<Recorded>>) {
            let seen = Arc::new(Mutex::new(Recorded::default()));
            (
                Self {
                    name: name.to_string(),
                    seen: seen.clone(),
                    fail_process: false,
                    fail_finalize: false,
                    tolerant: false,
                },
                seen,
            )
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn tolerates_errors(&self) -> bool {
            self.tolerant
        }

        async fn process(&mut self, record: &Record) -> Result<()> {
            if self.fail_process {
                return Err(BulkFetchError::sink(&self.name, "rejected"));
            }
            self.seen.lock().unwrap().records.push(record.clone());
            Ok(())
        }

        async fn finalize(&mut self) -> Result<()> {
            self.seen.lock().unwrap().finalized += 1;
            if self.fail_finalize {
                return Err(BulkFetchError::sink(&self.name, "commit failed"));
            }
            Ok(())
        }
    }

    struct Uppercase;

    impl Processor for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn process(&self, record: Record) -> Result<Record> {
            let upper = String::from_utf8_lossy(record.payload()).to_uppercase();
            Ok(record.with_payload(upper))
        }
    }

    struct Reject;

    impl Processor for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn process(&self, _: Record) -> Result<Record> {
            Err(BulkFetchError::processor("reject", "no"))
        }
    }

    fn patient() -> ResourceType {
        ResourceType::new("Patient").unwrap()
    }

    #[test]
    fn test_no_sinks_is_configuration_error() {
        let err = Pipeline::new(vec![], vec![]).unwrap_err();
        assert!(matches!(err, BulkFetchError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_record_reaches_every_sink_once() {
        let (a, seen_a) = RecordingSink::new("a");
        let (b, seen_b) = RecordingSink::new("b");
        let mut pipeline = Pipeline::new(vec![], vec![Box::new(a), Box::new(b)]).unwrap();

        pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(seen_a.lock().unwrap().records.len(), 1);
        assert_eq!(seen_b.lock().unwrap().records.len(), 1);
        assert_eq!(pipeline.record_counts()[&patient()], 1);
    }

    #[tokio::test]
    async fn test_processors_run_in_order_before_sinks() {
        let (sink, seen) = RecordingSink::new("a");
        let mut pipeline = Pipeline::new(vec![Box::new(Uppercase)], vec![Box::new(sink)]).unwrap();

        pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.records[0].payload().as_ref(), b"ABC");
        assert_eq!(seen.records[0].source_url(), "https://bulk/1");
    }

    #[tokio::test]
    async fn test_processor_error_stops_record() {
        let (mut sink, seen) = RecordingSink::new("a");
        sink.tolerant = true;
        let mut pipeline = Pipeline::new(vec![Box::new(Reject)], vec![Box::new(sink)]).unwrap();

        let err = pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, BulkFetchError::Processor { .. }));
        assert!(seen.lock().unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn test_sink_error_aborts_without_tolerance() {
        let (mut bad, _) = RecordingSink::new("bad");
        bad.fail_process = true;
        let (good, seen_good) = RecordingSink::new("good");
        let mut pipeline = Pipeline::new(vec![], vec![Box::new(bad), Box::new(good)]).unwrap();

        let err = pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, BulkFetchError::Sink { .. }));
        assert!(seen_good.lock().unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn test_sink_error_is_isolated_with_tolerance() {
        let (mut bad, _) = RecordingSink::new("bad");
        bad.fail_process = true;
        bad.tolerant = true;
        let (good, seen_good) = RecordingSink::new("good");
        let mut pipeline = Pipeline::new(vec![], vec![Box::new(bad), Box::new(good)]).unwrap();

        pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(seen_good.lock().unwrap().records.len(), 2);
        assert_eq!(pipeline.warnings().len(), 2);
    }

    #[tokio::test]
    async fn test_finalize_failure_does_not_block_other_sinks() {
        let (mut bad, seen_bad) = RecordingSink::new("bad");
        bad.fail_finalize = true;
        bad.tolerant = true;
        let (good, seen_good) = RecordingSink::new("good");
        let mut pipeline = Pipeline::new(vec![], vec![Box::new(bad), Box::new(good)]).unwrap();

        let report = pipeline.finalize().await.unwrap();
        assert_eq!(report.finalized, vec!["good".to_string()]);
        assert_eq!(
            report.failures,
            vec![SinkFailure::new("bad", "Sink 'bad' failed: commit failed")]
        );
        assert_eq!(seen_bad.lock().unwrap().finalized, 1);
        assert_eq!(seen_good.lock().unwrap().finalized, 1);
        assert_eq!(pipeline.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_failure_is_fatal_without_tolerance() {
        let (mut bad, _) = RecordingSink::new("bad");
        bad.fail_finalize = true;
        let (good, seen_good) = RecordingSink::new("good");
        let mut pipeline = Pipeline::new(vec![], vec![Box::new(bad), Box::new(good)]).unwrap();

        let err = pipeline.finalize().await.unwrap_err();
        match err {
            BulkFetchError::PipelineFinalize(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].sink, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(seen_good.lock().unwrap().finalized, 1);
    }

    #[tokio::test]
    async fn test_tolerant_sink_does_not_cover_for_strict_sink() {
        let (mut upload, _) = RecordingSink::new("upload");
        upload.fail_process = true;
        upload.fail_finalize = true;
        upload.tolerant = true;
        let (mut files, _) = RecordingSink::new("files");
        files.fail_finalize = true;
        let mut pipeline =
            Pipeline::new(vec![], vec![Box::new(upload), Box::new(files)]).unwrap();

        pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let err = pipeline.finalize().await.unwrap_err();
        match err {
            BulkFetchError::PipelineFinalize(failures) => {
                let sinks: Vec<&str> = failures.iter().map(|f| f.sink.as_str()).collect();
                assert_eq!(sinks, vec!["upload", "files"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_finalize_runs_once() {
        let (sink, _) = RecordingSink::new("a");
        let mut pipeline = Pipeline::new(vec![], vec![Box::new(sink)]).unwrap();
        pipeline.finalize().await.unwrap();
        assert!(pipeline.finalize().await.is_err());
        assert!(pipeline
            .process(&patient(), "https://bulk/1", Bytes::from_static(b"{}"))
            .await
            .is_err());
    }
}
