//! Batch driver: one template, many fill records, one output per record.

use crate::context::RunContext;
use crate::error::FillError;
use crate::pipeline;
use anchor_model::{FillRequest, FillStats};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation for a batch run.
///
/// Clones share the same flag. Records that have not started when the token is cancelled are
/// skipped; records already running finish and keep their output.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub enum RecordStatus {
    Written { output: PathBuf, stats: FillStats },
    Failed(FillError),
    Cancelled,
}

#[derive(Debug)]
pub struct RecordReport {
    /// 1-based position of the record in the batch input.
    pub index: usize,
    pub status: RecordStatus,
}

/// Totals over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub records: usize,
    pub written: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Records written with at least one anchor missing.
    pub incomplete: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[RecordReport]) -> Self {
        let mut summary = Self { records: reports.len(), ..Self::default() };
        for report in reports {
            match &report.status {
                RecordStatus::Written { stats, .. } => {
                    summary.written += 1;
                    if !stats.is_complete() {
                        summary.incomplete += 1;
                    }
                }
                RecordStatus::Failed(_) => summary.failed += 1,
                RecordStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Fills `template` once per record into `output_dir`, named `{stem}_{index:03}_filled.pdf`.
///
/// Records run in parallel, each opening its own copy of the template. A failing record never
/// affects the others. Reports come back in record order.
pub fn run_batch(
    context: &RunContext,
    template: &Path,
    output_dir: &Path,
    records: &[FillRequest],
    cancel: &CancellationToken,
) -> Vec<RecordReport> {
    tracing::info!(template = %template.display(), records = records.len(), "batch started");

    let reports: Vec<RecordReport> = records
        .par_iter()
        .enumerate()
        .map(|(position, request)| {
            let index = position + 1;
            if cancel.is_cancelled() {
                return RecordReport { index, status: RecordStatus::Cancelled };
            }

            let output = storage::indexed_output_path(template, output_dir, index);
            let status = match pipeline::fill_file(context, template, &output, request) {
                Ok(outcome) => RecordStatus::Written { output, stats: outcome.stats },
                Err(err) => {
                    tracing::warn!(record = index, error = %err, kind = %err.kind(), "batch record failed");
                    RecordStatus::Failed(err)
                }
            };
            RecordReport { index, status }
        })
        .collect();

    let summary = BatchSummary::from_reports(&reports);
    tracing::info!(
        written = summary.written,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "batch finished"
    );
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::fixtures::{document, latin};
    use crate::layout::OverlayInstruction;
    use crate::render::{FallbackChain, OverlayEngine, StandardEngine};
    use anchor_model::{AnchorConfig, EngineKind, RunParams};
    use pdf_engine::{LayerArtifact, PageSize, PdfDocument};

    /// Standard rendering that cancels the batch as soon as a record draws.
    struct CancelOnRender(CancellationToken);

    impl OverlayEngine for CancelOnRender {
        fn kind(&self) -> EngineKind {
            EngineKind::Standard
        }

        fn render(&self, page: PageSize, instructions: &[OverlayInstruction]) -> Result<LayerArtifact, RenderError> {
            self.0.cancel();
            StandardEngine.render(page, instructions)
        }
    }

    fn context() -> RunContext {
        RunContext::new(Arc::new(AnchorConfig::default()), RunParams::default()).expect("context should build")
    }

    fn template(dir: &Path) -> PathBuf {
        let path = dir.join("contract.pdf");
        std::fs::write(&path, document(&[&[latin("Name:", 72.0, 700.0)]])).expect("template should write");
        path
    }

    #[test]
    fn each_record_gets_its_own_indexed_output() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let template = template(temp.path());
        let out = temp.path().join("out");
        let records = vec![
            FillRequest::from_pairs([("Name:", "Alice")]),
            FillRequest::from_pairs([("Name:", "Bob"), ("Phone:", "555")]),
        ];

        let reports = run_batch(&context(), &template, &out, &records, &CancellationToken::new());

        assert_eq!(reports.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 2]);
        let summary = BatchSummary::from_reports(&reports);
        assert_eq!(summary, BatchSummary { records: 2, written: 2, failed: 0, cancelled: 0, incomplete: 1 });
        for (name, expected) in [("contract_001_filled.pdf", "Name:Alice"), ("contract_002_filled.pdf", "Name:Bob")] {
            let doc = PdfDocument::open(out.join(name).as_path()).expect("output should open");
            let text: String = doc.page_characters(1).expect("text").iter().map(|c| c.text.as_str()).collect();
            assert_eq!(text, expected);
        }
    }

    #[test]
    fn failing_records_are_isolated() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let missing = temp.path().join("missing.pdf");
        let records = vec![FillRequest::from_pairs([("Name:", "Alice")])];

        let reports = run_batch(&context(), &missing, temp.path(), &records, &CancellationToken::new());

        match &reports[0].status {
            RecordStatus::Failed(err) => assert_eq!(err.kind(), crate::ErrorKind::IoFailure),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn cancelled_batch_writes_nothing() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let template = template(temp.path());
        let out = temp.path().join("out");
        let token = CancellationToken::new();
        token.clone().cancel();

        let records = vec![FillRequest::from_pairs([("Name:", "Alice")]); 3];
        let reports = run_batch(&context(), &template, &out, &records, &token);

        assert!(token.is_cancelled());
        assert_eq!(BatchSummary::from_reports(&reports).cancelled, 3);
        assert!(!out.exists());
    }

    #[test]
    fn cancelling_mid_run_keeps_finished_outputs() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let template = template(temp.path());
        let out = temp.path().join("out");
        let token = CancellationToken::new();
        let context = context().with_chain(FallbackChain::new(vec![Box::new(CancelOnRender(token.clone()))]));
        let records = vec![FillRequest::from_pairs([("Name:", "Alice")]); 3];

        // A single worker takes the records in order.
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().expect("pool should build");
        let reports = pool.install(|| run_batch(&context, &template, &out, &records, &token));

        assert!(matches!(reports[0].status, RecordStatus::Written { .. }));
        assert!(reports[1..].iter().all(|report| matches!(report.status, RecordStatus::Cancelled)));
        assert_eq!(
            BatchSummary::from_reports(&reports),
            BatchSummary { records: 3, written: 1, failed: 0, cancelled: 2, incomplete: 0 }
        );
        assert!(out.join("contract_001_filled.pdf").exists());
        assert!(!out.join("contract_002_filled.pdf").exists());
        assert!(!out.join("contract_003_filled.pdf").exists());
    }
}
