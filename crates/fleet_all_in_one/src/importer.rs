use common::domain::{DomainError, Reading};
use fleet_engine::{BatchReport, FleetEngine};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Totals of one NDJSON replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub batches: usize,
    pub ingested: usize,
    pub rejected: usize,
    /// Lines that did not parse as a reading
    pub malformed: usize,
    pub cancelled: bool,
}

impl ImportSummary {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.ingested += report.success_count;
        self.rejected += report.failed_count;
    }
}

/// Replays newline-delimited JSON readings through `ingest_batch` in chunks
/// of `batch_size`. Blank lines are skipped; unparseable lines are counted and
/// logged. A cancelled batch leaves no trace in storage and stops the import.
pub async fn import_readings<R>(
    engine: &FleetEngine,
    reader: R,
    batch_size: usize,
    cancellation: CancellationToken,
) -> anyhow::Result<ImportSummary>
where
    R: AsyncBufRead + Unpin,
{
    let batch_size = batch_size.max(1);
    let mut summary = ImportSummary::default();
    let mut batch: Vec<Reading> = Vec::with_capacity(batch_size);
    let mut lines = reader.lines();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if cancellation.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Reading>(line) {
            Ok(reading) => batch.push(reading),
            Err(e) => {
                warn!(line = line_number, error = %e, "skipping malformed reading");
                summary.malformed += 1;
                continue;
            }
        }

        if batch.len() >= batch_size {
            let readings = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if !flush(engine, readings, &cancellation, &mut summary).await? {
                return Ok(summary);
            }
        }
    }

    if !batch.is_empty() && !summary.cancelled {
        flush(engine, batch, &cancellation, &mut summary).await?;
    }

    info!(
        batches = summary.batches,
        ingested = summary.ingested,
        rejected = summary.rejected,
        malformed = summary.malformed,
        cancelled = summary.cancelled,
        "import finished"
    );
    Ok(summary)
}

/// Returns `false` once the import has been cancelled
async fn flush(
    engine: &FleetEngine,
    readings: Vec<Reading>,
    cancellation: &CancellationToken,
    summary: &mut ImportSummary,
) -> anyhow::Result<bool> {
    let size = readings.len();
    match engine.ingest_batch(readings, cancellation.clone()).await {
        Ok(report) => {
            for failure in &report.failures {
                warn!(
                    index = failure.index,
                    device_id = %failure.device_id,
                    reason = %failure.reason,
                    "reading rejected"
                );
            }
            debug!(size, success = report.success_count, "batch committed");
            summary.record(&report);
            Ok(true)
        }
        Err(DomainError::BatchCancelled { processed }) => {
            warn!(processed, size, "batch cancelled and rolled back");
            summary.cancelled = true;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
