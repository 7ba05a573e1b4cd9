//! Artifact processing pipeline: decompression, record iteration, and
//! mapper invocation for a downloaded local artifact.
//!
//! Record slicing follows the mapper's [`RecordMode`]: whole-file for
//! envelope formats, line-by-line for log formats, and header-then-lines
//! for CSV exports. Mapper failures of kind `Parse`/`Schema` are downgraded
//! to row errors; everything else aborts the artifact.

use std::path::Path;

use async_compression::tokio::bufread::GzipDecoder;
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncReadExt, BufReader};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::collector::RunContext;
use crate::constants::{MAX_LINE_LENGTH, SCHEMA_ERROR_THRESHOLD};
use crate::errors::{CollectError, CollectResult, RowError};
use crate::mappers::{RecordInput, RecordMode, Row, TableMapper};
use crate::models::ArtifactInfo;

/// Per-artifact outcome: row and error counters for the run summary.
#[derive(Debug, Default)]
pub struct ArtifactReport {
    pub artifact: String,
    pub records_seen: u64,
    pub rows_emitted: u64,
    pub parse_errors: u64,
    pub schema_errors: u64,
    /// Every downgraded record failure, tied to its artifact and line.
    pub row_failures: Vec<RowError>,
}

impl ArtifactReport {
    pub fn row_errors(&self) -> u64 {
        self.parse_errors + self.schema_errors
    }
}

/// Process one downloaded artifact, handing every mapped row to `emit`.
///
/// `emit` runs enrichment and the host sink; an error from it aborts the
/// artifact. Cancellation is checked between records.
pub async fn process_artifact(
    ctx: &RunContext,
    info: &ArtifactInfo,
    mapper: &mut TableMapper,
    mut emit: impl FnMut(Row) -> CollectResult<()>,
) -> CollectResult<ArtifactReport> {
    let path = Path::new(&info.local_name);
    let mut report = ArtifactReport {
        artifact: info.original_name.clone(),
        ..Default::default()
    };

    let reader = open_reader(path).await?;
    debug!(
        "Processing artifact {} with mapper {}",
        info.original_name,
        mapper.identifier()
    );

    match mapper.record_mode() {
        RecordMode::WholeFile => {
            let mut content = Vec::new();
            let mut reader = reader;
            reader
                .read_to_end(&mut content)
                .await
                .map_err(|e| read_error(info, e))?;
            report.records_seen = 1;
            map_record(
                mapper,
                &RecordInput::Bytes(content.into()),
                info,
                None,
                &mut report,
                &mut emit,
            )?;
        }
        RecordMode::Lines => {
            iter_lines(ctx, reader, info, mapper, false, &mut report, &mut emit).await?;
        }
        RecordMode::HeaderThenLines => {
            iter_lines(ctx, reader, info, mapper, true, &mut report, &mut emit).await?;
        }
    }

    if report.records_seen > 0 {
        let prevalence = report.schema_errors as f64 / report.records_seen as f64;
        if prevalence > SCHEMA_ERROR_THRESHOLD {
            return Err(CollectError::Schema(format!(
                "artifact {}: {} of {} records failed schema checks",
                info.original_name, report.schema_errors, report.records_seen
            )));
        }
    }

    if report.row_errors() > 0 {
        warn!(
            "Artifact {}: {} records skipped ({} parse, {} schema)",
            info.original_name,
            report.row_errors(),
            report.parse_errors,
            report.schema_errors
        );
    }
    Ok(report)
}

async fn iter_lines(
    ctx: &RunContext,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    info: &ArtifactInfo,
    mapper: &mut TableMapper,
    capture_header: bool,
    report: &mut ArtifactReport,
    emit: &mut impl FnMut(Row) -> CollectResult<()>,
) -> CollectResult<()> {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut header_pending = capture_header;
    let mut line_number = 0usize;

    while let Some(next) = lines.next().await {
        if ctx.is_cancelled() {
            return Err(CollectError::Cancelled);
        }
        line_number += 1;

        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let failure = RowError::new(
                    &info.original_name,
                    Some(line_number),
                    CollectError::Parse(format!("line exceeds {} bytes", MAX_LINE_LENGTH)),
                );
                warn!("Row error in {}", failure);
                report.parse_errors += 1;
                report.row_failures.push(failure);
                continue;
            }
            Err(LinesCodecError::Io(e)) => return Err(read_error(info, e)),
        };

        if line.trim().is_empty() {
            continue;
        }

        if header_pending {
            mapper.on_header(&line)?;
            header_pending = false;
            continue;
        }

        report.records_seen += 1;
        map_record(
            mapper,
            &RecordInput::Line(line),
            info,
            Some(line_number),
            report,
            emit,
        )?;
    }
    Ok(())
}

fn map_record(
    mapper: &TableMapper,
    input: &RecordInput,
    info: &ArtifactInfo,
    line: Option<usize>,
    report: &mut ArtifactReport,
    emit: &mut impl FnMut(Row) -> CollectResult<()>,
) -> CollectResult<()> {
    match mapper.map(input) {
        Ok(rows) => {
            for row in rows {
                emit(row)?;
                report.rows_emitted += 1;
            }
            Ok(())
        }
        Err(err) if err.is_row_level() => {
            match &err {
                CollectError::Parse(_) => report.parse_errors += 1,
                _ => report.schema_errors += 1,
            }
            let failure = RowError::new(&info.original_name, line, err);
            warn!("Row error in {}", failure);
            report.row_failures.push(failure);
            Ok(())
        }
        Err(other) => Err(other),
    }
}

/// Open the artifact for reading, unwrapping gzip when the name says so.
async fn open_reader(path: &Path) -> CollectResult<Box<dyn AsyncBufRead + Unpin + Send>> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CollectError::NotFound(format!("local artifact {}", path.display()))
        } else {
            CollectError::Fatal(format!("cannot open {}: {}", path.display(), e))
        }
    })?;

    let reader = BufReader::new(file);
    let is_gzip = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if is_gzip {
        Ok(Box::new(BufReader::new(GzipDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

fn read_error(info: &ArtifactInfo, e: std::io::Error) -> CollectError {
    CollectError::Fatal(format!("read failed for {}: {}", info.original_name, e))
}
