use crate::models::{AuditLogEntry, ResultRecord, ResultStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::string::FromUtf8Error;
use thiserror::Error;

pub const RESULTS_HEADER: [&str; 7] = [
    "id",
    "name",
    "status",
    "error",
    "retryCount",
    "durationMs",
    "timestamp",
];
pub const AUDIT_HEADER: [&str; 4] = ["timestamp", "action", "details", "sessionId"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv output is not utf-8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("unexpected header: {0}")]
    Header(String),
    #[error("row {row}: invalid {column} value {value:?}")]
    Field {
        row: usize,
        column: &'static str,
        value: String,
    },
}

fn write_rows<const N: usize>(
    header: [&str; N],
    rows: impl Iterator<Item = [String; N]>,
) -> Result<String, ExportError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Every field is quoted; output is byte-identical for identical input.
pub fn results_to_csv(records: &[ResultRecord]) -> Result<String, ExportError> {
    write_rows(
        RESULTS_HEADER,
        records.iter().map(|r| {
            [
                r.id.clone(),
                r.name.clone(),
                r.status.as_str().to_string(),
                r.error.clone().unwrap_or_default(),
                r.retry_count.to_string(),
                r.duration_ms.to_string(),
                timestamp(&r.timestamp),
            ]
        }),
    )
}

pub fn audit_to_csv(entries: &[AuditLogEntry]) -> Result<String, ExportError> {
    write_rows(
        AUDIT_HEADER,
        entries.iter().map(|e| {
            [
                timestamp(&e.timestamp),
                e.action.as_str().to_string(),
                e.details.clone(),
                e.session_id.clone(),
            ]
        }),
    )
}

/// Reads back what [`results_to_csv`] writes. An empty error column becomes `None`.
pub fn parse_results_csv(text: &str) -> Result<Vec<ResultRecord>, ExportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    if headers != StringRecord::from(RESULTS_HEADER.to_vec()) {
        return Err(ExportError::Header(headers.iter().collect::<Vec<_>>().join(",")));
    }

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        let line = idx + 1;
        let field = |pos: usize| row.get(pos).unwrap_or_default();
        let invalid = |column: &'static str, value: &str| ExportError::Field {
            row: line,
            column,
            value: value.to_string(),
        };

        let status = field(2)
            .parse::<ResultStatus>()
            .map_err(|_| invalid("status", field(2)))?;
        let retry_count = field(4)
            .parse::<u32>()
            .map_err(|_| invalid("retryCount", field(4)))?;
        let duration_ms = field(5)
            .parse::<u64>()
            .map_err(|_| invalid("durationMs", field(5)))?;
        let timestamp = DateTime::parse_from_rfc3339(field(6))
            .map_err(|_| invalid("timestamp", field(6)))?
            .with_timezone(&Utc);
        let error = Some(field(3).to_string()).filter(|e| !e.is_empty());

        records.push(ResultRecord {
            id: field(0).to_string(),
            name: field(1).to_string(),
            status,
            error,
            retry_count,
            duration_ms,
            timestamp,
        });
    }
    Ok(records)
}

/// `migration-results` + `2026-03-01T09:30:05Z` gives `migration-results-20260301T093005Z.csv`.
pub fn export_filename(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{prefix}-{}.csv", now.format("%Y%m%dT%H%M%SZ"))
}
