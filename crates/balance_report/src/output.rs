use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::Serialize;

use crate::report::ReportRow;

pub const CSV_HEADER: [&str; 6] = [
    "date",
    "timestamp",
    "block",
    "address",
    "daily_change",
    "ending_balance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Csv,
    /// One JSON object per line; integers wider than 64 bits are strings.
    Jsonl,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "jsonl" => Ok(ReportFormat::Jsonl),
            other => Err(format!("unknown report format {other:?} (expected csv or jsonl)")),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Csv => f.write_str("csv"),
            ReportFormat::Jsonl => f.write_str("jsonl"),
        }
    }
}

#[derive(Serialize)]
struct JsonRow {
    date: String,
    timestamp: i64,
    block: u64,
    address: String,
    daily_change: String,
    ending_balance: String,
}

impl From<&ReportRow> for JsonRow {
    fn from(row: &ReportRow) -> Self {
        JsonRow {
            date: row.date.to_string(),
            timestamp: row.timestamp,
            block: row.block,
            address: row.address.to_string(),
            daily_change: row.change.to_string(),
            ending_balance: row.balance.to_string(),
        }
    }
}

/// Writes `rows` to `writer`. CSV output starts with a header line.
pub fn write_report<W: Write>(
    mut writer: W,
    rows: &[ReportRow],
    format: ReportFormat,
) -> io::Result<()> {
    match format {
        ReportFormat::Csv => {
            writeln!(writer, "{}", CSV_HEADER.join(","))?;
            for row in rows {
                writeln!(
                    writer,
                    "{},{},{},{},{},{}",
                    row.date, row.timestamp, row.block, row.address, row.change, row.balance
                )?;
            }
        }
        ReportFormat::Jsonl => {
            for row in rows {
                let line = serde_json::to_string(&JsonRow::from(row))
                    .map_err(|e| io::Error::other(e.to_string()))?;
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}
