// 📜 Log Parsing - JSON-lines service log to flat CSV tables
// Each log line is {"type": ..., "data": {...}}. `bureau` and
// `POS_CASH_balance` records are flattened into tables; the record literals
// embedded in them (`AmtCredit(...)`, `PosCashBalanceIDs(...)`) are parsed
// into typed structs and expanded into columns.

use crate::error::{PipelineError, PipelineResult};
use crate::table::{format_number, Table};
use anyhow::{Context, Result};
use serde::de::{DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, info};

pub const BUREAU_TYPE: &str = "bureau";
pub const POS_CASH_TYPE: &str = "POS_CASH_balance";

// ============================================================================
// LOG VALUES
// ============================================================================

/// JSON value that keeps object keys in file order
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LogValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<LogValue>),
    Object(Fields),
}

/// Object entries in the order they appear in the line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(pub Vec<(String, LogValue)>);

impl<'de> Deserialize<'de> for Fields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Fields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Fields, A::Error> {
                let mut fields = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, LogValue>()? {
                    fields.push((key, value));
                }
                Ok(Fields(fields))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

impl LogValue {
    /// CSV rendering of the value
    pub fn to_cell(&self) -> String {
        match self {
            LogValue::Null => String::new(),
            LogValue::Bool(true) => "True".to_string(),
            LogValue::Bool(false) => "False".to_string(),
            LogValue::Int(v) => v.to_string(),
            LogValue::Float(v) => format_number(*v),
            LogValue::Text(s) => s.clone(),
            LogValue::List(items) => format!(
                "[{}]",
                items.iter().map(LogValue::to_cell).collect::<Vec<_>>().join(", ")
            ),
            LogValue::Object(fields) => format!(
                "{{{}}}",
                fields
                    .0
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_cell()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(rename = "type")]
    kind: String,
    data: LogValue,
}

// ============================================================================
// RECORD LITERALS
// ============================================================================

/// Credit amounts of a bureau record, serialized in logs as `AmtCredit(...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AmtCredit {
    pub credit_currency: Option<String>,
    pub amt_credit_max_overdue: Option<f64>,
    pub amt_credit_sum: Option<f64>,
    pub amt_credit_sum_debt: Option<f64>,
    pub amt_credit_sum_limit: Option<f64>,
    pub amt_credit_sum_overdue: Option<f64>,
    pub amt_annuity: Option<f64>,
}

/// Identifiers of a POS/cash balance month, serialized as `PosCashBalanceIDs(...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PosCashBalanceIDs {
    #[serde(deserialize_with = "integral_id")]
    pub sk_id_prev: Option<i64>,
    #[serde(deserialize_with = "integral_id")]
    pub sk_id_curr: Option<i64>,
    pub name_contract_status: Option<String>,
}

/// Ids may be logged as `1803195`, `1803195.0` or `nan`
fn integral_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
        Some(v) => Err(serde::de::Error::custom(format!("id {} is not an integer", v))),
    }
}

/// A struct that appears in logs as `Name(FIELD=value, ...)`
pub trait LogRecord: Serialize + DeserializeOwned {
    const NAME: &'static str;
}

impl LogRecord for AmtCredit {
    const NAME: &'static str = "AmtCredit";
}

impl LogRecord for PosCashBalanceIDs {
    const NAME: &'static str = "PosCashBalanceIDs";
}

/// Parse `Name(FIELD=value, ...)` into the record type.
///
/// Values may be quoted strings, `nan`, `None`, integers or floats; `nan`
/// and `None` both become missing.
pub fn parse_record<R: LogRecord>(literal: &str, line: usize) -> PipelineResult<R> {
    let fail = |reason: String| PipelineError::RecordLiteral { line, reason };

    let body = literal
        .trim()
        .strip_prefix(R::NAME)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| fail(format!("expected {}(...), got {:?}", R::NAME, literal)))?;

    let mut object = serde_json::Map::new();
    for assignment in split_arguments(body) {
        let assignment = assignment.trim();
        if assignment.is_empty() {
            continue;
        }
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| fail(format!("missing '=' in {:?}", assignment)))?;
        object.insert(key.trim().to_string(), literal_value(raw.trim()).map_err(fail)?);
    }

    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| fail(format!("{} fields: {}", R::NAME, e)))
}

/// Split on commas that are not inside quotes
fn split_arguments(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, ',') => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn literal_value(raw: &str) -> Result<serde_json::Value, String> {
    let quoted = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted('\'') || quoted('"') {
        return Ok(serde_json::Value::String(raw[1..raw.len() - 1].to_string()));
    }
    if raw == "nan" || raw == "None" {
        return Ok(serde_json::Value::Null);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(serde_json::Value::from(v));
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(serde_json::Value::from(v)),
        Ok(_) => Ok(serde_json::Value::Null),
        Err(_) => Err(format!("unsupported value {:?}", raw)),
    }
}

/// Record fields as (column, cell) pairs in alphabetical order
fn record_cells<R: LogRecord>(record: &R, line: usize) -> PipelineResult<Vec<(String, String)>> {
    let value = serde_json::to_value(record).map_err(|e| PipelineError::RecordLiteral {
        line,
        reason: e.to_string(),
    })?;
    let mut cells: Vec<(String, String)> = match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                let cell = match v {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, cell)
            })
            .collect(),
        _ => Vec::new(),
    };
    cells.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(cells)
}

// ============================================================================
// FLATTENING
// ============================================================================

type Row = Vec<(String, String)>;

/// Nested object keys joined with '.'; lists and scalars become cells
fn flatten(prefix: &str, value: &LogValue, out: &mut Row) {
    match value {
        LogValue::Object(fields) => {
            for (key, inner) in &fields.0 {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&name, inner, out);
            }
        }
        other => out.push((prefix.to_string(), other.to_cell())),
    }
}

/// Replace the literal column with the record's fields, appended at the end
fn expand_literal<R: LogRecord>(row: &mut Row, line: usize) -> PipelineResult<()> {
    let Some(pos) = row.iter().position(|(name, _)| name == R::NAME) else {
        return Ok(());
    };
    let (_, literal) = row.remove(pos);
    if literal.is_empty() {
        return Ok(());
    }
    let record: R = parse_record(&literal, line)?;
    row.extend(record_cells(&record, line)?);
    Ok(())
}

fn bureau_row(data: &LogValue, line: usize) -> PipelineResult<Row> {
    let mut row = Row::new();
    flatten("", data, &mut row);
    // nested record columns lose their "<object>." prefix
    for (name, _) in row.iter_mut().skip(1) {
        if let Some((_, rest)) = name.split_once('.') {
            *name = rest.to_string();
        }
    }
    expand_literal::<AmtCredit>(&mut row, line)?;
    Ok(row)
}

fn pos_cash_rows(data: &LogValue, line: usize) -> PipelineResult<Vec<Row>> {
    let fields = match data {
        LogValue::Object(fields) => &fields.0,
        _ => {
            return Err(PipelineError::RecordLiteral {
                line,
                reason: "POS_CASH_balance data is not an object".to_string(),
            })
        }
    };
    let (Some((head_name, head)), Some((_, records))) = (fields.first(), fields.get(1)) else {
        return Err(PipelineError::RecordLiteral {
            line,
            reason: "POS_CASH_balance data needs two fields".to_string(),
        });
    };

    let items: Vec<&LogValue> = match records {
        LogValue::List(items) => items.iter().collect(),
        single => vec![single],
    };

    items
        .into_iter()
        .map(|item| {
            let mut row = Row::new();
            flatten(head_name, head, &mut row);
            flatten("", item, &mut row);
            expand_literal::<PosCashBalanceIDs>(&mut row, line)?;
            Ok(row)
        })
        .collect()
}

/// Union of all row columns in first-seen order; absent cells are missing
fn rows_to_table(rows: Vec<Row>) -> PipelineResult<Table> {
    let mut names: Vec<String> = Vec::new();
    for row in &rows {
        for (name, _) in row {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }

    let mut columns: Vec<(String, Vec<String>)> = names
        .into_iter()
        .map(|name| (name, Vec::with_capacity(rows.len())))
        .collect();
    for row in rows {
        for (name, cells) in columns.iter_mut() {
            let cell = row
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c.clone())
                .unwrap_or_default();
            cells.push(cell);
        }
    }
    Table::from_raw_columns(columns)
}

// ============================================================================
// JOB
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct LogTables {
    pub bureau: Table,
    pub pos_cash: Table,
}

/// Parse at most `limit` lines (all when `None`) from a JSON-lines reader
pub fn parse_log_lines<R: BufRead>(reader: R, limit: Option<usize>) -> Result<LogTables> {
    let mut bureau = Vec::new();
    let mut pos_cash = Vec::new();

    for (index, line) in reader.lines().take(limit.unwrap_or(usize::MAX)).enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("Failed to read log line {}", number))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogLine = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on log line {}", number))?;

        match entry.kind.as_str() {
            BUREAU_TYPE => bureau.push(bureau_row(&entry.data, number)?),
            POS_CASH_TYPE => pos_cash.extend(pos_cash_rows(&entry.data, number)?),
            other => debug!(line = number, kind = other, "skipping log record"),
        }
    }

    Ok(LogTables {
        bureau: rows_to_table(bureau)?,
        pos_cash: rows_to_table(pos_cash)?,
    })
}

pub fn parse_log_file(path: &Path, limit: Option<usize>) -> Result<LogTables> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Log file {} not found", path.display()))?;
    parse_log_lines(BufReader::new(file), limit)
        .with_context(|| format!("Failed to parse log file {}", path.display()))
}

/// Parse the log and write both tables
pub fn run(
    input: &Path,
    bureau_out: &Path,
    pos_cash_out: &Path,
    limit: Option<usize>,
) -> Result<LogTables> {
    info!(input = %input.display(), "Starting to parse log");
    let tables = parse_log_file(input, limit)?;
    tables.bureau.write_csv(bureau_out)?;
    tables.pos_cash.write_csv(pos_cash_out)?;

    info!(
        bureau_rows = tables.bureau.n_rows(),
        pos_cash_rows = tables.pos_cash.n_rows(),
        "Log successfully parsed"
    );
    Ok(tables)
}

/// Ask for a path on `output` and read the answer from `input`
pub fn prompt_path<R: BufRead, W: Write>(
    question: &str,
    input: &mut R,
    output: &mut W,
) -> Result<String> {
    write!(output, "{}: ", question)?;
    output.flush()?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read path from stdin")?;
    Ok(answer.trim().to_string())
}
