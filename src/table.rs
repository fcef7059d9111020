// 📋 Flat Tables - CSV in, columns out
// Column-oriented table used by every job: typed columns, joins, group-by.
//
// Numeric cells hold NaN for missing values so arithmetic propagates the same
// way the source data expects; text cells hold None.

use crate::agg::Agg;
use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

/// Cell contents treated as missing when reading CSV
pub const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "NULL", "null", "None"];

pub fn is_missing_marker(raw: &str) -> bool {
    MISSING_MARKERS.contains(&raw.trim())
}

// ============================================================================
// KEYS
// ============================================================================

/// Hashable, ordered cell value used for joins and grouping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    pub fn from_number(value: f64) -> Option<Key> {
        if value.is_nan() {
            None
        } else if value.fract() == 0.0 && value.abs() < 9.0e15 {
            Some(Key::Int(value as i64))
        } else {
            Some(Key::Text(format_number(value)))
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

/// CSV rendering of a numeric cell
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// ============================================================================
// COLUMN
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl Column {
    /// Build a text column from string literals (tests and fixtures)
    pub fn text_from<S: AsRef<str>>(values: &[Option<S>]) -> Column {
        Column::Text(
            values
                .iter()
                .map(|v| v.as_ref().map(|s| s.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => v[row].is_nan(),
            Column::Text(v) => v[row].is_none(),
        }
    }

    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_missing(i)).count()
    }

    pub fn key_at(&self, row: usize) -> Option<Key> {
        match self {
            Column::Numeric(v) => Key::from_number(v[row]),
            Column::Text(v) => v[row].as_ref().map(|s| Key::Text(s.clone())),
        }
    }

    /// Number of distinct non-missing values
    pub fn distinct_count(&self) -> usize {
        (0..self.len())
            .filter_map(|i| self.key_at(i))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Like `take`, with `None` producing a missing cell
    pub fn take_optional(&self, rows: &[Option<usize>]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(
                rows.iter()
                    .map(|r| r.map(|i| v[i]).unwrap_or(f64::NAN))
                    .collect(),
            ),
            Column::Text(v) => {
                Column::Text(rows.iter().map(|r| r.and_then(|i| v[i].clone())).collect())
            }
        }
    }

    fn cell_string(&self, row: usize) -> String {
        match self {
            Column::Numeric(v) => format_number(v[row]),
            Column::Text(v) => v[row].clone().unwrap_or_default(),
        }
    }

    /// Infer the column type from raw CSV cells
    fn from_raw(cells: Vec<String>) -> Column {
        let numeric = cells
            .iter()
            .filter(|c| !is_missing_marker(c))
            .all(|c| c.trim().parse::<f64>().is_ok());

        if numeric {
            Column::Numeric(
                cells
                    .iter()
                    .map(|c| {
                        if is_missing_marker(c) {
                            f64::NAN
                        } else {
                            c.trim().parse::<f64>().unwrap_or(f64::NAN)
                        }
                    })
                    .collect(),
            )
        } else {
            Column::Text(
                cells
                    .into_iter()
                    .map(|c| if is_missing_marker(&c) { None } else { Some(c) })
                    .collect(),
            )
        }
    }
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn from_columns<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, Column)>,
    ) -> PipelineResult<Self> {
        let mut table = Table::new();
        for (name, column) in columns {
            table.add_column(name, column)?;
        }
        Ok(table)
    }

    /// Build from raw text cells, inferring each column's type as CSV reading does
    pub fn from_raw_columns(columns: Vec<(String, Vec<String>)>) -> PipelineResult<Self> {
        Self::from_columns(
            columns
                .into_iter()
                .map(|(name, cells)| (name, Column::from_raw(cells))),
        )
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    pub fn column(&self, name: &str) -> PipelineResult<&Column> {
        self.position(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }

    pub fn numeric(&self, name: &str) -> PipelineResult<&[f64]> {
        match self.column(name)? {
            Column::Numeric(v) => Ok(v),
            Column::Text(_) => Err(PipelineError::ColumnType {
                name: name.to_string(),
                expected: "numeric",
            }),
        }
    }

    pub fn text(&self, name: &str) -> PipelineResult<&[Option<String>]> {
        match self.column(name)? {
            Column::Text(v) => Ok(v),
            Column::Numeric(_) => Err(PipelineError::ColumnType {
                name: name.to_string(),
                expected: "text",
            }),
        }
    }

    /// Append a column, replacing any existing column of the same name
    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> PipelineResult<()> {
        let name = name.into();
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(PipelineError::LengthMismatch {
                name,
                expected: self.n_rows(),
                got: column.len(),
            });
        }

        match self.position(&name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
        Ok(())
    }

    pub fn add_numeric(&mut self, name: impl Into<String>, values: Vec<f64>) -> PipelineResult<()> {
        self.add_column(name, Column::Numeric(values))
    }

    pub fn remove_column(&mut self, name: &str) -> PipelineResult<Column> {
        let i = self
            .position(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))?;
        self.names.remove(i);
        Ok(self.columns.remove(i))
    }

    /// New table with the named columns in the given order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> PipelineResult<Table> {
        let mut out = Table::new();
        for name in names {
            let name = name.as_ref();
            out.add_column(name, self.column(name)?.clone())?;
        }
        Ok(out)
    }

    pub fn take_rows(&self, rows: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
        }
    }

    pub fn filter(&self, mask: &[bool]) -> Table {
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|&(_, &keep)| keep)
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&rows)
    }

    /// Rows where the named column is present
    pub fn drop_missing_in(&self, name: &str) -> PipelineResult<Table> {
        let column = self.column(name)?;
        let mask: Vec<bool> = (0..column.len()).map(|i| !column.is_missing(i)).collect();
        Ok(self.filter(&mask))
    }

    /// Rows where every column is present
    pub fn drop_missing_rows(&self) -> Table {
        let mask: Vec<bool> = (0..self.n_rows())
            .map(|row| self.columns.iter().all(|c| !c.is_missing(row)))
            .collect();
        self.filter(&mask)
    }

    // ========================================================================
    // GROUPING
    // ========================================================================

    /// Row indices per distinct key tuple, ascending by key.
    /// Rows with a missing key are left out.
    pub fn group_indices<S: AsRef<str>>(
        &self,
        keys: &[S],
    ) -> PipelineResult<BTreeMap<Vec<Key>, Vec<usize>>> {
        let key_columns = keys
            .iter()
            .map(|k| self.column(k.as_ref()))
            .collect::<PipelineResult<Vec<_>>>()?;

        let mut groups: BTreeMap<Vec<Key>, Vec<usize>> = BTreeMap::new();
        'rows: for row in 0..self.n_rows() {
            let mut key = Vec::with_capacity(key_columns.len());
            for column in &key_columns {
                match column.key_at(row) {
                    Some(k) => key.push(k),
                    None => continue 'rows,
                }
            }
            groups.entry(key).or_default().push(row);
        }
        Ok(groups)
    }

    pub fn group_by(&self, key: &str) -> PipelineResult<BTreeMap<Key, Vec<usize>>> {
        Ok(self
            .group_indices(&[key])?
            .into_iter()
            .filter_map(|(mut k, rows)| k.pop().map(|k| (k, rows)))
            .collect())
    }

    /// One row per key value with `agg` applied to every listed column
    pub fn aggregate_by<S: AsRef<str>>(
        &self,
        key: &str,
        columns: &[S],
        agg: Agg,
    ) -> PipelineResult<Table> {
        let groups = self.group_by(key)?;
        let firsts: Vec<usize> = groups.values().map(|rows| rows[0]).collect();

        let mut out = Table::new();
        out.add_column(key, self.column(key)?.take(&firsts))?;

        for name in columns {
            let name = name.as_ref();
            let values = self.numeric(name)?;
            let aggregated = groups
                .values()
                .map(|rows| {
                    let group: Vec<f64> = rows.iter().map(|&i| values[i]).collect();
                    agg.apply(&group)
                })
                .collect();
            out.add_numeric(name, aggregated)?;
        }
        Ok(out)
    }

    // ========================================================================
    // JOINS
    // ========================================================================

    pub fn inner_join(&self, right: &Table, key: &str) -> PipelineResult<Table> {
        self.join(right, key, false)
    }

    pub fn left_join(&self, right: &Table, key: &str) -> PipelineResult<Table> {
        self.join(right, key, true)
    }

    fn join(&self, right: &Table, key: &str, keep_unmatched: bool) -> PipelineResult<Table> {
        let left_key = self.column(key)?;
        let right_key = right.column(key)?;

        let mut lookup: HashMap<Key, Vec<usize>> = HashMap::new();
        for row in 0..right_key.len() {
            if let Some(k) = right_key.key_at(row) {
                lookup.entry(k).or_default().push(row);
            }
        }

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for row in 0..left_key.len() {
            let matches = left_key.key_at(row).and_then(|k| lookup.get(&k));
            match matches {
                Some(rows) => {
                    for &r in rows {
                        left_rows.push(row);
                        right_rows.push(Some(r));
                    }
                }
                None if keep_unmatched => {
                    left_rows.push(row);
                    right_rows.push(None);
                }
                None => {}
            }
        }

        let mut out = self.take_rows(&left_rows);
        for (name, column) in right.columns() {
            if name == key {
                continue;
            }
            let target = if out.has_column(name) {
                format!("{}_right", name)
            } else {
                name.to_string()
            };
            out.add_column(target, column.take_optional(&right_rows))?;
        }
        Ok(out)
    }

    // ========================================================================
    // CSV I/O
    // ========================================================================

    pub fn read_csv(path: &Path) -> Result<Table> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
        Self::from_reader(file, None)
            .with_context(|| format!("Failed to read CSV file {}", path.display()))
    }

    /// Read only the named columns
    pub fn read_csv_columns<S: AsRef<str>>(path: &Path, names: &[S]) -> Result<Table> {
        let wanted: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
        Self::from_reader(file, Some(&wanted))
            .with_context(|| format!("Failed to read CSV file {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R, only: Option<&[String]>) -> Result<Table> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers().context("Failed to read CSV header")?.clone();

        let positions: Vec<(usize, String)> = match only {
            Some(wanted) => wanted
                .iter()
                .map(|w| {
                    headers
                        .iter()
                        .position(|h| h == w)
                        .map(|p| (p, w.clone()))
                        .ok_or_else(|| PipelineError::MissingColumn(w.clone()))
                })
                .collect::<PipelineResult<_>>()?,
            None => headers
                .iter()
                .enumerate()
                .map(|(i, h)| (i, h.to_string()))
                .collect(),
        };

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); positions.len()];
        for (line, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("Malformed CSV record {}", line + 2))?;
            for (slot, (pos, _)) in positions.iter().enumerate() {
                raw[slot].push(record.get(*pos).unwrap_or("").to_string());
            }
        }

        let mut table = Table::new();
        for ((_, name), cells) in positions.into_iter().zip(raw) {
            table.add_column(name, Column::from_raw(cells))?;
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
        self.to_writer(file)
            .with_context(|| format!("Failed to write CSV file {}", path.display()))
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.names)?;
        for row in 0..self.n_rows() {
            wtr.write_record(self.columns.iter().map(|c| c.cell_string(row)))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> Table {
        Table::from_reader(data.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_type_inference_and_missing_markers() {
        let table = parse("ID,AMT,STATUS\n1,10.5,Active\n2,,Closed\n3,NaN,\n");

        assert_eq!(table.n_rows(), 3);
        let amt = table.numeric("AMT").unwrap();
        assert_eq!(amt[0], 10.5);
        assert!(amt[1].is_nan());
        assert!(amt[2].is_nan());

        let status = table.text("STATUS").unwrap();
        assert_eq!(status[0].as_deref(), Some("Active"));
        assert_eq!(status[2], None);
        assert!(table.numeric("STATUS").is_err());
    }

    #[test]
    fn test_write_formats_integers_and_missing() {
        let table = Table::from_columns(vec![
            ("SK_ID_CURR", Column::Numeric(vec![100002.0, 100003.0])),
            ("RATIO", Column::Numeric(vec![0.25, f64::NAN])),
            ("TYPE", Column::text_from(&[Some("Car loan"), None])),
        ])
        .unwrap();

        let mut buf = Vec::new();
        table.to_writer(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(text, "SK_ID_CURR,RATIO,TYPE\n100002,0.25,Car loan\n100003,,\n");
    }

    #[test]
    fn test_read_selected_columns() {
        let wanted = vec!["TARGET".to_string(), "SK_ID_CURR".to_string()];
        let table = Table::from_reader(
            "SK_ID_CURR,NAME,TARGET\n1,a,0\n2,b,1\n".as_bytes(),
            Some(&wanted),
        )
        .unwrap();

        assert_eq!(table.column_names(), &["TARGET", "SK_ID_CURR"]);

        let missing = vec!["NOPE".to_string()];
        assert!(Table::from_reader("A\n1\n".as_bytes(), Some(&missing)).is_err());
    }

    #[test]
    fn test_add_column_length_check() {
        let mut table = parse("A\n1\n2\n");
        let err = table.add_numeric("B", vec![1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::LengthMismatch { .. }));

        table.add_numeric("A", vec![5.0, 6.0]).unwrap();
        assert_eq!(table.numeric("A").unwrap(), &[5.0, 6.0]);
        assert_eq!(table.n_cols(), 1);
    }

    #[test]
    fn test_inner_join_many_to_one() {
        let left = parse("SK_ID_PREV,SK_ID_CURR\n10,1\n11,1\n12,3\n");
        let right = parse("SK_ID_CURR,TARGET\n1,0\n2,1\n");

        let joined = left.inner_join(&right, "SK_ID_CURR").unwrap();

        assert_eq!(joined.n_rows(), 2);
        assert_eq!(joined.numeric("SK_ID_PREV").unwrap(), &[10.0, 11.0]);
        assert_eq!(joined.numeric("TARGET").unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn test_left_join_keeps_unmatched() {
        let left = parse("K,A\n1,x\n2,y\n");
        let right = parse("K,B,A\n1,5,z\n");

        let joined = left.left_join(&right, "K").unwrap();

        assert_eq!(joined.n_rows(), 2);
        let b = joined.numeric("B").unwrap();
        assert_eq!(b[0], 5.0);
        assert!(b[1].is_nan());
        assert_eq!(joined.text("A_right").unwrap()[0].as_deref(), Some("z"));
    }

    #[test]
    fn test_group_indices_sorted_and_skip_missing() {
        let table = parse("G,V\nb,1\na,2\n,3\nb,4\n");
        let groups = table.group_by("G").unwrap();

        let keys: Vec<String> = groups.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(groups[&Key::Text("b".into())], vec![0, 3]);
    }

    #[test]
    fn test_aggregate_by_sum() {
        let table = parse("SK_ID_CURR,X\n2,1.5\n1,2\n2,\n1,3\n");
        let out = table.aggregate_by("SK_ID_CURR", &["X"], Agg::Sum).unwrap();

        assert_eq!(out.numeric("SK_ID_CURR").unwrap(), &[1.0, 2.0]);
        assert_eq!(out.numeric("X").unwrap(), &[5.0, 1.5]);
    }

    #[test]
    fn test_distinct_count_ignores_missing() {
        let table = parse("F,X\nY,1\nN,2\n,3\nY,4\n");
        assert_eq!(table.column("F").unwrap().distinct_count(), 2);
        assert_eq!(table.column("F").unwrap().missing_count(), 1);
    }

    #[test]
    fn test_drop_missing_rows() {
        let table = parse("A,B\n1,x\n,y\n3,\n");
        let clean = table.drop_missing_rows();
        assert_eq!(clean.n_rows(), 1);
        assert_eq!(clean.numeric("A").unwrap(), &[1.0]);
    }

    #[test]
    fn test_csv_file_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let table = parse("A,B\n1,x\n2.5,\n");

        table.write_csv(&path).unwrap();
        let back = Table::read_csv(&path).unwrap();

        assert_eq!(back.numeric("A").unwrap(), &[1.0, 2.5]);
        assert_eq!(back.text("B").unwrap()[1], None);
    }

    #[test]
    fn test_read_missing_file_has_context() {
        let err = Table::read_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open CSV file"));
    }
}
