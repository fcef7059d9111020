// 🗄️ Database Connector - SQLite access for the Home Credit tables
// Every call opens its own connection and closes it when done. The
// PostgreSQL backend in `postgres.rs` shares the `SqlConnector` surface.

use crate::table::{format_number, Column, Table};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::info;

/// Statement execution and result sets, whatever the backend
pub trait SqlConnector {
    /// Where the connector points, for log lines
    fn location(&self) -> String;

    /// Execute a batch of statements in one transaction and commit
    fn send_sql_query(&self, sql: &str) -> Result<()>;

    /// Run a query and collect the result set
    fn get_table_from_query(&self, sql: &str) -> Result<Table>;

    /// Create `name` from the table's columns and insert every row
    fn import_table(&self, name: &str, table: &Table) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct DatabaseConnector {
    path: PathBuf,
}

impl DatabaseConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("Failed to open database {}", self.path.display()))
    }
}

impl SqlConnector for DatabaseConnector {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn send_sql_query(&self, sql: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("Failed to execute SQL: {}", sql))?;
        tx.commit().context("Failed to commit")?;
        Ok(())
    }

    /// Columns holding only numbers and NULLs become numeric, anything else text.
    fn get_table_from_query(&self, sql: &str) -> Result<Table> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

        let mut cells: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(row.get::<_, Value>(i)?);
            }
        }

        let table = Table::from_columns(names.into_iter().zip(cells.into_iter().map(to_column)))?;
        Ok(table)
    }

    fn import_table(&self, name: &str, table: &Table) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let definitions: Vec<String> = table
            .columns()
            .map(|(column, values)| {
                let sql_type = if values.is_numeric() { "REAL" } else { "TEXT" };
                format!("{} {}", quote_identifier(column), sql_type)
            })
            .collect();
        tx.execute(
            &format!(
                "CREATE TABLE {} ({})",
                quote_identifier(name),
                definitions.join(", ")
            ),
            [],
        )
        .with_context(|| format!("Failed to create table {}", name))?;

        let placeholders: Vec<String> = (1..=table.n_cols()).map(|i| format!("?{}", i)).collect();
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                quote_identifier(name),
                placeholders.join(", ")
            ))?;
            for row in 0..table.n_rows() {
                let values = table.columns().map(|(_, column)| cell_value(column, row));
                insert
                    .execute(params_from_iter(values))
                    .with_context(|| format!("Failed to insert row {} into {}", row, name))?;
            }
        }
        tx.commit().context("Failed to commit import")?;

        info!(table = name, rows = table.n_rows(), "Table imported");
        Ok(table.n_rows())
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn cell_value(column: &Column, row: usize) -> Value {
    match column {
        Column::Numeric(values) if values[row].is_nan() => Value::Null,
        Column::Numeric(values) => Value::Real(values[row]),
        Column::Text(values) => match &values[row] {
            Some(text) => Value::Text(text.clone()),
            None => Value::Null,
        },
    }
}

fn to_column(values: Vec<Value>) -> Column {
    let numeric = values
        .iter()
        .all(|v| matches!(v, Value::Null | Value::Integer(_) | Value::Real(_)));
    if numeric {
        Column::Numeric(
            values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => *i as f64,
                    Value::Real(r) => *r,
                    _ => f64::NAN,
                })
                .collect(),
        )
    } else {
        Column::Text(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Null => None,
                    Value::Integer(i) => Some(i.to_string()),
                    Value::Real(r) => Some(format_number(r)),
                    Value::Text(t) => Some(t),
                    Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> (tempfile::TempDir, DatabaseConnector) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseConnector::new(dir.path().join("home_credit.db"));
        (dir, db)
    }

    #[test]
    fn test_send_and_query() {
        let (_dir, db) = connector();
        db.send_sql_query(
            "CREATE TABLE bureau (SK_ID_CURR INTEGER, CREDIT_ACTIVE TEXT, AMT_CREDIT_SUM REAL);
             INSERT INTO bureau VALUES (100, 'Active', 1500.5);
             INSERT INTO bureau VALUES (101, NULL, NULL);",
        )
        .unwrap();

        let table = db
            .get_table_from_query("SELECT * FROM bureau ORDER BY SK_ID_CURR")
            .unwrap();
        assert_eq!(table.column_names(), &["SK_ID_CURR", "CREDIT_ACTIVE", "AMT_CREDIT_SUM"]);
        assert_eq!(table.numeric("SK_ID_CURR").unwrap(), &[100.0, 101.0]);
        assert_eq!(
            table.text("CREDIT_ACTIVE").unwrap(),
            &[Some("Active".to_string()), None]
        );
        assert!(table.numeric("AMT_CREDIT_SUM").unwrap()[1].is_nan());
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let (_dir, db) = connector();
        db.send_sql_query("CREATE TABLE t (x INTEGER);").unwrap();

        let result = db.send_sql_query("INSERT INTO t VALUES (1); INSERT INTO missing VALUES (2);");
        assert!(result.is_err());

        let table = db.get_table_from_query("SELECT COUNT(*) AS n FROM t").unwrap();
        assert_eq!(table.numeric("n").unwrap(), &[0.0]);
    }

    #[test]
    fn test_import_table_round_trip() {
        let (_dir, db) = connector();
        let table = Table::from_columns(vec![
            ("SK_ID_CURR", Column::Numeric(vec![1.0, 2.0])),
            ("NAME_CONTRACT_TYPE", Column::text_from(&[Some("Cash loans"), None])),
            ("AMT_ANNUITY", Column::Numeric(vec![f64::NAN, 24700.5])),
        ])
        .unwrap();

        assert_eq!(db.import_table("application", &table).unwrap(), 2);
        let loaded = db.get_table_from_query("SELECT * FROM application").unwrap();

        assert_eq!(loaded.column_names(), table.column_names());
        assert_eq!(loaded.text("NAME_CONTRACT_TYPE").unwrap(), table.text("NAME_CONTRACT_TYPE").unwrap());
        assert!(loaded.numeric("AMT_ANNUITY").unwrap()[0].is_nan());
        assert!(db.import_table("application", &table).is_err());
    }

    #[test]
    fn test_bad_query_has_context() {
        let (_dir, db) = connector();
        let err = db.get_table_from_query("SELECT * FROM nowhere").unwrap_err();
        assert!(err.to_string().contains("Failed to prepare query"));
    }

    #[test]
    fn test_connector_as_trait_object() {
        let (_dir, db) = connector();
        let dynamic: &dyn SqlConnector = &db;
        dynamic.send_sql_query("CREATE TABLE t (x REAL);").unwrap();
        assert!(dynamic.location().ends_with("home_credit.db"));
        assert_eq!(dynamic.get_table_from_query("SELECT * FROM t").unwrap().n_rows(), 0);
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("AMT \"X\""), "\"AMT \"\"X\"\"\"");
    }
}
