// 🐘 PostgreSQL Connector - server backend for the db commands
// Compiled with the `postgres` feature. Calls are blocking; each one opens a
// connection on a private current-thread runtime and closes it when done.

use crate::config::PostgresConfig;
use crate::db::{quote_identifier, SqlConnector};
use crate::table::{Column, Table};
use anyhow::{bail, Context, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column as _, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::info;

pub struct PostgresConnector {
    options: PgConnectOptions,
    runtime: Runtime,
}

/// Connection options from the configured server and credentials
pub fn connect_options(config: &PostgresConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database);
    if let Some(user) = &config.user {
        options = options.username(user);
    }
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    options
}

impl PostgresConnector {
    pub fn new(config: &PostgresConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        Ok(Self {
            options: connect_options(config),
            runtime,
        })
    }

    async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect_with(&self.options)
            .await
            .with_context(|| format!("Failed to connect to {}", self.location()))
    }
}

impl SqlConnector for PostgresConnector {
    fn location(&self) -> String {
        format!(
            "postgres://{}:{}/{}",
            self.options.get_host(),
            self.options.get_port(),
            self.options.get_database().unwrap_or_default()
        )
    }

    fn send_sql_query(&self, sql: &str) -> Result<()> {
        self.runtime.block_on(async {
            let mut conn = self.connect().await?;
            let mut tx = conn.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to execute SQL: {}", sql))?;
            tx.commit().await.context("Failed to commit")?;
            Ok::<_, anyhow::Error>(())
        })
    }

    /// Integer and floating-point columns become numeric, text-like columns
    /// text. Other types have to be cast in the query.
    fn get_table_from_query(&self, sql: &str) -> Result<Table> {
        self.runtime.block_on(async {
            let mut conn = self.connect().await?;
            let statement = (&mut conn)
                .prepare(sql)
                .await
                .with_context(|| format!("Failed to prepare query: {}", sql))?;
            let kinds: Vec<(String, ColumnKind)> = statement
                .columns()
                .iter()
                .map(|c| Ok((c.name().to_string(), column_kind(c.type_info().name())?)))
                .collect::<Result<_>>()?;

            let rows = statement.query().fetch_all(&mut conn).await?;
            let columns = kinds
                .into_iter()
                .enumerate()
                .map(|(i, (name, kind))| Ok((name, read_column(&rows, i, kind)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok::<_, anyhow::Error>(Table::from_columns(columns)?)
        })
    }

    fn import_table(&self, name: &str, table: &Table) -> Result<usize> {
        let definitions: Vec<String> = table
            .columns()
            .map(|(column, values)| {
                let sql_type = if values.is_numeric() { "DOUBLE PRECISION" } else { "TEXT" };
                format!("{} {}", quote_identifier(column), sql_type)
            })
            .collect();
        let placeholders: Vec<String> = (1..=table.n_cols()).map(|i| format!("${}", i)).collect();
        let create = format!("CREATE TABLE {} ({})", quote_identifier(name), definitions.join(", "));
        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            quote_identifier(name),
            placeholders.join(", ")
        );

        self.runtime.block_on(async {
            let mut conn = self.connect().await?;
            let mut tx = conn.begin().await?;
            sqlx::query(&create)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to create table {}", name))?;
            for row in 0..table.n_rows() {
                let mut query = sqlx::query(&insert);
                for (_, column) in table.columns() {
                    query = match column {
                        Column::Numeric(values) => {
                            query.bind(Some(values[row]).filter(|v| !v.is_nan()))
                        }
                        Column::Text(values) => query.bind(values[row].clone()),
                    };
                }
                query
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to insert row {} into {}", row, name))?;
            }
            tx.commit().await.context("Failed to commit import")?;
            Ok::<_, anyhow::Error>(())
        })?;

        info!(table = name, rows = table.n_rows(), "Table imported");
        Ok(table.n_rows())
    }
}

// ============================================================================
// TYPE MAPPING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnKind {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Bool,
}

fn column_kind(type_name: &str) -> Result<ColumnKind> {
    Ok(match type_name {
        "INT2" => ColumnKind::Int2,
        "INT4" => ColumnKind::Int4,
        "INT8" => ColumnKind::Int8,
        "FLOAT4" => ColumnKind::Float4,
        "FLOAT8" => ColumnKind::Float8,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => ColumnKind::Text,
        "BOOL" => ColumnKind::Bool,
        other => bail!("Unsupported column type {}; cast it to float8 or text", other),
    })
}

fn read_column(rows: &[PgRow], index: usize, kind: ColumnKind) -> Result<Column> {
    let numeric = |row: &PgRow| -> Result<f64> {
        if row.try_get_raw(index)?.is_null() {
            return Ok(f64::NAN);
        }
        Ok(match kind {
            ColumnKind::Int2 => row.try_get::<i16, _>(index)? as f64,
            ColumnKind::Int4 => row.try_get::<i32, _>(index)? as f64,
            ColumnKind::Int8 => row.try_get::<i64, _>(index)? as f64,
            ColumnKind::Float4 => row.try_get::<f32, _>(index)? as f64,
            _ => row.try_get::<f64, _>(index)?,
        })
    };

    Ok(match kind {
        ColumnKind::Text => Column::Text(
            rows.iter()
                .map(|row| row.try_get::<Option<String>, _>(index))
                .collect::<Result<_, _>>()?,
        ),
        ColumnKind::Bool => Column::Text(
            rows.iter()
                .map(|row| {
                    row.try_get::<Option<bool>, _>(index)
                        .map(|v| v.map(|b| if b { "True" } else { "False" }.to_string()))
                })
                .collect::<Result<_, _>>()?,
        ),
        _ => Column::Numeric(rows.iter().map(numeric).collect::<Result<_>>()?),
    })
}
