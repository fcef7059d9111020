// 🏦 credit-pipeline - command line entry point
// One subcommand per job; paths default to files inside the configured data_dir.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_default_pipeline::{
    log_parsing, model, preprocessing, DatabaseConnector, Dataset, FeatureSet, NumericTest,
    PipelineConfig, SqlConnector, Table,
};

const PROCESSED_FILE: &str = "processed_data.csv";
const PREPROCESS_INPUT_FILE: &str = "application_result.csv";
const MODEL_FILE: &str = "model.json";

/// Library and binary targets both log at info unless RUST_LOG says otherwise
const DEFAULT_LOG_FILTER: &str = "credit_default_pipeline=info,credit_pipeline=info";

#[derive(Parser)]
#[command(name = "credit-pipeline")]
#[command(about = "Home Credit default-risk data pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a per-borrower feature table from raw files
    Features {
        #[arg(value_enum)]
        set: FeatureSet,

        /// Output CSV (default: <data_dir>/<set>_features.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Keep only the columns that differ between defaulters and the rest
    Select {
        #[arg(value_enum)]
        dataset: Dataset,

        /// Test numeric columns with the bootstrap mean-difference interval
        #[arg(long, conflicts_with = "no_bootstrap")]
        bootstrap: bool,

        /// Test numeric columns with Mann-Whitney U
        #[arg(long)]
        no_bootstrap: bool,

        /// Output CSV (default: <data_dir>/<dataset>_result.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract bureau and POS_CASH_balance tables from a JSON-lines log
    ParseLog {
        /// Log file; asked for on stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long)]
        bureau_out: Option<PathBuf>,

        #[arg(long)]
        pos_cash_out: Option<PathBuf>,

        /// Read at most this many lines
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Encode, scale and rank features of a selected application table
    Preprocess {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit the logistic regression on a processed table
    Train {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long)]
        model_out: Option<PathBuf>,
    },

    /// SQLite or PostgreSQL database access
    Db {
        /// Use the configured PostgreSQL server instead of the SQLite file
        #[arg(long)]
        postgres: bool,

        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Execute statements in one transaction
    Exec { sql: String },

    /// Run a query and print or save the result as CSV
    Query {
        sql: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a CSV file into a new table
    Import { table: String, csv: PathBuf },
}

fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config = PipelineConfig::load()?;

    match cli.command {
        Commands::Features { set, output } => {
            let inputs: Vec<PathBuf> = set
                .input_files()
                .iter()
                .map(|file| config.data_file(file))
                .collect();
            let output = output.unwrap_or_else(|| config.data_file(&set.output_file()));
            set.run(&inputs, &output)?;
        }
        Commands::Select {
            dataset,
            bootstrap,
            no_bootstrap,
            output,
        } => {
            let numeric_test = match (bootstrap, no_bootstrap) {
                (true, _) => Some(NumericTest::Bootstrap),
                (_, true) => Some(NumericTest::MannWhitney),
                _ => None,
            };
            let output = output.unwrap_or_else(|| dataset.default_output(&config));
            dataset.run(&config, numeric_test, &output)?;
        }
        Commands::ParseLog {
            input,
            bureau_out,
            pos_cash_out,
            limit,
        } => {
            let stdin = io::stdin();
            let mut answers = stdin.lock();
            let mut stdout = io::stdout();
            let mut ask = |given: Option<PathBuf>, question: &str| -> Result<PathBuf> {
                match given {
                    Some(path) => Ok(path),
                    None => ask_path(question, &mut answers, &mut stdout),
                }
            };
            let input = ask(input, "Path to the input .log file")?;
            let bureau_out = ask(bureau_out, "Name for the bureau .csv file")?;
            let pos_cash_out = ask(pos_cash_out, "Name for the POS_CASH_balance .csv file")?;
            log_parsing::run(&input, &bureau_out, &pos_cash_out, limit)?;
        }
        Commands::Preprocess { input, output } => {
            let input = input.unwrap_or_else(|| config.data_file(PREPROCESS_INPUT_FILE));
            let output = output.unwrap_or_else(|| config.data_file(PROCESSED_FILE));
            preprocessing::run(&input, &output, &config.preprocessing)?;
        }
        Commands::Train { input, model_out } => {
            let input = input.unwrap_or_else(|| config.data_file(PROCESSED_FILE));
            let model_out = model_out.unwrap_or_else(|| config.data_file(MODEL_FILE));
            let artifact = model::train(&input, &model_out, &config.training)?;
            println!(
                "Best C: {}  CV ROC-AUC: {:.4}  Test ROC-AUC: {:.4}",
                artifact.c, artifact.cv_auc, artifact.test_auc
            );
        }
        Commands::Db { postgres, command } => {
            let db: Box<dyn SqlConnector> = if postgres {
                postgres_connector(&config)?
            } else {
                Box::new(DatabaseConnector::new(&config.database_path))
            };
            run_db(db.as_ref(), command)?;
        }
    }

    Ok(())
}

#[cfg(feature = "postgres")]
fn postgres_connector(config: &PipelineConfig) -> Result<Box<dyn SqlConnector>> {
    Ok(Box::new(credit_default_pipeline::PostgresConnector::new(&config.postgres)?))
}

#[cfg(not(feature = "postgres"))]
fn postgres_connector(_config: &PipelineConfig) -> Result<Box<dyn SqlConnector>> {
    bail!("PostgreSQL support is not compiled in; rebuild with --features postgres")
}

fn run_db(db: &dyn SqlConnector, command: DbCommand) -> Result<()> {
    match command {
        DbCommand::Exec { sql } => {
            db.send_sql_query(&sql)?;
            info!(database = %db.location(), "Statements committed");
        }
        DbCommand::Query { sql, output } => {
            let table = db.get_table_from_query(&sql)?;
            match output {
                Some(path) => table.write_csv(&path)?,
                None => table.to_writer(io::stdout().lock())?,
            }
        }
        DbCommand::Import { table, csv } => {
            let rows = Table::read_csv(&csv)?;
            db.import_table(&table, &rows)?;
        }
    }
    Ok(())
}

fn ask_path<R: BufRead, W: Write>(question: &str, input: &mut R, output: &mut W) -> Result<PathBuf> {
    let answer = log_parsing::prompt_path(question, input, output)?;
    if answer.is_empty() {
        bail!("No path given for: {}", question);
    }
    Ok(PathBuf::from(answer))
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_covers_binary() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(DEFAULT_LOG_FILTER
            .split(',')
            .any(|directive| directive == format!("{}=info", env!("CARGO_CRATE_NAME"))));
    }

    #[test]
    fn test_ask_path_rejects_empty_answer() {
        let mut out = Vec::new();
        assert!(ask_path("Log file", &mut "\n".as_bytes(), &mut out).is_err());
        let path = ask_path("Log file", &mut "logs/app.log\n".as_bytes(), &mut out).unwrap();
        assert_eq!(path, PathBuf::from("logs/app.log"));
    }

    #[test]
    fn test_db_command_accepts_backend_flag() {
        let cli = Cli::try_parse_from(["credit-pipeline", "db", "--postgres", "exec", "SELECT 1"]).unwrap();
        assert!(matches!(cli.command, Commands::Db { postgres: true, .. }));

        let cli = Cli::try_parse_from(["credit-pipeline", "db", "query", "SELECT 1"]).unwrap();
        assert!(matches!(cli.command, Commands::Db { postgres: false, .. }));
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_postgres_needs_feature() {
        let err = postgres_connector(&PipelineConfig::default()).err().unwrap();
        assert!(err.to_string().contains("--features postgres"));
    }
}
