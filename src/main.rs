use anyhow::Result;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

mod config;
mod dashboard;
mod export;
mod fetch;
mod index;
mod ingest;
mod inspect;
mod latest;
mod normalize;
mod report;
mod site;
mod store;
mod types;
mod utils;

/// Bulletin manifest published on Google Drive
pub const INDEX_URL: &str =
    "https://drive.google.com/uc?export=download&id=19iTAfHR584pr63fECI1v0DjGgwRHh6pf";
pub const DB_PATH: &str = "boletines_odepa.db";
pub const SHEET_KEYWORD: &str = "hortalizas";
/// Title block rows above the header row in every bulletin sheet
pub const HEADER_SKIP_ROWS: usize = 8;
pub const DRIVE_DOWNLOAD_BASE: &str = "https://drive.google.com/uc";
/// Public folder holding the published databases
pub const DRIVE_FOLDER_URL: &str =
    "https://drive.google.com/embeddedfolderview?id=16h5aEuSqTzVCRUqAht0eFrNTrBMamDEE";
pub const CACHE_DIR: &str = "cache";
pub const CACHE_TTL_SECS: u64 = 3600;
pub const REQUEST_TIMEOUT_SECS: u64 = 60;
pub const OUTPUT_DIR: &str = "output";
pub const CONFIG_FILE: &str = "boletines.conl";

#[derive(Parser)]
#[command(name = "odepa-boletines")]
#[command(about = "ODEPA wholesale price bulletins: ingest into SQLite and explore")]
struct Cli {
    /// Settings file (CONL); defaults to ./boletines.conl when present
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download new bulletins from the index and append them to the database
    Ingest {
        /// SQLite database file
        #[arg(long)]
        db: Option<String>,
    },
    /// Print price tables for the stored rows
    Report {
        #[command(flatten)]
        filter: dashboard::Filter,
        /// SQLite database file
        #[arg(long)]
        db: Option<String>,
    },
    /// Generate static HTML dashboards
    Generate {
        #[command(flatten)]
        filter: dashboard::Filter,
        /// SQLite database file
        #[arg(long)]
        db: Option<String>,
        /// Output directory (replaced on every run)
        #[arg(long)]
        output: Option<String>,
    },
    /// Export the stored rows as CSV
    Export {
        #[command(flatten)]
        filter: dashboard::Filter,
        /// SQLite database file
        #[arg(long)]
        db: Option<String>,
        /// CSV file to write; stdout when omitted
        #[arg(long)]
        output: Option<String>,
    },
    /// Print the report straight from the published bulletins, without a database
    Remote {
        #[command(flatten)]
        filter: dashboard::Filter,
    },
    /// Look at a local spreadsheet (xlsx, xls, ods or csv)
    Inspect {
        file: String,
        /// Sheet name; the first sheet when omitted
        #[arg(long)]
        sheet: Option<String>,
        /// Rows above the header row
        #[arg(long, default_value_t = 0)]
        skip_rows: usize,
        /// Product name fragment to look for
        #[arg(short, long, default_value = inspect::DEFAULT_PRODUCT)]
        product: String,
    },
    /// Print the report for the newest database in the public Drive folder
    LatestDb {
        #[command(flatten)]
        filter: dashboard::Filter,
    },
    /// Show effective settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings as CONL
    Show,
}

pub fn init_database(conn: &Connection) -> Result<()> {
    // Read and execute schema from SQL file
    let schema = include_str!("../schema.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info")?;

    let settings = config::Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { db } => ingest::run_ingest(&settings, db.as_deref()),
        Commands::Report { filter, db } => report::run_report(&settings, db.as_deref(), &filter),
        Commands::Generate { filter, db, output } => {
            site::run_generate(&settings, db.as_deref(), output.as_deref(), &filter)
        }
        Commands::Export { filter, db, output } => {
            export::run_export(&settings, db.as_deref(), &filter, output.as_deref())
        }
        Commands::Remote { filter } => report::run_remote(&settings, &filter),
        Commands::Inspect {
            file,
            sheet,
            skip_rows,
            product,
        } => inspect::run_inspect(&file, sheet.as_deref(), skip_rows, &product),
        Commands::LatestDb { filter } => latest::run_latest_db(&settings, &filter),
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", settings.to_conl()?);
                Ok(())
            }
        },
    }
}
