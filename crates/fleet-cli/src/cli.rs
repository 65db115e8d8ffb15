use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fleet placement and route assignment optimizer", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    /// CSV data directory (file-backend mode)
    #[arg(long, default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// Output directory for file-backend results
    #[arg(long, default_value = "output", global = true)]
    pub output_dir: PathBuf,

    /// SQLite database path; switches to the relational backend
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Algorithm configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Full optimization: placement, then route assignment
    Run {},
    /// Initial vehicle placement only
    Placement {},
    /// Route assignment using current vehicle locations
    Assignment {},
    /// Load the data set and report validation issues
    Validate {},
    /// Import the CSV file set into the SQLite backend
    Import {},
    /// Show backend contents summary
    DbInfo {},
}
