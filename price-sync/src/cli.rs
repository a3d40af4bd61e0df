//! CLI arguments (clap).

use chrono::NaiveDate;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "price-sync")]
#[command(version)]
#[command(about = "Write one day of asset closes into ClickHouse daily_prices", long_about = None)]
pub struct Cli {
    /// Day to sync (YYYY-MM-DD). Defaults to today (UTC).
    pub date: Option<NaiveDate>,

    /// Rows per ClickHouse insert
    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Resolve prices but write nothing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}
