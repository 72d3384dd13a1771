//! detection-summary - print one local day of detection statistics

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use detection_store::{open_store, DetectionConfig, StoreLog};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the detection database (overrides DETECTION_DB_PATH and the config file).
    #[arg(long)]
    db_path: Option<String>,
    /// Local calendar day to summarize (YYYY-MM-DD); defaults to today.
    #[arg(long, value_name = "DATE")]
    date: Option<String>,
    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DetectionConfig::load()?;
    if let Some(db_path) = args.db_path {
        cfg.store.db_path = db_path;
    }
    let date = match args.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| anyhow!("invalid --date {:?}: {}", raw, e))?,
        None => Local::now().date_naive(),
    };

    let store = open_store(&cfg, StoreLog::global())?;
    let report = store.daily_rollup(date, &Local)?;
    log::debug!(
        "rollup {} .. {} over {}",
        report.since,
        report.until,
        cfg.store.db_path
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(())
}
