use std::path::PathBuf;

use anyhow::Result;

use scrimstats::config::Settings;
use scrimstats::grid_api::GridClient;
use scrimstats::ingest;
use scrimstats::store;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut settings = Settings::from_env()?;
    if let Some(db_path) = parse_db_path_arg() {
        settings.db_path = db_path;
    }
    if let Some(days) = parse_days_arg() {
        settings.lookback_days = days;
    }

    let conn = store::open_db(&settings.db_path)?;
    let client = GridClient::new(settings.api_key.clone())?;
    let report = ingest::fetch_and_store_scrims(&conn, &client, &settings)?;

    println!("Scrims update complete");
    println!("DB: {}", settings.db_path.display());
    println!("Series seen: {}", report.series_seen);
    println!(
        "Games: {} seen, {} added, {} skipped",
        report.games_seen, report.games_added, report.games_skipped
    );
    println!(
        "Replays: {} stored, {} missing",
        report.replays_stored, report.replays_missing
    );
    if !report.errors.is_empty() {
        println!("Errors: {}", report.errors.len());
        for err in report.errors.iter().take(6) {
            println!(" - {err}");
        }
    }

    Ok(())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn parse_days_arg() -> Option<i64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(days) = arg.strip_prefix("--days=") {
            return days.trim().parse::<i64>().ok();
        }
        if arg == "--days" {
            return args.get(idx + 1)?.trim().parse::<i64>().ok();
        }
    }
    None
}
