//! Ingestion orchestrator.
//!
//! Walks recently discovered scrim series game by game: dedup gate, summary
//! fetch, roster-side resolution, scrims-row write, then the replay pipeline.
//! The scrims insert runs in autocommit mode and is durable before the replay
//! transaction starts, so the two writers never hold overlapping
//! transactions against the storage file. No single game's failure aborts
//! the run.

use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::Settings;
use crate::grid_api::GridClient;
use crate::replay;
use crate::store;
use crate::summary::{self, GameSummary, RosterScan};

/// Pause between provider calls, to stay friendly with rate limits.
const REQUEST_PACING: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub series_seen: usize,
    pub games_seen: usize,
    pub games_added: usize,
    pub games_skipped: usize,
    pub replays_stored: usize,
    pub replays_missing: usize,
    pub errors: Vec<String>,
}

/// Discovers and ingests new scrim games. `conn` is the match-record writer;
/// the replay pipeline opens its own connection per game after the record
/// commit, retrying while the file is busy.
pub fn fetch_and_store_scrims(
    conn: &Connection,
    client: &GridClient,
    settings: &Settings,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    let series_list = client
        .fetch_recent_series(settings.lookback_days)
        .context("fetch series list")?;
    if series_list.is_empty() {
        info!("no recent series found");
        return Ok(report);
    }
    info!(series = series_list.len(), days = settings.lookback_days, "starting scrims update");

    let mut existing = store::existing_game_ids(conn).context("read existing game ids")?;
    info!(existing = existing.len(), "existing game ids in db");

    for (idx, series) in series_list.iter().enumerate() {
        report.series_seen += 1;
        if (idx + 1) % 10 == 0 {
            info!(processed = idx + 1, total = series_list.len(), "processing series");
        }

        let games = match client.fetch_series_games(&series.id) {
            Ok(games) => games,
            Err(err) => {
                warn!(series_id = %series.id, error = %err, "series state unavailable");
                report.errors.push(format!("series {}: {err:#}", series.id));
                continue;
            }
        };
        if games.is_empty() {
            std::thread::sleep(REQUEST_PACING / 2);
            continue;
        }

        for game in &games {
            report.games_seen += 1;
            if existing.contains(&game.id) {
                continue;
            }

            match ingest_game(conn, client, settings, &series.id, game.sequence_number, &game.id) {
                Ok(GameOutcome::Added { replay }) => {
                    report.games_added += 1;
                    existing.insert(game.id.clone());
                    match replay {
                        ReplayOutcome::Stored => report.replays_stored += 1,
                        ReplayOutcome::Missing => report.replays_missing += 1,
                        ReplayOutcome::Failed(err) => {
                            report.errors.push(format!("replay {}: {err}", game.id));
                        }
                    }
                }
                Ok(GameOutcome::Skipped) => report.games_skipped += 1,
                Err(err) => {
                    warn!(game_id = %game.id, error = %err, "game ingest failed");
                    report.errors.push(format!("game {}: {err:#}", game.id));
                }
            }
            std::thread::sleep(REQUEST_PACING / 4);
        }

        std::thread::sleep(REQUEST_PACING / 2);
    }

    info!(
        added = report.games_added,
        skipped = report.games_skipped,
        replays = report.replays_stored,
        "scrims update finished"
    );
    Ok(report)
}

enum GameOutcome {
    Added { replay: ReplayOutcome },
    Skipped,
}

enum ReplayOutcome {
    Stored,
    Missing,
    Failed(String),
}

fn ingest_game(
    conn: &Connection,
    client: &GridClient,
    settings: &Settings,
    series_id: &str,
    sequence_number: i64,
    game_id: &str,
) -> Result<GameOutcome> {
    let Some(raw_summary) = client
        .fetch_game_summary(series_id, sequence_number)
        .context("fetch game summary")?
    else {
        return Ok(GameOutcome::Skipped);
    };
    let summary: GameSummary =
        serde_json::from_value(raw_summary).context("decode game summary")?;
    if !summary.is_complete() {
        return Ok(GameOutcome::Skipped);
    }

    let side = match summary::find_roster_side(&summary.participants, &settings.roster) {
        RosterScan::Found(side) => side,
        RosterScan::Ambiguous => {
            warn!(game_id, "roster players found on both sides, skipping");
            return Ok(GameOutcome::Skipped);
        }
        RosterScan::NotFound => return Ok(GameOutcome::Skipped),
    };

    let opponent = summary::opponent_name(&summary.participants, side);
    let row = summary::build_scrim_row(game_id, &summary, side, &settings.team_name, &opponent);

    // Autocommit: the row is durable here, before the replay writer starts.
    let inserted = store::insert_scrim(conn, &row).context("insert scrim row")?;
    if !inserted {
        return Ok(GameOutcome::Skipped);
    }
    info!(game_id, opponent = %opponent, result = %row.result, "new game added");

    let replay = match client.fetch_raw_event_log(series_id, sequence_number) {
        Ok(Some(raw_log)) => match persist_game_replay(settings, game_id, &raw_log, &summary) {
            Ok(()) => ReplayOutcome::Stored,
            Err(err) => {
                warn!(game_id, error = %err, "replay persistence failed");
                ReplayOutcome::Failed(format!("{err:#}"))
            }
        },
        Ok(None) => {
            warn!(game_id, series_id, sequence_number, "event log not available");
            ReplayOutcome::Missing
        }
        Err(err) => {
            warn!(game_id, error = %err, "event log fetch failed");
            ReplayOutcome::Failed(format!("{err:#}"))
        }
    };

    Ok(GameOutcome::Added { replay })
}

fn persist_game_replay(
    settings: &Settings,
    game_id: &str,
    raw_log: &str,
    summary: &GameSummary,
) -> Result<()> {
    let mut replay_conn = store::open_db_with_retry(&settings.db_path)?;
    replay::process_replay(&mut replay_conn, game_id, raw_log, summary)
}
