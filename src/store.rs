use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, ErrorCode, params_from_iter};
use tracing::warn;

pub const ROLE_ABBRS: [&str; 5] = ["TOP", "JGL", "MID", "BOT", "SUP"];
pub const SIDES: [&str; 2] = ["Blue", "Red"];

const PLAYER_STATS: [&str; 10] = [
    "Player", "Champ", "K", "D", "A", "Dmg", "CS", "Items", "Runes", "Gold",
];

const BUSY_RETRY_ATTEMPTS: u32 = 5;
const BUSY_RETRY_DELAY: Duration = Duration::from_secs(1);
const BUSY_TIMEOUT_MS: u32 = 60_000;

/// One per-role stat line inside a scrim row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerLine {
    pub name: String,
    pub champion: String,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub damage: i64,
    pub creep_score: i64,
    pub items: String,
    pub runes: String,
    pub gold: i64,
}

/// One row of the `scrims` table: the per-game record written by the
/// orchestrator and read by the aggregation layer. Bans and player lines are
/// in role order (TOP, JGL, MID, BOT, SUP).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrimRow {
    pub game_id: String,
    pub date: String,
    pub patch: String,
    pub blue_team: String,
    pub red_team: String,
    pub duration: String,
    pub result: String,
    pub blue_bans: [String; 5],
    pub red_bans: [String; 5],
    pub blue: [PlayerLine; 5],
    pub red: [PlayerLine; 5],
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Opens a second connection against a database another writer may still
/// hold. Retries a bounded number of times on busy/locked, then gives up so
/// the caller can skip the unit of work instead of failing the run.
pub fn open_db_with_retry(path: &Path) -> Result<Connection> {
    let mut last_err = None;
    for attempt in 1..=BUSY_RETRY_ATTEMPTS {
        match Connection::open(path) {
            Ok(conn) => {
                conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS as u64))
                    .context("set busy timeout")?;
                return Ok(conn);
            }
            Err(err) if is_busy(&err) => {
                warn!(attempt, max = BUSY_RETRY_ATTEMPTS, "database busy, retrying connection");
                last_err = Some(err);
                std::thread::sleep(BUSY_RETRY_DELAY);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("open sqlite db {}", path.display()));
            }
        }
    }
    match last_err {
        Some(err) => {
            Err(err).with_context(|| format!("sqlite db {} busy after retries", path.display()))
        }
        None => Err(anyhow!("sqlite db {} busy after retries", path.display())),
    }
}

pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    let mut ddl = String::from(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS scrims (
            Game_ID TEXT PRIMARY KEY,
            Date TEXT NOT NULL,
            Patch TEXT NOT NULL,
            Blue_Team_Name TEXT NOT NULL,
            Red_Team_Name TEXT NOT NULL,
            Duration TEXT NOT NULL,
            Result TEXT NOT NULL,
        "#,
    );
    for side in SIDES {
        for slot in 1..=5 {
            ddl.push_str(&format!("    {side}_Ban_{slot}_ID TEXT NOT NULL,\n"));
        }
    }
    for (idx, column) in player_columns().iter().enumerate() {
        let kind = if column.ends_with("_Player")
            || column.ends_with("_Champ")
            || column.ends_with("_Items")
            || column.ends_with("_Runes")
        {
            "TEXT"
        } else {
            "INTEGER"
        };
        ddl.push_str(&format!("    {column} {kind} NOT NULL"));
        ddl.push_str(if idx + 1 == player_columns().len() {
            "\n"
        } else {
            ",\n"
        });
    }
    ddl.push_str(
        r#"
        );
        CREATE INDEX IF NOT EXISTS idx_scrims_date ON scrims(Date);

        CREATE TABLE IF NOT EXISTS player_positions_timeline (
            game_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            participant_id INTEGER NOT NULL,
            player_puuid TEXT NOT NULL,
            pos_x INTEGER NOT NULL,
            pos_z INTEGER NOT NULL,
            last_updated TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_timeline_game ON player_positions_timeline(game_id);

        CREATE TABLE IF NOT EXISTS player_positions_snapshots (
            game_id TEXT NOT NULL,
            timestamp_seconds INTEGER NOT NULL,
            positions_json TEXT NOT NULL,
            last_updated TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_game ON player_positions_snapshots(game_id);

        CREATE TABLE IF NOT EXISTS objective_events (
            game_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            objective_type TEXT NOT NULL,
            objective_subtype TEXT NULL,
            team_id INTEGER NULL,
            killer_participant_id INTEGER NULL,
            lane TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_objectives_game ON objective_events(game_id);
        "#,
    );

    conn.execute_batch(&ddl).context("create sqlite schema")?;
    Ok(())
}

/// Game ids already present in the scrims table; the orchestrator's dedup
/// gate checks this before fetching anything for a game.
pub fn existing_game_ids(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT Game_ID FROM scrims")
        .context("prepare existing ids query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query existing ids")?;
    let mut out = HashSet::new();
    for row in rows {
        out.insert(row.context("decode game id")?);
    }
    Ok(out)
}

/// Inserts one scrim row, ignoring duplicates by game id. Runs in autocommit
/// mode so a successful insert is durable before the caller moves on to the
/// replay pipeline. Returns whether a new row was written.
pub fn insert_scrim(conn: &Connection, row: &ScrimRow) -> Result<bool> {
    let mut columns: Vec<String> = vec![
        "Game_ID".into(),
        "Date".into(),
        "Patch".into(),
        "Blue_Team_Name".into(),
        "Red_Team_Name".into(),
        "Duration".into(),
        "Result".into(),
    ];
    for side in SIDES {
        for slot in 1..=5 {
            columns.push(format!("{side}_Ban_{slot}_ID"));
        }
    }
    columns.extend(player_columns());

    let mut values: Vec<rusqlite::types::Value> = vec![
        row.game_id.clone().into(),
        row.date.clone().into(),
        row.patch.clone().into(),
        row.blue_team.clone().into(),
        row.red_team.clone().into(),
        row.duration.clone().into(),
        row.result.clone().into(),
    ];
    for ban in row.blue_bans.iter().chain(row.red_bans.iter()) {
        values.push(ban.clone().into());
    }
    for line in row.blue.iter().chain(row.red.iter()) {
        values.push(line.name.clone().into());
        values.push(line.champion.clone().into());
        values.push(line.kills.into());
        values.push(line.deaths.into());
        values.push(line.assists.into());
        values.push(line.damage.into());
        values.push(line.creep_score.into());
        values.push(line.items.clone().into());
        values.push(line.runes.clone().into());
        values.push(line.gold.into());
    }

    let placeholders = (1..=values.len())
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT OR IGNORE INTO scrims ({}) VALUES ({placeholders})",
        columns.join(", ")
    );
    let changed = conn
        .execute(&sql, params_from_iter(values))
        .context("insert scrim row")?;
    Ok(changed > 0)
}

/// Loads scrim rows, newest first, optionally restricted to games on or
/// after `cutoff_date` (same `YYYY-MM-DD HH:MM:SS` format the rows store).
pub fn load_scrim_rows(conn: &Connection, cutoff_date: Option<&str>) -> Result<Vec<ScrimRow>> {
    let mut columns: Vec<String> = vec![
        "Game_ID".into(),
        "Date".into(),
        "Patch".into(),
        "Blue_Team_Name".into(),
        "Red_Team_Name".into(),
        "Duration".into(),
        "Result".into(),
    ];
    for side in SIDES {
        for slot in 1..=5 {
            columns.push(format!("{side}_Ban_{slot}_ID"));
        }
    }
    columns.extend(player_columns());

    let where_clause = if cutoff_date.is_some() {
        "WHERE Date >= ?1"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {} FROM scrims {where_clause} ORDER BY Date DESC",
        columns.join(", ")
    );
    let mut stmt = conn.prepare(&sql).context("prepare scrim rows query")?;
    let params: Vec<String> = cutoff_date.iter().map(|c| c.to_string()).collect();
    let rows = stmt
        .query_map(params_from_iter(params), row_to_scrim)
        .context("query scrim rows")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode scrim row")?);
    }
    Ok(out)
}

fn row_to_scrim(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScrimRow> {
    let mut out = ScrimRow {
        game_id: row.get(0)?,
        date: row.get(1)?,
        patch: row.get(2)?,
        blue_team: row.get(3)?,
        red_team: row.get(4)?,
        duration: row.get(5)?,
        result: row.get(6)?,
        ..ScrimRow::default()
    };
    let mut idx = 7;
    for slot in 0..5 {
        out.blue_bans[slot] = row.get(idx)?;
        idx += 1;
    }
    for slot in 0..5 {
        out.red_bans[slot] = row.get(idx)?;
        idx += 1;
    }
    for side in 0..2 {
        for role in 0..5 {
            let line = PlayerLine {
                name: row.get(idx)?,
                champion: row.get(idx + 1)?,
                kills: row.get(idx + 2)?,
                deaths: row.get(idx + 3)?,
                assists: row.get(idx + 4)?,
                damage: row.get(idx + 5)?,
                creep_score: row.get(idx + 6)?,
                items: row.get(idx + 7)?,
                runes: row.get(idx + 8)?,
                gold: row.get(idx + 9)?,
            };
            idx += 10;
            if side == 0 {
                out.blue[role] = line;
            } else {
                out.red[role] = line;
            }
        }
    }
    Ok(out)
}

/// Column names for the 2x5 player stat block, side-major then role order.
pub fn player_columns() -> Vec<String> {
    let mut out = Vec::with_capacity(SIDES.len() * ROLE_ABBRS.len() * PLAYER_STATS.len());
    for side in SIDES {
        for role in ROLE_ABBRS {
            for stat in PLAYER_STATS {
                out.push(format!("{side}_{role}_{stat}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_roundtrip_insert_or_ignore() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        init_schema(&conn).expect("schema");

        let mut row = ScrimRow::default();
        row.game_id = "g1".to_string();
        assert!(insert_scrim(&conn, &row).expect("first insert"));
        assert!(!insert_scrim(&conn, &row).expect("duplicate insert ignored"));

        let ids = existing_game_ids(&conn).expect("ids");
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("g1"));
    }

    #[test]
    fn player_columns_count() {
        assert_eq!(player_columns().len(), 100);
        assert!(player_columns().contains(&"Blue_TOP_Player".to_string()));
        assert!(player_columns().contains(&"Red_SUP_Gold".to_string()));
    }
}
