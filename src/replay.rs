//! Replay event extraction and persistence.
//!
//! A replay arrives as a line-delimited stream of heterogeneous JSON records.
//! One pass over the stream produces three projections: a fine-grained
//! per-participant position trace, a coarser one-snapshot-per-second grouping,
//! and a discrete objective-event log. All three are then written for the game
//! in a single replace-everything transaction, so reprocessing a game can
//! never leave stale rows behind.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::summary::GameSummary;

/// Semantic kind of one decoded event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PositionSnapshot,
    MonsterKill,
    BuildingDestroyed,
    Unrecognized,
}

/// Classifies one decoded record from its schema tag. Some feed versions omit
/// the schema tag for monster kills and carry an `eventType` instead, so both
/// spellings resolve to the same kind.
pub fn classify_event(record: &Value) -> EventKind {
    let schema = record.get("rfc461Schema").and_then(|v| v.as_str());
    match schema {
        Some("stats_update") if event_time_ms(record).is_some() => EventKind::PositionSnapshot,
        Some("epic_monster_kill") => EventKind::MonsterKill,
        Some("building_destroyed") => EventKind::BuildingDestroyed,
        _ => {
            if record.get("eventType").and_then(|v| v.as_str()) == Some("ELITE_MONSTER_KILL") {
                EventKind::MonsterKill
            } else {
                EventKind::Unrecognized
            }
        }
    }
}

/// Milliseconds since game start. Feed versions disagree on the field name,
/// so both are accepted.
pub fn event_time_ms(record: &Value) -> Option<i64> {
    for key in ["gameTime", "timestamp"] {
        if let Some(value) = record.get(key) {
            if let Some(ms) = value.as_i64() {
                return Some(ms);
            }
            if let Some(ms) = value.as_f64() {
                return Some(ms as i64);
            }
        }
    }
    None
}

/// Identity info for one participant, resolved once per game from the match
/// summary and used to enrich every event.
#[derive(Debug, Clone, Default)]
pub struct ParticipantInfo {
    pub puuid: Option<String>,
    pub champion: String,
    pub team_id: Option<i64>,
}

pub fn participant_lookup(summary: &GameSummary) -> HashMap<i64, ParticipantInfo> {
    let mut map = HashMap::new();
    for p in &summary.participants {
        let Some(pid) = p.participant_id else {
            continue;
        };
        map.insert(
            pid,
            ParticipantInfo {
                puuid: p.puuid.clone(),
                champion: p
                    .champion_name
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
                team_id: p.team_id,
            },
        );
    }
    map
}

/// One fine-grained position tuple. Coordinates are truncated to whole units
/// here; the snapshot payload keeps floating precision.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub timestamp_ms: i64,
    pub participant_id: i64,
    pub puuid: String,
    pub x: i64,
    pub z: i64,
}

/// One participant's entry inside a per-second snapshot, serialized verbatim
/// into `positions_json`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SnapshotEntry {
    #[serde(rename = "participantID")]
    pub participant_id: i64,
    #[serde(rename = "championName")]
    pub champion: String,
    #[serde(rename = "teamId")]
    pub team_id: i64,
    pub x: f64,
    pub z: f64,
}

/// One normalized objective event.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveEvent {
    pub timestamp_ms: i64,
    pub objective_type: String,
    pub objective_subtype: String,
    pub team_id: Option<i64>,
    pub killer_participant_id: Option<i64>,
    pub lane: Option<String>,
}

impl ObjectiveEvent {
    /// Coarse event type stored alongside the objective type.
    pub fn event_type(&self) -> &'static str {
        if self.objective_type == "TOWER" {
            "BUILDING_KILL"
        } else {
            "ELITE_MONSTER_KILL"
        }
    }
}

/// Everything extracted from one replay pass, ready to persist.
#[derive(Debug, Default)]
pub struct ReplayExtract {
    pub trace: Vec<PositionSample>,
    /// Keyed by truncated second; the first record seen for a second wins.
    pub snapshots: BTreeMap<i64, Vec<SnapshotEntry>>,
    pub objectives: Vec<ObjectiveEvent>,
    /// Lines that failed to decode as JSON. Never fatal.
    pub ignored_lines: usize,
}

/// Runs one pass over a raw line-delimited event log. Blank lines are
/// ignored, undecodable lines counted and skipped, unrecognized records
/// silently dropped.
pub fn parse_event_log(raw: &str, lookup: &HashMap<i64, ParticipantInfo>) -> ReplayExtract {
    let mut out = ReplayExtract::default();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            out.ignored_lines += 1;
            continue;
        };

        match classify_event(&record) {
            EventKind::PositionSnapshot => collect_positions(&record, lookup, &mut out),
            kind @ (EventKind::MonsterKill | EventKind::BuildingDestroyed) => {
                if let Some(event) = extract_objective(&record, kind, lookup) {
                    out.objectives.push(event);
                }
            }
            EventKind::Unrecognized => {}
        }
    }

    out
}

fn collect_positions(
    record: &Value,
    lookup: &HashMap<i64, ParticipantInfo>,
    out: &mut ReplayExtract,
) {
    // classify_event already guaranteed a timestamp for stats_update records
    let Some(timestamp_ms) = event_time_ms(record) else {
        return;
    };
    let second = timestamp_ms / 1000;
    let entries = record
        .get("participants")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut snapshot = Vec::new();
    for entry in &entries {
        let Some(pid) = entry.get("participantID").and_then(|v| v.as_i64()) else {
            continue;
        };
        let Some(pos) = entry.get("position") else {
            continue;
        };
        let (Some(x), Some(z)) = (
            pos.get("x").and_then(|v| v.as_f64()),
            pos.get("z").and_then(|v| v.as_f64()),
        ) else {
            continue;
        };

        let info = lookup.get(&pid);
        let puuid = entry
            .get("puuid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| info.and_then(|i| i.puuid.clone()))
            .unwrap_or_else(|| format!("unknown_{pid}"));

        out.trace.push(PositionSample {
            timestamp_ms,
            participant_id: pid,
            puuid,
            x: x as i64,
            z: z as i64,
        });
        snapshot.push(SnapshotEntry {
            participant_id: pid,
            champion: info
                .map(|i| i.champion.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            team_id: info.and_then(|i| i.team_id).unwrap_or(0),
            x,
            z,
        });
    }

    if !snapshot.is_empty() {
        out.snapshots.entry(second).or_insert(snapshot);
    }
}

/// Converts one monster-kill or building-destroyed record into a normalized
/// objective event, or nothing when the record is not one we track.
pub fn extract_objective(
    record: &Value,
    kind: EventKind,
    lookup: &HashMap<i64, ParticipantInfo>,
) -> Option<ObjectiveEvent> {
    let timestamp_ms = event_time_ms(record)?;

    match kind {
        EventKind::MonsterKill => {
            let monster_type = record.get("monsterType").and_then(|v| v.as_str())?;
            let (objective_type, objective_subtype) = match monster_type {
                "dragon" => (
                    "DRAGON",
                    record
                        .get("dragonType")
                        .and_then(|v| v.as_str())
                        .unwrap_or("UNKNOWN")
                        .to_uppercase(),
                ),
                "baron" => ("BARON", "BARON".to_string()),
                "riftHerald" => ("HERALD", "HERALD".to_string()),
                "VoidGrub" => ("VOIDGRUB", "VOIDGRUB".to_string()),
                _ => return None,
            };

            let killer = record
                .get("killer")
                .and_then(|v| v.as_i64())
                .or_else(|| record.get("killerId").and_then(|v| v.as_i64()));
            let team_id = record
                .get("killerTeamId")
                .and_then(|v| v.as_i64())
                .filter(|t| *t != 0)
                .or_else(|| {
                    killer.and_then(|pid| lookup.get(&pid).and_then(|info| info.team_id))
                });

            Some(ObjectiveEvent {
                timestamp_ms,
                objective_type: objective_type.to_string(),
                objective_subtype,
                team_id,
                killer_participant_id: killer,
                lane: None,
            })
        }
        EventKind::BuildingDestroyed => {
            if record.get("buildingType").and_then(|v| v.as_str()) != Some("turret") {
                return None;
            }
            let owner_team = record.get("teamID").and_then(|v| v.as_i64());
            // Towers are destroyed by the opposing team by definition.
            let credited_team = if owner_team == Some(100) { 200 } else { 100 };

            Some(ObjectiveEvent {
                timestamp_ms,
                objective_type: "TOWER".to_string(),
                objective_subtype: record
                    .get("turretTier")
                    .and_then(|v| v.as_str())
                    .unwrap_or("UNKNOWN")
                    .to_uppercase(),
                team_id: Some(credited_team),
                killer_participant_id: record.get("lastHitter").and_then(|v| v.as_i64()),
                lane: Some(
                    record
                        .get("lane")
                        .and_then(|v| v.as_str())
                        .unwrap_or("UNKNOWN")
                        .to_uppercase(),
                ),
            })
        }
        EventKind::PositionSnapshot | EventKind::Unrecognized => None,
    }
}

/// Atomically replaces every derived row for one game across the three
/// replay tables. Any failure rolls the whole unit back; partial replacement
/// is never observable.
pub fn persist_replay(conn: &mut Connection, game_id: &str, data: &ReplayExtract) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin replay transaction")?;

    tx.execute(
        "DELETE FROM player_positions_timeline WHERE game_id = ?1",
        params![game_id],
    )
    .context("clear position trace")?;
    tx.execute(
        "DELETE FROM player_positions_snapshots WHERE game_id = ?1",
        params![game_id],
    )
    .context("clear position snapshots")?;
    tx.execute(
        "DELETE FROM objective_events WHERE game_id = ?1",
        params![game_id],
    )
    .context("clear objective events")?;

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO player_positions_timeline
                 (game_id, timestamp_ms, participant_id, player_puuid, pos_x, pos_z, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .context("prepare trace insert")?;
        for sample in &data.trace {
            stmt.execute(params![
                game_id,
                sample.timestamp_ms,
                sample.participant_id,
                sample.puuid,
                sample.x,
                sample.z,
                now,
            ])
            .context("insert position sample")?;
        }

        let mut stmt = tx
            .prepare(
                "INSERT INTO player_positions_snapshots
                 (game_id, timestamp_seconds, positions_json, last_updated)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .context("prepare snapshot insert")?;
        for (second, entries) in &data.snapshots {
            let positions_json =
                serde_json::to_string(entries).context("serialize snapshot positions")?;
            stmt.execute(params![game_id, second, positions_json, now])
                .context("insert position snapshot")?;
        }

        let mut stmt = tx
            .prepare(
                "INSERT INTO objective_events
                 (game_id, timestamp_ms, event_type, objective_type, objective_subtype,
                  team_id, killer_participant_id, lane)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .context("prepare objective insert")?;
        for event in &data.objectives {
            stmt.execute(params![
                game_id,
                event.timestamp_ms,
                event.event_type(),
                event.objective_type,
                event.objective_subtype,
                event.team_id,
                event.killer_participant_id,
                event.lane,
            ])
            .context("insert objective event")?;
        }
    }

    tx.commit().context("commit replay transaction")
}

/// Parses a raw event log against the game's summary and persists the three
/// derived projections, replacing any prior content for the game.
pub fn process_replay(
    conn: &mut Connection,
    game_id: &str,
    raw_log: &str,
    summary: &GameSummary,
) -> Result<()> {
    let lookup = participant_lookup(summary);
    let data = parse_event_log(raw_log, &lookup);
    if data.ignored_lines > 0 {
        warn!(game_id, ignored = data.ignored_lines, "skipped undecodable event log lines");
    }
    debug!(
        game_id,
        trace = data.trace.len(),
        snapshots = data.snapshots.len(),
        objectives = data.objectives.len(),
        "replay extract complete"
    );
    persist_replay(conn, game_id, &data)?;
    info!(
        game_id,
        positions = data.trace.len(),
        events = data.objectives.len(),
        "replay stored"
    );
    Ok(())
}

/// One frame of the reconstructed position timeline.
#[derive(Debug, Clone)]
pub struct ReplayFrame {
    pub timestamp_ms: i64,
    pub positions: Vec<Value>,
}

/// One event in the reconstructed event sequence.
#[derive(Debug, Clone)]
pub struct ReplayEvent {
    pub timestamp_ms: i64,
    pub event_type: String,
    pub victim_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct GameReplay {
    pub timeline: Vec<ReplayFrame>,
    pub events: Vec<ReplayEvent>,
}

/// Read path for the stored replay of one game. Returns empty sequences when
/// nothing is stored for the game.
pub fn get_replay_data(conn: &Connection, game_id: &str) -> Result<GameReplay> {
    let mut stmt = conn
        .prepare(
            "SELECT timestamp_seconds, positions_json
             FROM player_positions_snapshots
             WHERE game_id = ?1
             ORDER BY timestamp_seconds ASC",
        )
        .context("prepare snapshot query")?;
    let rows = stmt
        .query_map(params![game_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .context("query snapshots")?;

    let mut timeline = Vec::new();
    for row in rows {
        let (second, positions_json) = row.context("decode snapshot row")?;
        let positions = serde_json::from_str::<Vec<Value>>(&positions_json)
            .context("decode snapshot positions json")?;
        timeline.push(ReplayFrame {
            timestamp_ms: second * 1000,
            positions,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT timestamp_ms, event_type, killer_participant_id
             FROM objective_events
             WHERE game_id = ?1
             ORDER BY timestamp_ms ASC",
        )
        .context("prepare event query")?;
    let rows = stmt
        .query_map(params![game_id], |row| {
            Ok(ReplayEvent {
                timestamp_ms: row.get(0)?,
                event_type: row.get(1)?,
                victim_id: row.get(2)?,
            })
        })
        .context("query events")?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row.context("decode event row")?);
    }

    Ok(GameReplay { timeline, events })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_known_schemas() {
        assert_eq!(
            classify_event(&json!({"rfc461Schema": "stats_update", "gameTime": 1000})),
            EventKind::PositionSnapshot
        );
        // stats_update without a timestamp is not position-bearing
        assert_eq!(
            classify_event(&json!({"rfc461Schema": "stats_update"})),
            EventKind::Unrecognized
        );
        assert_eq!(
            classify_event(&json!({"rfc461Schema": "epic_monster_kill"})),
            EventKind::MonsterKill
        );
        assert_eq!(
            classify_event(&json!({"eventType": "ELITE_MONSTER_KILL"})),
            EventKind::MonsterKill
        );
        assert_eq!(
            classify_event(&json!({"rfc461Schema": "building_destroyed"})),
            EventKind::BuildingDestroyed
        );
        assert_eq!(
            classify_event(&json!({"rfc461Schema": "champ_select"})),
            EventKind::Unrecognized
        );
    }

    #[test]
    fn event_time_accepts_both_field_names() {
        assert_eq!(event_time_ms(&json!({"gameTime": 1234})), Some(1234));
        assert_eq!(event_time_ms(&json!({"timestamp": 1234.7})), Some(1234));
        assert_eq!(event_time_ms(&json!({})), None);
    }

    #[test]
    fn unknown_monster_produces_no_event() {
        let record = json!({
            "rfc461Schema": "epic_monster_kill",
            "gameTime": 5000,
            "monsterType": "unknownThing",
        });
        assert!(extract_objective(&record, EventKind::MonsterKill, &HashMap::new()).is_none());
    }

    #[test]
    fn monster_team_falls_back_to_killer_team() {
        let mut lookup = HashMap::new();
        lookup.insert(
            3,
            ParticipantInfo {
                puuid: None,
                champion: "LeeSin".to_string(),
                team_id: Some(100),
            },
        );
        let record = json!({
            "rfc461Schema": "epic_monster_kill",
            "gameTime": 5000,
            "monsterType": "dragon",
            "dragonType": "infernal",
            "killerId": 3,
        });
        let event = extract_objective(&record, EventKind::MonsterKill, &lookup).expect("event");
        assert_eq!(event.objective_type, "DRAGON");
        assert_eq!(event.objective_subtype, "INFERNAL");
        assert_eq!(event.team_id, Some(100));
        assert_eq!(event.killer_participant_id, Some(3));
        assert_eq!(event.lane, None);
        assert_eq!(event.event_type(), "ELITE_MONSTER_KILL");
    }

    #[test]
    fn tower_credit_inverts_owner() {
        for (owner, credited) in [(100, 200), (200, 100)] {
            let record = json!({
                "rfc461Schema": "building_destroyed",
                "gameTime": 60000,
                "buildingType": "turret",
                "teamID": owner,
                "turretTier": "outer",
                "lastHitter": 7,
                "lane": "mid",
            });
            let event =
                extract_objective(&record, EventKind::BuildingDestroyed, &HashMap::new())
                    .expect("event");
            assert_eq!(event.team_id, Some(credited));
            assert_eq!(event.objective_subtype, "OUTER");
            assert_eq!(event.lane.as_deref(), Some("MID"));
            assert_eq!(event.event_type(), "BUILDING_KILL");
        }
    }

    #[test]
    fn non_turret_buildings_are_skipped() {
        let record = json!({
            "rfc461Schema": "building_destroyed",
            "gameTime": 60000,
            "buildingType": "inhibitor",
            "teamID": 100,
        });
        assert!(
            extract_objective(&record, EventKind::BuildingDestroyed, &HashMap::new()).is_none()
        );
    }

    #[test]
    fn snapshot_first_second_wins() {
        let log = [
            json!({
                "rfc461Schema": "stats_update",
                "gameTime": 1000,
                "participants": [
                    {"participantID": 1, "position": {"x": 100.5, "z": 200.5}},
                ],
            }),
            json!({
                "rfc461Schema": "stats_update",
                "gameTime": 1400,
                "participants": [
                    {"participantID": 1, "position": {"x": 999.0, "z": 999.0}},
                ],
            }),
        ]
        .map(|v| v.to_string())
        .join("\n");

        let extract = parse_event_log(&log, &HashMap::new());
        // both records land in the trace
        assert_eq!(extract.trace.len(), 2);
        assert_eq!(extract.trace[0].x, 100);
        assert_eq!(extract.trace[1].x, 999);
        // only the first record populates the snapshot for second 1
        assert_eq!(extract.snapshots.len(), 1);
        let entries = extract.snapshots.get(&1).expect("snapshot for second 1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].x, 100.5);
    }

    #[test]
    fn entries_without_pid_or_axis_are_skipped() {
        let log = json!({
            "rfc461Schema": "stats_update",
            "gameTime": 2000,
            "participants": [
                {"position": {"x": 1.0, "z": 2.0}},
                {"participantID": 2, "position": {"x": 1.0}},
                {"participantID": 3},
                {"participantID": 4, "position": {"x": 10.0, "z": 20.0}},
            ],
        })
        .to_string();

        let extract = parse_event_log(&log, &HashMap::new());
        assert_eq!(extract.trace.len(), 1);
        assert_eq!(extract.trace[0].participant_id, 4);
        assert_eq!(extract.trace[0].puuid, "unknown_4");
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let log = format!(
            "{}\nnot json at all\n\n{}",
            json!({
                "rfc461Schema": "stats_update",
                "gameTime": 1000,
                "participants": [
                    {"participantID": 1, "position": {"x": 1.0, "z": 2.0}},
                ],
            }),
            json!({
                "rfc461Schema": "building_destroyed",
                "gameTime": 90000,
                "buildingType": "turret",
                "teamID": 200,
                "lastHitter": 2,
            }),
        );

        let extract = parse_event_log(&log, &HashMap::new());
        assert_eq!(extract.ignored_lines, 1);
        assert_eq!(extract.trace.len(), 1);
        assert_eq!(extract.objectives.len(), 1);
        assert_eq!(extract.objectives[0].team_id, Some(100));
    }
}
