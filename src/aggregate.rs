//! Aggregated summaries over stored scrims: overall side win/loss totals,
//! per-game history with the objective-event timeline, and per-(player,
//! champion) stat bundles for the tracked roster.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{Connection, params};

use crate::static_data::{ChampionData, DataDragonCache};
use crate::store::{self, ScrimRow};
use crate::summary::ROLE_ORDER;

/// Time window over the stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    AllTime,
    LastDays(i64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallStats {
    pub total_games: usize,
    pub blue_wins: usize,
    pub blue_losses: usize,
    pub red_wins: usize,
    pub red_losses: usize,
}

/// One objective event rendered for a game's history entry.
#[derive(Debug, Clone)]
pub struct ObjectiveLine {
    pub time: String,
    pub text: String,
    pub timestamp_ms: i64,
    pub team_id: Option<i64>,
    pub objective_type: String,
}

/// One participant line in a game's history entry.
#[derive(Debug, Clone)]
pub struct HistoryPlayer {
    pub role: &'static str,
    pub name: String,
    pub champion: String,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub damage: i64,
    pub creep_score: i64,
    pub items: String,
    pub runes: String,
}

#[derive(Debug, Clone)]
pub struct GameHistory {
    pub game_id: String,
    pub date: String,
    pub patch: String,
    pub blue_team: String,
    pub red_team: String,
    pub result: String,
    pub duration: String,
    /// Ban champion ids as stored; `apply_champion_names` maps them to
    /// display names.
    pub blue_bans: [String; 5],
    pub red_bans: [String; 5],
    pub blue_players: Vec<HistoryPlayer>,
    pub red_players: Vec<HistoryPlayer>,
    pub blue_total_kills: i64,
    pub red_total_kills: i64,
    pub max_damage: i64,
    pub blue_events: Vec<ObjectiveLine>,
    pub red_events: Vec<ObjectiveLine>,
}

impl GameHistory {
    /// Replaces numeric ban ids with champion display names where the map
    /// knows them; unknown ids and "N/A" slots pass through unchanged.
    pub fn apply_champion_names(&mut self, data: &ChampionData) {
        for ban in self.blue_bans.iter_mut().chain(self.red_bans.iter_mut()) {
            if let Some(name) = data.id_map.get(ban) {
                *ban = name.clone();
            }
        }
    }
}

/// Accumulated stats for one (player, champion) pairing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChampionStats {
    pub games: usize,
    pub wins: usize,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub damage: i64,
    pub creep_score: i64,
}

impl ChampionStats {
    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        (self.wins as f64 / self.games as f64 * 1000.0).round() / 10.0
    }

    pub fn kda(&self) -> f64 {
        let deaths = self.deaths.max(1) as f64;
        ((self.kills + self.assists) as f64 / deaths * 10.0).round() / 10.0
    }

    pub fn avg_damage(&self) -> i64 {
        if self.games == 0 {
            return 0;
        }
        self.damage / self.games as i64
    }

    pub fn avg_creep_score(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        (self.creep_score as f64 / self.games as f64 * 10.0).round() / 10.0
    }
}

#[derive(Debug, Default)]
pub struct ScrimAggregate {
    pub overall: OverallStats,
    pub history: Vec<GameHistory>,
    /// Keyed by (player name, champion name).
    pub player_stats: HashMap<(String, String), ChampionStats>,
}

/// Builds display aggregates for the tracked team over the given window.
pub fn aggregate_scrims(
    conn: &Connection,
    window: TimeWindow,
    team_name: &str,
) -> Result<ScrimAggregate> {
    let cutoff = match window {
        TimeWindow::AllTime => None,
        TimeWindow::LastDays(days) => Some(
            (Utc::now() - ChronoDuration::days(days))
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
    };
    let rows = store::load_scrim_rows(conn, cutoff.as_deref()).context("load scrim rows")?;

    let mut out = ScrimAggregate::default();
    for row in &rows {
        let is_our_blue = row.blue_team == team_name;
        let is_our_red = row.red_team == team_name;
        let won = row.result == "Win";

        out.overall.total_games += 1;
        if is_our_blue {
            if won {
                out.overall.blue_wins += 1;
            } else {
                out.overall.blue_losses += 1;
            }
        } else if is_our_red {
            if won {
                out.overall.red_wins += 1;
            } else {
                out.overall.red_losses += 1;
            }
        }

        let (blue_events, red_events) = load_objective_lines(conn, &row.game_id)?;
        out.history
            .push(build_history_entry(row, blue_events, red_events));

        if is_our_blue || is_our_red {
            let ours = if is_our_blue { &row.blue } else { &row.red };
            for line in ours {
                let key = (line.name.clone(), line.champion.clone());
                let stats = out.player_stats.entry(key).or_default();
                stats.games += 1;
                stats.wins += usize::from(won);
                stats.kills += line.kills;
                stats.deaths += line.deaths;
                stats.assists += line.assists;
                stats.damage += line.damage;
                stats.creep_score += line.creep_score;
            }
        }
    }

    Ok(out)
}

/// Same as [`aggregate_scrims`], with ban ids resolved to champion display
/// names through the Data Dragon cache.
pub fn aggregate_scrims_with_names(
    conn: &Connection,
    window: TimeWindow,
    team_name: &str,
    ddragon: &mut DataDragonCache,
) -> Result<ScrimAggregate> {
    let data = ddragon.champion_data();
    let mut agg = aggregate_scrims(conn, window, team_name)?;
    for game in &mut agg.history {
        game.apply_champion_names(&data);
    }
    Ok(agg)
}

fn build_history_entry(
    row: &ScrimRow,
    blue_events: Vec<ObjectiveLine>,
    red_events: Vec<ObjectiveLine>,
) -> GameHistory {
    let mut entry = GameHistory {
        game_id: row.game_id.clone(),
        date: row.date.clone(),
        patch: row.patch.clone(),
        blue_team: row.blue_team.clone(),
        red_team: row.red_team.clone(),
        result: row.result.clone(),
        duration: row.duration.clone(),
        blue_bans: row.blue_bans.clone(),
        red_bans: row.red_bans.clone(),
        blue_players: Vec::with_capacity(5),
        red_players: Vec::with_capacity(5),
        blue_total_kills: 0,
        red_total_kills: 0,
        max_damage: 1,
        blue_events,
        red_events,
    };

    for (role_idx, role) in ROLE_ORDER.into_iter().enumerate() {
        for blue_side in [true, false] {
            let line = if blue_side {
                &row.blue[role_idx]
            } else {
                &row.red[role_idx]
            };
            entry.max_damage = entry.max_damage.max(line.damage);
            let player = HistoryPlayer {
                role,
                name: line.name.clone(),
                champion: line.champion.clone(),
                kills: line.kills,
                deaths: line.deaths,
                assists: line.assists,
                damage: line.damage,
                creep_score: line.creep_score,
                items: line.items.clone(),
                runes: line.runes.clone(),
            };
            if blue_side {
                entry.blue_total_kills += line.kills;
                entry.blue_players.push(player);
            } else {
                entry.red_total_kills += line.kills;
                entry.red_players.push(player);
            }
        }
    }

    entry
}

/// Loads one game's objective events, split by crediting team, ordered by
/// timestamp.
fn load_objective_lines(
    conn: &Connection,
    game_id: &str,
) -> Result<(Vec<ObjectiveLine>, Vec<ObjectiveLine>)> {
    let mut stmt = conn
        .prepare(
            "SELECT timestamp_ms, objective_type, objective_subtype, team_id, lane
             FROM objective_events
             WHERE game_id = ?1
             ORDER BY timestamp_ms ASC",
        )
        .context("prepare objective lines query")?;
    let rows = stmt
        .query_map(params![game_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .context("query objective lines")?;

    let mut blue = Vec::new();
    let mut red = Vec::new();
    for row in rows {
        let (timestamp_ms, objective_type, subtype, team_id, lane) =
            row.context("decode objective line")?;
        let seconds = timestamp_ms / 1000;
        let time = format!("{}:{:02}", seconds / 60, seconds % 60);
        let subtype = subtype.unwrap_or_default();
        let lane = lane.unwrap_or_default();
        let text = match objective_type.as_str() {
            "TOWER" => format!("Tower: {subtype} ({lane})"),
            "DRAGON" => format!("Dragon: {subtype}"),
            _ if subtype.is_empty() => objective_type.clone(),
            _ => format!("{objective_type}: {subtype}"),
        };
        let line = ObjectiveLine {
            time,
            text,
            timestamp_ms,
            team_id,
            objective_type,
        };
        if team_id == Some(100) {
            blue.push(line);
        } else {
            red.push(line);
        }
    }
    Ok((blue, red))
}

#[cfg(test)]
mod tests {
    use super::{ChampionStats, GameHistory};
    use crate::static_data::ChampionData;

    #[test]
    fn derived_stats() {
        let stats = ChampionStats {
            games: 3,
            wins: 2,
            kills: 10,
            deaths: 4,
            assists: 14,
            damage: 45_000,
            creep_score: 700,
        };
        assert_eq!(stats.win_rate(), 66.7);
        assert_eq!(stats.kda(), 6.0);
        assert_eq!(stats.avg_damage(), 15_000);
        assert_eq!(stats.avg_creep_score(), 233.3);
    }

    #[test]
    fn ban_ids_resolve_to_known_names_only() {
        let mut data = ChampionData::default();
        data.id_map.insert("266".to_string(), "Aatrox".to_string());
        data.id_map.insert("103".to_string(), "Ahri".to_string());

        let mut game = GameHistory {
            game_id: "g1".to_string(),
            date: String::new(),
            patch: String::new(),
            blue_team: String::new(),
            red_team: String::new(),
            result: String::new(),
            duration: String::new(),
            blue_bans: ["266", "103", "999", "N/A", "N/A"].map(String::from),
            red_bans: ["103", "N/A", "N/A", "N/A", "N/A"].map(String::from),
            blue_players: Vec::new(),
            red_players: Vec::new(),
            blue_total_kills: 0,
            red_total_kills: 0,
            max_damage: 1,
            blue_events: Vec::new(),
            red_events: Vec::new(),
        };
        game.apply_champion_names(&data);

        assert_eq!(
            game.blue_bans,
            ["Aatrox", "Ahri", "999", "N/A", "N/A"].map(String::from)
        );
        assert_eq!(game.red_bans[0], "Ahri");
    }

    #[test]
    fn zero_death_kda_divides_by_one() {
        let stats = ChampionStats {
            games: 1,
            wins: 1,
            kills: 5,
            deaths: 0,
            assists: 5,
            ..ChampionStats::default()
        };
        assert_eq!(stats.kda(), 10.0);
    }
}
