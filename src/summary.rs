use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::store::{PlayerLine, ScrimRow};

/// In-game name prefixes the provider prepends to roster accounts.
const KNOWN_NAME_PREFIXES: [&str; 1] = ["GSMC "];

/// First-token strings that look like team tags but are role callouts.
const ROLE_CALLOUTS: [&str; 10] = [
    "MID", "TOP", "BOT", "JGL", "JUG", "JG", "JUN", "ADC", "SUP", "SPT",
];

pub const ROLE_ORDER: [&str; 5] = ["TOP", "JUNGLE", "MIDDLE", "BOTTOM", "UTILITY"];

/// Post-game summary for one completed game, as downloaded from the
/// provider. Decoded leniently: every field defaults so a sparse payload
/// still parses and gets rejected by count checks instead of decode errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSummary {
    pub participants: Vec<Participant>,
    pub teams: Vec<TeamSummary>,
    pub game_creation: Option<i64>,
    pub game_duration: Option<f64>,
    pub game_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Participant {
    pub participant_id: Option<i64>,
    pub riot_id_game_name: Option<String>,
    pub champion_name: Option<String>,
    pub team_id: Option<i64>,
    pub puuid: Option<String>,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub total_damage_dealt_to_champions: i64,
    pub total_minions_killed: i64,
    pub neutral_minions_killed: i64,
    pub gold_earned: i64,
    pub item0: i64,
    pub item1: i64,
    pub item2: i64,
    pub item3: i64,
    pub item4: i64,
    pub item5: i64,
    pub item6: i64,
    pub perks: Perks,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Perks {
    pub styles: Vec<PerkStyle>,
    pub stat_perks: StatPerks,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PerkStyle {
    pub selections: Vec<PerkSelection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PerkSelection {
    pub perk: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatPerks {
    pub offense: i64,
    pub flex: i64,
    pub defense: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TeamSummary {
    pub team_id: Option<i64>,
    pub win: Option<bool>,
    pub bans: Vec<Ban>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ban {
    pub champion_id: i64,
    pub pick_turn: Option<i64>,
}

impl Default for Ban {
    // A ban entry without a championId means nothing was banned in that
    // slot, same as an explicit -1.
    fn default() -> Self {
        Ban {
            champion_id: -1,
            pick_turn: None,
        }
    }
}

impl GameSummary {
    /// A usable summary has exactly 10 participants and 2 team entries.
    pub fn is_complete(&self) -> bool {
        self.participants.len() == 10 && self.teams.len() == 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Blue,
    Red,
}

impl Side {
    pub fn team_id(self) -> i64 {
        match self {
            Side::Blue => 100,
            Side::Red => 200,
        }
    }
}

/// Outcome of scanning a participant list for roster members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterScan {
    Found(Side),
    /// Roster members detected on both sides: bad data, skip the game.
    Ambiguous,
    NotFound,
}

/// Strips known team prefixes from a Riot in-game name.
pub fn normalize_player_name(name: &str) -> &str {
    for prefix in KNOWN_NAME_PREFIXES {
        if let Some(stripped) = name.strip_prefix(prefix) {
            return stripped.trim();
        }
    }
    name
}

/// Extracts a plausible team tag from an in-game name: the first token when
/// it is 2-5 uppercase alphanumeric characters and not a role callout.
pub fn extract_team_tag(name: &str) -> Option<&str> {
    let (tag, _) = name.split_once(' ')?;
    if !(2..=5).contains(&tag.len()) {
        return None;
    }
    if !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if tag.chars().any(|c| c.is_ascii_lowercase())
        || !tag.chars().any(|c| c.is_ascii_uppercase())
    {
        return None;
    }
    if ROLE_CALLOUTS.contains(&tag) {
        return None;
    }
    Some(tag)
}

/// Scans the participant order for roster members: first five are the blue
/// side, last five red. Finding roster names on both sides is ambiguous.
pub fn find_roster_side(participants: &[Participant], roster: &HashMap<String, String>) -> RosterScan {
    let mut found: Option<Side> = None;
    for (idx, p) in participants.iter().enumerate() {
        let Some(name) = p.riot_id_game_name.as_deref() else {
            continue;
        };
        if !roster.contains_key(normalize_player_name(name)) {
            continue;
        }
        let side = if idx < 5 { Side::Blue } else { Side::Red };
        match found {
            None => found = Some(side),
            Some(existing) if existing != side => return RosterScan::Ambiguous,
            Some(_) => {}
        }
    }
    match found {
        Some(side) => RosterScan::Found(side),
        None => RosterScan::NotFound,
    }
}

/// Derives the opponent team's display name from the five opposing
/// participants: the most common extracted tag, accepted only when it occurs
/// at least three times. Ties break by count then tag so reruns are stable.
pub fn opponent_name(participants: &[Participant], our_side: Side) -> String {
    let opponent_range = match our_side {
        Side::Blue => 5..10,
        Side::Red => 0..5,
    };
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for idx in opponent_range {
        let Some(p) = participants.get(idx) else {
            continue;
        };
        if let Some(tag) = p.riot_id_game_name.as_deref().and_then(extract_team_tag) {
            *counts.entry(tag).or_default() += 1;
        }
    }

    let mut tags: Vec<(&str, usize)> = counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    match tags.first() {
        Some((tag, count)) if *count >= 3 => (*tag).to_string(),
        _ => "Opponent".to_string(),
    }
}

/// Builds the scrims-table row for one game from its summary.
pub fn build_scrim_row(
    game_id: &str,
    summary: &GameSummary,
    our_side: Side,
    team_name: &str,
    opponent: &str,
) -> ScrimRow {
    let mut row = ScrimRow {
        game_id: game_id.to_string(),
        date: format_game_date(summary.game_creation),
        patch: format_patch(summary.game_version.as_deref()),
        blue_team: match our_side {
            Side::Blue => team_name.to_string(),
            Side::Red => opponent.to_string(),
        },
        red_team: match our_side {
            Side::Red => team_name.to_string(),
            Side::Blue => opponent.to_string(),
        },
        duration: format_duration(summary.game_duration),
        result: game_result(summary, our_side),
        ..ScrimRow::default()
    };

    for team in &summary.teams {
        let target = if team.team_id == Some(100) {
            &mut row.blue_bans
        } else {
            &mut row.red_bans
        };
        let mut bans = team.bans.clone();
        bans.sort_by_key(|ban| ban.pick_turn.unwrap_or(99));
        for (slot, out) in target.iter_mut().enumerate() {
            *out = match bans.get(slot) {
                Some(ban) if ban.champion_id != -1 => ban.champion_id.to_string(),
                _ => "N/A".to_string(),
            };
        }
    }

    for (idx, p) in summary.participants.iter().enumerate() {
        let line = PlayerLine {
            name: p
                .riot_id_game_name
                .as_deref()
                .map(normalize_player_name)
                .filter(|n| !n.is_empty())
                .unwrap_or("Unknown")
                .to_string(),
            champion: p
                .champion_name
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            kills: p.kills,
            deaths: p.deaths,
            assists: p.assists,
            damage: p.total_damage_dealt_to_champions,
            creep_score: p.total_minions_killed + p.neutral_minions_killed,
            items: items_list(p),
            runes: runes_list(p),
            gold: p.gold_earned,
        };
        let role = idx % 5;
        if idx < 5 {
            row.blue[role] = line;
        } else {
            row.red[role] = line;
        }
    }

    row
}

fn game_result(summary: &GameSummary, our_side: Side) -> String {
    for team in &summary.teams {
        if team.team_id == Some(our_side.team_id()) {
            return match team.win {
                Some(true) => "Win".to_string(),
                Some(false) => "Loss".to_string(),
                None => "Unknown".to_string(),
            };
        }
    }
    "Unknown".to_string()
}

/// Non-zero item slots, comma-joined.
fn items_list(p: &Participant) -> String {
    [
        p.item0, p.item1, p.item2, p.item3, p.item4, p.item5, p.item6,
    ]
    .iter()
    .filter(|item| **item != 0)
    .map(|item| item.to_string())
    .collect::<Vec<_>>()
    .join(",")
}

/// All non-zero perk selections plus non-zero stat perks, comma-joined;
/// "0" when nothing is set.
fn runes_list(p: &Participant) -> String {
    let mut runes = Vec::new();
    for style in &p.perks.styles {
        for sel in &style.selections {
            if sel.perk != 0 {
                runes.push(sel.perk.to_string());
            }
        }
    }
    let sp = &p.perks.stat_perks;
    for stat in [sp.offense, sp.flex, sp.defense] {
        if stat != 0 {
            runes.push(stat.to_string());
        }
    }
    if runes.is_empty() {
        "0".to_string()
    } else {
        runes.join(",")
    }
}

fn format_game_date(creation_ms: Option<i64>) -> String {
    let Some(ms) = creation_ms else {
        return "N/A".to_string();
    };
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "N/A".to_string(),
    }
}

fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds else {
        return "N/A".to_string();
    };
    let total = seconds as i64;
    if total <= 0 {
        return "N/A".to_string();
    }
    format!("{}:{:02}", total / 60, total % 60)
}

fn format_patch(version: Option<&str>) -> String {
    let Some(version) = version else {
        return "N/A".to_string();
    };
    let mut parts = version.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => version.to_string(),
    }
}
