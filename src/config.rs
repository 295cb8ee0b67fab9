use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Result, anyhow};

/// Settings for one ingestion run. Everything comes from the environment so
/// the same binary can track a different roster without a rebuild.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub team_name: String,
    /// Riot in-game name (after prefix stripping) -> provider player id.
    pub roster: HashMap<String, String>,
    pub lookback_days: i64,
    pub db_path: PathBuf,
}

const DEFAULT_TEAM_NAME: &str = "paiN Gaming";
const DEFAULT_LOOKBACK_DAYS: i64 = 5;

const DEFAULT_ROSTER: &[(&str, &str)] = &[
    ("Robo", "24422"),
    ("PAIN CarioK", "23038"),
    ("PAIN tinowns", "23755"),
    ("PAIN TitaN", "25075"),
    ("PAIN Kuri", "23553"),
];

impl Settings {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GRID_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("GRID_API_KEY not set"))?;

        let team_name = std::env::var("SCRIM_TEAM_NAME")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TEAM_NAME.to_string());

        let roster = std::env::var("SCRIM_ROSTER")
            .ok()
            .and_then(|raw| parse_roster(&raw))
            .unwrap_or_else(default_roster);

        let lookback_days = std::env::var("SCRIM_LOOKBACK_DAYS")
            .ok()
            .and_then(|val| val.parse::<i64>().ok())
            .unwrap_or(DEFAULT_LOOKBACK_DAYS)
            .clamp(1, 60);

        let db_path = std::env::var("SCRIM_DB_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("scrims.sqlite"));

        Ok(Settings {
            api_key,
            team_name,
            roster,
            lookback_days,
            db_path,
        })
    }
}

fn default_roster() -> HashMap<String, String> {
    DEFAULT_ROSTER
        .iter()
        .map(|(name, id)| (name.to_string(), id.to_string()))
        .collect()
}

/// `SCRIM_ROSTER` format: `Name=1234,Other Name=5678`.
fn parse_roster(raw: &str) -> Option<HashMap<String, String>> {
    let mut roster = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, id) = entry.split_once('=')?;
        let name = name.trim();
        let id = id.trim();
        if name.is_empty() || id.is_empty() {
            return None;
        }
        roster.insert(name.to_string(), id.to_string());
    }
    if roster.is_empty() { None } else { Some(roster) }
}
