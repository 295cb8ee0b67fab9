//! Data Dragon static data: latest patch version and champion maps, behind
//! an explicit TTL cache owned by the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use crate::http_client::http_client;

const VERSIONS_URL: &str = "https://ddragon.leagueoflegends.com/api/versions.json";
const FALLBACK_PATCH: &str = "14.7.1";
const PATCH_TTL: Duration = Duration::from_secs(3600);
const CHAMPION_TTL: Duration = Duration::from_secs(86_400);

/// Display-name -> Data Dragon asset-name exceptions that survive the
/// generic alphanumeric cleanup.
const NAME_OVERRIDES: &[(&str, &str)] = &[
    ("Nunu & Willump", "Nunu"),
    ("Wukong", "MonkeyKing"),
    ("Renata Glasc", "Renata"),
    ("K'Sante", "KSante"),
    ("LeBlanc", "Leblanc"),
    ("Miss Fortune", "MissFortune"),
    ("Jarvan IV", "JarvanIV"),
    ("Twisted Fate", "TwistedFate"),
    ("Dr. Mundo", "DrMundo"),
    ("Xin Zhao", "XinZhao"),
    ("Bel'Veth", "Belveth"),
    ("Kai'Sa", "Kaisa"),
    ("Cho'Gath", "Chogath"),
    ("Kha'Zix", "Khazix"),
    ("Vel'Koz", "Velkoz"),
    ("Rek'Sai", "RekSai"),
    ("Aurelion Sol", "AurelionSol"),
];

/// Lowercased cleaned names that Data Dragon cases differently.
const CASE_EXCEPTIONS: &[(&str, &str)] = &[
    ("monkeyking", "MonkeyKing"),
    ("ksante", "KSante"),
    ("leblanc", "Leblanc"),
    ("missfortune", "MissFortune"),
    ("jarvaniv", "JarvanIV"),
    ("twistedfate", "TwistedFate"),
    ("drmundo", "DrMundo"),
    ("xinzhao", "XinZhao"),
    ("belveth", "Belveth"),
    ("kaisa", "Kaisa"),
    ("chogath", "Chogath"),
    ("khazix", "Khazix"),
    ("velkoz", "Velkoz"),
    ("reksai", "RekSai"),
    ("aurelionsol", "AurelionSol"),
];

#[derive(Debug, Clone, Default)]
pub struct ChampionData {
    /// Numeric champion key (as string) -> display name.
    pub id_map: HashMap<String, String>,
    /// Display name -> Data Dragon asset name.
    pub name_map: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Memoizing handle for Data Dragon lookups. Owned by the caller and passed
/// where needed instead of living in process-wide state; values refresh when
/// their TTL lapses.
#[derive(Debug, Default)]
pub struct DataDragonCache {
    patch: Option<Cached<String>>,
    champions: Option<Cached<ChampionData>>,
}

impl DataDragonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest patch version, cached for an hour. Falls back to a known-good
    /// version when the endpoint is unreachable.
    pub fn latest_patch(&mut self) -> String {
        if let Some(cached) = self.patch.as_ref()
            && cached.fresh(PATCH_TTL)
        {
            return cached.value.clone();
        }
        match fetch_latest_patch() {
            Ok(patch) => {
                self.patch = Some(Cached {
                    value: patch.clone(),
                    fetched_at: Instant::now(),
                });
                patch
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch latest patch, using fallback");
                FALLBACK_PATCH.to_string()
            }
        }
    }

    /// Champion id/name maps, cached for a day. An unreachable endpoint
    /// yields empty maps, not an error.
    pub fn champion_data(&mut self) -> ChampionData {
        if let Some(cached) = self.champions.as_ref()
            && cached.fresh(CHAMPION_TTL)
        {
            return cached.value.clone();
        }
        let patch = self.latest_patch();
        match fetch_champion_data(&patch) {
            Ok(data) => {
                self.champions = Some(Cached {
                    value: data.clone(),
                    fetched_at: Instant::now(),
                });
                data
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch champion data");
                ChampionData::default()
            }
        }
    }
}

/// Normalizes a champion display name to its Data Dragon asset name.
pub fn normalize_champion_name(name: &str) -> Option<String> {
    if name.is_empty() || name == "N/A" {
        return None;
    }
    if let Some((_, asset)) = NAME_OVERRIDES.iter().find(|(display, _)| *display == name) {
        return Some((*asset).to_string());
    }
    let cleaned: String = name.chars().filter(|c| c.is_alphanumeric()).collect();
    if cleaned.is_empty() {
        return None;
    }
    let lower = cleaned.to_lowercase();
    if let Some((_, asset)) = CASE_EXCEPTIONS.iter().find(|(key, _)| *key == lower) {
        return Some((*asset).to_string());
    }
    Some(cleaned)
}

fn fetch_latest_patch() -> Result<String> {
    let client = http_client()?;
    let versions: Vec<String> = client
        .get(VERSIONS_URL)
        .send()
        .context("versions request failed")?
        .error_for_status()
        .context("versions request rejected")?
        .json()
        .context("versions response is not json")?;
    versions
        .into_iter()
        .next()
        .context("versions response is empty")
}

fn fetch_champion_data(patch: &str) -> Result<ChampionData> {
    let client = http_client()?;
    let url =
        format!("https://ddragon.leagueoflegends.com/cdn/{patch}/data/en_US/champion.json");
    let body: Value = client
        .get(&url)
        .send()
        .context("champion request failed")?
        .error_for_status()
        .context("champion request rejected")?
        .json()
        .context("champion response is not json")?;

    let mut data = ChampionData::default();
    let Some(champions) = body.get("data").and_then(|v| v.as_object()) else {
        return Ok(data);
    };
    for (asset_name, info) in champions {
        let Some(display_name) = info.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        if let Some(key) = info.get("key").and_then(|v| v.as_str()) {
            data.id_map.insert(key.to_string(), display_name.to_string());
        }
        let normalized =
            normalize_champion_name(display_name).unwrap_or_else(|| asset_name.clone());
        data.name_map.insert(display_name.to_string(), normalized);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::normalize_champion_name;

    #[test]
    fn override_names() {
        assert_eq!(normalize_champion_name("Wukong").as_deref(), Some("MonkeyKing"));
        assert_eq!(normalize_champion_name("K'Sante").as_deref(), Some("KSante"));
        assert_eq!(
            normalize_champion_name("Nunu & Willump").as_deref(),
            Some("Nunu")
        );
    }

    #[test]
    fn cleanup_and_case_exceptions() {
        assert_eq!(normalize_champion_name("Lee Sin").as_deref(), Some("LeeSin"));
        assert_eq!(normalize_champion_name("Kai'sa").as_deref(), Some("Kaisa"));
        assert_eq!(normalize_champion_name("Aatrox").as_deref(), Some("Aatrox"));
    }

    #[test]
    fn invalid_names() {
        assert_eq!(normalize_champion_name(""), None);
        assert_eq!(normalize_champion_name("N/A"), None);
    }
}
