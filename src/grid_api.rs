use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::http_client::http_client;

const GRID_BASE_URL: &str = "https://api.grid.gg/";
const GRAPHQL_RETRIES: u32 = 3;
const GRAPHQL_INITIAL_DELAY_SECS: u64 = 1;
const REST_RETRIES: u32 = 5;
const REST_INITIAL_DELAY_SECS: u64 = 2;
const SERIES_PAGE_SIZE: u32 = 50;
const SERIES_MAX_PAGES: u32 = 20;

/// One series as returned by the central-data series listing.
#[derive(Debug, Clone)]
pub struct SeriesRef {
    pub id: String,
    pub start_time_scheduled: Option<String>,
}

/// One game inside a series state.
#[derive(Debug, Clone)]
pub struct GameRef {
    pub id: String,
    pub sequence_number: i64,
}

/// Blocking GRID client. All fetches are synchronous and bounded by the
/// shared client's request timeout; transient failures retry with exponential
/// backoff, authorization and not-found failures return `Ok(None)` without
/// retrying so one bad game never stalls the run.
pub struct GridClient {
    client: &'static Client,
    api_key: String,
    base_url: String,
}

impl GridClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(GridClient {
            client: http_client()?,
            api_key: api_key.into(),
            base_url: GRID_BASE_URL.to_string(),
        })
    }

    /// Points the client at a different host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base = base_url.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.base_url = base;
        self
    }

    /// Lists scrim series scheduled within the last `days` days, newest
    /// first, following cursor pagination up to a fixed page cap.
    pub fn fetch_recent_series(&self, days: i64) -> Result<Vec<SeriesRef>> {
        let query = r#"
            query ($filter: SeriesFilter, $first: Int, $after: Cursor, $orderBy: SeriesOrderBy, $orderDirection: OrderDirection) {
              allSeries(filter: $filter, first: $first, after: $after, orderBy: $orderBy, orderDirection: $orderDirection) {
                totalCount
                pageInfo { hasNextPage, endCursor }
                edges { node { id, startTimeScheduled } }
              }
            }
        "#;
        let threshold = (Utc::now() - ChronoDuration::days(days))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        for page in 1..=SERIES_MAX_PAGES {
            let mut variables = json!({
                "filter": {
                    "titleId": 3,
                    "types": ["SCRIM"],
                    "startTimeScheduled": { "gte": threshold },
                },
                "first": SERIES_PAGE_SIZE,
                "orderBy": "StartTimeScheduled",
                "orderDirection": "DESC",
            });
            if let Some(cursor) = cursor.as_ref() {
                variables["after"] = Value::String(cursor.clone());
            }

            // A dead page ends pagination; pages already collected still
            // feed the run.
            let data = match self.post_graphql("central-data/graphql", query, variables) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(page, "series listing unavailable, stopping pagination");
                    break;
                }
                Err(err) => {
                    warn!(page, error = %err, "series page fetch failed, stopping pagination");
                    break;
                }
            };
            let series = data.get("allSeries").unwrap_or(&Value::Null);
            if let Some(edges) = series.get("edges").and_then(|v| v.as_array()) {
                for edge in edges {
                    let Some(node) = edge.get("node") else {
                        continue;
                    };
                    let Some(id) = node.get("id").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    out.push(SeriesRef {
                        id: id.to_string(),
                        start_time_scheduled: node
                            .get("startTimeScheduled")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                    });
                }
            }

            let page_info = series.get("pageInfo").unwrap_or(&Value::Null);
            let has_next = page_info
                .get("hasNextPage")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            cursor = page_info
                .get("endCursor")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if !has_next || cursor.is_none() {
                break;
            }
        }

        debug!(count = out.len(), "series listing complete");
        Ok(out)
    }

    /// Lists the games (id + sequence number) of one series. A series with a
    /// null or missing games list resolves to an empty vec.
    pub fn fetch_series_games(&self, series_id: &str) -> Result<Vec<GameRef>> {
        let query = r#"
            query GetSeriesGames($seriesId: ID!) {
              seriesState(id: $seriesId) { id, games { id, sequenceNumber } }
            }
        "#;
        let variables = json!({ "seriesId": series_id });
        let Some(data) =
            self.post_graphql("live-data-feed/series-state/graphql", query, variables)?
        else {
            return Ok(Vec::new());
        };

        let games = data
            .get("seriesState")
            .and_then(|s| s.get("games"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::new();
        for game in &games {
            let Some(id) = game.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(sequence_number) = game.get("sequenceNumber").and_then(|v| v.as_i64()) else {
                continue;
            };
            out.push(GameRef {
                id: id.to_string(),
                sequence_number,
            });
        }
        Ok(out)
    }

    /// Downloads the post-game summary JSON for one game. `Ok(None)` means
    /// the summary does not exist or is not accessible.
    pub fn fetch_game_summary(&self, series_id: &str, sequence_number: i64) -> Result<Option<Value>> {
        let endpoint = format!(
            "file-download/end-state/riot/series/{series_id}/games/{sequence_number}/summary"
        );
        let Some(bytes) = self.get_rest(&endpoint, REST_RETRIES, REST_INITIAL_DELAY_SECS)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice::<Value>(&bytes)
            .with_context(|| format!("summary for s:{series_id} g:{sequence_number} is not json"))?;
        Ok(Some(value))
    }

    /// Downloads the raw line-delimited event log for one game and decodes it
    /// as UTF-8, falling back to a byte-per-character decode when the payload
    /// is not valid UTF-8.
    pub fn fetch_raw_event_log(
        &self,
        series_id: &str,
        sequence_number: i64,
    ) -> Result<Option<String>> {
        let endpoint = format!("file-download/events/riot/series/{series_id}/games/{sequence_number}");
        let Some(bytes) = self.get_rest(&endpoint, 2, 5)? else {
            return Ok(None);
        };
        debug!(
            series_id,
            sequence_number,
            bytes = bytes.len(),
            "downloaded event log"
        );
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(err) => {
                warn!(series_id, sequence_number, "event log is not utf-8, decoding as latin-1");
                let bytes = err.into_bytes();
                Ok(Some(bytes.iter().map(|&b| b as char).collect()))
            }
        }
    }

    /// POSTs one GraphQL request and unwraps the `data` field. Server errors
    /// and rate limits retry with backoff; authorization failures (HTTP or
    /// in-band GraphQL errors) return `Ok(None)`.
    fn post_graphql(&self, endpoint: &str, query: &str, variables: Value) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let payload = json!({ "query": query, "variables": variables });
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..GRAPHQL_RETRIES {
            let backoff = Duration::from_secs(GRAPHQL_INITIAL_DELAY_SECS << attempt);
            let resp = match self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .json(&payload)
                .send()
            {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(endpoint, attempt, error = %err, "graphql request failed");
                    last_err = Some(err.into());
                    std::thread::sleep(backoff);
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(&resp).unwrap_or(backoff);
                warn!(endpoint, wait_secs = wait.as_secs(), "rate limited (429)");
                last_err = Some(anyhow!("429 too many requests"));
                std::thread::sleep(wait);
                continue;
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                warn!(endpoint, %status, "authorization error, check GRID_API_KEY");
                return Ok(None);
            }
            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                last_err = Some(anyhow!("http {status}: {}", truncate(&body, 200)));
                if status.is_server_error() {
                    std::thread::sleep(backoff);
                    continue;
                }
                // 400 and other client errors do not improve on retry.
                break;
            }

            let body: Value = match resp.json() {
                Ok(body) => body,
                Err(err) => {
                    last_err = Some(err.into());
                    std::thread::sleep(backoff);
                    continue;
                }
            };
            if let Some(errors) = body.get("errors").and_then(|v| v.as_array())
                && !errors.is_empty()
            {
                let message = errors[0]
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown graphql error");
                if is_auth_error(message) {
                    warn!(endpoint, message, "graphql auth error");
                    return Ok(None);
                }
                last_err = Some(anyhow!("graphql error: {message}"));
                std::thread::sleep(backoff);
                continue;
            }
            return Ok(body.get("data").cloned());
        }

        Err(last_err.unwrap_or_else(|| anyhow!("graphql request failed")))
            .with_context(|| format!("graphql request to {endpoint} exhausted retries"))
    }

    /// GETs one REST endpoint as raw bytes. `Ok(None)` for 404 and auth
    /// failures; retries with backoff otherwise.
    fn get_rest(&self, endpoint: &str, retries: u32, initial_delay: u64) -> Result<Option<Vec<u8>>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..retries {
            let backoff = Duration::from_secs(initial_delay << attempt);
            let resp = match self
                .client
                .get(&url)
                .header("x-api-key", &self.api_key)
                .send()
            {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(endpoint, attempt, error = %err, "rest request failed");
                    last_err = Some(err.into());
                    std::thread::sleep(backoff);
                    continue;
                }
            };

            let status = resp.status();
            match status {
                StatusCode::OK => {
                    let bytes = resp.bytes().context("failed reading response body")?;
                    return Ok(Some(bytes.to_vec()));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = retry_after(&resp).unwrap_or(backoff);
                    warn!(endpoint, wait_secs = wait.as_secs(), "rate limited (429)");
                    last_err = Some(anyhow!("429 too many requests"));
                    std::thread::sleep(wait);
                }
                StatusCode::NOT_FOUND => {
                    debug!(endpoint, "resource not found (404)");
                    return Ok(None);
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    warn!(endpoint, %status, "authorization error, check GRID_API_KEY");
                    return Ok(None);
                }
                _ => {
                    last_err = Some(anyhow!("http {status}"));
                    std::thread::sleep(backoff);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("rest request failed")))
            .with_context(|| format!("rest request to {endpoint} exhausted retries"))
    }
}

fn retry_after(resp: &reqwest::blocking::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn is_auth_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    message.contains("UNAUTHENTICATED")
        || message.contains("UNAUTHORIZED")
        || lower.contains("forbidden")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
