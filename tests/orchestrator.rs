use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::json;

use scrimstats::config::Settings;
use scrimstats::grid_api::GridClient;
use scrimstats::ingest::fetch_and_store_scrims;
use scrimstats::store::{existing_game_ids, insert_scrim, load_scrim_rows, open_db};
use scrimstats::summary::{GameSummary, Side, build_scrim_row};

type RouteMap = HashMap<String, VecDeque<(u16, String)>>;

/// Minimal one-request-per-connection HTTP stub standing in for the GRID
/// host. Responses are queued per path; the last one repeats. Every request
/// path is recorded so tests can assert which fetches were issued.
struct StubGrid {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubGrid {
    fn start(routes: RouteMap) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub listener");
        let base_url = format!("http://{}", listener.local_addr().expect("stub addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let routes = Mutex::new(routes);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve_one(stream, &routes, &seen);
            }
        });
        StubGrid { base_url, requests }
    }

    fn paths(&self) -> Vec<String> {
        self.requests.lock().expect("request log").clone()
    }
}

fn serve_one(mut stream: TcpStream, routes: &Mutex<RouteMap>, seen: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("")
        .to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-length:") {
            content_length = rest.trim().parse().unwrap_or(0);
        }
    }
    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body);
    }

    seen.lock().expect("request log").push(path.clone());

    let (status, body) = {
        let mut routes = routes.lock().expect("routes");
        match routes.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("queued response"),
            Some(queue) => queue.front().cloned().unwrap_or((404, String::new())),
            None => (404, String::new()),
        }
    };
    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

fn series_page(ids: &[&str], has_next: bool) -> (u16, String) {
    let edges: Vec<_> = ids
        .iter()
        .map(|id| json!({"node": {"id": id, "startTimeScheduled": "2026-08-26T18:00:00Z"}}))
        .collect();
    let body = json!({
        "data": {
            "allSeries": {
                "totalCount": ids.len(),
                "pageInfo": {"hasNextPage": has_next, "endCursor": "c1"},
                "edges": edges,
            }
        }
    });
    (200, body.to_string())
}

fn series_state(series_id: &str, games: &[(&str, i64)]) -> (u16, String) {
    let games: Vec<_> = games
        .iter()
        .map(|(id, seq)| json!({"id": id, "sequenceNumber": seq}))
        .collect();
    let body = json!({"data": {"seriesState": {"id": series_id, "games": games}}});
    (200, body.to_string())
}

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn fixture_summary() -> GameSummary {
    serde_json::from_str(&read_fixture("game_summary.json")).expect("fixture summary should parse")
}

fn roster() -> HashMap<String, String> {
    [
        ("Robo", "24422"),
        ("PAIN CarioK", "23038"),
        ("PAIN tinowns", "23755"),
        ("PAIN TitaN", "25075"),
        ("PAIN Kuri", "23553"),
    ]
    .iter()
    .map(|(name, id)| (name.to_string(), id.to_string()))
    .collect()
}

fn temp_db(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("scrimstats-test-{tag}-{}.sqlite", std::process::id()));
    let _ = fs::remove_file(&path);
    path
}

fn settings(db_path: PathBuf) -> Settings {
    Settings {
        api_key: "test-key".to_string(),
        team_name: "paiN Gaming".to_string(),
        roster: roster(),
        lookback_days: 5,
        db_path,
    }
}

#[test]
fn known_game_id_is_never_refetched() {
    let db_path = temp_db("dedup");
    let conn = open_db(&db_path).expect("open db");
    let row = build_scrim_row("g100", &fixture_summary(), Side::Blue, "paiN Gaming", "FUR");
    insert_scrim(&conn, &row).expect("seed row");

    let mut routes = RouteMap::new();
    routes.insert(
        "/central-data/graphql".to_string(),
        VecDeque::from([series_page(&["s1"], false)]),
    );
    routes.insert(
        "/live-data-feed/series-state/graphql".to_string(),
        VecDeque::from([series_state("s1", &[("g100", 1)])]),
    );
    let stub = StubGrid::start(routes);

    let client = GridClient::new("test-key")
        .expect("client")
        .with_base_url(stub.base_url.clone());
    let report = fetch_and_store_scrims(&conn, &client, &settings(db_path.clone())).expect("run");

    assert_eq!(report.series_seen, 1);
    assert_eq!(report.games_seen, 1);
    assert_eq!(report.games_added, 0);

    // the stored id is gated out before any per-game request goes out
    assert!(
        stub.paths()
            .iter()
            .all(|path| !path.starts_with("/file-download/"))
    );

    let _ = fs::remove_file(&db_path);
}

#[test]
fn new_game_stores_record_before_replay() {
    let db_path = temp_db("ingest");
    let conn = open_db(&db_path).expect("open db");

    let mut routes = RouteMap::new();
    routes.insert(
        "/central-data/graphql".to_string(),
        VecDeque::from([series_page(&["s1"], false)]),
    );
    routes.insert(
        "/live-data-feed/series-state/graphql".to_string(),
        VecDeque::from([series_state("s1", &[("g200", 2)])]),
    );
    routes.insert(
        "/file-download/end-state/riot/series/s1/games/2/summary".to_string(),
        VecDeque::from([(200, read_fixture("game_summary.json"))]),
    );
    routes.insert(
        "/file-download/events/riot/series/s1/games/2".to_string(),
        VecDeque::from([(200, read_fixture("event_log.jsonl"))]),
    );
    let stub = StubGrid::start(routes);

    let client = GridClient::new("test-key")
        .expect("client")
        .with_base_url(stub.base_url.clone());
    let report = fetch_and_store_scrims(&conn, &client, &settings(db_path.clone())).expect("run");

    assert_eq!(report.games_added, 1);
    assert_eq!(report.replays_stored, 1);
    assert!(report.errors.is_empty());

    // the match record is fetched and committed before the event log moves
    let paths = stub.paths();
    let summary_at = paths
        .iter()
        .position(|p| p.contains("end-state"))
        .expect("summary fetched");
    let events_at = paths
        .iter()
        .position(|p| p.starts_with("/file-download/events/"))
        .expect("event log fetched");
    assert!(summary_at < events_at);

    let rows = load_scrim_rows(&conn, None).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].game_id, "g200");
    let timeline: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM player_positions_timeline WHERE game_id = 'g200'",
            [],
            |r| r.get(0),
        )
        .expect("timeline count");
    assert_eq!(timeline, 7);

    let _ = fs::remove_file(&db_path);
}

#[test]
fn ambiguous_roster_skips_before_any_write() {
    let db_path = temp_db("ambiguous");
    let conn = open_db(&db_path).expect("open db");

    // one roster player on each side
    let mut summary: serde_json::Value =
        serde_json::from_str(&read_fixture("game_summary.json")).expect("fixture json");
    summary["participants"][9]["riotIdGameName"] = json!("PAIN Kuri");

    let mut routes = RouteMap::new();
    routes.insert(
        "/central-data/graphql".to_string(),
        VecDeque::from([series_page(&["s1"], false)]),
    );
    routes.insert(
        "/live-data-feed/series-state/graphql".to_string(),
        VecDeque::from([series_state("s1", &[("g300", 1)])]),
    );
    routes.insert(
        "/file-download/end-state/riot/series/s1/games/1/summary".to_string(),
        VecDeque::from([(200, summary.to_string())]),
    );
    let stub = StubGrid::start(routes);

    let client = GridClient::new("test-key")
        .expect("client")
        .with_base_url(stub.base_url.clone());
    let report = fetch_and_store_scrims(&conn, &client, &settings(db_path.clone())).expect("run");

    assert_eq!(report.games_skipped, 1);
    assert_eq!(report.games_added, 0);
    assert!(
        stub.paths()
            .iter()
            .all(|path| !path.starts_with("/file-download/events/"))
    );
    assert!(existing_game_ids(&conn).expect("ids").is_empty());

    let _ = fs::remove_file(&db_path);
}

#[test]
fn series_listing_failure_keeps_collected_pages() {
    let mut routes = RouteMap::new();
    routes.insert(
        "/central-data/graphql".to_string(),
        VecDeque::from([
            series_page(&["s1", "s2"], true),
            (400, r#"{"message":"bad cursor"}"#.to_string()),
        ]),
    );
    let stub = StubGrid::start(routes);

    let client = GridClient::new("test-key")
        .expect("client")
        .with_base_url(stub.base_url.clone());
    let series = client.fetch_recent_series(5).expect("partial listing");

    let ids: Vec<&str> = series.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2"]);
}
