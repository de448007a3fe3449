use serde::Serialize;
use url::Url;

use crate::panel::{filter_providers, normalize_provider_id};
use crate::views::{anomaly_half_width, TopRiskBoard, DEFAULT_ANOMALY_HOURS};

pub const PANEL_FILE_NAME: &str = "provider_panel_risk_scored.csv";

#[derive(Clone, Debug)]
pub struct Config {
    /// Local files tried in order before the remote fallback.
    pub candidate_paths: Vec<String>,
    pub remote_url: Option<String>,
    pub top_n: usize,
    pub anomaly_hours: i64,
    pub fetch_retries: u32,
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            candidate_paths: std::env::var("RISK_PANEL_PATHS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_else(default_candidate_paths),
            remote_url: std::env::var("RISK_PANEL_URL").ok().filter(|v| !v.trim().is_empty()),
            top_n: std::env::var("RISK_PANEL_TOP_N").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            anomaly_hours: std::env::var("RISK_PANEL_ANOMALY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h| anomaly_half_width(*h).is_some())
                .unwrap_or(DEFAULT_ANOMALY_HOURS),
            fetch_retries: std::env::var("RISK_PANEL_FETCH_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(2),
            fetch_timeout_secs: std::env::var("RISK_PANEL_FETCH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
        }
    }
}

pub fn default_candidate_paths() -> Vec<String> {
    ["../../data/processed", "../data/processed", "data/processed"]
        .iter()
        .map(|dir| format!("{}/{}", dir, PANEL_FILE_NAME))
        .collect()
}

// =============================================================================
// Dashboard selection state
// =============================================================================

/// Search box, dropdown options and dropdown value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardState {
    pub search: String,
    pub options: Vec<String>,
    pub selected: Option<String>,
}

impl DashboardState {
    pub fn initial(ranked_ids: &[String]) -> Self {
        Self {
            search: String::new(),
            options: ranked_ids.to_vec(),
            selected: ranked_ids.first().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SearchChanged(String),
    ProviderSelected(String),
    BoardRowClicked(usize),
    UrlLoaded(String),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SearchChanged(_) => "search_changed",
            Event::ProviderSelected(_) => "provider_selected",
            Event::BoardRowClicked(_) => "board_row_clicked",
            Event::UrlLoaded(_) => "url_loaded",
        }
    }
}

/// Read-only inputs the reducer consults.
pub struct ReduceContext<'a> {
    pub ranked_ids: &'a [String],
    pub board: &'a TopRiskBoard,
}

/// Pure transition: (state, event) -> state.
pub fn reduce(state: &DashboardState, event: Event, ctx: &ReduceContext<'_>) -> DashboardState {
    match event {
        Event::SearchChanged(query) => apply_search(state, query, ctx),
        Event::ProviderSelected(pid) => apply_select(state, normalize_provider_id(&pid)),
        Event::BoardRowClicked(row) => match ctx.board.provider_at(row) {
            Some(pid) => {
                let pid = normalize_provider_id(pid);
                let searched = apply_search(state, pid.clone(), ctx);
                apply_select(&searched, pid)
            }
            None => state.clone(),
        },
        Event::UrlLoaded(url) => match provider_from_query(&url) {
            Some(pid) => {
                let mut next = apply_search(state, pid.clone(), ctx);
                if next.options.contains(&pid) {
                    next.selected = Some(pid);
                }
                next
            }
            None => state.clone(),
        },
    }
}

fn apply_search(state: &DashboardState, query: String, ctx: &ReduceContext<'_>) -> DashboardState {
    let options = filter_providers(ctx.ranked_ids, &query);
    let selected = match &state.selected {
        Some(pid) if options.contains(pid) => Some(pid.clone()),
        _ => options.first().cloned(),
    };
    DashboardState {
        search: query,
        options,
        selected,
    }
}

/// Selecting an id missing from the options inserts it at the front.
fn apply_select(state: &DashboardState, pid: String) -> DashboardState {
    let mut next = state.clone();
    if pid.is_empty() {
        return next;
    }
    if !next.options.contains(&pid) {
        next.options.insert(0, pid.clone());
    }
    next.selected = Some(pid);
    next
}

/// `provider_id` (or `pid`) query parameter of a page URL.
///
/// Accepts a full URL or a bare query string such as `?pid=123`.
pub fn provider_from_query(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = Url::parse(raw).or_else(|_| {
        let query = raw.trim_start_matches('?');
        Url::parse(&format!("http://localhost/?{}", query))
    });
    let url = parsed.ok()?;
    let mut pid = None;
    let mut short = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "provider_id" if pid.is_none() => pid = Some(value.into_owned()),
            "pid" if short.is_none() => short = Some(value.into_owned()),
            _ => {}
        }
    }
    pid.filter(|v| !v.trim().is_empty())
        .or(short)
        .map(|v| normalize_provider_id(&v))
        .filter(|v| !v.is_empty())
}
