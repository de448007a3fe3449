//! Per-provider projections and the leaderboard, plus their Markdown form.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt::Write as _;

use crate::logging::log_no_data;
use crate::panel::{cmp_score_desc, normalize_provider_id, ProviderPanel, ProviderSnapshot};
use crate::risk::{normalize_components, Decomposition, DominantDriver, DRIVER_UNAVAILABLE};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub snapshot_dt: NaiveDate,
    pub mean_daily_claims_90d: Option<f64>,
    pub provider_risk_score: f64,
}

/// Shaded overlay around a snapshot that carried anomaly flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySpan {
    pub snapshot_dt: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub provider_id: String,
    pub snapshot_dt: NaiveDate,
    pub provider_risk_score: f64,
    pub risk_rank: Option<f64>,
    pub anomaly_total_flags: f64,
    pub claims_90d_vs_prev90d: Option<f64>,
    pub days_since_last: Option<f64>,
}

impl From<&ProviderSnapshot> for HistoryRow {
    fn from(r: &ProviderSnapshot) -> Self {
        Self {
            provider_id: r.provider_id.clone(),
            snapshot_dt: r.as_of_date,
            provider_risk_score: r.provider_risk_score,
            risk_rank: r.risk_rank,
            anomaly_total_flags: r.anomaly_total_flags,
            claims_90d_vs_prev90d: r.claims_90d_vs_prev90d,
            days_since_last: r.days_since_last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderView {
    pub provider_id: String,
    pub trend: Vec<TrendPoint>,
    pub anomalies: Vec<AnomalySpan>,
    pub decomposition: Decomposition,
    pub dominant_driver: Option<DominantDriver>,
    pub history: Vec<HistoryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    NoSelection,
    NoData { provider_id: String },
    Ready(ProviderView),
}

pub const DEFAULT_ANOMALY_HOURS: i64 = 12;
/// Widest shading accepted, one week each side.
pub const MAX_ANOMALY_HOURS: i64 = 24 * 7;

/// Half-width of the shading, or `None` outside `1..=MAX_ANOMALY_HOURS`.
pub fn anomaly_half_width(hours: i64) -> Option<Duration> {
    if !(1..=MAX_ANOMALY_HOURS).contains(&hours) {
        return None;
    }
    Duration::try_hours(hours)
}

fn anomaly_spans(history: &[&ProviderSnapshot], half_width: Duration) -> Vec<AnomalySpan> {
    let mut spans: Vec<AnomalySpan> = Vec::new();
    for row in history.iter().filter(|r| r.anomaly_total_flags > 0.0) {
        if spans.iter().any(|s| s.snapshot_dt == row.as_of_date) {
            continue;
        }
        let Some(midnight) = row.as_of_date.and_hms_opt(0, 0, 0) else {
            continue;
        };
        let (Some(start), Some(end)) = (
            midnight.checked_sub_signed(half_width),
            midnight.checked_add_signed(half_width),
        ) else {
            continue;
        };
        spans.push(AnomalySpan {
            snapshot_dt: row.as_of_date,
            start,
            end,
        });
    }
    spans
}

/// `anomaly_hours` outside `1..=MAX_ANOMALY_HOURS` falls back to the default.
pub fn provider_view(panel: &ProviderPanel, pid: &str, anomaly_hours: i64) -> ProviderOutcome {
    let pid = normalize_provider_id(pid);
    if pid.is_empty() {
        return ProviderOutcome::NoSelection;
    }
    let history = panel.history(&pid);
    let Some(latest) = history.last() else {
        log_no_data("provider", &pid);
        return ProviderOutcome::NoData { provider_id: pid };
    };

    let half_width = anomaly_half_width(anomaly_hours)
        .unwrap_or_else(|| Duration::hours(DEFAULT_ANOMALY_HOURS));
    let decomposition = normalize_components(&latest.components);
    let dominant_driver = decomposition.dominant_driver();
    ProviderOutcome::Ready(ProviderView {
        trend: history
            .iter()
            .map(|r| TrendPoint {
                snapshot_dt: r.as_of_date,
                mean_daily_claims_90d: r.mean_daily_claims_90d,
                provider_risk_score: r.provider_risk_score,
            })
            .collect(),
        anomalies: anomaly_spans(&history, half_width),
        decomposition,
        dominant_driver,
        history: history.iter().map(|r| HistoryRow::from(*r)).collect(),
        provider_id: pid,
    })
}

// =============================================================================
// Stability
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilityView {
    pub provider_id: String,
    pub snapshot_dt: NaiveDate,
    pub claims_std_90d: Option<f64>,
    pub claims_std_180d: Option<f64>,
    pub claims_std_365d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StabilityOutcome {
    NoSelection,
    NoData { provider_id: String },
    Ready(StabilityView),
}

pub fn stability_view(panel: &ProviderPanel, pid: &str) -> StabilityOutcome {
    let pid = normalize_provider_id(pid);
    if pid.is_empty() {
        return StabilityOutcome::NoSelection;
    }
    match panel.latest(&pid) {
        Some(latest) => StabilityOutcome::Ready(StabilityView {
            snapshot_dt: latest.as_of_date,
            claims_std_90d: latest.claims_std_90d,
            claims_std_180d: latest.claims_std_180d,
            claims_std_365d: latest.claims_std_365d,
            provider_id: pid,
        }),
        None => {
            log_no_data("stability", &pid);
            StabilityOutcome::NoData { provider_id: pid }
        }
    }
}

// =============================================================================
// Top risk board
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardRow {
    pub provider_id: String,
    pub provider_risk_score: f64,
    pub risk_rank: Option<f64>,
    pub anomaly_total_flags: f64,
    pub days_since_last: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopRiskBoard {
    pub rows: Vec<BoardRow>,
}

pub fn top_risk_board(panel: &ProviderPanel, n: usize) -> TopRiskBoard {
    let mut latest = panel.latest_per_provider();
    latest.sort_by(|a, b| cmp_score_desc(a.provider_risk_score, b.provider_risk_score));
    TopRiskBoard {
        rows: latest
            .into_iter()
            .take(n)
            .map(|r| BoardRow {
                provider_id: normalize_provider_id(&r.provider_id),
                provider_risk_score: r.provider_risk_score,
                risk_rank: r.risk_rank,
                anomaly_total_flags: r.anomaly_total_flags,
                days_since_last: r.days_since_last,
            })
            .collect(),
    }
}

impl TopRiskBoard {
    /// Resolve a clicked row to its provider id.
    pub fn provider_at(&self, row: usize) -> Option<&str> {
        self.rows.get(row).map(|r| r.provider_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Markdown rendering
// =============================================================================

/// Fixed precision; missing or non-finite values print as `NaN`.
pub fn fmt_num(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{:.*}", precision, x),
        _ => "NaN".to_string(),
    }
}

/// Table-cell text with pipes escaped.
fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}

impl ProviderOutcome {
    pub fn to_markdown(&self) -> String {
        match self {
            ProviderOutcome::NoSelection => {
                "### Select a provider to see their history.\n".to_string()
            }
            ProviderOutcome::NoData { provider_id } => {
                format!("### No data available for provider {}\n", provider_id)
            }
            ProviderOutcome::Ready(view) => view.to_markdown(),
        }
    }
}

impl ProviderView {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Provider {}\n", self.provider_id);

        let _ = writeln!(out, "### Provider {} - 90d Claims vs Risk Score\n", self.provider_id);
        let _ = writeln!(out, "| snapshot_dt | 90d avg claims | risk score (pct) | anomaly |");
        let _ = writeln!(out, "|---|---|---|---|");
        for p in &self.trend {
            let flagged = self.anomalies.iter().any(|a| a.snapshot_dt == p.snapshot_dt);
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                p.snapshot_dt,
                fmt_num(p.mean_daily_claims_90d, 2),
                fmt_num(Some(p.provider_risk_score), 4),
                if flagged { "▲" } else { "" }
            );
        }
        if !self.anomalies.is_empty() {
            let _ = writeln!(out, "\nAnomaly windows:");
            for a in &self.anomalies {
                let _ = writeln!(
                    out,
                    "- {} .. {}",
                    a.start.format("%Y-%m-%d %H:%M"),
                    a.end.format("%Y-%m-%d %H:%M")
                );
            }
        }

        let _ = writeln!(out, "\n### Risk Decomposition (Normalized to 1.0)\n");
        let _ = writeln!(out, "| component | value |");
        let _ = writeln!(out, "|---|---|");
        for s in &self.decomposition.shares {
            let _ = writeln!(out, "| {} | {:.3} |", s.label, s.value);
        }
        let driver = self
            .dominant_driver
            .as_ref()
            .map(DominantDriver::to_markdown)
            .unwrap_or_else(|| DRIVER_UNAVAILABLE.to_string());
        let _ = writeln!(out, "\n{}", driver);

        let _ = writeln!(out, "\n### Historical Summary\n");
        let _ = writeln!(
            out,
            "| provider_id | snapshot_dt | provider_risk_score | risk_rank | anomaly_total_flags | claims_90d_vs_prev90d | days_since_last |"
        );
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        for h in &self.history {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                cell(&h.provider_id),
                h.snapshot_dt,
                fmt_num(Some(h.provider_risk_score), 4),
                fmt_num(h.risk_rank, 0),
                fmt_num(Some(h.anomaly_total_flags), 0),
                fmt_num(h.claims_90d_vs_prev90d, 2),
                fmt_num(h.days_since_last, 0),
            );
        }
        out
    }
}

impl StabilityOutcome {
    pub fn to_markdown(&self) -> String {
        match self {
            StabilityOutcome::NoSelection => {
                "### Stability / Volatility\n\nSelect a provider.\n".to_string()
            }
            StabilityOutcome::NoData { provider_id } => format!(
                "### Stability / Volatility\n\nNo data available for provider {}.\n",
                provider_id
            ),
            StabilityOutcome::Ready(v) => format!(
                "### Stability / Volatility (Latest Snapshot)\n\n\
                 - **90d volatility (claims_std_90d)**: {}\n\
                 - **180d volatility (claims_std_180d)**: {}\n\
                 - **365d volatility (claims_std_365d)**: {}\n\n\
                 Lower volatility ⇒ more stable utilization pattern.\n",
                fmt_num(v.claims_std_90d, 2),
                fmt_num(v.claims_std_180d, 2),
                fmt_num(v.claims_std_365d, 2),
            ),
        }
    }
}

impl TopRiskBoard {
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("### Top Risk Providers\n\n");
        out.push_str("| row | provider_id | provider_risk_score | risk_rank | anomaly_total_flags | days_since_last |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for (i, r) in self.rows.iter().enumerate() {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                i,
                cell(&r.provider_id),
                fmt_num(Some(r.provider_risk_score), 4),
                fmt_num(r.risk_rank, 0),
                fmt_num(Some(r.anomaly_total_flags), 0),
                fmt_num(r.days_since_last, 0),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::ComponentSignals;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn row(pid: &str, day: u32, score: f64, flags: f64) -> ProviderSnapshot {
        let mut r = ProviderSnapshot::new(pid, d(day), score);
        r.anomaly_total_flags = flags;
        r.mean_daily_claims_90d = Some(day as f64);
        r
    }

    #[test]
    fn anomaly_spans_are_twelve_hours_each_side() {
        let panel = ProviderPanel::from_rows(vec![
            row("P1", 1, 0.1, 0.0),
            row("P1", 2, 0.2, 2.0),
            row("P1", 2, 0.2, 1.0),
            row("P1", 3, 0.3, 0.0),
        ]);
        let ProviderOutcome::Ready(view) = provider_view(&panel, "P1", 12) else {
            panic!("expected a view");
        };
        assert_eq!(view.anomalies.len(), 1);
        let span = &view.anomalies[0];
        assert_eq!(span.start, d(1).and_hms_opt(12, 0, 0).unwrap());
        assert_eq!(span.end, d(2).and_hms_opt(12, 0, 0).unwrap());
        assert_eq!(view.trend.len(), 4);
    }

    #[test]
    fn out_of_range_shading_falls_back_to_default() {
        let panel = ProviderPanel::from_rows(vec![row("P1", 2, 0.2, 1.0)]);
        for hours in [0, -5, 10_000_000_000, i64::MAX, i64::MIN] {
            let ProviderOutcome::Ready(view) = provider_view(&panel, "P1", hours) else {
                panic!("expected a view");
            };
            let span = &view.anomalies[0];
            assert_eq!(span.start, d(1).and_hms_opt(12, 0, 0).unwrap());
            assert_eq!(span.end, d(2).and_hms_opt(12, 0, 0).unwrap());
        }
        assert!(anomaly_half_width(MAX_ANOMALY_HOURS).is_some());
        assert!(anomaly_half_width(MAX_ANOMALY_HOURS + 1).is_none());
    }

    #[test]
    fn spans_near_the_calendar_edge_are_skipped() {
        let mut r = ProviderSnapshot::new("P1", NaiveDate::MAX, 0.5);
        r.anomaly_total_flags = 1.0;
        let panel = ProviderPanel::from_rows(vec![r]);
        let ProviderOutcome::Ready(view) = provider_view(&panel, "P1", 12) else {
            panic!("expected a view");
        };
        assert!(view.anomalies.is_empty());
    }

    #[test]
    fn decomposition_uses_latest_row() {
        let mut old = row("P1", 1, 0.1, 0.0);
        old.components.lof_norm = 9.0;
        let mut new = row("P1", 5, 0.5, 0.0);
        new.components = ComponentSignals {
            recency_norm: 3.0,
            momentum_norm: 1.0,
            ..Default::default()
        };
        let panel = ProviderPanel::from_rows(vec![new, old]);
        let ProviderOutcome::Ready(view) = provider_view(&panel, "P1", 12) else {
            panic!("expected a view");
        };
        let driver = view.dominant_driver.unwrap();
        assert_eq!(driver.label, "Recency");
        assert_eq!(driver.pct, 75.0);
        assert_eq!(view.history[0].snapshot_dt, d(1));
    }

    #[test]
    fn unknown_and_empty_provider() {
        let panel = ProviderPanel::from_rows(vec![row("P1", 1, 0.1, 0.0)]);
        assert_eq!(
            provider_view(&panel, "P9", 12),
            ProviderOutcome::NoData { provider_id: "P9".into() }
        );
        assert_eq!(provider_view(&panel, "  ", 12), ProviderOutcome::NoSelection);
        assert!(provider_view(&panel, "P9", 12)
            .to_markdown()
            .contains("No data available for provider P9"));
    }

    #[test]
    fn stability_renders_nan_for_missing() {
        let mut r = row("P1", 1, 0.1, 0.0);
        r.claims_std_90d = Some(1.234);
        let panel = ProviderPanel::from_rows(vec![r]);
        let md = stability_view(&panel, "P1").to_markdown();
        assert!(md.contains("(claims_std_90d)**: 1.23"));
        assert!(md.contains("(claims_std_180d)**: NaN"));
        assert!(stability_view(&panel, "nope")
            .to_markdown()
            .contains("No data available for provider nope."));
    }

    #[test]
    fn board_takes_latest_rows_only() {
        let panel = ProviderPanel::from_rows(vec![
            row("A", 1, 0.99, 0.0),
            row("A", 2, 0.10, 0.0),
            row("B", 2, 0.50, 0.0),
        ]);
        let board = top_risk_board(&panel, 10);
        assert_eq!(board.provider_at(0), Some("B"));
        assert_eq!(board.provider_at(1), Some("A"));
        assert_eq!(board.provider_at(2), None);
    }

    #[test]
    fn pipes_in_ids_are_escaped_in_tables() {
        let panel = ProviderPanel::from_rows(vec![row("A|B", 1, 0.4, 0.0), row("C", 1, 0.2, 0.0)]);
        let board = top_risk_board(&panel, 10).to_markdown();
        assert!(board.contains("| 0 | A\\|B | 0.4000 |"));
        assert!(board.lines().filter(|l| l.starts_with("| ")).all(|l| l.matches(" | ").count() == 5));

        let md = provider_view(&panel, "A|B", 12).to_markdown();
        assert!(md.contains("| A\\|B | 2024-03-01 |"));
    }

    #[test]
    fn driver_unavailable_text() {
        let panel = ProviderPanel::from_rows(vec![row("P1", 1, 0.1, 0.0)]);
        let md = provider_view(&panel, "P1", 12).to_markdown();
        assert!(md.contains(DRIVER_UNAVAILABLE));
    }
}
