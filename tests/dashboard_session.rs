//! End-to-end: scored CSV on disk -> dashboard -> events -> rendered frames.

use riskpanel::dashboard::Dashboard;
use riskpanel::data::load_panel;
use riskpanel::state::{Config, Event};
use riskpanel::views::{ProviderOutcome, StabilityOutcome};
use std::fs;
use tempfile::TempDir;

const PANEL: &str = "\
provider_id,as_of_date,provider_risk_score,risk_rank,mean_daily_claims_90d,claims_std_90d,claims_std_180d,anomaly_total_flags,iforest_norm,lof_norm,flags_norm,momentum_norm,recency_norm,zscore_shift_norm
5551.0,2024-01-31,0.20,3,10,1.5,2.25,0,0.1,0.1,0.1,0.1,0.1,0.1
5551.0,2024-02-29,0.97,1,40,3.456,4.0,3,0.6,0.2,0.2,0,0,0
5552,2024-02-29,0.50,2,20,,,0,0,0,0,0,0,0
7777,2024-02-29,0.10,4,5,0.5,0.5,0,0.1,0,0,0,0,0
";

async fn dashboard(dir: &TempDir) -> Dashboard {
    let path = dir.path().join("provider_panel_risk_scored.csv");
    fs::write(&path, PANEL).unwrap();
    let mut cfg = Config::from_env();
    cfg.candidate_paths = vec![path.display().to_string()];
    cfg.remote_url = None;
    cfg.top_n = 10;
    cfg.anomaly_hours = 12;
    let loaded = load_panel(&cfg).await.unwrap();
    Dashboard::new(loaded.panel, cfg)
}

#[tokio::test]
async fn initial_frame_shows_riskiest_provider() {
    let dir = TempDir::new().unwrap();
    let dash = dashboard(&dir).await;
    assert_eq!(dash.state().selected.as_deref(), Some("5551"));

    let ProviderOutcome::Ready(view) = dash.current_view() else {
        panic!("expected view");
    };
    assert_eq!(view.history.len(), 2);
    assert_eq!(view.anomalies.len(), 1);
    let driver = view.dominant_driver.unwrap();
    assert_eq!(driver.label, "Isolation Forest");
    assert_eq!(driver.pct, 60.0);

    let md = dash.render_markdown();
    assert!(md.contains("### Top Risk Providers"));
    assert!(md.contains("**Dominant driver:** Isolation Forest (~60.0% of current risk signal)."));
    assert!(md.contains("(claims_std_90d)**: 3.46"));
}

#[tokio::test]
async fn search_then_click_then_url() {
    let dir = TempDir::new().unwrap();
    let mut dash = dashboard(&dir).await;

    dash.handle(Event::SearchChanged("555".into()));
    assert_eq!(dash.state().options, vec!["5551".to_string(), "5552".to_string()]);
    assert_eq!(dash.state().selected.as_deref(), Some("5551"));

    dash.handle(Event::SearchChanged("nothing-matches".into()));
    assert_eq!(dash.state().options.len(), 3);

    // board order: 5551, 5552, 7777
    dash.handle(Event::BoardRowClicked(1));
    assert_eq!(dash.state().selected.as_deref(), Some("5552"));
    match dash.current_stability() {
        StabilityOutcome::Ready(v) => assert!(v.claims_std_90d.is_none()),
        other => panic!("unexpected {:?}", other),
    }
    assert!(dash.current_stability().to_markdown().contains("(claims_std_90d)**: NaN"));
    match dash.current_view() {
        ProviderOutcome::Ready(v) => assert!(v.dominant_driver.is_none()),
        other => panic!("unexpected {:?}", other),
    }

    dash.handle(Event::UrlLoaded("https://example.org/dashboard?pid=7777".into()));
    assert_eq!(dash.state().search, "7777");
    assert_eq!(dash.state().selected.as_deref(), Some("7777"));
}

#[tokio::test]
async fn selecting_unknown_provider_renders_no_data() {
    let dir = TempDir::new().unwrap();
    let mut dash = dashboard(&dir).await;
    dash.handle(Event::ProviderSelected("424242".into()));
    assert_eq!(dash.state().options[0], "424242");
    assert_eq!(
        dash.current_view(),
        ProviderOutcome::NoData { provider_id: "424242".into() }
    );
    let md = dash.render_markdown();
    assert!(md.contains("No data available for provider 424242"));
    assert!(md.contains("Stability / Volatility\n\nNo data available for provider 424242."));
}
