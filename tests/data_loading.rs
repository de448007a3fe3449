use riskpanel::data::source::{FileSource, PanelSource};
use riskpanel::data::{analyze_panel_csv, file_sha256, load_from_sources, load_panel, validate_schema, LoadError};
use riskpanel::state::Config;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const HEADER: &str = "provider_id,as_of_date,provider_risk_score,risk_rank,mean_daily_claims_90d,claims_90d_vs_prev90d,claims_std_90d,claims_std_180d,claims_std_365d,days_since_last,anomaly_total_flags,iforest_norm,lof_norm,flags_norm,momentum_norm,recency_norm,zscore_shift_norm";

fn write_csv(path: &Path, header: &str, rows: &[&str]) {
    let mut out = String::new();
    out.push_str(header);
    out.push('\n');
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

fn config_with(paths: Vec<String>) -> Config {
    let mut cfg = Config::from_env();
    cfg.candidate_paths = paths;
    cfg.remote_url = None;
    cfg
}

fn good_rows() -> Vec<&'static str> {
    vec![
        "1001.0,2024-01-31,0.40,3,12.5,4,1.1,1.5,2.0,3,0,0.2,0.1,0,0.3,0.1,0.0",
        "1001.0,2024-02-29,0.95,1,14.0,9,1.2,1.6,2.1,1,2,0.5,0.2,0.9,0.3,0.1,0.0",
        "\"2,002\",2024-02-29,0.60,2,8.0,-2,0.9,,1.0,10,0,0.1,0.1,0,0,0.6,0.2",
    ]
}

#[tokio::test]
async fn falls_through_missing_candidates_to_first_existing() {
    let dir = TempDir::new().unwrap();
    let real = dir.path().join("provider_panel_risk_scored.csv");
    write_csv(&real, HEADER, &good_rows());

    let cfg = config_with(vec![
        dir.path().join("missing/one.csv").display().to_string(),
        dir.path().join("missing/two.csv").display().to_string(),
        real.display().to_string(),
    ]);
    let loaded = load_panel(&cfg).await.unwrap();
    assert_eq!(loaded.source, real.display().to_string());
    assert_eq!(loaded.panel.len(), 3);
    assert_eq!(loaded.panel.provider_count(), 2);
    assert_eq!(loaded.bad_rows, 0);

    let ranked = loaded.panel.rank_providers();
    assert_eq!(ranked[0].provider_id, "1001");
    assert_eq!(ranked[1].provider_id, "2002");
}

#[tokio::test]
async fn unparsable_candidate_is_skipped() {
    let dir = TempDir::new().unwrap();
    let broken = dir.path().join("broken.csv");
    write_csv(&broken, "provider_id,score", &["1,2"]);
    let real = dir.path().join("real.csv");
    write_csv(&real, HEADER, &good_rows());

    let sources: Vec<Box<dyn PanelSource + Send + Sync>> =
        vec![Box::new(FileSource::new(&broken)), Box::new(FileSource::new(&real))];
    let loaded = load_from_sources(&sources).await.unwrap();
    assert!(loaded.source.ends_with("real.csv"));
}

#[tokio::test]
async fn no_source_reports_data_unavailable() {
    let dir = TempDir::new().unwrap();
    let cfg = config_with(vec![
        dir.path().join("a.csv").display().to_string(),
        dir.path().join("b.csv").display().to_string(),
    ]);
    match load_panel(&cfg).await {
        Err(LoadError::DataUnavailable { tried }) => {
            assert_eq!(tried.len(), 2);
            assert!(tried[0].ends_with("a.csv"));
        }
        other => panic!("expected DataUnavailable, got {:?}", other.map(|l| l.source)),
    }
}

#[tokio::test]
async fn unreachable_remote_is_data_unavailable() {
    let mut cfg = config_with(vec![]);
    cfg.remote_url = Some("http://127.0.0.1:9/provider_panel_risk_scored.csv".to_string());
    cfg.fetch_retries = 0;
    cfg.fetch_timeout_secs = 2;
    match load_panel(&cfg).await {
        Err(LoadError::DataUnavailable { tried }) => {
            assert_eq!(tried, vec!["http://127.0.0.1:9/provider_panel_risk_scored.csv".to_string()]);
        }
        other => panic!("expected DataUnavailable, got {:?}", other.map(|l| l.source)),
    }
}

/// Serves one canned response per connection, in order; counts connections.
async fn serve_panel(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                503 => "Service Unavailable",
                _ => "Other",
            };
            let response = format!(
                "HTTP/1.1 {} {}\r\ncontent-type: text/csv\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });
    (format!("http://{}/{}", addr, "provider_panel_risk_scored.csv"), hits)
}

fn panel_body() -> String {
    let mut body = format!("{}\n", HEADER);
    for row in good_rows() {
        body.push_str(row);
        body.push('\n');
    }
    body
}

fn remote_config(dir: &TempDir, url: &str, retries: u32) -> Config {
    let mut cfg = config_with(vec![dir.path().join("missing.csv").display().to_string()]);
    cfg.remote_url = Some(url.to_string());
    cfg.fetch_retries = retries;
    cfg.fetch_timeout_secs = 5;
    cfg
}

#[tokio::test]
async fn remote_serves_panel_when_local_candidates_miss() {
    let dir = TempDir::new().unwrap();
    let (url, hits) = serve_panel(vec![(200, panel_body())]).await;
    let loaded = load_panel(&remote_config(&dir, &url, 0)).await.unwrap();
    assert_eq!(loaded.source, url);
    assert_eq!(loaded.panel.len(), 3);
    assert_eq!(loaded.panel.provider_count(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remote_unavailable_status_is_retried() {
    let dir = TempDir::new().unwrap();
    let (url, hits) = serve_panel(vec![(503, String::new()), (200, panel_body())]).await;
    let loaded = load_panel(&remote_config(&dir, &url, 1)).await.unwrap();
    assert_eq!(loaded.source, url);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn remote_not_found_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let (url, hits) = serve_panel(vec![(404, String::new()), (200, panel_body())]).await;
    match load_panel(&remote_config(&dir, &url, 2)).await {
        Err(LoadError::DataUnavailable { tried }) => {
            assert_eq!(tried.last(), Some(&url));
        }
        other => panic!("expected DataUnavailable, got {:?}", other.map(|l| l.source)),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn manifest_counts_rows_providers_and_dates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("panel.csv");
    let mut rows = good_rows();
    rows.push("3003,garbage,0.1,4,,,,,,,,,,,,,");
    write_csv(&path, HEADER, &rows);

    let manifest = analyze_panel_csv(&path, 1_700_000_000).unwrap();
    assert_eq!(manifest.row_count, 3);
    assert_eq!(manifest.bad_rows, 1);
    assert_eq!(manifest.providers, 2);
    assert_eq!(manifest.date_min.unwrap().to_string(), "2024-01-31");
    assert_eq!(manifest.date_max.unwrap().to_string(), "2024-02-29");
    assert!(manifest.missing_optional.is_empty());
    assert_eq!(manifest.hash_sha256, file_sha256(&path).unwrap());
    assert_eq!(manifest.hash_sha256.len(), 64);
}

#[test]
fn schema_reports_missing_optional_columns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("thin.csv");
    write_csv(&path, "provider_id,snapshot_dt,provider_risk_score", &["1,2024-01-01,0.5"]);
    let report = validate_schema(&path).unwrap();
    assert!(report.ok);
    assert!(report.missing_optional.contains(&"claims_std_365d".to_string()));

    let bad = dir.path().join("bad.csv");
    write_csv(&bad, "provider_id,provider_risk_score", &["1,0.5"]);
    let report = validate_schema(&bad).unwrap();
    assert!(!report.ok);
    assert_eq!(report.missing_required, vec!["as_of_date".to_string()]);
}
