use riskpanel::data::{analyze_panel_csv, default_manifest_path, validate_schema, REQUIRED_COLUMNS};
use riskpanel::state::PANEL_FILE_NAME;
use serde_json::json;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    let path = PathBuf::from(
        env::args()
            .nth(1)
            .unwrap_or_else(|| format!("data/processed/{}", PANEL_FILE_NAME)),
    );

    let now_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let schema = match validate_schema(&path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("schema check failed: {}", err);
            std::process::exit(1);
        }
    };

    if !schema.ok {
        eprintln!("{}", schema.message);
        eprintln!("required columns: {:?}", REQUIRED_COLUMNS);
        std::process::exit(2);
    }

    let manifest = match analyze_panel_csv(&path, now_ts) {
        Ok(m) => m,
        Err(err) => {
            eprintln!("analysis failed: {}", err);
            std::process::exit(3);
        }
    };

    let out_path = default_manifest_path(&path);
    let payload = json!({
        "manifest": manifest,
        "schema": schema,
    });
    let body = match serde_json::to_string_pretty(&payload) {
        Ok(body) => body,
        Err(err) => {
            eprintln!("failed to encode manifest: {}", err);
            std::process::exit(4);
        }
    };
    if let Err(err) = fs::write(&out_path, body) {
        eprintln!("failed to write {}: {}", out_path.display(), err);
        std::process::exit(4);
    }
    println!(
        "wrote manifest {} ({} rows, {} providers, {} bad rows)",
        out_path.display(),
        manifest.row_count,
        manifest.providers,
        manifest.bad_rows
    );
}
