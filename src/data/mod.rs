use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::logging::{log_bad_row, log_load, log_source_failed, ProfileScope};
use crate::panel::{normalize_provider_id, ComponentSignals, ProviderPanel, ProviderSnapshot};
use crate::state::{Config, PANEL_FILE_NAME};

pub mod retry;
pub mod source;

use source::{FileSource, HttpSource, PanelSource};

pub const REQUIRED_COLUMNS: [&str; 3] = ["provider_id", "as_of_date", "provider_risk_score"];

pub const OPTIONAL_COLUMNS: [&str; 14] = [
    "risk_rank",
    "mean_daily_claims_90d",
    "claims_90d_vs_prev90d",
    "claims_std_90d",
    "claims_std_180d",
    "claims_std_365d",
    "days_since_last",
    "anomaly_total_flags",
    "iforest_norm",
    "lof_norm",
    "flags_norm",
    "momentum_norm",
    "recency_norm",
    "zscore_shift_norm",
];

#[derive(Debug)]
pub enum LoadError {
    /// No candidate path or URL produced a readable panel.
    DataUnavailable { tried: Vec<String> },
    MissingColumns { missing: Vec<String> },
    Csv(csv::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::DataUnavailable { tried } => write!(
                f,
                "{} not found (tried: {}). Ensure the risk-scored panel exists at one of these locations.",
                PANEL_FILE_NAME,
                tried.join(", ")
            ),
            LoadError::MissingColumns { missing } => {
                write!(f, "panel is missing required columns: {}", missing.join(", "))
            }
            LoadError::Csv(err) => write!(f, "csv error: {}", err),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<csv::Error> for LoadError {
    fn from(err: csv::Error) -> Self {
        LoadError::Csv(err)
    }
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Debug)]
pub struct ParsedPanel {
    pub panel: ProviderPanel,
    pub bad_rows: u64,
    pub columns: Vec<String>,
    pub warnings: Vec<String>,
}

fn normalize_header_name(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn find_header_index(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h.as_str() == *alias))
}

struct ColumnIndex {
    provider_id: usize,
    as_of_date: usize,
    provider_risk_score: usize,
    risk_rank: Option<usize>,
    mean_daily_claims_90d: Option<usize>,
    claims_90d_vs_prev90d: Option<usize>,
    claims_std_90d: Option<usize>,
    claims_std_180d: Option<usize>,
    claims_std_365d: Option<usize>,
    days_since_last: Option<usize>,
    anomaly_total_flags: Option<usize>,
    iforest_norm: Option<usize>,
    lof_norm: Option<usize>,
    flags_norm: Option<usize>,
    momentum_norm: Option<usize>,
    recency_norm: Option<usize>,
    zscore_shift_norm: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &[String]) -> Result<Self, LoadError> {
        let opt = |name: &str| find_header_index(headers, &[name]);
        let provider_id = opt("provider_id");
        let as_of_date = find_header_index(headers, &["as_of_date", "snapshot_dt"]);
        let provider_risk_score = opt("provider_risk_score");

        let (Some(provider_id), Some(as_of_date), Some(provider_risk_score)) =
            (provider_id, as_of_date, provider_risk_score)
        else {
            let missing = REQUIRED_COLUMNS
                .iter()
                .filter(|c| match **c {
                    "as_of_date" => as_of_date.is_none(),
                    other => opt(other).is_none(),
                })
                .map(|c| c.to_string())
                .collect();
            return Err(LoadError::MissingColumns { missing });
        };

        Ok(Self {
            provider_id,
            as_of_date,
            provider_risk_score,
            risk_rank: opt("risk_rank"),
            mean_daily_claims_90d: opt("mean_daily_claims_90d"),
            claims_90d_vs_prev90d: opt("claims_90d_vs_prev90d"),
            claims_std_90d: opt("claims_std_90d"),
            claims_std_180d: opt("claims_std_180d"),
            claims_std_365d: opt("claims_std_365d"),
            days_since_last: opt("days_since_last"),
            anomaly_total_flags: opt("anomaly_total_flags"),
            iforest_norm: opt("iforest_norm"),
            lof_norm: opt("lof_norm"),
            flags_norm: opt("flags_norm"),
            momentum_norm: opt("momentum_norm"),
            recency_norm: opt("recency_norm"),
            zscore_shift_norm: opt("zscore_shift_norm"),
        })
    }
}

/// Accepts `YYYY-MM-DD` (optionally followed by a time), `MM/DD/YYYY` and
/// `YYYY/MM/DD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(prefix) = raw.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(d);
        }
    }
    ["%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// `Ok(None)` for blank / NaN-like cells, `Err` for anything unparseable.
pub fn parse_num(raw: &str) -> Result<Option<f64>, String> {
    let s = raw.trim();
    if s.is_empty() || matches!(s.to_ascii_lowercase().as_str(), "nan" | "na" | "null" | "none") {
        return Ok(None);
    }
    s.replace(',', "")
        .parse::<f64>()
        .map(Some)
        .map_err(|e| format!("bad number {:?}: {}", s, e))
}

fn field<'r>(record: &'r StringRecord, idx: usize) -> &'r str {
    record.get(idx).unwrap_or("")
}

/// Absent column or unreadable cell both read as "not available".
fn optional(record: &StringRecord, idx: Option<usize>) -> Option<f64> {
    idx.and_then(|i| parse_num(field(record, i)).ok().flatten())
}

fn parse_row(record: &StringRecord, cols: &ColumnIndex) -> Result<ProviderSnapshot, String> {
    let provider_id = normalize_provider_id(field(record, cols.provider_id));
    if provider_id.is_empty() {
        return Err("empty provider_id".to_string());
    }
    let raw_date = field(record, cols.as_of_date);
    let as_of_date = parse_date(raw_date).ok_or_else(|| format!("bad as_of_date {:?}", raw_date))?;
    let provider_risk_score = parse_num(field(record, cols.provider_risk_score))?.unwrap_or(f64::NAN);
    let zero = |idx| optional(record, idx).unwrap_or(0.0);

    Ok(ProviderSnapshot {
        provider_id,
        as_of_date,
        provider_risk_score,
        risk_rank: optional(record, cols.risk_rank),
        mean_daily_claims_90d: optional(record, cols.mean_daily_claims_90d),
        claims_90d_vs_prev90d: optional(record, cols.claims_90d_vs_prev90d),
        claims_std_90d: optional(record, cols.claims_std_90d),
        claims_std_180d: optional(record, cols.claims_std_180d),
        claims_std_365d: optional(record, cols.claims_std_365d),
        days_since_last: optional(record, cols.days_since_last),
        anomaly_total_flags: zero(cols.anomaly_total_flags),
        components: ComponentSignals {
            iforest_norm: zero(cols.iforest_norm),
            lof_norm: zero(cols.lof_norm),
            flags_norm: zero(cols.flags_norm),
            momentum_norm: zero(cols.momentum_norm),
            recency_norm: zero(cols.recency_norm),
            zscore_shift_norm: zero(cols.zscore_shift_norm),
        },
    })
}

/// Parse a risk-scored panel. Unusable rows are skipped and counted.
pub fn parse_panel<R: Read>(reader: R) -> Result<ParsedPanel, LoadError> {
    let _scope = ProfileScope::new("parse_panel");
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header_name).collect();
    let cols = ColumnIndex::resolve(&headers)?;

    let mut rows = Vec::new();
    let mut bad_rows = 0u64;
    let mut warnings = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let line = i as u64 + 2;
        let parsed = record
            .map_err(|e| e.to_string())
            .and_then(|r| parse_row(&r, &cols));
        match parsed {
            Ok(row) => rows.push(row),
            Err(reason) => {
                bad_rows += 1;
                log_bad_row(line, &reason);
                warnings.push(format!("bad_row line {}: {}", line, reason));
            }
        }
    }

    Ok(ParsedPanel {
        panel: ProviderPanel::from_rows(rows),
        bad_rows,
        columns: headers,
        warnings,
    })
}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug)]
pub struct LoadedPanel {
    pub panel: ProviderPanel,
    pub source: String,
    pub bad_rows: u64,
}

pub type BoxedSource = Box<dyn PanelSource + Send + Sync>;

/// Candidate files in order, then the remote URL if one is configured.
pub fn build_sources(cfg: &Config) -> anyhow::Result<Vec<BoxedSource>> {
    let mut sources: Vec<BoxedSource> = cfg
        .candidate_paths
        .iter()
        .map(|p| Box::new(FileSource::new(p)) as BoxedSource)
        .collect();
    if let Some(url) = &cfg.remote_url {
        sources.push(Box::new(HttpSource::new(
            url,
            cfg.fetch_timeout_secs,
            cfg.fetch_retries,
        )?));
    }
    Ok(sources)
}

/// First source that yields a parsable panel wins.
pub async fn load_from_sources(sources: &[BoxedSource]) -> Result<LoadedPanel, LoadError> {
    let mut tried = Vec::new();
    for src in sources {
        let name = src.describe();
        let text = match src.fetch().await {
            Ok(text) => text,
            Err(err) => {
                log_source_failed(&name, &format!("{:#}", err));
                tried.push(name);
                continue;
            }
        };
        match parse_panel(text.as_bytes()) {
            Ok(parsed) => {
                log_load(&name, parsed.panel.len(), parsed.panel.provider_count(), parsed.bad_rows);
                return Ok(LoadedPanel {
                    panel: parsed.panel,
                    source: name,
                    bad_rows: parsed.bad_rows,
                });
            }
            Err(err) => {
                log_source_failed(&name, &err.to_string());
                tried.push(name);
            }
        }
    }
    Err(LoadError::DataUnavailable { tried })
}

pub async fn load_panel(cfg: &Config) -> Result<LoadedPanel, LoadError> {
    let sources = build_sources(cfg).map_err(|err| {
        log_source_failed("remote", &format!("{:#}", err));
        LoadError::DataUnavailable {
            tried: cfg.candidate_paths.clone(),
        }
    })?;
    load_from_sources(&sources).await
}

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaReport {
    pub columns: Vec<String>,
    pub required: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelManifest {
    pub path: String,
    pub hash_sha256: String,
    pub row_count: u64,
    pub bad_rows: u64,
    pub providers: u64,
    pub date_min: Option<NaiveDate>,
    pub date_max: Option<NaiveDate>,
    pub columns: Vec<String>,
    pub missing_optional: Vec<String>,
    pub warnings: Vec<String>,
    pub generated_at_epoch: u64,
}

pub fn read_header(path: &Path) -> Result<Vec<String>, String> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;
    let headers = reader.headers().map_err(|e| e.to_string())?;
    Ok(headers.iter().map(normalize_header_name).collect())
}

pub fn validate_schema(path: &Path) -> Result<SchemaReport, String> {
    let columns = read_header(path)?;
    let present: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
    let has = |c: &str| match c {
        "as_of_date" => present.contains("as_of_date") || present.contains("snapshot_dt"),
        other => present.contains(other),
    };
    let missing_required: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !has(**c))
        .map(|c| c.to_string())
        .collect();
    let missing_optional: Vec<String> = OPTIONAL_COLUMNS
        .iter()
        .filter(|c| !has(**c))
        .map(|c| c.to_string())
        .collect();
    let ok = missing_required.is_empty();
    let message = if ok {
        "schema ok".to_string()
    } else {
        format!("schema mismatch: missing required {:?}", missing_required)
    };
    Ok(SchemaReport {
        columns,
        required: REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
        missing_required,
        missing_optional,
        ok,
        message,
    })
}

pub fn analyze_panel_csv(path: &Path, now_ts: u64) -> Result<PanelManifest, String> {
    let hash = file_sha256(path)?;
    let schema = validate_schema(path)?;
    let file = File::open(path).map_err(|e| e.to_string())?;
    let parsed = parse_panel(file).map_err(|e| e.to_string())?;

    let mut warnings = parsed.warnings;
    if !schema.missing_optional.is_empty() {
        warnings.push(format!("missing_optional_columns: {}", schema.missing_optional.join(",")));
    }
    if parsed.panel.is_empty() {
        warnings.push("no_rows".to_string());
    }
    let range = parsed.panel.date_range();

    Ok(PanelManifest {
        path: path.display().to_string(),
        hash_sha256: hash,
        row_count: parsed.panel.len() as u64,
        bad_rows: parsed.bad_rows,
        providers: parsed.panel.provider_count() as u64,
        date_min: range.map(|r| r.0),
        date_max: range.map(|r| r.1),
        columns: parsed.columns,
        missing_optional: schema.missing_optional,
        warnings,
        generated_at_epoch: now_ts,
    })
}

pub fn file_sha256(path: &Path) -> Result<String, String> {
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn default_manifest_path(dataset_path: &Path) -> PathBuf {
    let mut p = dataset_path.to_path_buf();
    let fname = dataset_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(PANEL_FILE_NAME);
    p.set_file_name(format!("{}.manifest.json", fname));
    p
}
