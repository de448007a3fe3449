//! Provider panel: one row per provider per snapshot date, loaded once and
//! read-only afterwards. All dashboard aggregates are derived from here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::logging::ProfileScope;

/// The six raw component signals behind a risk score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSignals {
    pub iforest_norm: f64,
    pub lof_norm: f64,
    pub flags_norm: f64,
    pub momentum_norm: f64,
    pub recency_norm: f64,
    pub zscore_shift_norm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub provider_id: String,
    pub as_of_date: NaiveDate,
    pub provider_risk_score: f64,
    pub risk_rank: Option<f64>,
    pub mean_daily_claims_90d: Option<f64>,
    pub claims_90d_vs_prev90d: Option<f64>,
    pub claims_std_90d: Option<f64>,
    pub claims_std_180d: Option<f64>,
    pub claims_std_365d: Option<f64>,
    pub days_since_last: Option<f64>,
    pub anomaly_total_flags: f64,
    pub components: ComponentSignals,
}

impl ProviderSnapshot {
    /// Minimal row; every optional field absent.
    pub fn new(provider_id: &str, as_of_date: NaiveDate, provider_risk_score: f64) -> Self {
        Self {
            provider_id: normalize_provider_id(provider_id),
            as_of_date,
            provider_risk_score,
            risk_rank: None,
            mean_daily_claims_90d: None,
            claims_90d_vs_prev90d: None,
            claims_std_90d: None,
            claims_std_180d: None,
            claims_std_365d: None,
            days_since_last: None,
            anomaly_total_flags: 0.0,
            components: ComponentSignals::default(),
        }
    }
}

/// Canonical textual form of a provider id.
///
/// Commas (thousands separators) are removed, then surrounding whitespace and
/// trailing `".0"` float artifacts are stripped until neither remains, so
/// `" 1,234.0 "` and `"1234"` compare equal and the function is idempotent.
pub fn normalize_provider_id(raw: &str) -> String {
    let without_commas = raw.replace(',', "");
    let mut s = without_commas.as_str();
    loop {
        let trimmed = s.trim();
        match trimmed.strip_suffix(".0") {
            Some(rest) => s = rest,
            None => return trimmed.to_string(),
        }
    }
}

/// A provider with its most recent risk score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProvider {
    pub provider_id: String,
    pub latest_score: f64,
    pub latest_date: NaiveDate,
}

/// Descending by score with NaN last.
pub(crate) fn cmp_score_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderPanel {
    rows: Vec<ProviderSnapshot>,
}

impl ProviderPanel {
    /// Rows are stably sorted ascending by date; equal dates keep input order.
    pub fn from_rows(mut rows: Vec<ProviderSnapshot>) -> Self {
        rows.sort_by_key(|r| r.as_of_date);
        Self { rows }
    }

    pub fn rows(&self) -> &[ProviderSnapshot] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn provider_count(&self) -> usize {
        self.latest_by_id().len()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => Some((first.as_of_date, last.as_of_date)),
            _ => None,
        }
    }

    fn latest_by_id(&self) -> BTreeMap<&str, &ProviderSnapshot> {
        let mut latest = BTreeMap::new();
        for row in &self.rows {
            latest.insert(row.provider_id.as_str(), row);
        }
        latest
    }

    /// Each provider's last row in date order, ordered by provider id.
    pub fn latest_per_provider(&self) -> Vec<&ProviderSnapshot> {
        self.latest_by_id().into_values().collect()
    }

    /// Providers ordered by their latest risk score, highest first.
    pub fn rank_providers(&self) -> Vec<RankedProvider> {
        let _scope = ProfileScope::new("rank_providers");
        let mut ranked: Vec<RankedProvider> = self
            .latest_per_provider()
            .into_iter()
            .map(|r| RankedProvider {
                provider_id: r.provider_id.clone(),
                latest_score: r.provider_risk_score,
                latest_date: r.as_of_date,
            })
            .collect();
        ranked.sort_by(|a, b| cmp_score_desc(a.latest_score, b.latest_score));
        ranked
    }

    /// Snapshot history for one provider, ascending by date.
    pub fn history(&self, pid: &str) -> Vec<&ProviderSnapshot> {
        let pid = normalize_provider_id(pid);
        self.rows.iter().filter(|r| r.provider_id == pid).collect()
    }

    pub fn latest(&self, pid: &str) -> Option<&ProviderSnapshot> {
        self.history(pid).pop()
    }
}

/// Substring search over ranked ids. Never returns an empty list: when nothing
/// matches, the full ranked list comes back.
pub fn filter_providers(ranked_ids: &[String], query: &str) -> Vec<String> {
    if query.is_empty() {
        return ranked_ids.to_vec();
    }
    let filtered: Vec<String> = ranked_ids
        .iter()
        .filter(|pid| pid.contains(query))
        .cloned()
        .collect();
    if filtered.is_empty() {
        ranked_ids.to_vec()
    } else {
        filtered
    }
}

pub fn ranked_ids(ranked: &[RankedProvider]) -> Vec<String> {
    ranked.iter().map(|r| r.provider_id.clone()).collect()
}
