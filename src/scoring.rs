//! Composite provider risk scoring.
//!
//! Turns raw anomaly-model outputs into the `*_norm` component columns, a
//! weighted composite and a percentile score. This is the step that produces
//! the scored panel the dashboard reads.

use anyhow::{anyhow, Result};
use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use serde::Serialize;
use std::io::{Read, Write};

use crate::data::parse_num;
use crate::panel::{cmp_score_desc, ComponentSignals};
use crate::risk::Component;

/// Raw per-row inputs of the scoring step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSignals {
    /// Isolation-forest decision function; lower is more anomalous.
    pub iforest_score: f64,
    /// LOF negative outlier factor; more negative is more anomalous.
    pub lof_score: f64,
    pub anomaly_total_flags: f64,
    pub claims_90d_vs_prev90d: f64,
    pub zscore_90d_vs_prev90d: f64,
    pub days_since_last: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub iforest: f64,
    pub lof: f64,
    pub flags: f64,
    pub momentum: f64,
    pub zscore_shift: f64,
    pub recency: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            iforest: 0.30,
            lof: 0.25,
            flags: 0.20,
            momentum: 0.10,
            zscore_shift: 0.10,
            recency: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredRow {
    pub components: ComponentSignals,
    pub provider_risk_raw: f64,
    pub provider_risk_score: f64,
    pub risk_rank: f64,
}

const MINMAX_EPS: f64 = 1e-9;

/// `(x - min) / (max - min + eps)` over the finite values; NaN passes through.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() {
        return vec![f64::NAN; values.len()];
    }
    values
        .iter()
        .map(|v| (v - min) / (max - min + MINMAX_EPS))
        .collect()
}

/// Fractional rank in (0, 1]; ties share the average rank, NaN stays NaN.
pub fn percentile_rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let n = order.len() as f64;
    let mut out = vec![f64::NAN; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 averaged
        let avg = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            out[idx] = avg / n;
        }
        i = j + 1;
    }
    out
}

/// Dense rank, 1 = highest score; NaN scores get NaN.
pub fn dense_rank_desc(scores: &[f64]) -> Vec<f64> {
    let mut distinct: Vec<f64> = scores.iter().copied().filter(|s| !s.is_nan()).collect();
    distinct.sort_by(|a, b| cmp_score_desc(*a, *b));
    distinct.dedup_by(|a, b| cmp_score_desc(*a, *b).is_eq());
    scores
        .iter()
        .map(|s| {
            if s.is_nan() {
                return f64::NAN;
            }
            match distinct.binary_search_by(|d| cmp_score_desc(*d, *s)) {
                Ok(pos) => (pos + 1) as f64,
                Err(_) => f64::NAN,
            }
        })
        .collect()
}

pub fn compute_risk_scores(rows: &[RawSignals], weights: &Weights) -> Vec<ScoredRow> {
    let column = |f: fn(&RawSignals) -> f64| -> Vec<f64> { rows.iter().map(f).collect() };

    let iforest = min_max_normalize(&column(|r| -r.iforest_score));
    let lof = min_max_normalize(&column(|r| -r.lof_score));
    let flags = min_max_normalize(&column(|r| r.anomaly_total_flags));
    let momentum = min_max_normalize(&column(|r| r.claims_90d_vs_prev90d));
    let zscore_shift = min_max_normalize(&column(|r| r.zscore_90d_vs_prev90d));
    let recency = min_max_normalize(&column(|r| r.days_since_last));

    let raw: Vec<f64> = (0..rows.len())
        .map(|i| {
            iforest[i] * weights.iforest
                + lof[i] * weights.lof
                + flags[i] * weights.flags
                + momentum[i] * weights.momentum
                + zscore_shift[i] * weights.zscore_shift
                + recency[i] * weights.recency
        })
        .collect();
    let scores = percentile_rank(&raw);
    let ranks = dense_rank_desc(&scores);

    (0..rows.len())
        .map(|i| ScoredRow {
            components: ComponentSignals {
                iforest_norm: iforest[i],
                lof_norm: lof[i],
                flags_norm: flags[i],
                momentum_norm: momentum[i],
                recency_norm: recency[i],
                zscore_shift_norm: zscore_shift[i],
            },
            provider_risk_raw: raw[i],
            provider_risk_score: scores[i],
            risk_rank: ranks[i],
        })
        .collect()
}

// =============================================================================
// CSV pass
// =============================================================================

pub const RAW_COLUMNS: [&str; 6] = [
    "iforest_score",
    "lof_score",
    "anomaly_total_flags",
    "claims_90d_vs_prev90d",
    "zscore_90d_vs_prev90d",
    "days_since_last",
];

const SCORE_COLUMNS: [&str; 3] = ["provider_risk_raw", "provider_risk_score", "risk_rank"];

fn fmt_cell(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

/// Score every row of a raw panel and write it back out with the component,
/// composite and rank columns appended (replacing any stale copies).
/// Returns the number of rows written.
pub fn score_csv<R: Read, W: Write>(input: R, output: W, weights: &Weights) -> Result<usize> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input);
    let headers = reader.headers()?.clone();
    let idx = RAW_COLUMNS
        .iter()
        .map(|c| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(c))
                .ok_or_else(|| anyhow!("missing column {}", c))
        })
        .collect::<Result<Vec<usize>>>()?;
    let records = reader.records().collect::<std::result::Result<Vec<StringRecord>, _>>()?;

    let raw: Vec<RawSignals> = records
        .iter()
        .map(|r| {
            let get = |i: usize| {
                parse_num(r.get(idx[i]).unwrap_or(""))
                    .ok()
                    .flatten()
                    .unwrap_or(f64::NAN)
            };
            RawSignals {
                iforest_score: get(0),
                lof_score: get(1),
                anomaly_total_flags: get(2),
                claims_90d_vs_prev90d: get(3),
                zscore_90d_vs_prev90d: get(4),
                days_since_last: get(5),
            }
        })
        .collect();
    let scored = compute_risk_scores(&raw, weights);

    let derived: Vec<&str> = Component::ALL
        .iter()
        .map(|c| c.column())
        .chain(SCORE_COLUMNS)
        .collect();
    let keep: Vec<usize> = (0..headers.len())
        .filter(|&i| !derived.iter().any(|d| headers[i].eq_ignore_ascii_case(d)))
        .collect();

    let mut writer = Writer::from_writer(output);
    let mut header_out: Vec<&str> = keep.iter().map(|&i| &headers[i]).collect();
    header_out.extend(derived.iter().copied());
    writer.write_record(&header_out)?;

    for (record, s) in records.iter().zip(&scored) {
        let mut row: Vec<String> = keep
            .iter()
            .map(|&i| record.get(i).unwrap_or("").to_string())
            .collect();
        row.extend(
            Component::ALL
                .iter()
                .map(|c| fmt_cell(c.value(&s.components))),
        );
        row.push(fmt_cell(s.provider_risk_raw));
        row.push(fmt_cell(s.provider_risk_score));
        row.push(fmt_cell(s.risk_rank));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(records.len())
}
