use serde::Serialize;

use crate::panel::ComponentSignals;

/// One of the six signals blended into a provider's risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    IsolationForest,
    Lof,
    ZScoreAnomalies,
    Momentum,
    Recency,
    ZScoreShift,
}

impl Component {
    /// Display order of the decomposition chart.
    pub const ALL: [Component; 6] = [
        Component::IsolationForest,
        Component::Lof,
        Component::ZScoreAnomalies,
        Component::Momentum,
        Component::Recency,
        Component::ZScoreShift,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Component::IsolationForest => "Isolation Forest",
            Component::Lof => "LOF",
            Component::ZScoreAnomalies => "Z-score Anomalies",
            Component::Momentum => "Momentum (Claims 90d Δ)",
            Component::Recency => "Recency",
            Component::ZScoreShift => "Z-score Shift",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Component::IsolationForest => "iforest_norm",
            Component::Lof => "lof_norm",
            Component::ZScoreAnomalies => "flags_norm",
            Component::Momentum => "momentum_norm",
            Component::Recency => "recency_norm",
            Component::ZScoreShift => "zscore_shift_norm",
        }
    }

    pub fn value(&self, signals: &ComponentSignals) -> f64 {
        match self {
            Component::IsolationForest => signals.iforest_norm,
            Component::Lof => signals.lof_norm,
            Component::ZScoreAnomalies => signals.flags_norm,
            Component::Momentum => signals.momentum_norm,
            Component::Recency => signals.recency_norm,
            Component::ZScoreShift => signals.zscore_shift_norm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentShare {
    pub component: Component,
    pub label: &'static str,
    pub value: f64,
}

/// Component shares of the latest snapshot, summing to 1.0 or all zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decomposition {
    pub shares: Vec<ComponentShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominantDriver {
    pub component: Component,
    pub label: &'static str,
    /// Share of the risk signal in percent, one decimal.
    pub pct: f64,
}

/// Clamp each signal to >= 0 (NaN and infinities count as 0) and scale to a
/// unit sum. An all-zero input stays all-zero.
pub fn normalize_components(signals: &ComponentSignals) -> Decomposition {
    let raw: Vec<f64> = Component::ALL
        .iter()
        .map(|c| {
            let v = c.value(signals);
            if !v.is_finite() {
                0.0
            } else {
                v.max(0.0)
            }
        })
        .collect();
    let total: f64 = raw.iter().sum();
    let shares = Component::ALL
        .iter()
        .zip(raw)
        .map(|(c, v)| ComponentShare {
            component: *c,
            label: c.label(),
            value: if total > 0.0 { v / total } else { v },
        })
        .collect();
    Decomposition { shares }
}

impl Decomposition {
    pub fn total(&self) -> f64 {
        self.shares.iter().map(|s| s.value).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.total() <= 0.0
    }

    /// Largest share; the earlier component wins a tie.
    pub fn dominant_driver(&self) -> Option<DominantDriver> {
        if self.is_zero() {
            return None;
        }
        let mut best: Option<&ComponentShare> = None;
        for share in &self.shares {
            if best.map_or(true, |b| share.value > b.value) {
                best = Some(share);
            }
        }
        best.map(|s| DominantDriver {
            component: s.component,
            label: s.label,
            pct: (s.value * 1000.0).round() / 10.0,
        })
    }
}

impl DominantDriver {
    pub fn to_markdown(&self) -> String {
        format!(
            "**Dominant driver:** {} (~{:.1}% of current risk signal).",
            self.label, self.pct
        )
    }
}

pub const DRIVER_UNAVAILABLE: &str = "**Dominant driver:** not available for this provider.";

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(v: [f64; 6]) -> ComponentSignals {
        ComponentSignals {
            iforest_norm: v[0],
            lof_norm: v[1],
            flags_norm: v[2],
            momentum_norm: v[3],
            recency_norm: v[4],
            zscore_shift_norm: v[5],
        }
    }

    #[test]
    fn shares_sum_to_one() {
        let d = normalize_components(&signals([0.3, 0.1, 0.2, 0.0, 0.4, 0.0]));
        assert!((d.total() - 1.0).abs() < 1e-12);
        assert!((d.shares[4].value - 0.4).abs() < 1e-12);
    }

    #[test]
    fn negatives_and_nan_are_clamped() {
        let d = normalize_components(&signals([-1.0, f64::NAN, 2.0, 0.0, 0.0, 2.0]));
        assert_eq!(d.shares[0].value, 0.0);
        assert_eq!(d.shares[1].value, 0.0);
        assert!((d.shares[2].value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn infinite_signals_are_clamped() {
        let d = normalize_components(&signals([f64::INFINITY, 0.2, 0.0, f64::NEG_INFINITY, 0.0, 0.0]));
        assert!((d.total() - 1.0).abs() < 1e-12);
        assert_eq!(d.shares[0].value, 0.0);
        let driver = d.dominant_driver().unwrap();
        assert_eq!(driver.component, Component::Lof);
        assert_eq!(driver.pct, 100.0);

        let d = normalize_components(&signals([f64::INFINITY, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert!(d.is_zero());
        assert!(d.dominant_driver().is_none());
    }

    #[test]
    fn all_zero_has_no_driver() {
        let d = normalize_components(&signals([0.0, -0.5, 0.0, 0.0, 0.0, 0.0]));
        assert!(d.shares.iter().all(|s| s.value == 0.0));
        assert!(d.dominant_driver().is_none());
    }

    #[test]
    fn dominant_driver_rounds_to_one_decimal() {
        let d = normalize_components(&signals([1.0, 2.0, 0.0, 0.0, 0.0, 0.0]));
        let driver = d.dominant_driver().unwrap();
        assert_eq!(driver.component, Component::Lof);
        assert_eq!(driver.pct, 66.7);
        assert_eq!(
            driver.to_markdown(),
            "**Dominant driver:** LOF (~66.7% of current risk signal)."
        );
    }

    #[test]
    fn tie_goes_to_first_component() {
        let d = normalize_components(&signals([0.0, 0.0, 1.0, 0.0, 1.0, 0.0]));
        assert_eq!(d.dominant_driver().unwrap().component, Component::ZScoreAnomalies);
    }
}
