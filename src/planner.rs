// =============================================================================
// Capacity Planner — forecast vector to replica vector under a policy
// =============================================================================
//
// A pure, deterministic function. For each forecast step:
//
//   1. Lookahead    — max raw demand over the prewarm window.
//   2. Round        — ceil / round / floor per policy.
//   3. Clamp        — [min, max] bounds (max = 0 means unbounded above).
//   4. Change clamp — limit growth/shrink versus the previous output.
//   5. Re-clamp     — bounds again after the change clamp.
//
// The order of these operations is load-bearing: change clamps must see the
// bounded value, and the final re-clamp keeps the change clamp from pushing
// the output outside the bounds.
//
// When a quantile series is selected by the policy it already encodes the
// safety margin, so headroom is not applied on that path.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Policy
// =============================================================================

/// How fractional replica demand is rounded to a whole count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    Ceil,
    Round,
    Floor,
}

impl Default for RoundingMode {
    fn default() -> Self {
        Self::Ceil
    }
}

fn default_target_per_pod() -> f64 {
    100.0
}

fn default_headroom() -> f64 {
    1.0
}

fn default_min_replicas() -> i64 {
    1
}

fn default_up_max_factor() -> f64 {
    2.0
}

fn default_down_max_percent() -> f64 {
    100.0
}

/// Immutable capacity policy for one workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Sustainable load per replica. Must be positive.
    #[serde(default = "default_target_per_pod")]
    pub target_per_pod: f64,

    /// Multiplicative safety factor applied to point forecasts when no
    /// quantile series is selected.
    #[serde(default = "default_headroom")]
    pub headroom: f64,

    /// When > 0 and the forecast carries a matching quantile series, that
    /// series replaces the headroom-scaled point forecast.
    #[serde(default)]
    pub quantile_level: f64,

    /// Lower replica bound.
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i64,

    /// Upper replica bound; 0 means unbounded above.
    #[serde(default)]
    pub max_replicas: i64,

    /// Multiplicative cap on step-to-step growth.
    #[serde(default = "default_up_max_factor")]
    pub up_max_factor_per_step: f64,

    /// Cap on step-to-step shrink, in percent of the previous output.
    #[serde(default = "default_down_max_percent")]
    pub down_max_percent_per_step: f64,

    /// Number of future steps whose maximum demand sizes the current step.
    #[serde(default)]
    pub prewarm_window_steps: usize,

    /// Rounding applied to fractional replica demand.
    #[serde(default)]
    pub rounding_mode: RoundingMode,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            target_per_pod: default_target_per_pod(),
            headroom: default_headroom(),
            quantile_level: 0.0,
            min_replicas: default_min_replicas(),
            max_replicas: 0,
            up_max_factor_per_step: default_up_max_factor(),
            down_max_percent_per_step: default_down_max_percent(),
            prewarm_window_steps: 0,
            rounding_mode: RoundingMode::Ceil,
        }
    }
}

impl Policy {
    /// Return a copy with every field forced into its legal range. Applied
    /// on every planner call so a malformed policy degrades instead of
    /// producing nonsense.
    fn normalized(&self) -> Self {
        let mut p = self.clone();
        if p.target_per_pod <= 0.0 {
            p.target_per_pod = f64::MIN_POSITIVE;
        }
        if p.headroom < 1.0 {
            p.headroom = 1.0;
        }
        if p.min_replicas < 0 {
            p.min_replicas = 0;
        }
        if p.max_replicas != 0 && p.max_replicas < p.min_replicas {
            p.max_replicas = p.min_replicas;
        }
        if p.up_max_factor_per_step <= 0.0 {
            p.up_max_factor_per_step = 2.0;
        }
        p.down_max_percent_per_step = p.down_max_percent_per_step.clamp(0.0, 100.0);
        p
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Format a quantile level the way the quantile map keys it, e.g. `0.90`.
pub fn quantile_key(level: f64) -> String {
    format!("{level:.2}")
}

/// Map a forecast vector to a desired-replica vector.
///
/// `prev` is the last emitted desired count (owned by the runner). The
/// result always has the same length as `values`; an empty forecast yields
/// an empty plan.
pub fn plan(
    prev: i64,
    values: &[f64],
    step_seconds: i64,
    policy: &Policy,
    quantiles: Option<&BTreeMap<String, Vec<f64>>>,
) -> Vec<i64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }

    let p = policy.normalized();
    let step_seconds = if step_seconds <= 0 { 60 } else { step_seconds };

    // Capacity-value selection: a matching quantile series replaces the
    // headroom-scaled point forecast outright.
    let quantile_series: Option<&Vec<f64>> = if p.quantile_level > 0.0 {
        quantiles
            .and_then(|m| m.get(&quantile_key(p.quantile_level)))
            .filter(|series| series.len() == n)
    } else {
        None
    };

    // Raw replica demand per step.
    let demand: Vec<f64> = (0..n)
        .map(|i| {
            let capacity = match quantile_series {
                Some(series) => series[i].max(0.0),
                None => values[i].max(0.0) * p.headroom,
            };
            capacity / p.target_per_pod
        })
        .collect();

    let clamp_bounds = |v: i64| -> i64 {
        let v = v.max(p.min_replicas);
        if p.max_replicas > 0 {
            v.min(p.max_replicas)
        } else {
            v
        }
    };

    let mut prev_out = clamp_bounds(prev);
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        // 1. Lookahead: forward maximum over the prewarm window.
        let end = (i + p.prewarm_window_steps).min(n - 1);
        let need = demand[i..=end].iter().fold(f64::MIN, |a, &b| a.max(b));

        // 2. Round. Float-to-int casts saturate, so extreme demand cannot
        //    wrap; the bounds clamp below brings it back into range.
        let rounded = match p.rounding_mode {
            RoundingMode::Ceil => need.ceil(),
            RoundingMode::Round => need.round(),
            RoundingMode::Floor => need.floor(),
        } as i64;

        // 3. Bounds clamp.
        let mut desired = clamp_bounds(rounded);

        // 4. Change clamps versus the previous output.
        if prev_out == 0 {
            let max_up = p.up_max_factor_per_step.ceil() as i64;
            desired = desired.min(max_up);
        } else {
            let max_up = ((prev_out as f64) * p.up_max_factor_per_step).ceil() as i64;
            let min_down = ((prev_out as f64)
                * (1.0 - p.down_max_percent_per_step / 100.0))
                .floor() as i64;
            // Applied in sequence: the two limits can cross when the up
            // factor is below 1, and the shrink limit wins.
            if desired > max_up {
                desired = max_up;
            }
            if desired < min_down {
                desired = min_down;
            }
        }

        // 5. Re-clamp: the change clamp must not escape the bounds.
        let desired = clamp_bounds(desired);

        out.push(desired);
        prev_out = desired;
    }

    debug!(
        steps = n,
        step_seconds,
        prev,
        first = out.first().copied().unwrap_or_default(),
        quantile = quantile_series.is_some(),
        "capacity plan computed"
    );

    out
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn policy(target: f64, headroom: f64, min: i64, max: i64, up: f64, down: f64) -> Policy {
        Policy {
            target_per_pod: target,
            headroom,
            quantile_level: 0.0,
            min_replicas: min,
            max_replicas: max,
            up_max_factor_per_step: up,
            down_max_percent_per_step: down,
            prewarm_window_steps: 0,
            rounding_mode: RoundingMode::Ceil,
        }
    }

    #[test]
    fn basic_headroom_path() {
        let p = policy(50.0, 1.2, 1, 100, 2.0, 50.0);
        let forecast = [120.0, 130.0, 125.0, 140.0, 100.0];
        let out = plan(2, &forecast, 60, &p, None);
        assert_eq!(out, vec![3, 4, 3, 4, 3]);
    }

    #[test]
    fn bounds_dominate() {
        let p = policy(10.0, 1.0, 2, 5, 10.0, 100.0);
        let forecast = [0.0, 1.0, 10.0, 1000.0];
        let out = plan(0, &forecast, 60, &p, None);
        assert_eq!(out, vec![2, 2, 2, 5]);
    }

    #[test]
    fn quantile_overrides_headroom() {
        let mut p = policy(50.0, 1.2, 1, 100, 2.0, 50.0);
        p.quantile_level = 0.90;
        let forecast = [100.0, 110.0, 105.0, 115.0, 95.0];
        let mut quantiles = BTreeMap::new();
        quantiles.insert(
            quantile_key(0.90),
            vec![130.0, 143.0, 136.0, 150.0, 124.0],
        );
        let out = plan(2, &forecast, 60, &p, Some(&quantiles));
        // Headroom must not be applied on top of the quantile series.
        assert_eq!(out, vec![3, 3, 3, 3, 3]);
    }

    #[test]
    fn quantile_level_without_matching_series_falls_back_to_headroom() {
        let mut p = policy(50.0, 1.2, 1, 100, 2.0, 50.0);
        p.quantile_level = 0.90;
        let forecast = [120.0, 130.0, 125.0, 140.0, 100.0];
        // Wrong length: must be ignored.
        let mut quantiles = BTreeMap::new();
        quantiles.insert(quantile_key(0.90), vec![9999.0]);
        let out = plan(2, &forecast, 60, &p, Some(&quantiles));
        assert_eq!(out, vec![3, 4, 3, 4, 3]);
    }

    #[test]
    fn empty_forecast_yields_empty_plan() {
        let p = policy(50.0, 1.0, 1, 10, 2.0, 50.0);
        assert!(plan(3, &[], 60, &p, None).is_empty());
    }

    #[test]
    fn cold_start_growth_is_capped() {
        // prev = 0 with up factor 2 allows at most ceil(1 * 2) = 2.
        let p = policy(1.0, 1.0, 0, 0, 2.0, 100.0);
        let out = plan(0, &[10.0], 60, &p, None);
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn full_down_percent_allows_scale_to_zero() {
        let p = policy(1.0, 1.0, 0, 0, 2.0, 100.0);
        let out = plan(8, &[0.0], 60, &p, None);
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn down_percent_limits_shrink_per_step() {
        let p = policy(1.0, 1.0, 0, 0, 10.0, 25.0);
        let out = plan(8, &[0.0, 0.0, 0.0], 60, &p, None);
        // floor(8 * 0.75) = 6, floor(6 * 0.75) = 4, floor(4 * 0.75) = 3.
        assert_eq!(out, vec![6, 4, 3]);
    }

    #[test]
    fn prewarm_takes_forward_maximum() {
        let mut p = policy(1.0, 1.0, 0, 0, 100.0, 100.0);
        p.prewarm_window_steps = 2;
        let out = plan(10, &[1.0, 1.0, 9.0, 1.0], 60, &p, None);
        // Steps 0..2 all see the spike at index 2 through the window.
        assert_eq!(out, vec![9, 9, 9, 1]);
    }

    #[test]
    fn rounding_modes_differ() {
        let base = [2.4];
        let mut p = policy(1.0, 1.0, 0, 0, 100.0, 100.0);
        p.rounding_mode = RoundingMode::Ceil;
        assert_eq!(plan(10, &base, 60, &p, None), vec![3]);
        p.rounding_mode = RoundingMode::Round;
        assert_eq!(plan(10, &base, 60, &p, None), vec![2]);
        p.rounding_mode = RoundingMode::Floor;
        assert_eq!(plan(10, &base, 60, &p, None), vec![2]);
    }

    #[test]
    fn negative_forecast_values_are_treated_as_zero() {
        let p = policy(1.0, 1.0, 0, 0, 100.0, 100.0);
        let out = plan(5, &[-12.0], 60, &p, None);
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn output_always_within_bounds() {
        let p = policy(0.5, 3.0, 2, 7, 100.0, 100.0);
        let out = plan(1, &[0.0, 1e12, 3.0, f64::INFINITY], 60, &p, None);
        assert_eq!(out.len(), 4);
        for v in out {
            assert!((2..=7).contains(&v), "replica count {v} outside [2, 7]");
        }
    }

    #[test]
    fn degenerate_policy_is_normalized() {
        // Nonsense fields must not panic or produce negatives.
        let p = Policy {
            target_per_pod: -4.0,
            headroom: 0.2,
            quantile_level: 0.0,
            min_replicas: -3,
            max_replicas: 2,
            up_max_factor_per_step: -1.0,
            down_max_percent_per_step: 250.0,
            prewarm_window_steps: 0,
            rounding_mode: RoundingMode::Ceil,
        };
        let out = plan(-5, &[1.0, 2.0], 0, &p, None);
        assert_eq!(out.len(), 2);
        for v in out {
            assert!((0..=2).contains(&v));
        }
    }

    #[test]
    fn plan_is_deterministic() {
        let p = policy(50.0, 1.2, 1, 100, 2.0, 50.0);
        let forecast = [120.0, 130.0, 125.0, 140.0, 100.0];
        assert_eq!(
            plan(2, &forecast, 60, &p, None),
            plan(2, &forecast, 60, &p, None)
        );
    }
}
