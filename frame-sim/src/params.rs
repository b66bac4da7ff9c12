use serde::{Deserialize, Serialize};

use crate::error::{FrameError, FrameResult};
use crate::types::Age;

/// Calibration of the portfolio-choice consumer.
///
/// Age-varying fields hold either one entry (used for every age) or `t_cycle`
/// entries indexed by `t_cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioParams {
    /// Periods in one cycle of the agent's life.
    pub t_cycle: usize,
    /// Maximum age in periods; agents this old die. `None` means no limit.
    pub t_age: Option<usize>,
    /// Risk-free return factor when saving.
    pub rsave: f64,
    /// Risk-free return factor when borrowing.
    pub rboro: f64,
    pub risky_avg: Vec<f64>,
    pub risky_std: Vec<f64>,
    /// Probability of being able to adjust the portfolio share.
    pub adjust_prb: Vec<f64>,
    /// Survival probability after each age.
    pub liv_prb: Vec<f64>,
    pub perm_gro_fac: Vec<f64>,
    pub perm_shk_std: Vec<f64>,
    pub tran_shk_std: Vec<f64>,
    pub unemp_prb: f64,
    /// Income while unemployed, as a fraction of permanent income.
    pub inc_unemp: f64,
    pub perm_gro_fac_agg: f64,
    pub perm_shk_agg_std: f64,
    // Birth draws: means/stds of log normalized assets and log permanent income.
    pub a_nrm_init_mean: f64,
    pub a_nrm_init_std: f64,
    pub p_lvl_init_mean: f64,
    pub p_lvl_init_std: f64,
}

impl Default for PortfolioParams {
    fn default() -> Self {
        Self {
            t_cycle: 1,
            t_age: None,
            rsave: 1.03,
            rboro: 1.03,
            risky_avg: vec![1.08],
            risky_std: vec![0.20],
            adjust_prb: vec![1.0],
            liv_prb: vec![0.98],
            perm_gro_fac: vec![1.01],
            perm_shk_std: vec![0.1],
            tran_shk_std: vec![0.1],
            unemp_prb: 0.05,
            inc_unemp: 0.3,
            perm_gro_fac_agg: 1.0,
            perm_shk_agg_std: 0.0,
            a_nrm_init_mean: 0.0,
            a_nrm_init_std: 1.0,
            p_lvl_init_mean: 0.0,
            p_lvl_init_std: 0.0,
        }
    }
}

impl PortfolioParams {
    pub fn validate(&self) -> FrameResult<()> {
        if self.t_cycle == 0 {
            return Err(FrameError::invalid("t_cycle", "must be at least 1"));
        }
        for (name, values) in self.age_varying() {
            if values.len() != 1 && values.len() != self.t_cycle {
                return Err(FrameError::invalid(
                    name,
                    format!(
                        "needs 1 or {} entries, got {}",
                        self.t_cycle,
                        values.len()
                    ),
                ));
            }
        }
        for (name, values) in [
            ("adjust_prb", self.adjust_prb.as_slice()),
            ("liv_prb", self.liv_prb.as_slice()),
            ("unemp_prb", std::slice::from_ref(&self.unemp_prb)),
        ] {
            if let Some(p) = values.iter().find(|p| !(0.0..=1.0).contains(*p)) {
                return Err(FrameError::invalid(name, format!("must lie in [0, 1], got {p}")));
            }
        }
        if self.unemp_prb >= 1.0 {
            return Err(FrameError::invalid("unemp_prb", "must be below 1"));
        }
        for (name, values) in [
            ("risky_std", self.risky_std.as_slice()),
            ("perm_shk_std", self.perm_shk_std.as_slice()),
            ("tran_shk_std", self.tran_shk_std.as_slice()),
            ("perm_shk_agg_std", std::slice::from_ref(&self.perm_shk_agg_std)),
            ("a_nrm_init_std", std::slice::from_ref(&self.a_nrm_init_std)),
            ("p_lvl_init_std", std::slice::from_ref(&self.p_lvl_init_std)),
        ] {
            if let Some(s) = values.iter().find(|s| s.is_nan() || **s < 0.0) {
                return Err(FrameError::invalid(name, format!("must be non-negative, got {s}")));
            }
        }
        if let Some(r) = self.risky_avg.iter().find(|r| r.is_nan() || **r <= 0.0) {
            return Err(FrameError::invalid("risky_avg", format!("must be positive, got {r}")));
        }
        if self.perm_gro_fac_agg.is_nan() || self.perm_gro_fac_agg <= 0.0 {
            return Err(FrameError::invalid("perm_gro_fac_agg", "must be positive"));
        }
        for (name, r) in [("rsave", self.rsave), ("rboro", self.rboro)] {
            if !r.is_finite() || r <= 0.0 {
                return Err(FrameError::invalid(
                    name,
                    format!("must be positive and finite, got {r}"),
                ));
            }
        }
        if !self.inc_unemp.is_finite() || self.inc_unemp < 0.0 {
            return Err(FrameError::invalid(
                "inc_unemp",
                format!("must be non-negative and finite, got {}", self.inc_unemp),
            ));
        }
        Ok(())
    }

    fn age_varying(&self) -> [(&'static str, &[f64]); 7] {
        [
            ("risky_avg", self.risky_avg.as_slice()),
            ("risky_std", self.risky_std.as_slice()),
            ("adjust_prb", self.adjust_prb.as_slice()),
            ("liv_prb", self.liv_prb.as_slice()),
            ("perm_gro_fac", self.perm_gro_fac.as_slice()),
            ("perm_shk_std", self.perm_shk_std.as_slice()),
            ("tran_shk_std", self.tran_shk_std.as_slice()),
        ]
    }

    pub fn simulation_config(&self, agent_count: usize, seed: u64) -> SimulationConfig {
        SimulationConfig {
            agent_count,
            seed,
            cycle_len: self.t_cycle,
            max_age: self.t_age,
            survival: self.liv_prb.clone(),
            ..SimulationConfig::default()
        }
    }
}

/// Entry of an age-varying parameter; a single entry applies to every age.
pub fn age_value(values: &[f64], age: Age) -> f64 {
    match values {
        [only] => *only,
        _ => values.get(age).copied().unwrap_or(f64::NAN),
    }
}

/// Run-level settings for a [`crate::Simulation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub agent_count: usize,
    /// Root seed; shock, birth and death streams are derived from it.
    pub seed: u64,
    pub cycle_len: usize,
    pub max_age: Option<usize>,
    /// Survival probability per completed age. Empty means immortal agents.
    pub survival: Vec<f64>,
    /// Per-agent variables recorded every period (aggregates always are).
    pub track_vars: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agent_count: 100,
            seed: 0,
            cycle_len: 1,
            max_age: None,
            survival: Vec::new(),
            track_vars: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn track<S: Into<String>>(mut self, vars: impl IntoIterator<Item = S>) -> Self {
        self.track_vars.extend(vars.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        PortfolioParams::default().validate().expect("valid");
    }

    #[test]
    fn test_age_varying_length_checked() {
        let params = PortfolioParams {
            t_cycle: 3,
            liv_prb: vec![0.99, 0.98],
            ..PortfolioParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(FrameError::InvalidParameter { name, .. }) if name == "liv_prb"
        ));
    }

    #[test]
    fn test_probability_and_std_bounds() {
        let bad_prob = PortfolioParams {
            adjust_prb: vec![1.5],
            ..PortfolioParams::default()
        };
        assert!(bad_prob.validate().is_err());

        let bad_std = PortfolioParams {
            perm_shk_std: vec![-0.1],
            ..PortfolioParams::default()
        };
        assert!(bad_std.validate().is_err());
    }

    #[test]
    fn test_return_factors_and_unemployment_income_checked() {
        let rejected = |params: PortfolioParams| match params.validate() {
            Err(FrameError::InvalidParameter { name, .. }) => name,
            other => panic!("expected InvalidParameter, got {other:?}"),
        };
        let base = PortfolioParams::default;

        assert_eq!(rejected(PortfolioParams { rsave: f64::NAN, ..base() }), "rsave");
        assert_eq!(rejected(PortfolioParams { rboro: 0.0, ..base() }), "rboro");
        assert_eq!(rejected(PortfolioParams { rboro: f64::INFINITY, ..base() }), "rboro");
        assert_eq!(rejected(PortfolioParams { inc_unemp: -0.1, ..base() }), "inc_unemp");
        assert_eq!(rejected(PortfolioParams { inc_unemp: f64::NAN, ..base() }), "inc_unemp");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: PortfolioParams =
            serde_json::from_str(r#"{"t_cycle": 2, "adjust_prb": [0.5, 0.25]}"#).expect("parse");
        assert_eq!(params.t_cycle, 2);
        assert_eq!(params.rsave, 1.03);
        assert_eq!(age_value(&params.adjust_prb, 1), 0.25);
        assert_eq!(age_value(&params.liv_prb, 1), 0.98);
        params.validate().expect("valid");
    }

    #[test]
    fn test_simulation_config_from_params() {
        let params = PortfolioParams {
            t_age: Some(40),
            ..PortfolioParams::default()
        };
        let config = params.simulation_config(10, 7).track(["mNrm"]);
        assert_eq!(config.agent_count, 10);
        assert_eq!(config.max_age, Some(40));
        assert_eq!(config.survival, vec![0.98]);
        assert_eq!(config.track_vars, vec!["mNrm".to_string()]);
    }
}
