//! Decision rules consumed by the control frames.
//!
//! The solver that produces real policy functions lives outside this crate;
//! anything implementing [`PortfolioPolicy`] can be plugged in per age.

use std::fmt;
use std::sync::Arc;

use crate::error::{FrameError, FrameResult};
use crate::types::Age;

/// Consumption and portfolio-share rules for one age.
///
/// Every method maps equal-length slices to a vector of the same length.
pub trait PortfolioPolicy: Send + Sync {
    /// Consumption of an agent that may re-choose its share.
    fn c_func_adj(&self, m: &[f64]) -> Vec<f64>;
    /// Consumption of an agent holding `share` this period.
    fn c_func_fxd(&self, m: &[f64], share: &[f64]) -> Vec<f64>;
    fn share_func_adj(&self, m: &[f64]) -> Vec<f64>;
    /// Share of an agent that cannot adjust, given its previous share.
    fn share_func_fxd(&self, m: &[f64], share_prev: &[f64]) -> Vec<f64>;
}

/// One policy per age of the cycle.
#[derive(Clone)]
pub struct PortfolioSolution {
    by_age: Vec<Arc<dyn PortfolioPolicy>>,
}

impl PortfolioSolution {
    pub fn new(by_age: Vec<Arc<dyn PortfolioPolicy>>) -> FrameResult<Self> {
        if by_age.is_empty() {
            return Err(FrameError::invalid("solution", "needs a policy for at least one age"));
        }
        Ok(Self { by_age })
    }

    /// The same policy at every age.
    pub fn uniform(policy: impl PortfolioPolicy + 'static, ages: usize) -> Self {
        let policy: Arc<dyn PortfolioPolicy> = Arc::new(policy);
        Self {
            by_age: vec![policy; ages.max(1)],
        }
    }

    pub fn at(&self, age: Age) -> FrameResult<&dyn PortfolioPolicy> {
        self.by_age
            .get(age)
            .map(Arc::as_ref)
            .ok_or_else(|| FrameError::invalid("solution", format!("no policy for age {age}")))
    }

    pub fn len(&self) -> usize {
        self.by_age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_age.is_empty()
    }
}

impl fmt::Debug for PortfolioSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortfolioSolution")
            .field("ages", &self.by_age.len())
            .finish()
    }
}

/// Simple closed-form rules, standing in for a solved model.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOfThumbPolicy {
    /// Share of market resources consumed.
    pub mpc: f64,
    /// Risky share chosen at very high wealth.
    pub target_share: f64,
    /// Extra risky share at low wealth, decaying as `1 / (1 + m)`.
    pub share_slope: f64,
    /// Cut to the MPC per unit of risky share for agents that cannot rebalance.
    pub fixed_mpc_penalty: f64,
}

impl Default for RuleOfThumbPolicy {
    fn default() -> Self {
        Self {
            mpc: 0.3,
            target_share: 0.6,
            share_slope: 0.4,
            fixed_mpc_penalty: 0.05,
        }
    }
}

impl RuleOfThumbPolicy {
    fn consume(mpc: f64, m: f64) -> f64 {
        mpc.clamp(0.0, 1.0) * m.max(0.0)
    }
}

impl PortfolioPolicy for RuleOfThumbPolicy {
    fn c_func_adj(&self, m: &[f64]) -> Vec<f64> {
        m.iter().map(|&m| Self::consume(self.mpc, m)).collect()
    }

    fn c_func_fxd(&self, m: &[f64], share: &[f64]) -> Vec<f64> {
        m.iter()
            .zip(share)
            .map(|(&m, &s)| Self::consume(self.mpc - self.fixed_mpc_penalty * s, m))
            .collect()
    }

    fn share_func_adj(&self, m: &[f64]) -> Vec<f64> {
        m.iter()
            .map(|&m| (self.target_share + self.share_slope / (1.0 + m.max(0.0))).clamp(0.0, 1.0))
            .collect()
    }

    fn share_func_fxd(&self, _m: &[f64], share_prev: &[f64]) -> Vec<f64> {
        share_prev.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumption_never_exceeds_resources() {
        let policy = RuleOfThumbPolicy {
            mpc: 1.5,
            ..RuleOfThumbPolicy::default()
        };
        let m = [0.0, 1.0, 4.0, -2.0];
        let c = policy.c_func_adj(&m);
        assert!(c.iter().zip(&m).all(|(c, m)| *c <= m.max(0.0)));
        assert!(c.iter().all(|c| *c >= 0.0));
    }

    #[test]
    fn test_shares_bounded_and_fixed_keeps_previous() {
        let policy = RuleOfThumbPolicy::default();
        let share = policy.share_func_adj(&[0.0, 1.0, 100.0]);
        assert!(share.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(share[0] > share[2]);
        assert_eq!(policy.share_func_fxd(&[1.0, 2.0], &[0.25, 0.0]), vec![0.25, 0.0]);
    }

    #[test]
    fn test_solution_lookup() {
        let solution = PortfolioSolution::uniform(RuleOfThumbPolicy::default(), 3);
        assert_eq!(solution.len(), 3);
        assert!(solution.at(2).is_ok());
        assert!(matches!(solution.at(3), Err(FrameError::InvalidParameter { .. })));
        assert!(PortfolioSolution::new(Vec::new()).is_err());
    }
}
