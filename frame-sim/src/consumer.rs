//! Portfolio-choice consumer expressed as a frame graph.
//!
//! Each period: draw the risky return, the adjustment flag, the idiosyncratic
//! and aggregate income shocks; update the aggregate productivity level; pick
//! the risk-free rate from last period's assets; realize the portfolio return;
//! update income and market resources; choose the risky share and consumption
//! (split by age and by whether the agent may rebalance); compute end-of-period
//! assets.

use std::sync::Arc;

use crate::dispatch::{gather, scatter_checked, split_cohorts};
use crate::distribution::{Distribution, IndexDistribution, SeedStream};
use crate::error::{FrameError, FrameResult};
use crate::frame::{Frame, FrameContext, InputRef, OutputSpec};
use crate::graph::FrameGraph;
use crate::params::{PortfolioParams, age_value};
use crate::policy::{PortfolioPolicy, PortfolioSolution};
use crate::simulation::Simulation;
use crate::types::{T_AGE, T_CYCLE, ValueKind, Values};

/// Variable names used by the portfolio consumer.
pub mod var {
    pub const RISKY: &str = "Risky";
    pub const ADJUST: &str = "Adjust";
    pub const PERM_SHK: &str = "PermShk";
    pub const TRAN_SHK: &str = "TranShk";
    pub const PERM_SHK_AGG: &str = "PermShkAgg";
    pub const PLVL_AGG: &str = "PlvlAgg";
    pub const RFREE: &str = "Rfree";
    pub const RPORT: &str = "Rport";
    pub const P_LVL: &str = "pLvl";
    pub const B_NRM: &str = "bNrm";
    pub const M_NRM: &str = "mNrm";
    pub const SHARE: &str = "Share";
    pub const C_NRM: &str = "cNrm";
    pub const A_NRM: &str = "aNrm";
    pub const A_LVL: &str = "aLvl";
}

use var::*;

/// Frame names that differ from their single output's name.
pub const INCOME_SHOCKS: &str = "income_shocks";
pub const INCOME: &str = "income";
pub const POST_STATES: &str = "post_states";

#[derive(Debug, Clone)]
pub struct PortfolioConsumer {
    params: Arc<PortfolioParams>,
    solution: PortfolioSolution,
}

impl PortfolioConsumer {
    pub fn new(params: PortfolioParams, solution: PortfolioSolution) -> FrameResult<Self> {
        params.validate()?;
        if solution.len() < params.t_cycle {
            return Err(FrameError::invalid(
                "solution",
                format!(
                    "{} policies for a cycle of {} periods",
                    solution.len(),
                    params.t_cycle
                ),
            ));
        }
        Ok(Self {
            params: Arc::new(params),
            solution,
        })
    }

    pub fn params(&self) -> &PortfolioParams {
        &self.params
    }

    pub fn solution(&self) -> &PortfolioSolution {
        &self.solution
    }

    /// Frames in declaration order; the graph decides evaluation order.
    pub fn frames(&self) -> FrameResult<Vec<Frame>> {
        Ok(vec![
            self.risky_frame()?,
            self.adjust_frame()?,
            self.income_shock_frame()?,
            self.aggregate_shock_frame()?,
            aggregate_level_frame(),
            self.rfree_frame(),
            portfolio_return_frame(),
            self.income_frame(),
            self.share_frame(),
            self.consumption_frame(),
            self.post_state_frame(),
        ])
    }

    pub fn graph(&self) -> FrameResult<FrameGraph> {
        FrameGraph::build(self.frames()?)
    }

    pub fn simulation(&self, agent_count: usize, seed: u64) -> FrameResult<Simulation> {
        let config = self
            .params
            .simulation_config(agent_count, seed)
            .track([P_LVL, M_NRM, SHARE, C_NRM, A_NRM]);
        Simulation::new(self.graph()?, config)
    }

    // === SHOCKS ===

    fn risky_frame(&self) -> FrameResult<Frame> {
        let ages = self.params.t_cycle;
        let means = per_age(&self.params.risky_avg, ages);
        let stds = per_age(&self.params.risky_std, ages);
        let dist = IndexDistribution::lognormal_from_mean_std(&means, &stds)?;
        Ok(Frame::draw(RISKY, dist).output(OutputSpec::shock(RISKY)))
    }

    fn adjust_frame(&self) -> FrameResult<Frame> {
        let dist = IndexDistribution::bernoulli(&self.params.adjust_prb)?;
        Ok(Frame::draw(ADJUST, dist)
            .output(OutputSpec::shock(ADJUST).flag())
            .default_value(ADJUST, false))
    }

    /// Joint permanent/transitory income shocks.
    fn income_shock_frame(&self) -> FrameResult<Frame> {
        let params = Arc::clone(&self.params);
        let perm = IndexDistribution::mean_one_lognormal(&params.perm_shk_std)?;
        let tran = IndexDistribution::mean_one_lognormal(&params.tran_shk_std)?;
        let unemployment = Distribution::Bernoulli { p: params.unemp_prb };
        unemployment.validate()?;
        let employed_scale = if params.unemp_prb > 0.0 {
            (1.0 - params.unemp_prb * params.inc_unemp) / (1.0 - params.unemp_prb)
        } else {
            1.0
        };

        Ok(Frame::function(INCOME_SHOCKS, move |ctx| {
            let t_cycle = ctx.index(T_CYCLE)?;
            let t_age = ctx.index(T_AGE)?;
            let mut seeds = SeedStream::new(ctx.seed());
            let perm = into_real(perm.draw(t_cycle, seeds.next_seed())?, PERM_SHK)?;
            let tran = into_real(tran.draw(t_cycle, seeds.next_seed())?, TRAN_SHK)?;
            let unemployed = into_flags(unemployment.draw(ctx.count(), seeds.next_seed())?, TRAN_SHK)?;

            let perm_shk = perm
                .iter()
                .zip(t_cycle.iter().zip(t_age))
                .map(|(&shk, (&t, &age))| {
                    // Newborns start from their birth income level.
                    if age == 0 {
                        1.0
                    } else {
                        shk * age_value(&params.perm_gro_fac, t)
                    }
                })
                .collect();
            let tran_shk = tran
                .iter()
                .zip(&unemployed)
                .map(|(&shk, &unemp)| if unemp { params.inc_unemp } else { shk * employed_scale })
                .collect();
            Ok(vec![Values::Real(perm_shk), Values::Real(tran_shk)])
        })
        .input(InputRef::now(T_CYCLE))
        .input(InputRef::now(T_AGE))
        .output(OutputSpec::shock(PERM_SHK))
        .output(OutputSpec::shock(TRAN_SHK)))
    }

    fn aggregate_shock_frame(&self) -> FrameResult<Frame> {
        let sigma = self.params.perm_shk_agg_std;
        let dist = Distribution::Lognormal {
            mu: self.params.perm_gro_fac_agg.ln() - 0.5 * sigma * sigma,
            sigma,
        };
        Ok(Frame::draw(PERM_SHK_AGG, IndexDistribution::constant(dist)?)
            .output(OutputSpec::shock(PERM_SHK_AGG).aggregate()))
    }

    // === STATES ===

    /// Borrowing or saving rate, picked by the sign of last period's assets.
    fn rfree_frame(&self) -> Frame {
        let (rsave, rboro) = (self.params.rsave, self.params.rboro);
        Frame::function(RFREE, move |ctx| {
            let a_prev = ctx.real(A_NRM)?;
            let rfree = a_prev
                .iter()
                .map(|&a| if a > 0.0 { rsave } else { rboro })
                .collect();
            Ok(vec![Values::Real(rfree)])
        })
        .input(InputRef::prev(A_NRM))
        .output(OutputSpec::state(RFREE))
    }

    fn income_frame(&self) -> Frame {
        let params = Arc::clone(&self.params);
        Frame::function(INCOME, |ctx| {
            let p_prev = ctx.real(P_LVL)?;
            let a_prev = ctx.real(A_NRM)?;
            let rport = ctx.real(RPORT)?;
            let perm = ctx.real(PERM_SHK)?;
            let tran = ctx.real(TRAN_SHK)?;

            let n = ctx.count();
            let mut p_lvl = Vec::with_capacity(n);
            let mut b_nrm = Vec::with_capacity(n);
            let mut m_nrm = Vec::with_capacity(n);
            for i in 0..n {
                let b = rport[i] / perm[i] * a_prev[i];
                p_lvl.push(p_prev[i] * perm[i]);
                b_nrm.push(b);
                m_nrm.push(b + tran[i]);
            }
            Ok(vec![Values::Real(p_lvl), Values::Real(b_nrm), Values::Real(m_nrm)])
        })
        .input(InputRef::prev(P_LVL))
        .input(InputRef::prev(A_NRM))
        .input(InputRef::now(RPORT))
        .input(InputRef::now(PERM_SHK))
        .input(InputRef::now(TRAN_SHK))
        .output(OutputSpec::state(P_LVL))
        .output(OutputSpec::state(B_NRM))
        .output(OutputSpec::state(M_NRM))
        .default_provider(P_LVL, move |birth| {
            // Newer cohorts start from the aggregate level at their birth.
            let agg = birth.aggregate(PLVL_AGG)?;
            Distribution::Lognormal {
                mu: params.p_lvl_init_mean + agg.ln(),
                sigma: params.p_lvl_init_std,
            }
            .draw(birth.count(), birth.seed())
        })
    }

    // === CONTROLS ===

    fn share_frame(&self) -> Frame {
        let solution = self.solution.clone();
        Frame::function(SHARE, move |ctx| {
            let share_prev = ctx.real(SHARE)?;
            let share = dispatch_policy(
                ctx,
                SHARE,
                &solution,
                share_prev,
                |policy, m| policy.share_func_adj(m),
                |policy, m, share| policy.share_func_fxd(m, share),
            )?;
            Ok(vec![share])
        })
        .input(InputRef::now(M_NRM))
        .input(InputRef::now(ADJUST))
        .input(InputRef::now(T_CYCLE))
        .input(InputRef::prev(SHARE))
        .output(OutputSpec::control(SHARE))
        .default_value(SHARE, 0.0)
    }

    /// Fixed-branch consumption takes the share chosen this period.
    fn consumption_frame(&self) -> Frame {
        let solution = self.solution.clone();
        Frame::function(C_NRM, move |ctx| {
            let share = ctx.real(SHARE)?;
            let c_nrm = dispatch_policy(
                ctx,
                C_NRM,
                &solution,
                share,
                |policy, m| policy.c_func_adj(m),
                |policy, m, share| policy.c_func_fxd(m, share),
            )?;
            Ok(vec![c_nrm])
        })
        .input(InputRef::now(M_NRM))
        .input(InputRef::now(ADJUST))
        .input(InputRef::now(T_CYCLE))
        .input(InputRef::now(SHARE))
        .output(OutputSpec::control(C_NRM))
    }

    // === POST-STATES ===

    fn post_state_frame(&self) -> Frame {
        let (mu, sigma) = (self.params.a_nrm_init_mean, self.params.a_nrm_init_std);
        Frame::function(POST_STATES, |ctx| {
            let m = ctx.real(M_NRM)?;
            let c = ctx.real(C_NRM)?;
            let p = ctx.real(P_LVL)?;
            let a_nrm: Vec<f64> = m.iter().zip(c).map(|(m, c)| m - c).collect();
            let a_lvl = a_nrm.iter().zip(p).map(|(a, p)| a * p).collect();
            Ok(vec![Values::Real(a_nrm), Values::Real(a_lvl)])
        })
        .input(InputRef::now(M_NRM))
        .input(InputRef::now(C_NRM))
        .input(InputRef::now(P_LVL))
        .output(OutputSpec::state(A_NRM))
        .output(OutputSpec::state(A_LVL))
        .default_provider(A_NRM, move |birth| {
            Distribution::Lognormal { mu, sigma }.draw(birth.count(), birth.seed())
        })
    }
}

/// `PlvlAgg_t = PlvlAgg_{t-1} * PermShkAgg_t`.
fn aggregate_level_frame() -> Frame {
    Frame::function(PLVL_AGG, |ctx| {
        let level = ctx.scalar(PLVL_AGG)? * ctx.scalar(PERM_SHK_AGG)?;
        Ok(vec![Values::Real(vec![level])])
    })
    .input(InputRef::prev(PLVL_AGG))
    .input(InputRef::now(PERM_SHK_AGG))
    .output(OutputSpec::state(PLVL_AGG).aggregate())
    .default_value(PLVL_AGG, 1.0)
}

/// `Rport = Rfree + Share_prev * (Risky - Rfree)`.
fn portfolio_return_frame() -> Frame {
    Frame::function(RPORT, |ctx| {
        let rfree = ctx.real(RFREE)?;
        let risky = ctx.real(RISKY)?;
        let share = ctx.real(SHARE)?;
        let rport = rfree
            .iter()
            .zip(risky.iter().zip(share))
            .map(|(&rf, (&r, &s))| rf + s * (r - rf))
            .collect();
        Ok(vec![Values::Real(rport)])
    })
    .input(InputRef::now(RFREE))
    .input(InputRef::now(RISKY))
    .input(InputRef::prev(SHARE))
    .output(OutputSpec::state(RPORT))
}

/// Apply each age's policy to its adjusting and fixed agents separately.
///
/// `share` is the share argument handed to the fixed branch.
fn dispatch_policy(
    ctx: &FrameContext<'_>,
    variable: &str,
    solution: &PortfolioSolution,
    share: &[f64],
    adjusting: impl Fn(&dyn PortfolioPolicy, &[f64]) -> Vec<f64>,
    fixed: impl Fn(&dyn PortfolioPolicy, &[f64], &[f64]) -> Vec<f64>,
) -> FrameResult<Values> {
    let m = ctx.real(M_NRM)?;
    let adjust = ctx.flags(ADJUST)?;
    let ages = ctx.index(T_CYCLE)?;

    let mut out = vec![f64::NAN; ctx.count()];
    for cohort in split_cohorts(ages, adjust)? {
        let policy = solution.at(cohort.age)?;
        if !cohort.adjust.is_empty() {
            let chosen = adjusting(policy, &gather(m, &cohort.adjust));
            scatter_checked(&mut out, &cohort.adjust, &chosen, ctx.frame(), variable)?;
        }
        if !cohort.fixed.is_empty() {
            let chosen = fixed(
                policy,
                &gather(m, &cohort.fixed),
                &gather(share, &cohort.fixed),
            );
            scatter_checked(&mut out, &cohort.fixed, &chosen, ctx.frame(), variable)?;
        }
    }
    Ok(Values::Real(out))
}

fn per_age(values: &[f64], ages: usize) -> Vec<f64> {
    (0..ages).map(|age| age_value(values, age)).collect()
}

fn into_real(values: Values, variable: &str) -> FrameResult<Vec<f64>> {
    match values {
        Values::Real(v) => Ok(v),
        other => Err(FrameError::TypeMismatch {
            variable: variable.to_string(),
            expected: ValueKind::Real,
            actual: other.kind(),
        }),
    }
}

fn into_flags(values: Values, variable: &str) -> FrameResult<Vec<bool>> {
    match values {
        Values::Flag(v) => Ok(v),
        other => Err(FrameError::TypeMismatch {
            variable: variable.to_string(),
            expected: ValueKind::Flag,
            actual: other.kind(),
        }),
    }
}
