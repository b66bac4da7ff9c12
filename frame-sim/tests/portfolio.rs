//! Portfolio consumer scenarios.

use std::sync::Arc;

use frame_sim::consumer::var::{
    A_LVL, A_NRM, ADJUST, B_NRM, C_NRM, M_NRM, P_LVL, PERM_SHK, RFREE, RISKY, RPORT, SHARE,
    TRAN_SHK,
};
use frame_sim::{
    Frame, FrameError, FrameGraph, InputRef, OutputSpec, PortfolioConsumer, PortfolioParams,
    PortfolioPolicy, PortfolioSolution, RuleOfThumbPolicy, Simulation, Values,
};

// === FIXTURES ===

fn immortal() -> PortfolioParams {
    PortfolioParams {
        liv_prb: vec![1.0],
        ..PortfolioParams::default()
    }
}

/// Replace the random `Adjust` draw with a fixed pattern.
fn fixed_adjust(pattern: Vec<bool>) -> Frame {
    Frame::function(ADJUST, move |_| Ok(vec![Values::Flag(pattern.clone())]))
        .output(OutputSpec::shock(ADJUST).flag())
        .default_value(ADJUST, false)
}

fn simulation_with_adjust(consumer: &PortfolioConsumer, pattern: Vec<bool>, seed: u64) -> Simulation {
    let agents = pattern.len();
    let frames = consumer
        .frames()
        .expect("frames")
        .into_iter()
        .map(|f| if f.name == ADJUST { fixed_adjust(pattern.clone()) } else { f })
        .collect::<Vec<_>>();
    let graph = FrameGraph::build(frames).expect("valid graph");
    let config = consumer
        .params()
        .simulation_config(agents, seed)
        .track([SHARE, M_NRM, C_NRM]);
    Simulation::new(graph, config).expect("simulation")
}

/// Consumption on the fixed branch equals the share it is handed; the fixed
/// share moves away from the previous one so stale reads are visible.
struct ShareEcho;

impl PortfolioPolicy for ShareEcho {
    fn c_func_adj(&self, m: &[f64]) -> Vec<f64> {
        m.iter().map(|m| 0.5 * m).collect()
    }

    fn c_func_fxd(&self, _m: &[f64], share: &[f64]) -> Vec<f64> {
        share.to_vec()
    }

    fn share_func_adj(&self, m: &[f64]) -> Vec<f64> {
        vec![0.5; m.len()]
    }

    fn share_func_fxd(&self, _m: &[f64], share_prev: &[f64]) -> Vec<f64> {
        share_prev.iter().map(|s| s + 0.25).collect()
    }
}

/// Spends one unit more than it has, so end-of-period assets are always -1.
struct Overspender;

impl PortfolioPolicy for Overspender {
    fn c_func_adj(&self, m: &[f64]) -> Vec<f64> {
        m.iter().map(|m| m + 1.0).collect()
    }

    fn c_func_fxd(&self, m: &[f64], _share: &[f64]) -> Vec<f64> {
        self.c_func_adj(m)
    }

    fn share_func_adj(&self, m: &[f64]) -> Vec<f64> {
        vec![0.5; m.len()]
    }

    fn share_func_fxd(&self, _m: &[f64], share_prev: &[f64]) -> Vec<f64> {
        share_prev.to_vec()
    }
}

// === SCENARIOS ===

#[test]
fn test_non_adjusting_agent_keeps_birth_share() {
    let policy = RuleOfThumbPolicy::default();
    let consumer =
        PortfolioConsumer::new(immortal(), PortfolioSolution::uniform(policy.clone(), 1))
            .expect("consumer");
    let mut sim = simulation_with_adjust(&consumer, vec![true, false, true], 11);
    sim.run(2).expect("two periods");

    let share = sim.history().real_at(SHARE, 0).expect("share");
    let m = sim.history().real_at(M_NRM, 0).expect("mNrm");

    assert_eq!(share[1], 0.0, "agent 2 could not adjust and was born with share 0");
    for agent in [0, 2] {
        let expected = policy.share_func_adj(&[m[agent]])[0];
        assert_eq!(share[agent], expected, "agent {}", agent + 1);
    }
    assert_eq!(sim.history().periods(), 2);
}

#[test]
fn test_fixed_consumption_uses_same_period_share() {
    let echo: Arc<dyn PortfolioPolicy> = Arc::new(ShareEcho);
    let solution = PortfolioSolution::new(vec![echo]).expect("solution");
    let consumer = PortfolioConsumer::new(immortal(), solution).expect("consumer");
    let mut sim = simulation_with_adjust(&consumer, vec![true, false, true], 3);
    sim.run(3).expect("three periods");

    for period in 0..3 {
        let share = sim.history().real_at(SHARE, period).expect("share");
        let c = sim.history().real_at(C_NRM, period).expect("cNrm");
        assert_eq!(c[1], share[1], "period {period}");
        assert_eq!(share[1], 0.25 * (period + 1) as f64);
        assert_eq!(share[0], 0.5);
    }
}

#[test]
fn test_missing_producer_named() {
    let consumer = PortfolioConsumer::new(
        immortal(),
        PortfolioSolution::uniform(RuleOfThumbPolicy::default(), 1),
    )
    .expect("consumer");
    let mut frames = consumer.frames().expect("frames");
    frames.push(
        Frame::function("uses_x", |ctx| Ok(vec![ctx.input("X")?.clone()]))
            .input(InputRef::now("X"))
            .output(OutputSpec::state("Y")),
    );

    match FrameGraph::build(frames) {
        Err(FrameError::UnresolvedInput { variable, frame }) => {
            assert_eq!(variable, "X");
            assert_eq!(frame, "uses_x");
        }
        other => panic!("expected UnresolvedInput, got {other:?}"),
    }
}

#[test]
fn test_accounting_identities_hold() {
    let consumer = PortfolioConsumer::new(
        PortfolioParams::default(),
        PortfolioSolution::uniform(RuleOfThumbPolicy::default(), 1),
    )
    .expect("consumer");
    let mut sim = consumer.simulation(200, 99).expect("simulation");
    let summaries = sim.run(25).expect("run");
    assert!(summaries.iter().skip(1).any(|s| s.deaths > 0), "2% mortality over 200 agents");

    let pop = sim.population();
    let real = |name: &str| {
        pop.committed(name)
            .and_then(Values::as_real)
            .expect("committed real")
            .to_vec()
    };
    let (m, b, tran) = (real(M_NRM), real(B_NRM), real(TRAN_SHK));
    let (c, a, p, a_lvl) = (real(C_NRM), real(A_NRM), real(P_LVL), real(A_LVL));
    for i in 0..pop.count {
        assert!((m[i] - (b[i] + tran[i])).abs() < 1e-12);
        assert!((a[i] - (m[i] - c[i])).abs() < 1e-12);
        assert!((a_lvl[i] - a[i] * p[i]).abs() < 1e-9);
        assert!(c[i] <= m[i].max(0.0) + 1e-12);
    }
}

#[test]
fn test_policy_follows_age() {
    let young = RuleOfThumbPolicy {
        target_share: 0.2,
        share_slope: 0.0,
        ..RuleOfThumbPolicy::default()
    };
    let old = RuleOfThumbPolicy {
        target_share: 0.8,
        ..young.clone()
    };
    let by_age: Vec<Arc<dyn PortfolioPolicy>> = vec![Arc::new(young), Arc::new(old)];
    let solution = PortfolioSolution::new(by_age).expect("solution");
    let params = PortfolioParams {
        t_cycle: 2,
        ..immortal()
    };
    let consumer = PortfolioConsumer::new(params, solution).expect("consumer");
    let mut sim = consumer.simulation(4, 5).expect("simulation");
    sim.run(3).expect("run");

    // Everyone is born together, so the whole population shares one age.
    let expected = [0.2, 0.8, 0.2];
    for (period, share) in expected.into_iter().enumerate() {
        let observed = sim.history().real_at(SHARE, period as u64).expect("share");
        assert!(observed.iter().all(|s| (s - share).abs() < 1e-12), "period {period}");
    }
}

#[test]
fn test_borrowers_pay_the_borrowing_rate() {
    let params = PortfolioParams {
        rsave: 1.02,
        rboro: 1.2,
        adjust_prb: vec![0.5],
        ..immortal()
    };
    let overspender: Arc<dyn PortfolioPolicy> = Arc::new(Overspender);
    let solution = PortfolioSolution::new(vec![overspender]).expect("solution");
    let consumer = PortfolioConsumer::new(params, solution).expect("consumer");
    let config = consumer
        .params()
        .simulation_config(6, 13)
        .track([A_NRM, SHARE, RFREE, RPORT, RISKY, PERM_SHK, B_NRM]);
    let mut sim = Simulation::new(consumer.graph().expect("graph"), config).expect("simulation");
    sim.run(4).expect("run");

    let history = sim.history();
    let at = |name: &str, period: u64| history.real_at(name, period).expect(name).to_vec();

    // Birth assets are lognormal, hence positive: everyone saves in period 0.
    assert!(at(RFREE, 0).iter().all(|&r| r == 1.02));

    for period in 1..4 {
        let (a_prev, share_prev) = (at(A_NRM, period - 1), at(SHARE, period - 1));
        let (rfree, rport) = (at(RFREE, period), at(RPORT, period));
        let (risky, perm, b) = (at(RISKY, period), at(PERM_SHK, period), at(B_NRM, period));
        for i in 0..a_prev.len() {
            assert!((a_prev[i] + 1.0).abs() < 1e-9, "agent {i} overspent by one");
            assert_eq!(rfree[i], 1.2, "period {period} agent {i}");
            let expected = rfree[i] + share_prev[i] * (risky[i] - rfree[i]);
            assert!((rport[i] - expected).abs() < 1e-12);
            assert!((b[i] - rport[i] / perm[i] * a_prev[i]).abs() < 1e-12);
        }
    }
}
