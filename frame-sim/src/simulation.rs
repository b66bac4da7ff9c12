//! Period driver.
//!
//! One period: mortality, rebirth with default injection, every frame in
//! schedule order, commit, history, aging. A period is computed on a copy of
//! the population and swapped in only when every step succeeded, so an error
//! leaves the last committed state untouched.

use crate::distribution::SeedStream;
use crate::error::{FrameError, FrameResult};
use crate::frame::{Frame, FrameContext, Transition};
use crate::graph::FrameGraph;
use crate::history::History;
use crate::mortality::who_dies;
use crate::params::SimulationConfig;
use crate::population::PopulationState;
use crate::types::{Period, Scope, Values, VarKind};

/// What happened in one committed period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodSummary {
    pub period: Period,
    pub births: usize,
    pub deaths: usize,
}

#[derive(Debug, Clone)]
pub struct Simulation {
    graph: FrameGraph,
    config: SimulationConfig,
    population: PopulationState,
    period: Period,
    shock_seeds: SeedStream,
    birth_seeds: SeedStream,
    death_seeds: SeedStream,
    history: History,
}

impl Simulation {
    pub fn new(graph: FrameGraph, config: SimulationConfig) -> FrameResult<Self> {
        if config.cycle_len == 0 {
            return Err(FrameError::invalid("cycle_len", "must be at least 1"));
        }
        if let Some(p) = config.survival.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(FrameError::invalid("survival", format!("must lie in [0, 1], got {p}")));
        }
        for name in &config.track_vars {
            graph.registry().spec(name)?;
        }

        // Independent streams so adding a frame never shifts birth or death draws.
        let mut root = SeedStream::new(config.seed);
        let shock_seeds = SeedStream::new(root.next_seed());
        let birth_seeds = SeedStream::new(root.next_seed());
        let death_seeds = SeedStream::new(root.next_seed());

        Ok(Self {
            population: PopulationState::new(config.agent_count),
            history: History::new(config.track_vars.iter().cloned()),
            graph,
            config,
            period: 0,
            shock_seeds,
            birth_seeds,
            death_seeds,
        })
    }

    pub fn graph(&self) -> &FrameGraph {
        &self.graph
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn population(&self) -> &PopulationState {
        &self.population
    }

    /// Number of committed periods.
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn into_history(self) -> History {
        self.history
    }

    /// Provide (or replace) the values of an exogenous variable.
    pub fn supply(&mut self, name: &str, values: Values) -> FrameResult<()> {
        let spec = self.graph.registry().spec(name)?;
        if spec.kind != VarKind::Exogenous {
            return Err(FrameError::invalid(name, "is not an exogenous variable"));
        }
        if values.kind() != spec.value_kind {
            return Err(FrameError::TypeMismatch {
                variable: name.to_string(),
                expected: spec.value_kind,
                actual: values.kind(),
            });
        }
        self.population.supply(name, values)
    }

    pub fn run(&mut self, periods: usize) -> FrameResult<Vec<PeriodSummary>> {
        (0..periods).map(|_| self.step()).collect()
    }

    /// Advance one period.
    pub fn step(&mut self) -> FrameResult<PeriodSummary> {
        let period = self.period;
        let mut pop = self.population.clone();
        let mut shock_seeds = self.shock_seeds.clone();
        let mut birth_seeds = self.birth_seeds.clone();
        let mut death_seeds = self.death_seeds.clone();

        pop.begin_period();

        // === BIRTH / DEATH ===
        let deaths = if period == 0 {
            0
        } else {
            let dies = who_dies(
                pop.t_cycle(),
                pop.t_age(),
                self.config.cycle_len,
                &self.config.survival,
                self.config.max_age,
                death_seeds.next_seed(),
            );
            pop.kill(&dies)
        };
        let born = pop.respawn();
        if !born.is_empty() {
            self.check_birth_defaults()?;
        }
        pop.init_aggregates(&self.graph, &mut birth_seeds, period)?;
        pop.inject_birth_values(&born, &self.graph, &mut birth_seeds, period)?;

        #[cfg(feature = "instrument")]
        {
            for (output, _) in self.graph.defaults() {
                if output.scope == Scope::Agent && !born.is_empty() {
                    tracing::info!(
                        target: "birth",
                        period = period,
                        variable = output.name.as_str(),
                        count = born.len(),
                    );
                }
            }
        }

        // === FRAMES ===
        for frame in self.graph.order() {
            let outputs = self.evaluate(frame, &pop, shock_seeds.next_seed())?;

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "frame",
                period = period,
                frame = frame.name.as_str(),
                outputs = outputs.len(),
            );

            for (output, values) in frame.outputs.iter().zip(outputs) {
                pop.write(output, values);
            }
        }

        // === COMMIT ===
        pop.commit();
        self.history.record(&pop, self.graph.registry());
        pop.advance_ages(self.config.cycle_len);

        #[cfg(feature = "instrument")]
        {
            for spec in self.graph.registry().aggregates() {
                if let Some(value) = pop
                    .committed(&spec.name)
                    .and_then(Values::as_real)
                    .and_then(|v| v.first().copied())
                {
                    tracing::info!(
                        target: "aggregate",
                        period = period,
                        variable = spec.name.as_str(),
                        value = value,
                    );
                }
            }
            tracing::info!(
                target: "period",
                period = period,
                agents = pop.count,
                births = born.len(),
                deaths = deaths,
            );
        }

        self.population = pop;
        self.shock_seeds = shock_seeds;
        self.birth_seeds = birth_seeds;
        self.death_seeds = death_seeds;
        self.period += 1;

        Ok(PeriodSummary {
            period,
            births: born.len(),
            deaths,
        })
    }

    /// Every variable read from the previous period needs a birth value once
    /// newborns exist.
    fn check_birth_defaults(&self) -> FrameResult<()> {
        for (frame, input) in self.graph.lagged_reads() {
            if !self.graph.has_default(&input.name) {
                return Err(FrameError::MissingDefault {
                    variable: input.name.clone(),
                    frame: frame.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn evaluate(&self, frame: &Frame, pop: &PopulationState, seed: u64) -> FrameResult<Vec<Values>> {
        let scope = frame.scope().unwrap_or_default();
        let expected = match scope {
            Scope::Agent => pop.count,
            Scope::Aggregate => 1,
        };

        let outputs = match &frame.transition {
            Transition::Draw(dist) => {
                let conditions = match scope {
                    Scope::Agent => pop.t_cycle().to_vec(),
                    Scope::Aggregate => vec![0],
                };
                vec![dist.draw(&conditions, seed)?]
            }
            Transition::Function(f) => {
                let inputs = frame
                    .inputs
                    .iter()
                    .map(|input| {
                        pop.read(&input.name, input.timing)
                            .map(|values| (input, values))
                            .ok_or_else(|| FrameError::Unavailable {
                                frame: frame.name.clone(),
                                variable: input.name.clone(),
                            })
                    })
                    .collect::<FrameResult<Vec<_>>>()?;
                let ctx = FrameContext {
                    frame: &frame.name,
                    inputs,
                    count: expected,
                    period: self.period,
                    seed,
                };
                f(&ctx)?
            }
        };

        check_outputs(frame, &outputs, expected)?;
        Ok(outputs)
    }
}

/// Reject anything the frame did not promise: wrong count, length, kind, or
/// non-finite reals.
fn check_outputs(frame: &Frame, outputs: &[Values], expected: usize) -> FrameResult<()> {
    if outputs.len() != frame.outputs.len() {
        return Err(FrameError::OutputArity {
            frame: frame.name.clone(),
            expected: frame.outputs.len(),
            actual: outputs.len(),
        });
    }
    for (spec, values) in frame.outputs.iter().zip(outputs) {
        if values.len() != expected {
            return Err(FrameError::ShapeMismatch {
                frame: frame.name.clone(),
                variable: spec.name.clone(),
                expected,
                actual: values.len(),
            });
        }
        if values.kind() != spec.value_kind {
            return Err(FrameError::TypeMismatch {
                variable: spec.name.clone(),
                expected: spec.value_kind,
                actual: values.kind(),
            });
        }
        if let Some(slot) = values.first_non_finite() {
            return Err(FrameError::NonFinite {
                frame: frame.name.clone(),
                variable: spec.name.clone(),
                slot,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{InputRef, OutputSpec};
    use crate::types::ValueKind;

    fn counter_graph() -> FrameGraph {
        FrameGraph::build(vec![
            Frame::function("count", |ctx| {
                let prev = ctx.real("n")?;
                Ok(vec![Values::Real(prev.iter().map(|n| n + 1.0).collect())])
            })
            .input(InputRef::prev("n"))
            .output(OutputSpec::state("n"))
            .default_value("n", 0.0),
        ])
        .expect("valid graph")
    }

    fn config(agents: usize) -> SimulationConfig {
        SimulationConfig {
            agent_count: agents,
            track_vars: vec!["n".to_string()],
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_state_carries_between_periods() {
        let mut sim = Simulation::new(counter_graph(), config(3)).expect("sim");
        let summaries = sim.run(3).expect("run");

        assert_eq!(summaries[0].births, 3);
        assert_eq!(summaries[1].births, 0);
        assert_eq!(sim.period(), 3);
        assert_eq!(sim.history().real_at("n", 2).expect("recorded"), &[3.0, 3.0, 3.0]);
        assert_eq!(sim.population().t_age(), &[3, 3, 3]);
    }

    #[test]
    fn test_certain_death_respawns_every_period() {
        let config = SimulationConfig {
            survival: vec![0.0],
            ..config(4)
        };
        let mut sim = Simulation::new(counter_graph(), config).expect("sim");
        let summaries = sim.run(3).expect("run");

        assert!(summaries[1..].iter().all(|s| s.deaths == 4 && s.births == 4));
        // Everyone is reborn with n = 0 and counts once.
        assert_eq!(sim.history().real_at("n", 2).expect("recorded"), &[1.0; 4]);
    }

    #[test]
    fn test_max_age_kills_at_limit() {
        let config = SimulationConfig {
            max_age: Some(2),
            ..config(2)
        };
        let mut sim = Simulation::new(counter_graph(), config).expect("sim");
        let summaries = sim.run(4).expect("run");
        let deaths: Vec<usize> = summaries.iter().map(|s| s.deaths).collect();
        assert_eq!(deaths, vec![0, 0, 2, 0]);
    }

    #[test]
    fn test_exogenous_supply() {
        let graph = FrameGraph::builder()
            .exogenous("wage", ValueKind::Real)
            .frame(
                Frame::function("earn", |ctx| Ok(vec![ctx.input("wage")?.clone()]))
                    .input(InputRef::now("wage"))
                    .output(OutputSpec::state("income")),
            )
            .build()
            .expect("valid");
        let mut sim = Simulation::new(graph, SimulationConfig::default().track(["income"]))
            .expect("sim");
        let n = sim.config().agent_count;

        assert!(matches!(sim.step(), Err(FrameError::Unavailable { .. })));
        assert_eq!(sim.period(), 0);

        assert!(sim.supply("income", Values::Real(vec![1.0; n])).is_err());
        sim.supply("wage", Values::Real(vec![2.5; n])).expect("supplied");
        sim.step().expect("step");
        assert_eq!(sim.history().real_at("income", 0).expect("recorded")[0], 2.5);
    }

    #[test]
    fn test_output_arity_checked() {
        let graph = FrameGraph::build(vec![
            Frame::function("joint", |ctx| Ok(vec![Values::Real(vec![1.0; ctx.count()])]))
                .output(OutputSpec::state("a"))
                .output(OutputSpec::state("b")),
        ])
        .expect("valid");
        let mut sim = Simulation::new(graph, SimulationConfig::default()).expect("sim");
        assert!(matches!(
            sim.step(),
            Err(FrameError::OutputArity { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_tracked_variable_rejected() {
        let config = SimulationConfig::default().track(["missing"]);
        assert!(matches!(
            Simulation::new(counter_graph(), config),
            Err(FrameError::UnknownVariable(name)) if name == "missing"
        ));
    }
}
