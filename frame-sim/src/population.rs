//! Vectorized population state.
//!
//! Every variable is one vector with an entry per agent slot (aggregates hold
//! a single entry). `state_prev` holds the last committed period plus the birth
//! values of newborns; `state_now`, `shocks` and `controls` are filled by frames
//! during the current period and folded into `state_prev` on commit.

use std::collections::BTreeMap;

use crate::distribution::SeedStream;
use crate::error::{FrameError, FrameResult};
use crate::frame::{BirthContext, DefaultValue, OutputSpec};
use crate::graph::FrameGraph;
use crate::registry::VariableRegistry;
use crate::types::{Age, Period, Scope, Slot, T_AGE, T_CYCLE, Timing, Values, VarKind};

#[derive(Debug, Clone, PartialEq)]
pub struct PopulationState {
    pub count: usize,
    pub alive: Vec<bool>,
    /// Slots respawned at the start of the current period.
    pub newborn: Vec<bool>,
    pub state_prev: BTreeMap<String, Values>,
    pub state_now: BTreeMap<String, Values>,
    pub shocks: BTreeMap<String, Values>,
    pub controls: BTreeMap<String, Values>,
    /// Values supplied from outside the graph; persist until replaced.
    pub exogenous: BTreeMap<String, Values>,
    builtins: BTreeMap<String, Values>,
}

impl PopulationState {
    /// A population whose every slot is waiting to be born.
    pub fn new(count: usize) -> Self {
        let builtins = [
            (T_CYCLE.to_string(), Values::Index(vec![0; count])),
            (T_AGE.to_string(), Values::Index(vec![0; count])),
        ]
        .into_iter()
        .collect();
        Self {
            count,
            alive: vec![false; count],
            newborn: vec![false; count],
            state_prev: BTreeMap::new(),
            state_now: BTreeMap::new(),
            shocks: BTreeMap::new(),
            controls: BTreeMap::new(),
            exogenous: BTreeMap::new(),
            builtins,
        }
    }

    pub fn t_cycle(&self) -> &[Age] {
        self.index_builtin(T_CYCLE)
    }

    pub fn t_age(&self) -> &[usize] {
        self.index_builtin(T_AGE)
    }

    fn index_builtin(&self, name: &str) -> &[usize] {
        self.builtins
            .get(name)
            .and_then(Values::as_index)
            .unwrap_or_default()
    }

    fn index_builtin_mut(&mut self, name: &str) -> &mut Vec<usize> {
        let count = self.count;
        let entry = self
            .builtins
            .entry(name.to_string())
            .or_insert_with(|| Values::Index(vec![0; count]));
        if !matches!(entry, Values::Index(_)) {
            *entry = Values::Index(vec![0; count]);
        }
        match entry {
            Values::Index(v) => v,
            _ => unreachable!("builtin reset to an index vector above"),
        }
    }

    pub fn newborn_slots(&self) -> Vec<Slot> {
        slots_where(&self.newborn)
    }

    // === PERIOD LIFECYCLE ===

    /// Clear everything produced during the previous period's evaluation.
    pub fn begin_period(&mut self) {
        self.state_now.clear();
        self.shocks.clear();
        self.controls.clear();
    }

    /// Mark the flagged slots dead. Returns how many died.
    pub fn kill(&mut self, dies: &[bool]) -> usize {
        let mut deaths = 0;
        for (alive, &dies) in self.alive.iter_mut().zip(dies) {
            if dies && *alive {
                *alive = false;
                deaths += 1;
            }
        }
        deaths
    }

    /// Revive every dead slot as a newborn with fresh ages.
    pub fn respawn(&mut self) -> Vec<Slot> {
        let born: Vec<Slot> = slots_where(&self.alive.iter().map(|a| !a).collect::<Vec<_>>());
        self.newborn = vec![false; self.count];
        for &slot in &born {
            self.alive[slot] = true;
            self.newborn[slot] = true;
        }
        for name in [T_CYCLE, T_AGE] {
            let ages = self.index_builtin_mut(name);
            for &slot in &born {
                ages[slot] = 0;
            }
        }
        born
    }

    /// Fold the current period into `state_prev`.
    ///
    /// Variables not produced this period keep their previous value.
    pub fn commit(&mut self) {
        let produced = std::mem::take(&mut self.state_now)
            .into_iter()
            .chain(std::mem::take(&mut self.shocks))
            .chain(std::mem::take(&mut self.controls));
        for (name, values) in produced {
            self.state_prev.insert(name, values);
        }
    }

    /// Age every agent by one period; `t_cycle` wraps at `cycle_len`.
    pub fn advance_ages(&mut self, cycle_len: usize) {
        let cycle_len = cycle_len.max(1);
        for age in self.index_builtin_mut(T_AGE).iter_mut() {
            *age += 1;
        }
        for t in self.index_builtin_mut(T_CYCLE).iter_mut() {
            *t = (*t + 1) % cycle_len;
        }
    }

    // === BIRTH VALUES ===

    /// Initialize every per-agent variable with a default for the given
    /// newborn slots, before any frame runs this period.
    ///
    /// Values land in `state_prev`: to a newborn, the birth value is the
    /// previous state it starts from.
    pub fn inject_birth_values(
        &mut self,
        slots: &[Slot],
        graph: &FrameGraph,
        seeds: &mut SeedStream,
        period: Period,
    ) -> FrameResult<()> {
        if slots.is_empty() {
            return Ok(());
        }
        for (output, default) in graph.defaults() {
            if output.scope == Scope::Aggregate {
                continue;
            }
            // One seed per variable and batch; each slot draws from its own
            // key so a newborn's value ignores who else is born.
            let base = seeds.next_seed();
            let mut values = Values::filled(output.value_kind, slots.len());
            for (i, &slot) in slots.iter().enumerate() {
                let seed = SeedStream::keyed(base, slot as u64);
                let one = self.birth_values(
                    graph.registry(),
                    output,
                    default,
                    Some(slot),
                    seed,
                    period,
                )?;
                check_birth_shape(graph, output, &one, 1).map_err(|err| match err {
                    FrameError::NonFinite { frame, variable, .. } => FrameError::NonFinite {
                        frame,
                        variable,
                        slot,
                    },
                    err => err,
                })?;
                values
                    .scatter(&[i], &one)
                    .map_err(|actual| FrameError::TypeMismatch {
                        variable: output.name.clone(),
                        expected: output.value_kind,
                        actual,
                    })?;
            }

            let count = self.count;
            self.state_prev
                .entry(output.name.clone())
                .or_insert_with(|| Values::filled(output.value_kind, count))
                .scatter(slots, &values)
                .map_err(|actual| FrameError::TypeMismatch {
                    variable: output.name.clone(),
                    expected: output.value_kind,
                    actual,
                })?;
        }
        Ok(())
    }

    /// Give every aggregate with a default its initial value, once.
    pub fn init_aggregates(
        &mut self,
        graph: &FrameGraph,
        seeds: &mut SeedStream,
        period: Period,
    ) -> FrameResult<()> {
        for (output, default) in graph.defaults() {
            if output.scope != Scope::Aggregate || self.state_prev.contains_key(&output.name) {
                continue;
            }
            let values = self.birth_values(
                graph.registry(),
                output,
                default,
                None,
                seeds.next_seed(),
                period,
            )?;
            check_birth_shape(graph, output, &values, 1)?;
            self.state_prev.insert(output.name.clone(), values);
        }
        Ok(())
    }

    fn birth_values(
        &self,
        registry: &VariableRegistry,
        output: &OutputSpec,
        default: &DefaultValue,
        slot: Option<Slot>,
        seed: u64,
        period: Period,
    ) -> FrameResult<Values> {
        match default {
            DefaultValue::Constant(x) => {
                if x.kind() != output.value_kind {
                    return Err(FrameError::TypeMismatch {
                        variable: output.name.clone(),
                        expected: output.value_kind,
                        actual: x.kind(),
                    });
                }
                Ok(x.repeat(1))
            }
            DefaultValue::Provider(f) => {
                let lookup = |name: &str| {
                    registry
                        .get(name)
                        .filter(|spec| spec.scope == Scope::Aggregate)
                        .and_then(|_| self.state_prev.get(name))
                        .and_then(Values::as_real)
                        .and_then(|v| v.first().copied())
                };
                let ctx = BirthContext {
                    count: 1,
                    slot,
                    period,
                    seed,
                    aggregate: &lookup,
                };
                f(&ctx)
            }
        }
    }

    // === READ / WRITE ===

    /// Value of `name` as seen from the given snapshot.
    ///
    /// Built-in and exogenous variables read the same either way. A current
    /// read of a variable nothing has produced yet this period falls back to
    /// its carried value.
    pub fn read(&self, name: &str, timing: Timing) -> Option<&Values> {
        if let Some(values) = self.builtins.get(name).or_else(|| self.exogenous.get(name)) {
            return Some(values);
        }
        match timing {
            Timing::Prev => self.state_prev.get(name),
            Timing::Now => self.current(name).or_else(|| self.state_prev.get(name)),
        }
    }

    /// Produced during the current period.
    pub fn current(&self, name: &str) -> Option<&Values> {
        self.state_now
            .get(name)
            .or_else(|| self.controls.get(name))
            .or_else(|| self.shocks.get(name))
    }

    /// Last committed value (or a built-in/exogenous vector).
    pub fn committed(&self, name: &str) -> Option<&Values> {
        self.read(name, Timing::Prev)
    }

    /// Store a frame output in the map its kind belongs to.
    pub fn write(&mut self, output: &OutputSpec, values: Values) {
        let target = match output.kind {
            VarKind::Control => &mut self.controls,
            VarKind::Shock => &mut self.shocks,
            VarKind::State | VarKind::Exogenous | VarKind::Builtin => &mut self.state_now,
        };
        target.insert(output.name.clone(), values);
    }

    pub fn supply(&mut self, name: &str, values: Values) -> FrameResult<()> {
        if values.len() != self.count {
            return Err(FrameError::ShapeMismatch {
                frame: "<exogenous>".to_string(),
                variable: name.to_string(),
                expected: self.count,
                actual: values.len(),
            });
        }
        self.exogenous.insert(name.to_string(), values);
        Ok(())
    }
}

fn check_birth_shape(
    graph: &FrameGraph,
    output: &OutputSpec,
    values: &Values,
    expected: usize,
) -> FrameResult<()> {
    let frame = || {
        graph
            .producer_of(&output.name)
            .map_or_else(String::new, |f| f.name.clone())
    };
    if values.len() != expected {
        return Err(FrameError::ShapeMismatch {
            frame: frame(),
            variable: output.name.clone(),
            expected,
            actual: values.len(),
        });
    }
    if values.kind() != output.value_kind {
        return Err(FrameError::TypeMismatch {
            variable: output.name.clone(),
            expected: output.value_kind,
            actual: values.kind(),
        });
    }
    if let Some(slot) = values.first_non_finite() {
        return Err(FrameError::NonFinite {
            frame: frame(),
            variable: output.name.clone(),
            slot,
        });
    }
    Ok(())
}

fn slots_where(mask: &[bool]) -> Vec<Slot> {
    mask.iter()
        .enumerate()
        .filter_map(|(slot, &set)| set.then_some(slot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;
    use crate::frame::{Frame, InputRef};

    fn graph() -> FrameGraph {
        FrameGraph::build(vec![
            Frame::function("agg", |ctx| Ok(vec![Values::Real(vec![ctx.scalar("PlvlAgg")?])]))
                .input(InputRef::prev("PlvlAgg"))
                .output(OutputSpec::state("PlvlAgg").aggregate())
                .default_value("PlvlAgg", 2.0),
            Frame::function("level", |ctx| Ok(vec![ctx.input("pLvl")?.clone()]))
                .input(InputRef::prev("pLvl"))
                .output(OutputSpec::state("pLvl"))
                .default_provider("pLvl", |birth| {
                    let agg = birth.aggregate("PlvlAgg")?;
                    Ok(Values::Real(vec![agg; birth.count()]))
                }),
            Frame::function("flag", |ctx| Ok(vec![Values::Flag(vec![true; ctx.count()])]))
                .output(OutputSpec::shock("Adjust").flag())
                .default_value("Adjust", false),
        ])
        .expect("valid graph")
    }

    #[test]
    fn test_birth_completeness_for_every_newborn_count() {
        let graph = graph();
        let n = 6;
        for newborns in 0..=n {
            let mut pop = PopulationState::new(n);
            let mut seeds = SeedStream::new(1);
            pop.init_aggregates(&graph, &mut seeds, 0).expect("aggregates");

            // Everyone born once, then `newborns` slots die and respawn.
            let all = pop.respawn();
            pop.inject_birth_values(&all, &graph, &mut seeds, 0)
                .expect("initial births");
            let dies: Vec<bool> = (0..n).map(|slot| slot < newborns).collect();
            assert_eq!(pop.kill(&dies), newborns);
            let born = pop.respawn();
            assert_eq!(born.len(), newborns);
            pop.inject_birth_values(&born, &graph, &mut seeds, 1)
                .expect("births");

            let levels = pop.state_prev["pLvl"].as_real().expect("real");
            assert!(born.iter().all(|&slot| levels[slot] == 2.0));
            assert_eq!(pop.state_prev["Adjust"], Values::Flag(vec![false; n]));
            assert!(pop.alive.iter().all(|&a| a));
        }
    }

    #[test]
    fn test_birth_draw_ignores_other_newborns() {
        let graph = FrameGraph::build(vec![
            Frame::function("u", |ctx| Ok(vec![ctx.input("u")?.clone()]))
                .input(InputRef::prev("u"))
                .output(OutputSpec::state("u"))
                .default_provider("u", |birth| {
                    Distribution::Uniform { bot: 0.0, top: 1.0 }.draw(birth.count(), birth.seed())
                }),
        ])
        .expect("valid graph");

        let mut everyone = PopulationState::new(4);
        let born = everyone.respawn();
        everyone
            .inject_birth_values(&born, &graph, &mut SeedStream::new(5), 0)
            .expect("births");

        let mut one = PopulationState::new(4);
        one.respawn();
        one.kill(&[false, false, false, true]);
        assert_eq!(one.respawn(), vec![3]);
        one.inject_birth_values(&[3], &graph, &mut SeedStream::new(5), 0)
            .expect("births");

        let all = everyone.state_prev["u"].as_real().expect("real");
        let single = one.state_prev["u"].as_real().expect("real");
        assert_eq!(all[3], single[3]);
        assert_ne!(all[2], all[3]);
    }

    #[test]
    fn test_aggregates_initialized_once() {
        let graph = graph();
        let mut pop = PopulationState::new(3);
        let mut seeds = SeedStream::new(1);
        pop.init_aggregates(&graph, &mut seeds, 0).expect("init");
        assert_eq!(pop.state_prev["PlvlAgg"], Values::Real(vec![2.0]));

        pop.state_prev
            .insert("PlvlAgg".to_string(), Values::Real(vec![5.0]));
        pop.init_aggregates(&graph, &mut seeds, 1).expect("init");
        assert_eq!(pop.state_prev["PlvlAgg"], Values::Real(vec![5.0]));
    }

    #[test]
    fn test_commit_carries_unproduced_variables() {
        let mut pop = PopulationState::new(2);
        pop.state_prev
            .insert("birth_only".to_string(), Values::Real(vec![1.0, 2.0]));
        pop.write(&OutputSpec::control("cNrm"), Values::Real(vec![0.5, 0.5]));
        pop.write(&OutputSpec::shock("Risky"), Values::Real(vec![1.1, 0.9]));

        assert!(pop.current("cNrm").is_some());
        assert!(pop.read("cNrm", Timing::Prev).is_none());
        pop.commit();

        assert!(pop.controls.is_empty() && pop.shocks.is_empty() && pop.state_now.is_empty());
        assert_eq!(pop.committed("cNrm"), Some(&Values::Real(vec![0.5, 0.5])));
        assert_eq!(pop.committed("birth_only"), Some(&Values::Real(vec![1.0, 2.0])));
    }

    #[test]
    fn test_ages_wrap_and_reset_at_birth() {
        let mut pop = PopulationState::new(2);
        pop.respawn();
        pop.advance_ages(2);
        assert_eq!(pop.t_cycle(), &[1, 1]);
        pop.advance_ages(2);
        assert_eq!(pop.t_cycle(), &[0, 0]);
        assert_eq!(pop.t_age(), &[2, 2]);

        pop.kill(&[false, true]);
        assert_eq!(pop.respawn(), vec![1]);
        assert_eq!(pop.t_age(), &[2, 0]);
        assert_eq!(pop.newborn, vec![false, true]);
    }

    #[test]
    fn test_supply_checks_length() {
        let mut pop = PopulationState::new(3);
        assert!(pop.supply("wage", Values::Real(vec![1.0; 3])).is_ok());
        assert!(matches!(
            pop.supply("wage", Values::Real(vec![1.0; 2])),
            Err(FrameError::ShapeMismatch { .. })
        ));
        assert_eq!(pop.read("wage", Timing::Now), pop.read("wage", Timing::Prev));
    }
}
