//! Per-period record of committed values.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::{FrameError, FrameResult};
use crate::population::PopulationState;
use crate::registry::VariableRegistry;
use crate::types::{Period, Values};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    tracked: BTreeSet<String>,
    records: BTreeMap<String, Vec<Values>>,
    periods: usize,
}

impl History {
    /// Track the named variables. Aggregates are always tracked.
    pub fn new<S: Into<String>>(tracked: impl IntoIterator<Item = S>) -> Self {
        Self {
            tracked: tracked.into_iter().map(Into::into).collect(),
            records: BTreeMap::new(),
            periods: 0,
        }
    }

    /// Snapshot the committed state. Called once per period, after commit.
    pub fn record(&mut self, population: &PopulationState, registry: &VariableRegistry) {
        let names: BTreeSet<&str> = self
            .tracked
            .iter()
            .map(String::as_str)
            .chain(registry.aggregates().map(|v| v.name.as_str()))
            .collect();
        for name in names {
            if let Some(values) = population.committed(name) {
                let series = self.records.entry(name.to_string()).or_default();
                // Variables that first appear late are padded so indices line up.
                while series.len() < self.periods {
                    series.push(Values::filled(values.kind(), values.len()));
                }
                series.push(values.clone());
            }
        }
        self.periods += 1;
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Full series for a variable, one entry per recorded period.
    pub fn get(&self, name: &str) -> FrameResult<&[Values]> {
        self.records
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| FrameError::UnknownVariable(name.to_string()))
    }

    pub fn at(&self, name: &str, period: Period) -> FrameResult<&Values> {
        let series = self.get(name)?;
        usize::try_from(period)
            .ok()
            .and_then(|p| series.get(p))
            .ok_or_else(|| FrameError::invalid("period", format!("{period} was not recorded")))
    }

    pub fn real_at(&self, name: &str, period: Period) -> FrameResult<&[f64]> {
        let values = self.at(name, period)?;
        values.as_real().ok_or_else(|| FrameError::TypeMismatch {
            variable: name.to_string(),
            expected: crate::types::ValueKind::Real,
            actual: values.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OutputSpec;
    use crate::registry::VarSpec;

    #[test]
    fn test_records_tracked_and_aggregates() {
        let mut registry = VariableRegistry::new();
        registry
            .register(VarSpec::from(&OutputSpec::state("PlvlAgg").aggregate()))
            .expect("register");

        let mut pop = PopulationState::new(2);
        pop.state_prev
            .insert("mNrm".to_string(), Values::Real(vec![1.0, 2.0]));
        pop.state_prev
            .insert("cNrm".to_string(), Values::Real(vec![0.5, 0.5]));
        pop.state_prev
            .insert("PlvlAgg".to_string(), Values::Real(vec![1.0]));

        let mut history = History::new(["mNrm"]);
        history.record(&pop, &registry);
        pop.state_prev
            .insert("mNrm".to_string(), Values::Real(vec![3.0, 4.0]));
        history.record(&pop, &registry);

        assert_eq!(history.periods(), 2);
        assert_eq!(history.real_at("mNrm", 1).expect("recorded"), &[3.0, 4.0]);
        assert_eq!(history.real_at("PlvlAgg", 0).expect("aggregate"), &[1.0]);
        assert!(matches!(history.get("cNrm"), Err(FrameError::UnknownVariable(_))));
        assert!(history.at("mNrm", 2).is_err());
    }

    #[test]
    fn test_late_variable_is_padded() {
        let registry = VariableRegistry::new();
        let mut pop = PopulationState::new(1);
        let mut history = History::new(["aNrm"]);
        history.record(&pop, &registry);

        pop.state_prev
            .insert("aNrm".to_string(), Values::Real(vec![0.2]));
        history.record(&pop, &registry);

        let series = history.get("aNrm").expect("tracked");
        assert_eq!(series.len(), 2);
        assert!(series[0].as_real().expect("real")[0].is_nan());
    }
}
