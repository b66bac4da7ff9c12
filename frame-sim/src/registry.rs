// Variable registry: every named vector the population holds

use std::collections::BTreeMap;

use crate::error::{FrameError, FrameResult};
use crate::frame::OutputSpec;
use crate::types::{BUILTINS, Scope, ValueKind, VarKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSpec {
    pub name: String,
    pub kind: VarKind,
    pub value_kind: ValueKind,
    pub scope: Scope,
}

impl From<&OutputSpec> for VarSpec {
    fn from(output: &OutputSpec) -> Self {
        Self {
            name: output.name.clone(),
            kind: output.kind,
            value_kind: output.value_kind,
            scope: output.scope,
        }
    }
}

/// Name → spec for every variable in a graph. Ordered so iteration is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRegistry {
    vars: BTreeMap<String, VarSpec>,
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableRegistry {
    /// A registry holding only the built-in age variables.
    pub fn new() -> Self {
        let vars = BUILTINS
            .iter()
            .map(|&name| {
                (
                    name.to_string(),
                    VarSpec {
                        name: name.to_string(),
                        kind: VarKind::Builtin,
                        value_kind: ValueKind::Index,
                        scope: Scope::Agent,
                    },
                )
            })
            .collect();
        Self { vars }
    }

    /// Add a variable. Re-registering an identical spec is a no-op; a
    /// conflicting one is a type error.
    pub fn register(&mut self, spec: VarSpec) -> FrameResult<()> {
        match self.vars.get(&spec.name) {
            Some(existing) if *existing == spec => Ok(()),
            Some(existing) => Err(FrameError::TypeMismatch {
                variable: spec.name,
                expected: existing.value_kind,
                actual: spec.value_kind,
            }),
            None => {
                self.vars.insert(spec.name.clone(), spec);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&VarSpec> {
        self.vars.get(name)
    }

    pub fn spec(&self, name: &str) -> FrameResult<&VarSpec> {
        self.get(name)
            .ok_or_else(|| FrameError::UnknownVariable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VarSpec> {
        self.vars.values()
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &VarSpec> {
        self.vars.values().filter(|v| v.scope == Scope::Aggregate)
    }

    /// Built-in or exogenous: always available, never produced by a frame.
    pub fn is_external(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|v| matches!(v.kind, VarKind::Builtin | VarKind::Exogenous))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{T_AGE, T_CYCLE};

    #[test]
    fn test_builtins_present() {
        let registry = VariableRegistry::new();
        assert!(registry.is_external(T_CYCLE));
        assert!(registry.is_external(T_AGE));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_conflicting_registration_fails() {
        let mut registry = VariableRegistry::new();
        registry
            .register(VarSpec::from(&OutputSpec::shock("Adjust").flag()))
            .expect("first");
        registry
            .register(VarSpec::from(&OutputSpec::shock("Adjust").flag()))
            .expect("identical");
        let err = registry.register(VarSpec::from(&OutputSpec::shock("Adjust")));
        assert!(matches!(err, Err(FrameError::TypeMismatch { .. })));
    }

    #[test]
    fn test_aggregates_filter() {
        let mut registry = VariableRegistry::new();
        registry
            .register(VarSpec::from(&OutputSpec::state("PlvlAgg").aggregate()))
            .expect("register");
        registry
            .register(VarSpec::from(&OutputSpec::state("pLvl")))
            .expect("register");
        let names: Vec<&str> = registry.aggregates().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["PlvlAgg"]);
    }
}
