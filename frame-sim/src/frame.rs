//! Frames: the declarative unit of the transition graph.
//!
//! A frame names the variables it produces, the variables it reads (and from
//! which snapshot), optional birth values for some of its outputs, and the
//! transition that computes the outputs. Frames are plain data so a graph can
//! be validated and reordered without evaluating any of them.

use std::fmt;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::distribution::IndexDistribution;
use crate::error::{FrameError, FrameResult};
use crate::types::{Period, Scalar, Scope, Slot, Timing, ValueKind, Values, VarKind};

// === DECLARATIONS ===

/// A variable a frame produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
    pub kind: VarKind,
    pub value_kind: ValueKind,
    pub scope: Scope,
}

impl OutputSpec {
    fn new(name: impl Into<String>, kind: VarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value_kind: ValueKind::Real,
            scope: Scope::Agent,
        }
    }

    pub fn state(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::State)
    }

    pub fn control(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::Control)
    }

    pub fn shock(name: impl Into<String>) -> Self {
        Self::new(name, VarKind::Shock)
    }

    /// Boolean-valued instead of real-valued.
    pub fn flag(mut self) -> Self {
        self.value_kind = ValueKind::Flag;
        self
    }

    /// One process-wide value instead of one per agent.
    pub fn aggregate(mut self) -> Self {
        self.scope = Scope::Aggregate;
        self
    }
}

/// A variable a frame reads, and from which snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRef {
    pub name: String,
    pub timing: Timing,
}

impl InputRef {
    pub fn prev(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timing: Timing::Prev,
        }
    }

    pub fn now(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timing: Timing::Now,
        }
    }
}

// === BIRTH VALUES ===

pub type BirthFn = dyn Fn(&BirthContext<'_>) -> FrameResult<Values> + Send + Sync;

/// How a newborn's value for a variable is initialized.
#[derive(Clone)]
pub enum DefaultValue {
    Constant(Scalar),
    /// Must return `count()` values: one per newborn slot, one for an aggregate.
    Provider(Arc<BirthFn>),
}

impl DefaultValue {
    pub fn provider(
        f: impl Fn(&BirthContext<'_>) -> FrameResult<Values> + Send + Sync + 'static,
    ) -> Self {
        DefaultValue::Provider(Arc::new(f))
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Constant(x) => f.debug_tuple("Constant").field(x).finish(),
            DefaultValue::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// What a birth provider may see: the newborn count, the committed aggregate
/// state at the moment of birth, and a seed from the birth stream.
///
/// Per-agent providers are called once per newborn slot with `count() == 1`
/// and a seed keyed by that slot, so a newborn's value does not depend on
/// which other slots are born with it.
pub struct BirthContext<'a> {
    pub(crate) count: usize,
    pub(crate) slot: Option<Slot>,
    pub(crate) period: Period,
    pub(crate) seed: u64,
    pub(crate) aggregate: &'a dyn Fn(&str) -> Option<f64>,
}

impl BirthContext<'_> {
    pub fn count(&self) -> usize {
        self.count
    }

    /// The newborn's slot; `None` when initializing an aggregate.
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    /// Current value of an aggregate variable.
    pub fn aggregate(&self, name: &str) -> FrameResult<f64> {
        (self.aggregate)(name).ok_or_else(|| FrameError::UnknownVariable(name.to_string()))
    }
}

// === TRANSITIONS ===

pub type TransitionFn = dyn Fn(&FrameContext<'_>) -> FrameResult<Vec<Values>> + Send + Sync;

#[derive(Clone)]
pub enum Transition {
    /// Vectorized function over the declared inputs, one vector per output.
    Function(Arc<TransitionFn>),
    /// Single-output draw conditioned on each agent's `t_cycle`.
    Draw(IndexDistribution),
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Function(_) => f.write_str("Function(..)"),
            Transition::Draw(dist) => f.debug_tuple("Draw").field(dist).finish(),
        }
    }
}

/// Read-only view handed to a transition: only the declared inputs.
pub struct FrameContext<'a> {
    pub(crate) frame: &'a str,
    pub(crate) inputs: Vec<(&'a InputRef, &'a Values)>,
    pub(crate) count: usize,
    pub(crate) period: Period,
    pub(crate) seed: u64,
}

impl<'a> FrameContext<'a> {
    pub fn frame(&self) -> &str {
        self.frame
    }

    /// Expected length of every output.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Generator for draws made inside the transition.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// A declared input. Reading anything else is an error.
    pub fn input(&self, name: &str) -> FrameResult<&'a Values> {
        self.inputs
            .iter()
            .find(|(input, _)| input.name == name)
            .map(|(_, values)| *values)
            .ok_or_else(|| FrameError::UndeclaredInput {
                frame: self.frame.to_string(),
                variable: name.to_string(),
            })
    }

    /// A declared input read from a specific snapshot.
    pub fn input_at(&self, name: &str, timing: Timing) -> FrameResult<&'a Values> {
        self.inputs
            .iter()
            .find(|(input, _)| input.name == name && input.timing == timing)
            .map(|(_, values)| *values)
            .ok_or_else(|| FrameError::UndeclaredInput {
                frame: self.frame.to_string(),
                variable: name.to_string(),
            })
    }

    pub fn real(&self, name: &str) -> FrameResult<&'a [f64]> {
        let values = self.input(name)?;
        values.as_real().ok_or_else(|| mismatch(name, ValueKind::Real, values))
    }

    pub fn flags(&self, name: &str) -> FrameResult<&'a [bool]> {
        let values = self.input(name)?;
        values.as_flags().ok_or_else(|| mismatch(name, ValueKind::Flag, values))
    }

    pub fn index(&self, name: &str) -> FrameResult<&'a [usize]> {
        let values = self.input(name)?;
        values.as_index().ok_or_else(|| mismatch(name, ValueKind::Index, values))
    }

    /// The single value of an aggregate input.
    pub fn scalar(&self, name: &str) -> FrameResult<f64> {
        let values = self.real(name)?;
        values.first().copied().ok_or_else(|| FrameError::Unavailable {
            frame: self.frame.to_string(),
            variable: name.to_string(),
        })
    }
}

fn mismatch(name: &str, expected: ValueKind, found: &Values) -> FrameError {
    FrameError::TypeMismatch {
        variable: name.to_string(),
        expected,
        actual: found.kind(),
    }
}

// === FRAME ===

#[derive(Debug, Clone)]
pub struct Frame {
    pub name: String,
    pub outputs: Vec<OutputSpec>,
    /// Empty for exogenous frames.
    pub inputs: Vec<InputRef>,
    pub defaults: Vec<(String, DefaultValue)>,
    pub transition: Transition,
}

impl Frame {
    pub fn function(
        name: impl Into<String>,
        f: impl Fn(&FrameContext<'_>) -> FrameResult<Vec<Values>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            defaults: Vec::new(),
            transition: Transition::Function(Arc::new(f)),
        }
    }

    pub fn draw(name: impl Into<String>, dist: IndexDistribution) -> Self {
        Self {
            name: name.into(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            defaults: Vec::new(),
            transition: Transition::Draw(dist),
        }
    }

    pub fn output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn input(mut self, input: InputRef) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn default_value(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.defaults
            .push((name.into(), DefaultValue::Constant(value.into())));
        self
    }

    pub fn default_provider(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&BirthContext<'_>) -> FrameResult<Values> + Send + Sync + 'static,
    ) -> Self {
        self.defaults.push((name.into(), DefaultValue::provider(f)));
        self
    }

    pub fn is_exogenous(&self) -> bool {
        self.inputs.is_empty()
    }

    /// All outputs are shocks.
    pub fn is_shock(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|o| o.kind == VarKind::Shock)
    }

    /// Scope shared by every output, or `None` if they disagree.
    pub fn scope(&self) -> Option<Scope> {
        let first = self.outputs.first().map_or(Scope::Agent, |o| o.scope);
        self.outputs
            .iter()
            .all(|o| o.scope == first)
            .then_some(first)
    }

    pub fn produces(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o.name == name)
    }

    pub fn default_for(&self, name: &str) -> Option<&DefaultValue> {
        self.defaults
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }
}
