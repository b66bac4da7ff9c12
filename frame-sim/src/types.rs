// Core value types and type aliases

use serde::{Deserialize, Serialize};

// === TYPE ALIASES ===

/// Position of an agent in every population vector.
pub type Slot = usize;
/// Period index within the agent's cycle (`t_cycle`).
pub type Age = usize;
/// Simulation period counter.
pub type Period = u64;

// === BUILT-IN VARIABLES ===

/// Age index of each agent within the cycle. Maintained by the population.
pub const T_CYCLE: &str = "t_cycle";
/// Periods lived by each agent since birth. Maintained by the population.
pub const T_AGE: &str = "t_age";

pub const BUILTINS: [&str; 2] = [T_CYCLE, T_AGE];

// === KINDS ===

/// Where a variable lives in the population state.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum VarKind {
    State,
    Control,
    Shock,
    /// Supplied from outside the graph, never produced by a frame.
    Exogenous,
    /// `t_cycle` / `t_age`.
    Builtin,
}

/// Per-agent vector or a single process-wide value.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Scope {
    #[default]
    Agent,
    Aggregate,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    Real,
    Flag,
    Index,
}

/// Which snapshot an input is read from.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Timing {
    /// Committed value from the previous period (or the birth value).
    Prev,
    /// Value already produced this period.
    Now,
}

// === VALUES ===

/// A single value, used for constant defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Real(f64),
    Flag(bool),
    Index(usize),
}

impl Scalar {
    pub fn kind(self) -> ValueKind {
        match self {
            Scalar::Real(_) => ValueKind::Real,
            Scalar::Flag(_) => ValueKind::Flag,
            Scalar::Index(_) => ValueKind::Index,
        }
    }

    pub fn repeat(self, len: usize) -> Values {
        match self {
            Scalar::Real(x) => Values::Real(vec![x; len]),
            Scalar::Flag(x) => Values::Flag(vec![x; len]),
            Scalar::Index(x) => Values::Index(vec![x; len]),
        }
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Real(x)
    }
}

impl From<bool> for Scalar {
    fn from(x: bool) -> Self {
        Scalar::Flag(x)
    }
}

impl From<usize> for Scalar {
    fn from(x: usize) -> Self {
        Scalar::Index(x)
    }
}

/// One variable across the population (length 1 for aggregates).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Values {
    Real(Vec<f64>),
    Flag(Vec<bool>),
    Index(Vec<usize>),
}

impl Values {
    /// Placeholder vector: NaN, `false` or 0 depending on kind.
    pub fn filled(kind: ValueKind, len: usize) -> Self {
        match kind {
            ValueKind::Real => Values::Real(vec![f64::NAN; len]),
            ValueKind::Flag => Values::Flag(vec![false; len]),
            ValueKind::Index => Values::Index(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Real(v) => v.len(),
            Values::Flag(v) => v.len(),
            Values::Index(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Values::Real(_) => ValueKind::Real,
            Values::Flag(_) => ValueKind::Flag,
            Values::Index(_) => ValueKind::Index,
        }
    }

    pub fn as_real(&self) -> Option<&[f64]> {
        match self {
            Values::Real(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_flags(&self) -> Option<&[bool]> {
        match self {
            Values::Flag(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<&[usize]> {
        match self {
            Values::Index(v) => Some(v),
            _ => None,
        }
    }

    /// Write `src[i]` into position `slots[i]`.
    ///
    /// Fails with the kind of `src` if it differs from ours. `src` must hold
    /// exactly one entry per slot.
    pub fn scatter(&mut self, slots: &[Slot], src: &Values) -> Result<(), ValueKind> {
        debug_assert_eq!(slots.len(), src.len());
        match (self, src) {
            (Values::Real(dst), Values::Real(src)) => put(dst, slots, src),
            (Values::Flag(dst), Values::Flag(src)) => put(dst, slots, src),
            (Values::Index(dst), Values::Index(src)) => put(dst, slots, src),
            (_, src) => return Err(src.kind()),
        }
        Ok(())
    }

    /// First slot holding NaN or an infinity. Only real vectors can fail.
    pub fn first_non_finite(&self) -> Option<Slot> {
        self.as_real()?.iter().position(|x| !x.is_finite())
    }
}

fn put<T: Copy>(dst: &mut [T], slots: &[Slot], src: &[T]) {
    for (&slot, &value) in slots.iter().zip(src) {
        dst[slot] = value;
    }
}
