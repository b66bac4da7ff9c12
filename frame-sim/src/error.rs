use thiserror::Error;

use crate::types::ValueKind;

/// Everything that can stop a frame simulation.
///
/// None of these are transient: they are configuration or programming
/// errors, so the driver halts on the first one and commits nothing for the
/// period in which it occurred.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    // === Graph construction ===
    #[error("cyclic same-period dependency between frames: {}", .frames.join(" -> "))]
    Cycle { frames: Vec<String> },

    #[error("frame `{frame}` reads `{variable}`, which no frame produces and which has no default")]
    UnresolvedInput { frame: String, variable: String },

    #[error("variable `{variable}` is produced by both `{first}` and `{second}`")]
    DuplicateOutput {
        variable: String,
        first: String,
        second: String,
    },

    #[error("shock frame `{frame}` depends on `{variable}`, a behavioral variable of the same period")]
    ShockAfterBehavior { frame: String, variable: String },

    #[error("frame `{frame}` declares a default for `{variable}`, which is not one of its outputs")]
    DefaultNotOutput { frame: String, variable: String },

    #[error("frame `{frame}` mixes per-agent and aggregate outputs")]
    MixedScope { frame: String },

    // === Birth ===
    #[error("newborns need a value for `{variable}` (read as previous by `{frame}`) but it has no default")]
    MissingDefault { variable: String, frame: String },

    // === Evaluation ===
    #[error("frame `{frame}` returned {actual} values for `{variable}`, expected {expected}")]
    ShapeMismatch {
        frame: String,
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("frame `{frame}` returned {actual} outputs, expected {expected}")]
    OutputArity {
        frame: String,
        expected: usize,
        actual: usize,
    },

    #[error("`{variable}` holds {actual:?} values, expected {expected:?}")]
    TypeMismatch {
        variable: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("frame `{frame}` produced a non-finite `{variable}` for agent {slot}")]
    NonFinite {
        frame: String,
        variable: String,
        slot: usize,
    },

    #[error("frame `{frame}` read `{variable}`, which is not among its declared inputs")]
    UndeclaredInput { frame: String, variable: String },

    #[error("`{variable}` has no value available to frame `{frame}`")]
    Unavailable { frame: String, variable: String },

    // === Lookup / configuration ===
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl FrameError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FrameError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type FrameResult<T> = Result<T, FrameError>;
