// Frame-based state-transition engine for populations of consumer agents.
//
// A model is a list of `Frame`s (outputs, inputs, birth defaults, transition).
// `FrameGraph` validates and orders them; `Simulation` steps a vectorized
// `PopulationState` through the ordered frames one period at a time.

pub mod consumer;
pub mod dispatch;
pub mod distribution;
mod error;
pub mod frame;
pub mod graph;
pub mod history;
pub mod mortality;
pub mod params;
pub mod policy;
pub mod population;
pub mod registry;
pub mod simulation;
mod types;

pub use consumer::PortfolioConsumer;
pub use distribution::{Distribution, IndexDistribution, SeedStream};
pub use error::*;
pub use frame::{
    BirthContext, DefaultValue, Frame, FrameContext, InputRef, OutputSpec, Transition,
};
pub use graph::{FrameGraph, FrameId, GraphBuilder};
pub use history::History;
pub use params::{PortfolioParams, SimulationConfig};
pub use policy::{PortfolioPolicy, PortfolioSolution, RuleOfThumbPolicy};
pub use population::PopulationState;
pub use registry::{VarSpec, VariableRegistry};
pub use simulation::{PeriodSummary, Simulation};
pub use types::*;

#[cfg(feature = "instrument")]
pub use instrument;
