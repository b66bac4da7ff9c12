//! Frame graph construction and scheduling.
//!
//! Nodes are frames; an edge `G → F` exists when `F` reads a variable that `G`
//! produces *in the same period*. Reads of the previous period never create
//! edges. The schedule is Kahn's algorithm with two tie-breakers: shock frames
//! before behavioral frames, then declaration order, so the result is fully
//! deterministic.

use std::collections::{BTreeMap, BTreeSet};

use slotmap::{SecondaryMap, SlotMap, new_key_type};

use crate::error::{FrameError, FrameResult};
use crate::frame::{DefaultValue, Frame, InputRef, OutputSpec};
use crate::registry::{VarSpec, VariableRegistry};
use crate::types::{Scope, Timing, ValueKind, VarKind};

new_key_type! {
    pub struct FrameId;
}

/// Collects frames and exogenous variables before validation.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    frames: Vec<Frame>,
    exogenous: Vec<VarSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn frames(mut self, frames: impl IntoIterator<Item = Frame>) -> Self {
        self.frames.extend(frames);
        self
    }

    /// Declare a per-agent variable supplied from outside the graph.
    pub fn exogenous(mut self, name: impl Into<String>, value_kind: ValueKind) -> Self {
        self.exogenous.push(VarSpec {
            name: name.into(),
            kind: VarKind::Exogenous,
            value_kind,
            scope: Scope::Agent,
        });
        self
    }

    pub fn build(self) -> FrameResult<FrameGraph> {
        let mut registry = VariableRegistry::new();
        for spec in self.exogenous {
            registry.register(spec)?;
        }

        // Register frames and their outputs.
        let mut frames: SlotMap<FrameId, Frame> = SlotMap::with_key();
        let mut declared: Vec<FrameId> = Vec::new();
        let mut producers: BTreeMap<String, FrameId> = BTreeMap::new();

        for frame in self.frames {
            if frame.scope().is_none() {
                return Err(FrameError::MixedScope { frame: frame.name });
            }
            if let Some((name, _)) = frame.defaults.iter().find(|(n, _)| !frame.produces(n)) {
                return Err(FrameError::DefaultNotOutput {
                    frame: frame.name.clone(),
                    variable: name.clone(),
                });
            }
            for (i, output) in frame.outputs.iter().enumerate() {
                if frame.outputs[..i].iter().any(|o| o.name == output.name) {
                    return Err(FrameError::DuplicateOutput {
                        variable: output.name.clone(),
                        first: frame.name.clone(),
                        second: frame.name.clone(),
                    });
                }
                if registry.is_external(&output.name) {
                    return Err(FrameError::DuplicateOutput {
                        variable: output.name.clone(),
                        first: "<external>".to_string(),
                        second: frame.name.clone(),
                    });
                }
                if let Some(&other) = producers.get(&output.name) {
                    return Err(FrameError::DuplicateOutput {
                        variable: output.name.clone(),
                        first: frames[other].name.clone(),
                        second: frame.name.clone(),
                    });
                }
                registry.register(VarSpec::from(output))?;
            }

            let id = frames.insert(frame);
            for output in &frames[id].outputs {
                producers.insert(output.name.clone(), id);
            }
            declared.push(id);
        }

        // Same-period edges.
        let mut upstream: SecondaryMap<FrameId, Vec<FrameId>> = SecondaryMap::new();
        let mut downstream: SecondaryMap<FrameId, Vec<FrameId>> = SecondaryMap::new();
        for &id in &declared {
            upstream.insert(id, Vec::new());
            downstream.insert(id, Vec::new());
        }

        for &id in &declared {
            let frame = &frames[id];
            for input in &frame.inputs {
                if registry.is_external(&input.name) {
                    continue;
                }
                let Some(&producer) = producers.get(&input.name) else {
                    return Err(FrameError::UnresolvedInput {
                        frame: frame.name.clone(),
                        variable: input.name.clone(),
                    });
                };
                if input.timing == Timing::Prev {
                    continue;
                }
                if producer == id {
                    return Err(FrameError::Cycle {
                        frames: vec![frame.name.clone()],
                    });
                }
                if frame.is_shock() && !frames[producer].is_shock() {
                    return Err(FrameError::ShockAfterBehavior {
                        frame: frame.name.clone(),
                        variable: input.name.clone(),
                    });
                }
                if !upstream[id].contains(&producer) {
                    upstream[id].push(producer);
                    downstream[producer].push(id);
                }
            }
        }

        let order = schedule(&frames, &declared, &upstream, &downstream)?;

        Ok(FrameGraph {
            frames,
            order,
            registry,
            producers,
        })
    }
}

/// Kahn's algorithm over the declared frames.
fn schedule(
    frames: &SlotMap<FrameId, Frame>,
    declared: &[FrameId],
    upstream: &SecondaryMap<FrameId, Vec<FrameId>>,
    downstream: &SecondaryMap<FrameId, Vec<FrameId>>,
) -> FrameResult<Vec<FrameId>> {
    let mut position: SecondaryMap<FrameId, usize> = SecondaryMap::new();
    let mut pending: SecondaryMap<FrameId, usize> = SecondaryMap::new();
    for (i, &id) in declared.iter().enumerate() {
        position.insert(id, i);
        pending.insert(id, upstream[id].len());
    }

    // Behavioral frames sort after shocks; declaration order breaks ties.
    let key = |id: FrameId| (!frames[id].is_shock(), position[id]);
    let mut ready: BTreeSet<(bool, usize)> = declared
        .iter()
        .filter(|&&id| pending[id] == 0)
        .map(|&id| key(id))
        .collect();

    let mut order = Vec::with_capacity(declared.len());
    while let Some((_, i)) = ready.pop_first() {
        let id = declared[i];
        order.push(id);
        for &next in &downstream[id] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert(key(next));
            }
        }
    }

    if order.len() == declared.len() {
        return Ok(order);
    }

    Err(FrameError::Cycle {
        frames: find_cycle(frames, declared, upstream, &pending),
    })
}

/// Names of one cycle among the unscheduled frames, producers first.
///
/// Every unscheduled frame still waits on another unscheduled frame, so
/// walking upstream from any of them must revisit a frame.
fn find_cycle(
    frames: &SlotMap<FrameId, Frame>,
    declared: &[FrameId],
    upstream: &SecondaryMap<FrameId, Vec<FrameId>>,
    pending: &SecondaryMap<FrameId, usize>,
) -> Vec<String> {
    let stuck = |id: FrameId| pending[id] > 0;
    let Some(&start) = declared.iter().find(|&&id| stuck(id)) else {
        return Vec::new();
    };

    let mut path: Vec<FrameId> = vec![start];
    let mut current = start;
    loop {
        let Some(&prev) = upstream[current].iter().find(|&&id| stuck(id)) else {
            break;
        };
        if let Some(at) = path.iter().position(|&id| id == prev) {
            path.drain(..at);
            break;
        }
        path.push(prev);
        current = prev;
    }

    path.reverse();
    path.into_iter().map(|id| frames[id].name.clone()).collect()
}

/// A validated, ordered collection of frames.
#[derive(Debug, Clone)]
pub struct FrameGraph {
    frames: SlotMap<FrameId, Frame>,
    order: Vec<FrameId>,
    registry: VariableRegistry,
    producers: BTreeMap<String, FrameId>,
}

impl FrameGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn build(frames: impl IntoIterator<Item = Frame>) -> FrameResult<Self> {
        GraphBuilder::new().frames(frames).build()
    }

    /// Frames in evaluation order.
    pub fn order(&self) -> impl Iterator<Item = &Frame> {
        self.order.iter().map(|&id| &self.frames[id])
    }

    pub fn frame_names(&self) -> Vec<&str> {
        self.order().map(|f| f.name.as_str()).collect()
    }

    /// Position of the named frame in the schedule.
    pub fn position(&self, frame: &str) -> Option<usize> {
        self.order().position(|f| f.name == frame)
    }

    pub fn frame(&self, name: &str) -> Option<&Frame> {
        self.order().find(|f| f.name == name)
    }

    pub fn producer_of(&self, variable: &str) -> Option<&Frame> {
        self.producers.get(variable).map(|&id| &self.frames[id])
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every registered birth value, in schedule order.
    pub fn defaults(&self) -> impl Iterator<Item = (&OutputSpec, &DefaultValue)> {
        self.order().flat_map(|frame| {
            frame.defaults.iter().filter_map(move |(name, default)| {
                frame
                    .outputs
                    .iter()
                    .find(|o| &o.name == name)
                    .map(|output| (output, default))
            })
        })
    }

    pub fn has_default(&self, variable: &str) -> bool {
        self.producer_of(variable)
            .is_some_and(|f| f.default_for(variable).is_some())
    }

    /// Previous-period reads of frame-produced variables, in schedule order.
    pub fn lagged_reads(&self) -> impl Iterator<Item = (&Frame, &InputRef)> {
        self.order().flat_map(move |frame| {
            frame
                .inputs
                .iter()
                .filter(move |input| {
                    input.timing == Timing::Prev && !self.registry.is_external(&input.name)
                })
                .map(move |input| (frame, input))
        })
    }
}
