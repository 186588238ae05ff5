//! Variable traces: per-scope SSA-like versions of every variable
//!
//! A [`TraceCollection`] walks one scope in program order and records which
//! version of each variable every read sees. The result, [`ScopeTraces`], is
//! read-only: the trace-driven optimization pass queries it and then throws it
//! away, so nothing here has to survive a rewrite.

mod collection;
pub mod shape;

pub use collection::TraceCollection;
pub use shape::{ShapeSet, ValueFact};

use crate::ast::{Constant, ModuleTree, NodeId};
use crate::scope::VariableId;
use rustc_hash::{FxHashMap, FxHashSet};

/// Index of a trace inside one [`ScopeTraces`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u32);

impl TraceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceKind {
    /// Definitely no value
    Uninitialized,
    /// Unknown at scope entry, or after foreign code ran
    PossiblyUninitialized,
    /// Has a value we know nothing about (parameters, module attributes)
    Initialized,
    Assigned { assignment: NodeId, value: ValueFact },
    /// Join of diverging paths
    Merged { inputs: Vec<TraceId> },
}

#[derive(Debug, Clone)]
pub struct VariableTrace {
    pub variable: VariableId,
    pub version: u32,
    pub kind: TraceKind,
    /// Reads, in program order
    pub usages: Vec<NodeId>,
    /// `del` statements that ended this version
    pub releases: Vec<NodeId>,
    /// Usage index at which the value escaped; later reads see an unknown value
    pub escaped_at: Option<usize>,
    pub shapes: ShapeSet,
    /// Loop entry whose inputs were still being computed
    pub incomplete: bool,
}

impl VariableTrace {
    pub fn is_merge(&self) -> bool {
        matches!(self.kind, TraceKind::Merged { .. })
    }
}

/// Where a read landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Read {
    pub trace: TraceId,
    pub usage: usize,
}

/// Traces of one scope
#[derive(Debug, Default)]
pub struct ScopeTraces {
    pub scope: Option<NodeId>,
    pub traces: Vec<VariableTrace>,
    /// Variable and temp reads
    pub reads: FxHashMap<NodeId, Read>,
    /// Assignment targets to the version they created
    pub assignments: FxHashMap<NodeId, TraceId>,
}

impl ScopeTraces {
    pub fn trace(&self, id: TraceId) -> &VariableTrace {
        &self.traces[id.index()]
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Traces of one variable in allocation order
    pub fn traces_of(&self, variable: VariableId) -> impl Iterator<Item = (TraceId, &VariableTrace)> {
        self.traces
            .iter()
            .enumerate()
            .filter(move |(_, trace)| trace.variable == variable)
            .map(|(index, trace)| (TraceId(index as u32), trace))
    }

    pub fn read(&self, node: NodeId) -> Option<Read> {
        self.reads.get(&node).copied()
    }

    /// Non-merge traces a trace may stand for
    pub fn origins(&self, id: TraceId) -> Vec<TraceId> {
        let mut origins = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            match &self.trace(current).kind {
                TraceKind::Merged { inputs } => stack.extend(inputs.iter().rev().copied()),
                _ => origins.push(current),
            }
        }
        origins.sort();
        origins
    }

    fn has_incomplete_merge(&self, id: TraceId) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let trace = self.trace(current);
            if trace.incomplete {
                return true;
            }
            if let TraceKind::Merged { inputs } = &trace.kind {
                stack.extend(inputs.iter().copied());
            }
        }
        false
    }

    /// The constant every origin assigned, if they all agree
    pub fn known_constant(&self, id: TraceId) -> Option<Constant> {
        if self.has_incomplete_merge(id) {
            return None;
        }
        let mut known: Option<Constant> = None;
        for origin in self.origins(id) {
            let TraceKind::Assigned { value, .. } = &self.trace(origin).kind else {
                return None;
            };
            let constant = value.constant.as_ref()?;
            match &known {
                None => known = Some(constant.clone()),
                Some(previous) if same_constant(previous, constant) => {}
                Some(_) => return None,
            }
        }
        known
    }

    /// Every path into this trace bound the variable
    pub fn must_have_value(&self, id: TraceId) -> bool {
        self.origins(id).into_iter().all(|origin| {
            matches!(
                self.trace(origin).kind,
                TraceKind::Assigned { .. } | TraceKind::Initialized
            )
        })
    }

    /// No path into this trace bound the variable
    pub fn must_not_have_value(&self, id: TraceId) -> bool {
        self.origins(id)
            .into_iter()
            .all(|origin| matches!(self.trace(origin).kind, TraceKind::Uninitialized))
    }

    pub fn shapes(&self, id: TraceId) -> ShapeSet {
        self.trace(id).shapes
    }

    /// Constant a read may be replaced with
    ///
    /// The value must be known on every path and must not have escaped on
    /// the way to this read. The read that hands the value to unknown code
    /// stays a read, so the escape is found again by the next analysis.
    pub fn is_foldable_usage(&self, node: NodeId) -> Option<Constant> {
        let read = self.read(node)?;
        let constant = self.known_constant(read.trace)?;
        let trace = self.trace(read.trace);
        if trace.escaped_at.is_some_and(|escaped| read.usage >= escaped) {
            return None;
        }
        if trace.is_merge() {
            let escaped_origin = self
                .origins(read.trace)
                .into_iter()
                .any(|origin| self.trace(origin).escaped_at.is_some());
            if escaped_origin {
                return None;
            }
        }
        Some(constant)
    }

    /// Whether any read can observe this trace, through merges included
    pub fn is_used(&self, id: TraceId) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let trace = self.trace(current);
            if !trace.usages.is_empty() || !trace.releases.is_empty() {
                return true;
            }
            for (index, candidate) in self.traces.iter().enumerate() {
                if let TraceKind::Merged { inputs } = &candidate.kind {
                    if inputs.contains(&current) {
                        stack.push(TraceId(index as u32));
                    }
                }
            }
        }
        false
    }
}

// Constant equality for folding: 1 and 1.0 and True are distinct values here.
fn same_constant(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Float(x), Constant::Float(y)) => x.to_bits() == y.to_bits(),
        (Constant::Tuple(xs), Constant::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_constant(x, y))
        }
        _ => std::mem::discriminant(a) == std::mem::discriminant(b) && a == b,
    }
}

/// Run a trace collection over one scope
pub fn analyze_scope(tree: &ModuleTree, scope: NodeId, loop_convergence_limit: usize) -> ScopeTraces {
    TraceCollection::new(tree, scope, loop_convergence_limit).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_constant_distinguishes_types() {
        assert!(same_constant(&Constant::Int(1), &Constant::Int(1)));
        assert!(!same_constant(&Constant::Int(1), &Constant::Bool(true)));
        assert!(!same_constant(&Constant::Float(0.0), &Constant::Float(-0.0)));
    }
}
