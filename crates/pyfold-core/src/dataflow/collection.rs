use super::shape::{ShapeSet, ValueFact};
use super::{Read, ScopeTraces, TraceId, TraceKind, VariableTrace};
use crate::ast::{Builtin, CompareOp, ContractionKind, ModuleTree, NodeId, NodeKind, UnaryOp};
use crate::scope::{VariableId, VariableKind};
use crate::string_interner::MODULE_ATTRIBUTES;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

/// Current trace of every variable touched on one path
type Table = FxHashMap<VariableId, TraceId>;

#[derive(Default)]
struct LoopFrame {
    continues: Vec<Table>,
    breaks: Vec<Table>,
    /// Finally frames open when the loop started
    finally_depth: usize,
}

struct FinallyFrame {
    /// Variables the final block may rebind
    written: Vec<VariableId>,
    /// States of break, continue and return leaving through this block
    entries: Vec<Table>,
}

#[derive(Clone)]
struct Checkpoint {
    traces: Vec<VariableTrace>,
    reads: FxHashMap<NodeId, Read>,
    assignments: FxHashMap<NodeId, TraceId>,
    initial: FxHashMap<VariableId, TraceId>,
    exception_lengths: Vec<usize>,
    finally_lengths: Vec<usize>,
}

enum LoopHeader {
    While { condition: NodeId, body: Option<NodeId> },
    For {
        node: NodeId,
        target: NodeId,
        body: Option<NodeId>,
        foreign_iteration: bool,
    },
}

/// Walks one scope in program order, building its [`ScopeTraces`]
pub struct TraceCollection<'t> {
    tree: &'t ModuleTree,
    scope: NodeId,
    loop_convergence_limit: usize,
    traces: Vec<VariableTrace>,
    reads: FxHashMap<NodeId, Read>,
    assignments: FxHashMap<NodeId, TraceId>,
    /// Scope-entry trace of each variable, allocated on first touch
    initial: FxHashMap<VariableId, TraceId>,
    /// `None` while the walk is in unreachable code
    current: Option<Table>,
    /// Variables foreign code may rebind behind our back
    volatile: Vec<VariableId>,
    loops: Vec<LoopFrame>,
    exception_frames: Vec<Vec<Table>>,
    finally_frames: Vec<FinallyFrame>,
}

impl<'t> TraceCollection<'t> {
    pub fn new(tree: &'t ModuleTree, scope: NodeId, loop_convergence_limit: usize) -> Self {
        let state = tree.scopes.get(scope);
        let mut volatile: Vec<VariableId> = Vec::new();
        if state.is_module() {
            volatile.extend(state.providing.values().copied());
        } else {
            volatile.extend(state.taken.values().copied());
            for variable in state.providing.values() {
                let info = &tree.variables[*variable];
                if info.is_shared() || matches!(info.kind, VariableKind::MaybeLocal { .. }) {
                    volatile.push(*variable);
                }
            }
        }
        volatile.sort_by_key(|v| v.index());
        volatile.dedup();

        Self {
            tree,
            scope,
            loop_convergence_limit: loop_convergence_limit.max(1),
            traces: Vec::new(),
            reads: FxHashMap::default(),
            assignments: FxHashMap::default(),
            initial: FxHashMap::default(),
            current: None,
            volatile,
            loops: Vec::new(),
            exception_frames: Vec::new(),
            finally_frames: Vec::new(),
        }
    }

    pub fn run(mut self) -> ScopeTraces {
        let body = match self.tree.kind(self.scope) {
            NodeKind::Module { body, .. }
            | NodeKind::Package { body, .. }
            | NodeKind::FunctionBody { body, .. }
            | NodeKind::ClassBody { body, .. } => *body,
            _ => None,
        };
        self.current = Some(Table::default());
        self.block(body);

        debug!(
            scope = self.tree.kind(self.scope).tag().kind_name(),
            traces = self.traces.len(),
            reads = self.reads.len(),
            "collected variable traces"
        );
        ScopeTraces {
            scope: Some(self.scope),
            traces: self.traces,
            reads: self.reads,
            assignments: self.assignments,
        }
    }

    // Trace bookkeeping

    fn new_trace(&mut self, variable: VariableId, kind: TraceKind) -> TraceId {
        let shapes = match &kind {
            TraceKind::Uninitialized => ShapeSet::empty(),
            TraceKind::PossiblyUninitialized | TraceKind::Initialized => ShapeSet::UNKNOWN,
            TraceKind::Assigned { value, .. } => value.shapes,
            TraceKind::Merged { inputs } => inputs
                .iter()
                .fold(ShapeSet::empty(), |acc, input| acc.union(self.traces[input.index()].shapes)),
        };
        let version = self.tree.variables[variable].allocate_version();
        let id = TraceId(self.traces.len() as u32);
        trace!(
            variable = %self.tree.variable_name(variable),
            version,
            kind = ?kind,
            "new trace"
        );
        self.traces.push(VariableTrace {
            variable,
            version,
            kind,
            usages: Vec::new(),
            releases: Vec::new(),
            escaped_at: None,
            shapes,
            incomplete: false,
        });
        id
    }

    fn initial_kind(&self, variable: VariableId) -> TraceKind {
        let info = &self.tree.variables[variable];
        if info.owner != self.scope {
            return TraceKind::PossiblyUninitialized;
        }
        match info.kind {
            VariableKind::Parameter => TraceKind::Initialized,
            VariableKind::Module => {
                let implicit = info
                    .name
                    .is_some_and(|name| MODULE_ATTRIBUTES.contains(&self.tree.interner.resolve(name)));
                if implicit {
                    TraceKind::Initialized
                } else {
                    TraceKind::Uninitialized
                }
            }
            VariableKind::MaybeLocal { .. } | VariableKind::ClosureReference { .. } => {
                TraceKind::PossiblyUninitialized
            }
            VariableKind::Local | VariableKind::ClassAttribute | VariableKind::Temporary => {
                TraceKind::Uninitialized
            }
        }
    }

    fn initial_trace(&mut self, variable: VariableId) -> TraceId {
        if let Some(trace) = self.initial.get(&variable) {
            return *trace;
        }
        let kind = self.initial_kind(variable);
        let trace = self.new_trace(variable, kind);
        self.initial.insert(variable, trace);
        trace
    }

    fn lookup(&mut self, table: &Table, variable: VariableId) -> TraceId {
        match table.get(&variable) {
            Some(trace) => *trace,
            None => self.initial_trace(variable),
        }
    }

    fn current_trace(&mut self, variable: VariableId) -> TraceId {
        let found = self.current.as_ref().and_then(|table| table.get(&variable).copied());
        match found {
            Some(trace) => trace,
            None => self.initial_trace(variable),
        }
    }

    fn set_current(&mut self, variable: VariableId, trace: TraceId) {
        if let Some(table) = self.current.as_mut() {
            table.insert(variable, trace);
        }
    }

    fn read(&mut self, node: NodeId, variable: VariableId) {
        if self.current.is_none() {
            return;
        }
        let trace = self.current_trace(variable);
        let usages = &mut self.traces[trace.index()].usages;
        let usage = usages.len();
        usages.push(node);
        self.reads.insert(node, Read { trace, usage });
        // Reading an unbound name raises NameError
        if self.may_be_unbound(trace) {
            self.exception_exit();
        }
    }

    /// Some path into `trace` may not have bound the variable
    fn may_be_unbound(&self, trace: TraceId) -> bool {
        let mut seen: Vec<TraceId> = Vec::new();
        let mut stack = vec![trace];
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            let entry = &self.traces[current.index()];
            if entry.incomplete {
                return true;
            }
            match &entry.kind {
                TraceKind::Assigned { .. } | TraceKind::Initialized => {}
                TraceKind::Merged { inputs } => stack.extend(inputs.iter().copied()),
                TraceKind::Uninitialized | TraceKind::PossiblyUninitialized => return true,
            }
        }
        false
    }

    fn assign(&mut self, target: NodeId, variable: VariableId, value: ValueFact, assignment: NodeId) {
        if self.current.is_none() {
            return;
        }
        let trace = self.new_trace(variable, TraceKind::Assigned { assignment, value });
        self.assignments.insert(target, trace);
        self.set_current(variable, trace);
    }

    /// The value read at `node` may now be changed or inspected by unknown code
    fn escape(&mut self, node: NodeId) {
        if let Some(read) = self.reads.get(&node) {
            let trace = &mut self.traces[read.trace.index()];
            if trace.escaped_at.is_none() {
                trace.escaped_at = Some(read.usage);
            }
        }
    }

    /// Join the states of diverging paths; `None` entries never arrived
    fn merge(&mut self, states: Vec<Option<Table>>) -> Option<Table> {
        let mut states: Vec<Table> = states.into_iter().flatten().collect();
        if states.len() <= 1 {
            return states.pop();
        }
        let mut variables: Vec<VariableId> = states.iter().flat_map(|s| s.keys().copied()).collect();
        variables.sort_by_key(|v| v.index());
        variables.dedup();

        let mut merged = Table::default();
        for variable in variables {
            let mut inputs: Vec<TraceId> = Vec::new();
            for state in &states {
                let trace = self.lookup(state, variable);
                if !inputs.contains(&trace) {
                    inputs.push(trace);
                }
            }
            let trace = if inputs.len() == 1 {
                inputs[0]
            } else {
                self.new_trace(variable, TraceKind::Merged { inputs })
            };
            merged.insert(variable, trace);
        }
        Some(merged)
    }

    /// Exceptions raised here reach the innermost handler with the current state
    fn exception_exit(&mut self) {
        if let (Some(table), Some(frame)) = (self.current.as_ref(), self.exception_frames.last_mut()) {
            if frame.last() != Some(table) {
                frame.push(table.clone());
            }
        }
    }

    /// Calls and the like may run arbitrary code and raise
    fn foreign_code(&mut self) {
        if self.current.is_none() {
            return;
        }
        for index in 0..self.volatile.len() {
            let variable = self.volatile[index];
            let trace = self.new_trace(variable, TraceKind::PossiblyUninitialized);
            self.set_current(variable, trace);
        }
        self.exception_exit();
    }

    /// Unqualified exec may rebind any name of the scope
    fn invalidate_all(&mut self) {
        let Some(table) = self.current.as_ref() else {
            return;
        };
        let state = self.tree.scopes.get(self.scope);
        let mut variables: Vec<VariableId> = table.keys().copied().collect();
        variables.extend(self.volatile.iter().copied());
        variables.extend(state.providing.values().copied());
        variables.extend(state.taken.values().copied());
        variables.sort_by_key(|v| v.index());
        variables.dedup();
        for variable in variables {
            let trace = self.new_trace(variable, TraceKind::PossiblyUninitialized);
            self.set_current(variable, trace);
        }
    }

    /// Record a state leaving through open finally blocks, innermost first
    fn cross_finally_frames(&mut self, mut state: Table, from_depth: usize) -> Table {
        for depth in (from_depth..self.finally_frames.len()).rev() {
            self.finally_frames[depth].entries.push(state.clone());
            let written = self.finally_frames[depth].written.clone();
            for variable in written {
                let trace = self.new_trace(variable, TraceKind::PossiblyUninitialized);
                state.insert(variable, trace);
            }
        }
        state
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            traces: self.traces.clone(),
            reads: self.reads.clone(),
            assignments: self.assignments.clone(),
            initial: self.initial.clone(),
            exception_lengths: self.exception_frames.iter().map(Vec::len).collect(),
            finally_lengths: self.finally_frames.iter().map(|f| f.entries.len()).collect(),
        }
    }

    fn restore(&mut self, checkpoint: &Checkpoint) {
        self.traces = checkpoint.traces.clone();
        self.reads = checkpoint.reads.clone();
        self.assignments = checkpoint.assignments.clone();
        self.initial = checkpoint.initial.clone();
        for (frame, length) in self.exception_frames.iter_mut().zip(&checkpoint.exception_lengths) {
            frame.truncate(*length);
        }
        for (frame, length) in self.finally_frames.iter_mut().zip(&checkpoint.finally_lengths) {
            frame.entries.truncate(*length);
        }
    }

    /// Variables bound anywhere under `roots`, plus everything foreign code touches
    fn written_variables(&self, roots: &[Option<NodeId>]) -> Vec<VariableId> {
        let mut written: Vec<VariableId> = self.volatile.clone();
        for root in roots.iter().flatten() {
            let mut stack = vec![*root];
            while let Some(node) = stack.pop() {
                match self.tree.kind(node) {
                    NodeKind::TargetVariableRef {
                        variable: Some(variable),
                        ..
                    }
                    | NodeKind::TargetTempVariableRef { variable } => written.push(*variable),
                    kind if kind.is_closure_giver() => continue,
                    _ => {}
                }
                stack.extend(self.tree.children(node));
            }
        }
        written.sort_by_key(|v| v.index());
        written.dedup();
        written
    }

    /// Value is a builtin scalar or a constant, so operating on it runs no user code
    fn is_inert(&self, node: NodeId) -> bool {
        match self.tree.kind(node) {
            NodeKind::Constant { .. } => true,
            NodeKind::VariableRef { .. } | NodeKind::TempVariableRef { .. } => self
                .reads
                .get(&node)
                .is_some_and(|read| self.traces[read.trace.index()].shapes.is_scalar()),
            _ => false,
        }
    }

    fn value_of(&self, node: NodeId) -> ValueFact {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Constant { value } => ValueFact::of_constant(value.clone()),
            NodeKind::MakeTuple { .. } => match tree.compile_time_constant(node) {
                Some(value) => ValueFact::of_constant(value),
                None => ValueFact::of_shape(ShapeSet::TUPLE),
            },
            NodeKind::MakeList { .. } => ValueFact::of_shape(ShapeSet::LIST),
            NodeKind::MakeSet { .. } => ValueFact::of_shape(ShapeSet::SET),
            NodeKind::MakeDict { .. } => ValueFact::of_shape(ShapeSet::DICT),
            NodeKind::FunctionCreation { .. } => ValueFact::of_shape(ShapeSet::FUNCTION),
            NodeKind::ClassCreation { .. } => ValueFact::of_shape(ShapeSet::CLASS),
            NodeKind::ImportModule { .. } => ValueFact::of_shape(ShapeSet::MODULE),
            NodeKind::BuiltinMakeException { .. } => ValueFact::of_shape(ShapeSet::EXCEPTION),
            NodeKind::Contraction { body, .. } => match tree.kind(*body) {
                NodeKind::ContractionBody { kind, .. } => ValueFact::of_shape(match kind {
                    ContractionKind::List => ShapeSet::LIST,
                    ContractionKind::Set => ShapeSet::SET,
                    ContractionKind::Dict => ShapeSet::DICT,
                    ContractionKind::Generator => ShapeSet::UNKNOWN,
                }),
                _ => ValueFact::unknown(),
            },
            NodeKind::BuiltinCall { builtin, .. } => ValueFact::of_shape(match builtin {
                Builtin::Len | Builtin::Int | Builtin::Ord => ShapeSet::INT,
                Builtin::Float => ShapeSet::FLOAT,
                Builtin::Str | Builtin::Chr => ShapeSet::STR,
                Builtin::Bool => ShapeSet::BOOL,
                Builtin::Tuple => ShapeSet::TUPLE,
                Builtin::List => ShapeSet::LIST,
                Builtin::Dict | Builtin::Locals | Builtin::Globals => ShapeSet::DICT,
                Builtin::Set => ShapeSet::SET,
                _ => ShapeSet::UNKNOWN,
            }),
            NodeKind::Comparison {
                op: CompareOp::Is | CompareOp::IsNot,
                ..
            }
            | NodeKind::UnaryOperation { op: UnaryOp::Not, .. } => ValueFact::of_shape(ShapeSet::BOOL),
            NodeKind::VariableRef { .. } | NodeKind::TempVariableRef { .. } => match self.reads.get(&node) {
                Some(read) => ValueFact::of_shape(self.traces[read.trace.index()].shapes),
                None => ValueFact::unknown(),
            },
            _ => ValueFact::unknown(),
        }
    }

    // Statements

    fn block(&mut self, block: Option<NodeId>) {
        if let Some(block) = block {
            self.statement(block);
        }
    }

    fn statement(&mut self, id: NodeId) {
        if self.current.is_none() {
            return;
        }
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::StatementsSequence { statements } => {
                for statement in statements {
                    if self.current.is_none() {
                        break;
                    }
                    self.statement(*statement);
                }
            }
            NodeKind::Assignment { target, source } => {
                self.expression(*source);
                let value = self.value_of(*source);
                self.target(*target, value, id);
            }
            NodeKind::AssignmentUnpack { targets, source } => {
                self.expression(*source);
                let literal = matches!(
                    tree.kind(*source),
                    NodeKind::Constant { .. } | NodeKind::MakeTuple { .. } | NodeKind::MakeList { .. }
                );
                if !literal {
                    self.escape(*source);
                    self.foreign_code();
                } else {
                    // A length mismatch raises ValueError
                    self.exception_exit();
                }
                for target in targets {
                    self.target(*target, ValueFact::unknown(), id);
                }
            }
            NodeKind::DelVariable { target } => self.release(id, *target),
            NodeKind::ExpressionOnly { expression } => self.expression(*expression),
            NodeKind::Return { expression } => {
                if let Some(expression) = expression {
                    self.expression(*expression);
                }
                if let Some(state) = self.current.take() {
                    self.cross_finally_frames(state, 0);
                }
            }
            NodeKind::If {
                condition,
                yes_branch,
                no_branch,
            } => {
                self.expression(*condition);
                let before = self.current.clone();
                self.block(*yes_branch);
                let yes_state = self.current.take();
                self.current = before;
                self.block(*no_branch);
                let no_state = self.current.take();
                self.current = self.merge(vec![yes_state, no_state]);
            }
            NodeKind::While {
                condition,
                body,
                no_enter,
                ..
            } => self.analyze_loop(
                LoopHeader::While {
                    condition: *condition,
                    body: *body,
                },
                *no_enter,
            ),
            NodeKind::For {
                target,
                iterated,
                body,
                no_break,
                ..
            } => {
                self.expression(*iterated);
                let foreign_iteration = !matches!(
                    tree.kind(*iterated),
                    NodeKind::Constant { .. } | NodeKind::MakeTuple { .. } | NodeKind::MakeList { .. }
                );
                if foreign_iteration {
                    self.escape(*iterated);
                    self.foreign_code();
                }
                self.analyze_loop(
                    LoopHeader::For {
                        node: id,
                        target: *target,
                        body: *body,
                        foreign_iteration,
                    },
                    *no_break,
                );
            }
            NodeKind::Break { .. } => self.leave_iteration(true),
            NodeKind::Continue { .. } => self.leave_iteration(false),
            NodeKind::TryExcept {
                tried,
                handlers,
                no_raise,
            } => self.try_except(*tried, handlers, *no_raise),
            NodeKind::TryFinally { tried, finally, .. } => self.try_finally(*tried, *finally),
            NodeKind::Raise {
                exception_type,
                exception_value,
                ..
            } => {
                for part in exception_type.iter().chain(exception_value.iter()) {
                    self.expression(*part);
                }
                self.exception_exit();
                self.current = None;
            }
            NodeKind::Pass | NodeKind::GlobalDeclaration { .. } => {}
            NodeKind::Exec {
                source,
                globals,
                locals,
                ..
            } => {
                self.expression(*source);
                for part in globals.iter().chain(locals.iter()) {
                    self.expression(*part);
                }
                if globals.is_none() {
                    self.invalidate_all();
                    self.exception_exit();
                } else {
                    self.foreign_code();
                }
            }
            kind if kind.is_expression() => self.expression(id),
            _ => {}
        }
    }

    fn target(&mut self, target: NodeId, value: ValueFact, assignment: NodeId) {
        let tree = self.tree;
        match tree.kind(target) {
            NodeKind::TargetVariableRef {
                variable: Some(variable),
                ..
            }
            | NodeKind::TargetTempVariableRef { variable } => {
                self.assign(target, *variable, value, assignment);
            }
            NodeKind::TargetAttribute { source, .. } => {
                self.expression(*source);
                self.escape(*source);
                self.foreign_code();
            }
            NodeKind::TargetSubscript { source, subscript } => {
                self.expression(*source);
                self.expression(*subscript);
                self.escape(*source);
                self.foreign_code();
            }
            _ => {}
        }
    }

    fn release(&mut self, statement: NodeId, target: NodeId) {
        let variable = match self.tree.kind(target) {
            NodeKind::TargetVariableRef {
                variable: Some(variable),
                ..
            }
            | NodeKind::TargetTempVariableRef { variable } => *variable,
            _ => return,
        };
        // Deleting an unbound name raises
        self.exception_exit();
        let before = self.current_trace(variable);
        self.traces[before.index()].releases.push(statement);
        let after = self.new_trace(variable, TraceKind::Uninitialized);
        self.assignments.insert(target, after);
        self.set_current(variable, after);
    }

    fn leave_iteration(&mut self, is_break: bool) {
        let Some(state) = self.current.take() else {
            return;
        };
        let Some(depth) = self.loops.last().map(|frame| frame.finally_depth) else {
            return;
        };
        let state = self.cross_finally_frames(state, depth);
        if let Some(frame) = self.loops.last_mut() {
            if is_break {
                frame.breaks.push(state);
            } else {
                frame.continues.push(state);
            }
        }
    }

    fn try_except(&mut self, tried: Option<NodeId>, handlers: &[NodeId], no_raise: Option<NodeId>) {
        let before = self.current.clone();
        self.exception_frames.push(Vec::new());
        self.block(tried);
        let snapshots = self.exception_frames.pop().unwrap_or_default();
        // No handler may match, so every exception also reaches outer handlers
        if let Some(outer) = self.exception_frames.last_mut() {
            outer.extend(snapshots.iter().cloned());
        }

        self.block(no_raise);
        let mut ends = vec![self.current.take()];

        let mut entries = vec![before];
        entries.extend(snapshots.into_iter().map(Some));
        let handler_entry = self.merge(entries);

        let tree = self.tree;
        for handler in handlers {
            self.current = handler_entry.clone();
            if let NodeKind::ExceptHandler {
                exception_types,
                target,
                body,
            } = tree.kind(*handler)
            {
                if let Some(types) = exception_types {
                    self.expression(*types);
                }
                if let Some(target) = target {
                    self.target(*target, ValueFact::unknown(), *handler);
                }
                self.block(*body);
            }
            ends.push(self.current.take());
        }
        self.current = self.merge(ends);
    }

    fn try_finally(&mut self, tried: Option<NodeId>, finally: Option<NodeId>) {
        let written = self.written_variables(&[finally]);
        self.exception_frames.push(Vec::new());
        self.finally_frames.push(FinallyFrame {
            written,
            entries: Vec::new(),
        });
        self.block(tried);
        let snapshots = self.exception_frames.pop().unwrap_or_default();
        let leaving = self
            .finally_frames
            .pop()
            .map(|frame| frame.entries)
            .unwrap_or_default();

        let normal = self.current.take();
        let continues = normal.is_some();
        let raised = !snapshots.is_empty();

        let mut entries = vec![normal];
        entries.extend(snapshots.into_iter().map(Some));
        entries.extend(leaving.into_iter().map(Some));
        self.current = self.merge(entries);
        self.block(finally);

        if raised {
            self.exception_exit();
        }
        if !continues {
            self.current = None;
        }
    }

    // Loops

    fn loop_pass(&mut self, header: &LoopHeader) -> Option<Table> {
        match header {
            LoopHeader::While { condition, body } => {
                self.expression(*condition);
                let exit = self.current.clone();
                self.block(*body);
                exit
            }
            LoopHeader::For {
                node,
                target,
                body,
                foreign_iteration,
            } => {
                if *foreign_iteration {
                    self.foreign_code();
                }
                let exit = self.current.clone();
                self.target(*target, ValueFact::unknown(), *node);
                self.block(*body);
                exit
            }
        }
    }

    /// Speculative passes until the loop-entry shapes settle
    ///
    /// Each pass starts every candidate variable from a merge trace that is
    /// completed once the back edges are known. Variables the body leaves
    /// alone drop out after the first pass and keep their pre-loop trace.
    fn analyze_loop(&mut self, header: LoopHeader, no_break: Option<NodeId>) {
        let Some(pre_loop) = self.current.take() else {
            return;
        };
        let checkpoint = self.checkpoint();

        let written = match &header {
            LoopHeader::While { condition, body } => self.written_variables(&[Some(*condition), *body]),
            LoopHeader::For { target, body, .. } => self.written_variables(&[Some(*target), *body]),
        };
        let mut candidates: Vec<VariableId> = pre_loop.keys().copied().chain(written).collect();
        candidates.sort_by_key(|v| v.index());
        candidates.dedup();
        let mut assumed: FxHashMap<VariableId, ShapeSet> =
            candidates.iter().map(|v| (*v, ShapeSet::UNKNOWN)).collect();

        let mut passes = 0;
        let mut fallback = false;
        loop {
            passes += 1;

            let mut entry = pre_loop.clone();
            let mut heads: Vec<(VariableId, TraceId, TraceId)> = Vec::with_capacity(candidates.len());
            for variable in &candidates {
                let before = self.lookup(&pre_loop, *variable);
                let head = self.new_trace(*variable, TraceKind::Merged { inputs: vec![before] });
                let shapes = assumed
                    .get(variable)
                    .copied()
                    .unwrap_or(ShapeSet::UNKNOWN)
                    .union(self.traces[before.index()].shapes);
                let trace = &mut self.traces[head.index()];
                trace.shapes = shapes;
                trace.incomplete = true;
                entry.insert(*variable, head);
                heads.push((*variable, before, head));
            }

            self.current = Some(entry);
            self.loops.push(LoopFrame {
                finally_depth: self.finally_frames.len(),
                ..LoopFrame::default()
            });
            let exit_state = self.loop_pass(&header);
            let frame = self.loops.pop().unwrap_or_default();

            let mut back_edges = frame.continues;
            if let Some(end) = self.current.take() {
                back_edges.push(end);
            }

            let mut mutated: Vec<VariableId> = Vec::new();
            let mut settled: FxHashMap<VariableId, ShapeSet> = FxHashMap::default();
            let mut head_inputs: Vec<(TraceId, Vec<TraceId>)> = Vec::new();
            for (variable, before, head) in &heads {
                let mut inputs = vec![*before];
                for state in &back_edges {
                    let trace = state.get(variable).copied().unwrap_or(*head);
                    if trace != *head && !inputs.contains(&trace) {
                        inputs.push(trace);
                    }
                }
                if inputs.len() > 1 {
                    mutated.push(*variable);
                    let shapes = inputs.iter().fold(ShapeSet::empty(), |acc, input| {
                        acc.union(self.traces[input.index()].shapes)
                    });
                    settled.insert(*variable, shapes);
                }
                head_inputs.push((*head, inputs));
            }

            let converged = mutated == candidates
                && mutated
                    .iter()
                    .all(|v| settled.get(v) == assumed.get(v));

            if converged || fallback {
                for (head, inputs) in head_inputs {
                    let shapes = inputs.iter().fold(ShapeSet::empty(), |acc, input| {
                        acc.union(self.traces[input.index()].shapes)
                    });
                    let trace = &mut self.traces[head.index()];
                    trace.kind = TraceKind::Merged { inputs };
                    trace.incomplete = false;
                    if !fallback {
                        trace.shapes = shapes;
                    }
                }
                trace!(passes, fallback, "loop analysis settled");

                self.current = exit_state;
                self.block(no_break);
                let mut exits = vec![self.current.take()];
                exits.extend(frame.breaks.into_iter().map(Some));
                self.current = self.merge(exits);
                return;
            }

            self.restore(&checkpoint);
            if passes >= self.loop_convergence_limit {
                debug!(passes, "loop did not converge, assuming unknown shapes");
                fallback = true;
                candidates.extend(mutated);
                candidates.sort_by_key(|v| v.index());
                candidates.dedup();
                assumed = candidates.iter().map(|v| (*v, ShapeSet::UNKNOWN)).collect();
            } else {
                candidates = mutated;
                assumed = settled;
            }
        }
    }

    // Expressions

    fn expression(&mut self, id: NodeId) {
        if self.current.is_none() {
            return;
        }
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::VariableRef {
                variable: Some(variable),
                ..
            }
            | NodeKind::TempVariableRef { variable } => self.read(id, *variable),
            NodeKind::Call { called, args } => {
                self.expression(*called);
                for arg in args {
                    self.expression(*arg);
                }
                self.escape(*called);
                for arg in args {
                    self.escape(*arg);
                }
                self.foreign_code();
            }
            NodeKind::BuiltinCall { args, .. } => {
                for arg in args {
                    self.expression(*arg);
                }
                if !args.iter().all(|arg| self.is_inert(*arg)) {
                    for arg in args {
                        self.escape(*arg);
                    }
                    self.foreign_code();
                }
            }
            NodeKind::BuiltinMakeException { args, .. }
            | NodeKind::MakeTuple { elements: args }
            | NodeKind::MakeList { elements: args }
            | NodeKind::FunctionCreation { defaults: args, .. } => {
                for arg in args {
                    self.expression(*arg);
                }
            }
            NodeKind::MakeSet { elements } => {
                for element in elements {
                    self.expression(*element);
                }
                if !elements.iter().all(|e| self.is_inert(*e)) {
                    self.foreign_code();
                }
            }
            NodeKind::MakeDict { pairs } => {
                let mut hashes_unknown = false;
                for pair in pairs {
                    if let NodeKind::KeyValuePair { key, value } = tree.kind(*pair) {
                        self.expression(*key);
                        self.expression(*value);
                        hashes_unknown |= !self.is_inert(*key);
                    }
                }
                if hashes_unknown {
                    self.foreign_code();
                }
            }
            NodeKind::AttributeLookup { source, .. } => {
                self.expression(*source);
                self.escape(*source);
                self.foreign_code();
            }
            NodeKind::Subscript { source, subscript } => {
                self.expression(*source);
                self.expression(*subscript);
                self.escape(*source);
                self.foreign_code();
            }
            NodeKind::BinaryOperation { left, right, .. } | NodeKind::Comparison { left, right, .. } => {
                self.expression(*left);
                self.expression(*right);
                if !(self.is_inert(*left) && self.is_inert(*right)) {
                    self.foreign_code();
                }
            }
            NodeKind::UnaryOperation { operand, .. } => {
                self.expression(*operand);
                if !self.is_inert(*operand) {
                    self.foreign_code();
                }
            }
            NodeKind::BoolOperation { left, right, .. } => {
                self.expression(*left);
                if !self.is_inert(*left) {
                    self.foreign_code();
                }
                let skipped = self.current.clone();
                self.expression(*right);
                let evaluated = self.current.take();
                self.current = self.merge(vec![skipped, evaluated]);
            }
            NodeKind::Conditional { condition, yes, no } => {
                self.expression(*condition);
                let before = self.current.clone();
                self.expression(*yes);
                let yes_state = self.current.take();
                self.current = before;
                self.expression(*no);
                let no_state = self.current.take();
                self.current = self.merge(vec![yes_state, no_state]);
            }
            NodeKind::ClassCreation { bases, .. } => {
                for base in bases {
                    self.expression(*base);
                }
                self.foreign_code();
            }
            NodeKind::Contraction { iterated, .. } => {
                self.expression(*iterated);
                self.escape(*iterated);
                self.foreign_code();
            }
            NodeKind::ImportModule { .. } => self.foreign_code(),
            NodeKind::ImportName { module, .. } => {
                self.expression(*module);
                self.foreign_code();
            }
            NodeKind::BuiltinEval {
                source,
                globals,
                locals,
                ..
            } => {
                self.expression(*source);
                for part in globals.iter().chain(locals.iter()) {
                    self.expression(*part);
                }
                self.foreign_code();
            }
            _ => {}
        }

        // Operations on inert values still raise: 1 // 0, -None, 'a' < None
        let checked_by_read = matches!(
            tree.kind(id),
            NodeKind::VariableRef { .. } | NodeKind::TempVariableRef { .. }
        );
        if !checked_by_read && tree.may_raise_exception(id) {
            self.exception_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::analyze_scope;
    use crate::scope::closure::resolve_closures;

    fn find_reads(tree: &ModuleTree, name: &str) -> Vec<NodeId> {
        let name = tree.interner.get(name).unwrap();
        tree.descendants(tree.root())
            .into_iter()
            .filter(|id| matches!(tree.kind(*id), NodeKind::VariableRef { name: n, .. } if *n == name))
            .collect()
    }

    fn function_scope(tree: &ModuleTree) -> NodeId {
        tree.descendants(tree.root())
            .into_iter()
            .find(|id| matches!(tree.kind(*id), NodeKind::FunctionBody { .. }))
            .unwrap()
    }

    #[test]
    fn test_straight_line_constant() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let assign = b.assign("x", one);
        let x = b.name("x");
        let ret = b.ret(Some(x));
        let def = b.def("f", &[], vec![assign, ret]);
        b.set_body(vec![def]);
        resolve_closures(&mut tree).unwrap();

        let function = function_scope(&tree);
        let traces = analyze_scope(&tree, function, 20);
        let read = find_reads(&tree, "x")[0];
        assert_eq!(traces.is_foldable_usage(read), Some(crate::ast::Constant::Int(1)));
        let trace = traces.read(read).unwrap().trace;
        assert!(traces.must_have_value(trace));
    }

    #[test]
    fn test_loop_entry_merges_back_edge() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let zero = b.constant(0);
        let init = b.assign("x", zero);
        let cond = b.name("c");
        let x_read = b.name("x");
        let use_x = b.call_name("g", vec![x_read]);
        let use_stmt = b.expr(use_x);
        let two = b.constant(2);
        let reassign = b.assign("x", two);
        let body_loop = b.while_(cond, vec![use_stmt, reassign], vec![]);
        let def = b.def("f", &["c"], vec![init, body_loop]);
        b.set_body(vec![def]);
        resolve_closures(&mut tree).unwrap();

        let function = function_scope(&tree);
        let traces = analyze_scope(&tree, function, 20);
        let read = find_reads(&tree, "x")[0];
        let trace = traces.read(read).unwrap().trace;
        assert!(traces.trace(trace).is_merge());
        assert_eq!(traces.known_constant(trace), None);
        assert_eq!(traces.origins(trace).len(), 2);
        assert!(traces.must_have_value(trace));
    }

    #[test]
    fn test_unmutated_variable_keeps_pre_loop_trace() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let five = b.constant(5);
        let init = b.assign("k", five);
        let cond = b.name("c");
        let k_read = b.name("k");
        let stmt = b.expr(k_read);
        let body_loop = b.while_(cond, vec![stmt], vec![]);
        let def = b.def("f", &["c"], vec![init, body_loop]);
        b.set_body(vec![def]);
        resolve_closures(&mut tree).unwrap();

        let function = function_scope(&tree);
        let traces = analyze_scope(&tree, function, 20);
        let read = find_reads(&tree, "k")[0];
        assert_eq!(traces.is_foldable_usage(read), Some(crate::ast::Constant::Int(5)));
    }

    #[test]
    fn test_handler_sees_pre_try_state() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let init = b.assign("x", one);
        let call = b.call_name("g", vec![]);
        let reassign = b.assign("x", call);
        let x_read = b.name("x");
        let ret = b.ret(Some(x_read));
        let handler = b.handler(None, None, vec![ret]);
        let try_stmt = b.try_except(vec![reassign], vec![handler], vec![]);
        let def = b.def("f", &[], vec![init, try_stmt]);
        b.set_body(vec![def]);
        resolve_closures(&mut tree).unwrap();

        let function = function_scope(&tree);
        let traces = analyze_scope(&tree, function, 20);
        let read = find_reads(&tree, "x")[0];
        // g() raised before the assignment, so x still holds 1
        assert_eq!(traces.is_foldable_usage(read), Some(crate::ast::Constant::Int(1)));
    }

    #[test]
    fn test_module_variable_reset_by_call() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let init = b.assign("x", one);
        let call = b.call_name("g", vec![]);
        let stmt = b.expr(call);
        let x_read = b.name("x");
        let use_stmt = b.expr(x_read);
        b.set_body(vec![init, stmt, use_stmt]);
        resolve_closures(&mut tree).unwrap();

        let root = tree.root();
        let traces = analyze_scope(&tree, root, 20);
        let read = find_reads(&tree, "x")[0];
        let trace = traces.read(read).unwrap().trace;
        assert_eq!(traces.trace(trace).kind, TraceKind::PossiblyUninitialized);
        assert!(!traces.must_have_value(trace));
    }

    #[test]
    fn test_deleted_variable_must_not_have_value() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let one = b.constant(1);
        let init = b.assign("x", one);
        let del = b.del("x");
        let x_read = b.name("x");
        let ret = b.ret(Some(x_read));
        let def = b.def("f", &[], vec![init, del, ret]);
        b.set_body(vec![def]);
        resolve_closures(&mut tree).unwrap();

        let function = function_scope(&tree);
        let traces = analyze_scope(&tree, function, 20);
        let read = find_reads(&tree, "x")[0];
        let trace = traces.read(read).unwrap().trace;
        assert!(traces.must_not_have_value(trace));
        let released: Vec<_> = traces.traces.iter().filter(|t| !t.releases.is_empty()).collect();
        assert_eq!(released.len(), 1);
    }

    #[test]
    fn test_convergence_limit_of_one_still_terminates() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let zero = b.constant(0);
        let init = b.assign("i", zero);
        let cond = b.name("c");
        let i_read = b.name("i");
        let one = b.constant(1);
        let sum = b.binary(crate::ast::BinaryOp::Add, i_read, one);
        let step = b.assign("i", sum);
        let body_loop = b.while_(cond, vec![step], vec![]);
        let i_after = b.name("i");
        let ret = b.ret(Some(i_after));
        let def = b.def("f", &["c"], vec![init, body_loop, ret]);
        b.set_body(vec![def]);
        resolve_closures(&mut tree).unwrap();

        let function = function_scope(&tree);
        let traces = analyze_scope(&tree, function, 1);
        let reads = find_reads(&tree, "i");
        let after = traces.read(reads[1]).unwrap().trace;
        assert_eq!(traces.known_constant(after), None);
        assert!(traces.must_have_value(after));
        assert!(traces.traces.iter().all(|t| !t.incomplete));
    }
}
