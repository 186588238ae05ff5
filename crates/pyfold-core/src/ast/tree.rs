use super::kind::NodeKind;
use super::location::SourceLocation;
use crate::config::LanguageLevel;
use crate::scope::{Scope, ScopeTable, Variable, VariableKind, VariableRegistry};
use crate::string_interner::{StringInterner, MODULE_ATTRIBUTES};
use id_arena::{Arena, Id};
use std::sync::Arc;

pub type NodeId = Id<Node>;

/// One tree element
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub location: SourceLocation,
    /// Non-owning back link, `None` for the root and for detached nodes
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, location: SourceLocation) -> Self {
        Self {
            kind,
            location,
            parent: None,
        }
    }
}

/// A module: its node arena plus the variable and scope model
///
/// Nodes are never freed. A rewrite detaches the replaced node, which stays in
/// the arena unreachable from the root.
#[derive(Debug)]
pub struct ModuleTree {
    nodes: Arena<Node>,
    root: NodeId,
    name: String,
    file: Arc<str>,
    pub language_level: LanguageLevel,
    pub interner: StringInterner,
    pub variables: VariableRegistry,
    pub scopes: ScopeTable,
}

impl ModuleTree {
    pub fn new(name: &str, file: impl Into<Arc<str>>) -> Self {
        Self::with_root(
            NodeKind::Module {
                name: name.to_string(),
                body: None,
            },
            name,
            file.into(),
        )
    }

    pub fn new_package(name: &str, file: impl Into<Arc<str>>) -> Self {
        Self::with_root(
            NodeKind::Package {
                name: name.to_string(),
                body: None,
            },
            name,
            file.into(),
        )
    }

    fn with_root(kind: NodeKind, name: &str, file: Arc<str>) -> Self {
        let mut nodes = Arena::new();
        let location = SourceLocation {
            file: Arc::clone(&file),
            line: 1,
            column: 0,
        };
        let root = nodes.alloc(Node::new(kind, location));

        let mut tree = Self {
            nodes,
            root,
            name: name.to_string(),
            file,
            language_level: LanguageLevel::default(),
            interner: StringInterner::with_module_attributes(),
            variables: VariableRegistry::new(),
            scopes: ScopeTable::default(),
        };
        tree.scopes.insert(Scope::new(root, &tree.nodes[root].kind));

        for attribute in MODULE_ATTRIBUTES {
            let name = tree.interner.intern(attribute);
            let variable = tree
                .variables
                .alloc(Variable::new(Some(name), root, VariableKind::Module));
            tree.scopes.get_mut(root).providing.insert(name, variable);
        }
        tree
    }

    pub fn with_language_level(mut self, level: LanguageLevel) -> Self {
        self.language_level = level;
        self
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    pub fn is_package(&self) -> bool {
        matches!(self.kind(self.root), NodeKind::Package { .. })
    }

    /// Location of the first line of the module
    pub fn module_location(&self) -> SourceLocation {
        self.nodes[self.root].location.clone()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id].kind
    }

    pub fn location(&self, id: NodeId) -> &SourceLocation {
        &self.nodes[id].location
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Number of nodes ever allocated, detached ones included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Allocate a node and adopt its children
    ///
    /// Closure givers get their scope entry here.
    pub fn alloc(&mut self, kind: NodeKind, location: SourceLocation) -> NodeId {
        let children = kind.children();
        let is_closure_giver = kind.is_closure_giver();
        let id = self.nodes.alloc(Node::new(kind, location));

        for child in children {
            assert!(child != self.root, "module root cannot become a child");
            self.nodes[child].parent = Some(id);
        }
        if is_closure_giver {
            let scope = Scope::new(id, &self.nodes[id].kind);
            self.scopes.insert(scope);
        }
        id
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id].kind.children()
    }

    /// Children in the order Python evaluates them
    ///
    /// Assignment sources run before their targets and loops evaluate the
    /// iterated value before binding the target.
    pub fn children_in_evaluation_order(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id].kind {
            NodeKind::Assignment { target, source } => vec![*source, *target],
            NodeKind::AssignmentUnpack { targets, source } => {
                let mut order = vec![*source];
                order.extend(targets.iter().copied());
                order
            }
            NodeKind::For {
                target,
                iterated,
                body,
                no_break,
                ..
            } => {
                let mut order = vec![*iterated, *target];
                order.extend(body.iter().copied());
                order.extend(no_break.iter().copied());
                order
            }
            kind => kind.children(),
        }
    }

    pub fn set_module_body(&mut self, body: NodeId) {
        self.set_scope_body(self.root, body);
    }

    /// Attach the statements sequence of a module, function or class body
    pub fn set_scope_body(&mut self, scope: NodeId, body: NodeId) {
        let previous = match &mut self.nodes[scope].kind {
            NodeKind::Module { body: slot, .. }
            | NodeKind::Package { body: slot, .. }
            | NodeKind::FunctionBody { body: slot, .. }
            | NodeKind::ClassBody { body: slot, .. } => slot.replace(body),
            other => panic!("{} has no body slot", other.tag().kind_name()),
        };
        if let Some(previous) = previous {
            self.nodes[previous].parent = None;
        }
        self.nodes[body].parent = Some(scope);
    }

    /// Swap a child; panics when `old` is not a child of `parent`
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let replaced = self.nodes[parent].kind.replace_child(old, new);
        assert!(
            replaced,
            "{} at {} is not a child of {}",
            self.nodes[old].kind.tag().kind_name(),
            self.nodes[old].location,
            self.nodes[parent].kind.tag().kind_name()
        );
        self.nodes[old].parent = None;
        self.nodes[new].parent = Some(parent);
    }

    /// Put `new` where `old` is, detaching `old`
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.nodes[old].parent else {
            panic!(
                "cannot replace detached {} at {}",
                self.nodes[old].kind.tag().kind_name(),
                self.nodes[old].location
            );
        };
        self.replace_child(parent, old, new);
    }

    /// Replace one statement by zero or more statements
    ///
    /// Nested sequences in `replacement` are spliced in flat. An empty
    /// replacement removes the statement.
    pub fn replace_statement(&mut self, old: NodeId, replacement: Vec<NodeId>) {
        let mut flat = Vec::with_capacity(replacement.len());
        for statement in replacement {
            match &self.nodes[statement].kind {
                NodeKind::StatementsSequence { statements } => flat.extend(statements.iter().copied()),
                _ => flat.push(statement),
            }
        }
        if flat.is_empty() {
            self.remove_statement(old);
            return;
        }

        let sequence = self.sequence_of(old);
        if let NodeKind::StatementsSequence { statements } = &mut self.nodes[sequence].kind {
            let position = statements
                .iter()
                .position(|s| *s == old)
                .unwrap_or_else(|| panic!("statement missing from its sequence"));
            statements.splice(position..=position, flat.iter().copied());
        }
        self.nodes[old].parent = None;
        for statement in flat {
            self.nodes[statement].parent = Some(sequence);
        }
    }

    /// Remove a statement; a sequence left empty is unlinked from its holder
    pub fn remove_statement(&mut self, old: NodeId) {
        let sequence = self.sequence_of(old);
        let now_empty = match &mut self.nodes[sequence].kind {
            NodeKind::StatementsSequence { statements } => {
                statements.retain(|s| *s != old);
                statements.is_empty()
            }
            _ => unreachable!(),
        };
        self.nodes[old].parent = None;

        if now_empty {
            let holder = self.nodes[sequence].parent;
            let unlinked = holder.is_some_and(|holder| self.nodes[holder].kind.remove_child(sequence));
            if unlinked {
                self.nodes[sequence].parent = None;
            } else {
                let location = self.nodes[old].location.clone();
                let pass = self.nodes.alloc(Node::new(NodeKind::Pass, location));
                self.nodes[pass].parent = Some(sequence);
                if let NodeKind::StatementsSequence { statements } = &mut self.nodes[sequence].kind {
                    statements.push(pass);
                }
            }
        }
    }

    fn sequence_of(&self, statement: NodeId) -> NodeId {
        match self.nodes[statement].parent {
            Some(parent) if matches!(self.nodes[parent].kind, NodeKind::StatementsSequence { .. }) => parent,
            _ => panic!(
                "{} at {} is not inside a statements sequence",
                self.nodes[statement].kind.tag().kind_name(),
                self.nodes[statement].location
            ),
        }
    }

    /// Statements of a sequence node; empty for anything else
    pub fn statements(&self, sequence: NodeId) -> &[NodeId] {
        match &self.nodes[sequence].kind {
            NodeKind::StatementsSequence { statements } => statements,
            _ => &[],
        }
    }

    /// Recompute every parent link reachable from the root
    pub fn relink_parents(&mut self) {
        let mut stack = vec![self.root];
        self.nodes[self.root].parent = None;
        while let Some(id) = stack.pop() {
            for child in self.nodes[id].kind.children() {
                self.nodes[child].parent = Some(id);
                stack.push(child);
            }
        }
    }

    /// Nearest closure giver strictly above `id`
    pub fn enclosing_scope(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.nodes[id].parent;
        while let Some(node) = current {
            if self.nodes[node].kind.is_closure_giver() {
                return Some(node);
            }
            current = self.nodes[node].parent;
        }
        None
    }

    /// Closure giver that owns the code at `id`; panics on detached nodes
    pub fn owning_scope(&self, id: NodeId) -> NodeId {
        self.enclosing_scope(id).unwrap_or_else(|| {
            panic!(
                "{} at {} has no enclosing scope",
                self.nodes[id].kind.tag().kind_name(),
                self.nodes[id].location
            )
        })
    }

    /// Whether `id` is reachable from the root through parent links
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Whether `ancestor` is `id` or above it
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes[node].parent;
        }
        false
    }

    /// Preorder list of `id` and everything below it
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            result.push(node);
            let children = self.nodes[node].kind.children();
            stack.extend(children.into_iter().rev());
        }
        result
    }

    /// Preorder list of the code owned by `scope`, without nested scopes
    pub fn scope_descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![scope];
        while let Some(node) = stack.pop() {
            result.push(node);
            let children = self.nodes[node].kind.children();
            stack.extend(
                children
                    .into_iter()
                    .rev()
                    .filter(|child| !self.nodes[*child].kind.is_closure_giver()),
            );
        }
        result
    }

    /// Check that every reachable child points back at its parent
    pub fn verify_parents(&self) -> Result<(), String> {
        for id in self.descendants(self.root) {
            for child in self.nodes[id].kind.children() {
                if self.nodes[child].parent != Some(id) {
                    return Err(format!(
                        "{} at {} has a stale parent link",
                        self.nodes[child].kind.tag().kind_name(),
                        self.nodes[child].location
                    ));
                }
            }
        }
        Ok(())
    }

    /// Name of an interned identifier
    pub fn resolve_name(&self, id: crate::string_interner::StringId) -> &str {
        self.interner.resolve(id)
    }
}
