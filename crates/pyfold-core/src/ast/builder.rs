use super::constant::Constant;
use super::kind::{ImportRecursion, NodeKind};
use super::location::SourceLocation;
use super::operators::{BinaryOp, BoolOp, CompareOp, ContractionKind, UnaryOp};
use super::tree::{ModuleTree, NodeId};

/// Producer interface for trees
///
/// Parsers and tests create nodes through this type. Every node gets the
/// builder's current location, moved forward with [`TreeBuilder::at_line`].
pub struct TreeBuilder<'t> {
    tree: &'t mut ModuleTree,
    location: SourceLocation,
}

impl ModuleTree {
    pub fn builder(&mut self) -> TreeBuilder<'_> {
        let location = self.module_location();
        TreeBuilder {
            tree: self,
            location,
        }
    }
}

impl<'t> TreeBuilder<'t> {
    pub fn tree(&mut self) -> &mut ModuleTree {
        self.tree
    }

    pub fn at_line(&mut self, line: u32) -> &mut Self {
        self.location = self.location.at(line, 0);
        self
    }

    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.location = self.location.at(line, column);
        self
    }

    fn node(&mut self, kind: NodeKind) -> NodeId {
        self.tree.alloc(kind, self.location.clone())
    }

    /// Statements sequence, or `None` for an empty block
    pub fn sequence(&mut self, statements: Vec<NodeId>) -> Option<NodeId> {
        if statements.is_empty() {
            None
        } else {
            Some(self.node(NodeKind::StatementsSequence { statements }))
        }
    }

    /// Install the module body
    pub fn set_body(&mut self, statements: Vec<NodeId>) {
        if let Some(body) = self.sequence(statements) {
            self.tree.set_module_body(body);
        }
    }

    // Expressions

    pub fn constant(&mut self, value: impl Into<Constant>) -> NodeId {
        self.node(NodeKind::Constant {
            value: value.into(),
        })
    }

    pub fn none(&mut self) -> NodeId {
        self.constant(Constant::None)
    }

    pub fn name(&mut self, name: &str) -> NodeId {
        let name = self.tree.interner.intern(name);
        self.node(NodeKind::VariableRef {
            name,
            variable: None,
            may_raise_unbound: true,
        })
    }

    pub fn call(&mut self, called: NodeId, args: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::Call { called, args })
    }

    /// Call of a name, e.g. `len(x)`
    pub fn call_name(&mut self, function: &str, args: Vec<NodeId>) -> NodeId {
        let called = self.name(function);
        self.call(called, args)
    }

    pub fn attribute(&mut self, source: NodeId, attribute: &str) -> NodeId {
        let attribute = self.tree.interner.intern(attribute);
        self.node(NodeKind::AttributeLookup { source, attribute })
    }

    pub fn subscript(&mut self, source: NodeId, subscript: NodeId) -> NodeId {
        self.node(NodeKind::Subscript { source, subscript })
    }

    pub fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.node(NodeKind::BinaryOperation { op, left, right })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: NodeId) -> NodeId {
        self.node(NodeKind::UnaryOperation { op, operand })
    }

    pub fn compare(&mut self, op: CompareOp, left: NodeId, right: NodeId) -> NodeId {
        self.node(NodeKind::Comparison { op, left, right })
    }

    pub fn bool_op(&mut self, op: BoolOp, left: NodeId, right: NodeId) -> NodeId {
        self.node(NodeKind::BoolOperation { op, left, right })
    }

    pub fn conditional(&mut self, condition: NodeId, yes: NodeId, no: NodeId) -> NodeId {
        self.node(NodeKind::Conditional { condition, yes, no })
    }

    pub fn tuple(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::MakeTuple { elements })
    }

    pub fn list(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::MakeList { elements })
    }

    pub fn set(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.node(NodeKind::MakeSet { elements })
    }

    pub fn dict(&mut self, pairs: Vec<(NodeId, NodeId)>) -> NodeId {
        let pairs = pairs
            .into_iter()
            .map(|(key, value)| self.node(NodeKind::KeyValuePair { key, value }))
            .collect();
        self.node(NodeKind::MakeDict { pairs })
    }

    pub fn lambda(&mut self, parameters: &[&str], expression: NodeId) -> NodeId {
        let parameters = parameters.iter().map(|p| self.tree.interner.intern(p)).collect();
        let name = self.tree.interner.intern("<lambda>");
        let result = self.node(NodeKind::Return {
            expression: Some(expression),
        });
        let body = self.sequence(vec![result]);
        let function = self.node(NodeKind::FunctionBody {
            name,
            parameters,
            is_lambda: true,
            body,
        });
        self.node(NodeKind::FunctionCreation {
            body: function,
            defaults: Vec::new(),
        })
    }

    /// Comprehension: `[element for target in iterated if conditions]`
    pub fn contraction(
        &mut self,
        kind: ContractionKind,
        target: &str,
        iterated: NodeId,
        conditions: Vec<NodeId>,
        element: NodeId,
    ) -> NodeId {
        let target = self.target(target);
        let body = self.node(NodeKind::ContractionBody {
            kind,
            target,
            conditions,
            element,
        });
        self.node(NodeKind::Contraction { iterated, body })
    }

    pub fn import_module(&mut self, module_name: &str, level: u32) -> NodeId {
        self.node(NodeKind::ImportModule {
            module_name: module_name.to_string(),
            level,
            recursion: ImportRecursion::Pending,
        })
    }

    pub fn import_name(&mut self, module: NodeId, name: &str) -> NodeId {
        let name = self.tree.interner.intern(name);
        self.node(NodeKind::ImportName { module, name })
    }

    // Targets

    pub fn target(&mut self, name: &str) -> NodeId {
        let name = self.tree.interner.intern(name);
        self.node(NodeKind::TargetVariableRef {
            name,
            variable: None,
        })
    }

    pub fn target_attribute(&mut self, source: NodeId, attribute: &str) -> NodeId {
        let attribute = self.tree.interner.intern(attribute);
        self.node(NodeKind::TargetAttribute { source, attribute })
    }

    pub fn target_subscript(&mut self, source: NodeId, subscript: NodeId) -> NodeId {
        self.node(NodeKind::TargetSubscript { source, subscript })
    }

    // Statements

    pub fn assign(&mut self, name: &str, source: NodeId) -> NodeId {
        let target = self.target(name);
        self.assign_to(target, source)
    }

    pub fn assign_to(&mut self, target: NodeId, source: NodeId) -> NodeId {
        self.node(NodeKind::Assignment { target, source })
    }

    pub fn assign_unpack(&mut self, names: &[&str], source: NodeId) -> NodeId {
        let targets = names.iter().map(|name| self.target(name)).collect();
        self.node(NodeKind::AssignmentUnpack { targets, source })
    }

    pub fn expr(&mut self, expression: NodeId) -> NodeId {
        self.node(NodeKind::ExpressionOnly { expression })
    }

    pub fn ret(&mut self, expression: Option<NodeId>) -> NodeId {
        self.node(NodeKind::Return { expression })
    }

    pub fn if_(&mut self, condition: NodeId, yes: Vec<NodeId>, no: Vec<NodeId>) -> NodeId {
        let yes_branch = self.sequence(yes);
        let no_branch = self.sequence(no);
        self.node(NodeKind::If {
            condition,
            yes_branch,
            no_branch,
        })
    }

    pub fn while_(&mut self, condition: NodeId, body: Vec<NodeId>, no_enter: Vec<NodeId>) -> NodeId {
        let body = self.sequence(body);
        let no_enter = self.sequence(no_enter);
        self.node(NodeKind::While {
            condition,
            body,
            no_enter,
            exception_break: false,
            exception_continue: false,
        })
    }

    pub fn for_(
        &mut self,
        target: &str,
        iterated: NodeId,
        body: Vec<NodeId>,
        no_break: Vec<NodeId>,
    ) -> NodeId {
        let target = self.target(target);
        let body = self.sequence(body);
        let no_break = self.sequence(no_break);
        self.node(NodeKind::For {
            target,
            iterated,
            body,
            no_break,
            exception_break: false,
            exception_continue: false,
        })
    }

    pub fn break_(&mut self) -> NodeId {
        self.node(NodeKind::Break {
            exception_driven: false,
        })
    }

    pub fn continue_(&mut self) -> NodeId {
        self.node(NodeKind::Continue {
            exception_driven: false,
        })
    }

    pub fn pass(&mut self) -> NodeId {
        self.node(NodeKind::Pass)
    }

    pub fn try_except(&mut self, tried: Vec<NodeId>, handlers: Vec<NodeId>, no_raise: Vec<NodeId>) -> NodeId {
        let tried = self.sequence(tried);
        let no_raise = self.sequence(no_raise);
        self.node(NodeKind::TryExcept {
            tried,
            handlers,
            no_raise,
        })
    }

    /// `except exception_types as target:` clause
    pub fn handler(
        &mut self,
        exception_types: Option<NodeId>,
        target: Option<&str>,
        body: Vec<NodeId>,
    ) -> NodeId {
        let target = target.map(|name| self.target(name));
        let body = self.sequence(body);
        self.node(NodeKind::ExceptHandler {
            exception_types,
            target,
            body,
        })
    }

    pub fn try_finally(&mut self, tried: Vec<NodeId>, finally: Vec<NodeId>) -> NodeId {
        let tried = self.sequence(tried);
        let finally = self.sequence(finally);
        self.node(NodeKind::TryFinally {
            tried,
            finally,
            needs_break_handling: false,
            needs_continue_handling: false,
            needs_return_handling: false,
        })
    }

    pub fn raise(&mut self, exception_type: NodeId) -> NodeId {
        self.node(NodeKind::Raise {
            exception_type: Some(exception_type),
            exception_value: None,
            reraise_local: false,
        })
    }

    /// Bare `raise`
    pub fn reraise(&mut self) -> NodeId {
        self.node(NodeKind::Raise {
            exception_type: None,
            exception_value: None,
            reraise_local: false,
        })
    }

    pub fn global(&mut self, names: &[&str]) -> NodeId {
        let names = names.iter().map(|name| self.tree.interner.intern(name)).collect();
        self.node(NodeKind::GlobalDeclaration { names })
    }

    pub fn del(&mut self, name: &str) -> NodeId {
        let target = self.target(name);
        self.node(NodeKind::DelVariable { target })
    }

    /// Python 2 `exec` statement
    pub fn exec(&mut self, source: NodeId, globals: Option<NodeId>, locals: Option<NodeId>) -> NodeId {
        self.node(NodeKind::Exec {
            source,
            globals,
            locals,
            inline_declined: false,
        })
    }

    /// `def name(parameters): body`, as an assignment of a function object
    pub fn def(&mut self, name: &str, parameters: &[&str], body: Vec<NodeId>) -> NodeId {
        let function_name = self.tree.interner.intern(name);
        let parameters = parameters.iter().map(|p| self.tree.interner.intern(p)).collect();
        let body = self.sequence(body);
        let function = self.node(NodeKind::FunctionBody {
            name: function_name,
            parameters,
            is_lambda: false,
            body,
        });
        let creation = self.node(NodeKind::FunctionCreation {
            body: function,
            defaults: Vec::new(),
        });
        self.assign(name, creation)
    }

    /// `class name(bases): body`, as an assignment of a class object
    pub fn class(&mut self, name: &str, bases: Vec<NodeId>, body: Vec<NodeId>) -> NodeId {
        let class_name = self.tree.interner.intern(name);
        let body = self.sequence(body);
        let class_body = self.node(NodeKind::ClassBody {
            name: class_name,
            body,
        });
        let creation = self.node(NodeKind::ClassCreation {
            body: class_body,
            bases,
        });
        self.assign(name, creation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_locations() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        b.at_line(4);
        let one = b.constant(1);
        let stmt = b.assign("x", one);
        b.set_body(vec![stmt]);

        assert_eq!(tree.location(stmt).line, 4);
        assert!(tree.is_attached(one));
    }

    #[test]
    fn test_def_creates_function_scope() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let none = b.none();
        let ret = b.ret(Some(none));
        let def = b.def("f", &["a"], vec![ret]);
        b.set_body(vec![def]);

        let function = tree
            .descendants(tree.root())
            .into_iter()
            .find(|id| matches!(tree.kind(*id), NodeKind::FunctionBody { .. }))
            .unwrap();
        assert!(tree.scopes.contains(function));
        assert_eq!(tree.enclosing_scope(ret), Some(function));
    }

    #[test]
    fn test_empty_blocks_are_absent() {
        let mut tree = ModuleTree::new("m", "m.py");
        let mut b = tree.builder();
        let condition = b.name("x");
        let stmt = b.if_(condition, vec![], vec![]);
        assert_eq!(tree.children(stmt), vec![condition]);
    }
}
