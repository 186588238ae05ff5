use super::constant::Constant;
use super::kind::NodeKind;
use super::tree::{ModuleTree, NodeId};

impl ModuleTree {
    /// Whether evaluating `id` may do anything observable
    ///
    /// Unknown kinds answer yes. Raising counts as a side effect.
    pub fn may_have_side_effects(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Constant { .. }
            | NodeKind::TempVariableRef { .. }
            | NodeKind::BuiltinRef { .. }
            | NodeKind::BuiltinLocals
            | NodeKind::BuiltinGlobals
            | NodeKind::Pass => false,
            NodeKind::VariableRef {
                may_raise_unbound, ..
            } => *may_raise_unbound,
            NodeKind::MakeTuple { elements } | NodeKind::MakeList { elements } => {
                elements.iter().any(|e| self.may_have_side_effects(*e))
            }
            // Hashing a non-constant element may run user code
            NodeKind::MakeSet { elements } => !elements.iter().all(|e| self.is_hashable_constant(*e)),
            NodeKind::MakeDict { pairs } => pairs.iter().any(|p| self.may_have_side_effects(*p)),
            NodeKind::KeyValuePair { key, value } => {
                !self.is_hashable_constant(*key) || self.may_have_side_effects(*value)
            }
            NodeKind::Conditional { condition, yes, no } => {
                self.may_have_side_effects(*condition)
                    || self.may_have_side_effects(*yes)
                    || self.may_have_side_effects(*no)
            }
            NodeKind::BoolOperation { left, right, .. } => {
                self.may_have_side_effects(*left) || self.may_have_side_effects(*right)
            }
            NodeKind::FunctionCreation { defaults, .. } => {
                defaults.iter().any(|d| self.may_have_side_effects(*d))
            }
            NodeKind::BuiltinMakeException { args, .. } => {
                args.iter().any(|a| self.may_have_side_effects(*a))
            }
            _ => true,
        }
    }

    /// Whether evaluating `id` may raise
    pub fn may_raise_exception(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Pass | NodeKind::GlobalDeclaration { .. } => false,
            NodeKind::Assignment { target, source } => {
                !matches!(
                    self.kind(*target),
                    NodeKind::TargetVariableRef { .. } | NodeKind::TargetTempVariableRef { .. }
                ) || self.may_raise_exception(*source)
            }
            NodeKind::ExpressionOnly { expression } => self.may_raise_exception(*expression),
            NodeKind::DelVariable { target } => {
                !matches!(self.kind(*target), NodeKind::TargetTempVariableRef { .. })
            }
            NodeKind::StatementsSequence { statements } => {
                statements.iter().any(|s| self.may_raise_exception(*s))
            }
            kind if kind.is_expression() || matches!(kind, NodeKind::KeyValuePair { .. }) => {
                self.may_have_side_effects(id)
            }
            _ => true,
        }
    }

    /// Expression statement that can be dropped without changing behavior
    pub fn is_removable_expression(&self, id: NodeId) -> bool {
        !self.may_have_side_effects(id)
    }

    pub fn is_hashable_constant(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Constant { value } => is_hashable(value),
            _ => false,
        }
    }

    /// Constant value of a node, including tuples made only of constants
    pub fn compile_time_constant(&self, id: NodeId) -> Option<Constant> {
        match self.kind(id) {
            NodeKind::Constant { value } => Some(value.clone()),
            NodeKind::MakeTuple { elements } => elements
                .iter()
                .map(|e| self.compile_time_constant(*e))
                .collect::<Option<Vec<_>>>()
                .map(Constant::Tuple),
            _ => None,
        }
    }
}

fn is_hashable(value: &Constant) -> bool {
    match value {
        Constant::Tuple(items) => items.iter().all(is_hashable),
        Constant::Float(f) => !f.is_nan(),
        _ => true,
    }
}
