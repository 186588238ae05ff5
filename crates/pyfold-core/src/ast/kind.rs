use super::constant::Constant;
use super::operators::{BinaryOp, BoolOp, Builtin, CompareOp, ContractionKind, UnaryOp};
use super::tree::NodeId;
use crate::scope::VariableId;
use crate::string_interner::StringId;

/// What an import did to the module set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportRecursion {
    /// Not yet looked at by module recursion
    Pending,
    /// Module found and added to the session
    Embedded,
    /// Module found but left to be imported at run time
    External,
    /// The resolver did not find the module
    NotFound,
}

/// Role of a node kind, the basis of every capability predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Scope,
    Statement,
    Expression,
    Target,
    Auxiliary,
}

/// Static description of one node kind
#[derive(Debug, Clone, Copy)]
pub struct NodeSpec {
    pub tag: NodeTag,
    pub kind_name: &'static str,
    pub role: NodeRole,
    pub slots: &'static [&'static str],
}

macro_rules! node_registry {
    ($($tag:ident => $name:literal, $role:ident, [$($slot:literal),*];)*) => {
        /// Discriminant of `NodeKind`, fixed at construction
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum NodeTag {
            $($tag),*
        }

        /// Every node kind with its name, role and ordered child slots
        pub static NODE_REGISTRY: &[NodeSpec] = &[
            $(NodeSpec {
                tag: NodeTag::$tag,
                kind_name: $name,
                role: NodeRole::$role,
                slots: &[$($slot),*],
            }),*
        ];

        impl NodeTag {
            pub const ALL: &'static [NodeTag] = &[$(NodeTag::$tag),*];
        }
    };
}

node_registry! {
    Module => "COMPILED_PYTHON_MODULE", Scope, ["body"];
    Package => "COMPILED_PYTHON_PACKAGE", Scope, ["body"];
    FunctionBody => "EXPRESSION_FUNCTION_BODY", Scope, ["body"];
    ClassBody => "EXPRESSION_CLASS_BODY", Scope, ["body"];
    ContractionBody => "EXPRESSION_CONTRACTION_BODY", Scope, ["target", "conditions", "element"];

    StatementsSequence => "STATEMENTS_SEQUENCE", Statement, ["statements"];
    Assignment => "STATEMENT_ASSIGNMENT", Statement, ["target", "source"];
    AssignmentUnpack => "STATEMENT_ASSIGNMENT_UNPACK", Statement, ["targets", "source"];
    DelVariable => "STATEMENT_DEL_VARIABLE", Statement, ["target"];
    ExpressionOnly => "STATEMENT_EXPRESSION_ONLY", Statement, ["expression"];
    Return => "STATEMENT_RETURN", Statement, ["expression"];
    If => "STATEMENT_CONDITIONAL", Statement, ["condition", "yes_branch", "no_branch"];
    While => "STATEMENT_WHILE_LOOP", Statement, ["condition", "body", "no_enter"];
    For => "STATEMENT_FOR_LOOP", Statement, ["target", "iterated", "body", "no_break"];
    Break => "STATEMENT_BREAK_LOOP", Statement, [];
    Continue => "STATEMENT_CONTINUE_LOOP", Statement, [];
    TryExcept => "STATEMENT_TRY_EXCEPT", Statement, ["tried", "handlers", "no_raise"];
    TryFinally => "STATEMENT_TRY_FINALLY", Statement, ["tried", "finally"];
    Raise => "STATEMENT_RAISE_EXCEPTION", Statement, ["exception_type", "exception_value"];
    Pass => "STATEMENT_PASS", Statement, [];
    GlobalDeclaration => "STATEMENT_DECLARE_GLOBAL", Statement, [];
    Exec => "STATEMENT_EXEC", Statement, ["source", "globals", "locals"];

    ExceptHandler => "STATEMENT_EXCEPT_HANDLER", Auxiliary, ["exception_types", "target", "body"];
    KeyValuePair => "KEY_VALUE_PAIR", Auxiliary, ["key", "value"];

    TargetVariableRef => "ASSIGN_TARGET_VARIABLE_REF", Target, [];
    TargetTempVariableRef => "ASSIGN_TARGET_TEMP_VARIABLE_REF", Target, [];
    TargetAttribute => "ASSIGN_TARGET_ATTRIBUTE", Target, ["source"];
    TargetSubscript => "ASSIGN_TARGET_SUBSCRIPT", Target, ["source", "subscript"];

    Constant => "EXPRESSION_CONSTANT_REF", Expression, [];
    VariableRef => "EXPRESSION_VARIABLE_REF", Expression, [];
    TempVariableRef => "EXPRESSION_TEMP_VARIABLE_REF", Expression, [];
    BuiltinRef => "EXPRESSION_BUILTIN_REF", Expression, [];
    Call => "EXPRESSION_CALL", Expression, ["called", "args"];
    BuiltinCall => "EXPRESSION_BUILTIN_CALL", Expression, ["args"];
    BuiltinMakeException => "EXPRESSION_BUILTIN_MAKE_EXCEPTION", Expression, ["args"];
    AttributeLookup => "EXPRESSION_ATTRIBUTE_LOOKUP", Expression, ["source"];
    Subscript => "EXPRESSION_SUBSCRIPT_LOOKUP", Expression, ["source", "subscript"];
    BinaryOperation => "EXPRESSION_OPERATION_BINARY", Expression, ["left", "right"];
    UnaryOperation => "EXPRESSION_OPERATION_UNARY", Expression, ["operand"];
    Comparison => "EXPRESSION_COMPARISON", Expression, ["left", "right"];
    BoolOperation => "EXPRESSION_BOOL_OPERATION", Expression, ["left", "right"];
    Conditional => "EXPRESSION_CONDITIONAL", Expression, ["condition", "yes", "no"];
    MakeTuple => "EXPRESSION_MAKE_TUPLE", Expression, ["elements"];
    MakeList => "EXPRESSION_MAKE_LIST", Expression, ["elements"];
    MakeSet => "EXPRESSION_MAKE_SET", Expression, ["elements"];
    MakeDict => "EXPRESSION_MAKE_DICT", Expression, ["pairs"];
    FunctionCreation => "EXPRESSION_FUNCTION_CREATION", Expression, ["body", "defaults"];
    ClassCreation => "EXPRESSION_CLASS_CREATION", Expression, ["body", "bases"];
    Contraction => "EXPRESSION_CONTRACTION", Expression, ["iterated", "body"];
    ImportModule => "EXPRESSION_IMPORT_MODULE", Expression, [];
    ImportName => "EXPRESSION_IMPORT_NAME", Expression, ["module"];
    BuiltinLocals => "EXPRESSION_BUILTIN_LOCALS", Expression, [];
    BuiltinGlobals => "EXPRESSION_BUILTIN_GLOBALS", Expression, [];
    BuiltinEval => "EXPRESSION_BUILTIN_EVAL", Expression, ["source", "globals", "locals"];
}

impl NodeTag {
    pub fn spec(&self) -> &'static NodeSpec {
        &NODE_REGISTRY[*self as usize]
    }

    pub fn kind_name(&self) -> &'static str {
        self.spec().kind_name
    }

    pub fn role(&self) -> NodeRole {
        self.spec().role
    }
}

/// One child slot of a node, borrowed either shared or mutably
#[derive(Debug)]
pub enum Slot<S, O, L> {
    Single(S),
    Optional(O),
    List(L),
}

pub type SlotRef<'a> = Slot<&'a NodeId, &'a Option<NodeId>, &'a Vec<NodeId>>;
pub type SlotMut<'a> = Slot<&'a mut NodeId, &'a mut Option<NodeId>, &'a mut Vec<NodeId>>;

/// Node payload: non-child attributes plus named child slots
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Module {
        name: String,
        body: Option<NodeId>,
    },
    Package {
        name: String,
        body: Option<NodeId>,
    },
    FunctionBody {
        name: StringId,
        parameters: Vec<StringId>,
        is_lambda: bool,
        body: Option<NodeId>,
    },
    ClassBody {
        name: StringId,
        body: Option<NodeId>,
    },
    ContractionBody {
        kind: ContractionKind,
        target: NodeId,
        conditions: Vec<NodeId>,
        element: NodeId,
    },

    StatementsSequence {
        statements: Vec<NodeId>,
    },
    Assignment {
        target: NodeId,
        source: NodeId,
    },
    AssignmentUnpack {
        targets: Vec<NodeId>,
        source: NodeId,
    },
    DelVariable {
        target: NodeId,
    },
    ExpressionOnly {
        expression: NodeId,
    },
    Return {
        expression: Option<NodeId>,
    },
    If {
        condition: NodeId,
        yes_branch: Option<NodeId>,
        no_branch: Option<NodeId>,
    },
    While {
        condition: NodeId,
        body: Option<NodeId>,
        no_enter: Option<NodeId>,
        exception_break: bool,
        exception_continue: bool,
    },
    For {
        target: NodeId,
        iterated: NodeId,
        body: Option<NodeId>,
        no_break: Option<NodeId>,
        exception_break: bool,
        exception_continue: bool,
    },
    Break {
        exception_driven: bool,
    },
    Continue {
        exception_driven: bool,
    },
    TryExcept {
        tried: Option<NodeId>,
        handlers: Vec<NodeId>,
        no_raise: Option<NodeId>,
    },
    TryFinally {
        tried: Option<NodeId>,
        finally: Option<NodeId>,
        needs_break_handling: bool,
        needs_continue_handling: bool,
        needs_return_handling: bool,
    },
    Raise {
        exception_type: Option<NodeId>,
        exception_value: Option<NodeId>,
        reraise_local: bool,
    },
    Pass,
    GlobalDeclaration {
        names: Vec<StringId>,
    },
    Exec {
        source: NodeId,
        globals: Option<NodeId>,
        locals: Option<NodeId>,
        inline_declined: bool,
    },

    ExceptHandler {
        exception_types: Option<NodeId>,
        target: Option<NodeId>,
        body: Option<NodeId>,
    },
    KeyValuePair {
        key: NodeId,
        value: NodeId,
    },

    TargetVariableRef {
        name: StringId,
        variable: Option<VariableId>,
    },
    TargetTempVariableRef {
        variable: VariableId,
    },
    TargetAttribute {
        source: NodeId,
        attribute: StringId,
    },
    TargetSubscript {
        source: NodeId,
        subscript: NodeId,
    },

    Constant {
        value: Constant,
    },
    VariableRef {
        name: StringId,
        variable: Option<VariableId>,
        may_raise_unbound: bool,
    },
    TempVariableRef {
        variable: VariableId,
    },
    BuiltinRef {
        builtin: Builtin,
    },
    Call {
        called: NodeId,
        args: Vec<NodeId>,
    },
    BuiltinCall {
        builtin: Builtin,
        args: Vec<NodeId>,
    },
    BuiltinMakeException {
        exception: Builtin,
        args: Vec<NodeId>,
    },
    AttributeLookup {
        source: NodeId,
        attribute: StringId,
    },
    Subscript {
        source: NodeId,
        subscript: NodeId,
    },
    BinaryOperation {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    UnaryOperation {
        op: UnaryOp,
        operand: NodeId,
    },
    Comparison {
        op: CompareOp,
        left: NodeId,
        right: NodeId,
    },
    BoolOperation {
        op: BoolOp,
        left: NodeId,
        right: NodeId,
    },
    Conditional {
        condition: NodeId,
        yes: NodeId,
        no: NodeId,
    },
    MakeTuple {
        elements: Vec<NodeId>,
    },
    MakeList {
        elements: Vec<NodeId>,
    },
    MakeSet {
        elements: Vec<NodeId>,
    },
    MakeDict {
        pairs: Vec<NodeId>,
    },
    FunctionCreation {
        body: NodeId,
        defaults: Vec<NodeId>,
    },
    ClassCreation {
        body: NodeId,
        bases: Vec<NodeId>,
    },
    Contraction {
        iterated: NodeId,
        body: NodeId,
    },
    ImportModule {
        module_name: String,
        level: u32,
        recursion: ImportRecursion,
    },
    ImportName {
        module: NodeId,
        name: StringId,
    },
    BuiltinLocals,
    BuiltinGlobals,
    BuiltinEval {
        source: NodeId,
        globals: Option<NodeId>,
        locals: Option<NodeId>,
        inline_declined: bool,
    },
}

// Shared by `slots` and `slots_mut`: default binding modes turn the
// bindings into `&` or `&mut` depending on how the kind is matched.
macro_rules! kind_slots {
    ($kind:expr) => {
        match $kind {
            NodeKind::Module { body, .. }
            | NodeKind::Package { body, .. }
            | NodeKind::FunctionBody { body, .. }
            | NodeKind::ClassBody { body, .. } => vec![Slot::Optional(body)],
            NodeKind::ContractionBody {
                target,
                conditions,
                element,
                ..
            } => vec![
                Slot::Single(target),
                Slot::List(conditions),
                Slot::Single(element),
            ],
            NodeKind::StatementsSequence { statements } => vec![Slot::List(statements)],
            NodeKind::Assignment { target, source } => {
                vec![Slot::Single(target), Slot::Single(source)]
            }
            NodeKind::AssignmentUnpack { targets, source } => {
                vec![Slot::List(targets), Slot::Single(source)]
            }
            NodeKind::DelVariable { target } => vec![Slot::Single(target)],
            NodeKind::ExpressionOnly { expression } => vec![Slot::Single(expression)],
            NodeKind::Return { expression } => vec![Slot::Optional(expression)],
            NodeKind::If {
                condition,
                yes_branch,
                no_branch,
            } => vec![
                Slot::Single(condition),
                Slot::Optional(yes_branch),
                Slot::Optional(no_branch),
            ],
            NodeKind::While {
                condition,
                body,
                no_enter,
                ..
            } => vec![
                Slot::Single(condition),
                Slot::Optional(body),
                Slot::Optional(no_enter),
            ],
            NodeKind::For {
                target,
                iterated,
                body,
                no_break,
                ..
            } => vec![
                Slot::Single(target),
                Slot::Single(iterated),
                Slot::Optional(body),
                Slot::Optional(no_break),
            ],
            NodeKind::TryExcept {
                tried,
                handlers,
                no_raise,
            } => vec![
                Slot::Optional(tried),
                Slot::List(handlers),
                Slot::Optional(no_raise),
            ],
            NodeKind::TryFinally { tried, finally, .. } => {
                vec![Slot::Optional(tried), Slot::Optional(finally)]
            }
            NodeKind::Raise {
                exception_type,
                exception_value,
                ..
            } => vec![
                Slot::Optional(exception_type),
                Slot::Optional(exception_value),
            ],
            NodeKind::Exec {
                source,
                globals,
                locals,
                ..
            }
            | NodeKind::BuiltinEval {
                source,
                globals,
                locals,
                ..
            } => vec![
                Slot::Single(source),
                Slot::Optional(globals),
                Slot::Optional(locals),
            ],
            NodeKind::ExceptHandler {
                exception_types,
                target,
                body,
            } => vec![
                Slot::Optional(exception_types),
                Slot::Optional(target),
                Slot::Optional(body),
            ],
            NodeKind::KeyValuePair { key, value } => vec![Slot::Single(key), Slot::Single(value)],
            NodeKind::TargetAttribute { source, .. } | NodeKind::AttributeLookup { source, .. } => {
                vec![Slot::Single(source)]
            }
            NodeKind::TargetSubscript { source, subscript }
            | NodeKind::Subscript { source, subscript } => {
                vec![Slot::Single(source), Slot::Single(subscript)]
            }
            NodeKind::Call { called, args } => vec![Slot::Single(called), Slot::List(args)],
            NodeKind::BuiltinCall { args, .. } | NodeKind::BuiltinMakeException { args, .. } => {
                vec![Slot::List(args)]
            }
            NodeKind::BinaryOperation { left, right, .. }
            | NodeKind::Comparison { left, right, .. }
            | NodeKind::BoolOperation { left, right, .. } => {
                vec![Slot::Single(left), Slot::Single(right)]
            }
            NodeKind::UnaryOperation { operand, .. } => vec![Slot::Single(operand)],
            NodeKind::Conditional { condition, yes, no } => vec![
                Slot::Single(condition),
                Slot::Single(yes),
                Slot::Single(no),
            ],
            NodeKind::MakeTuple { elements }
            | NodeKind::MakeList { elements }
            | NodeKind::MakeSet { elements } => vec![Slot::List(elements)],
            NodeKind::MakeDict { pairs } => vec![Slot::List(pairs)],
            NodeKind::FunctionCreation { body, defaults } => {
                vec![Slot::Single(body), Slot::List(defaults)]
            }
            NodeKind::ClassCreation { body, bases } => vec![Slot::Single(body), Slot::List(bases)],
            NodeKind::Contraction { iterated, body } => {
                vec![Slot::Single(iterated), Slot::Single(body)]
            }
            NodeKind::ImportName { module, .. } => vec![Slot::Single(module)],
            NodeKind::Break { .. }
            | NodeKind::Continue { .. }
            | NodeKind::Pass
            | NodeKind::GlobalDeclaration { .. }
            | NodeKind::TargetVariableRef { .. }
            | NodeKind::TargetTempVariableRef { .. }
            | NodeKind::Constant { .. }
            | NodeKind::VariableRef { .. }
            | NodeKind::TempVariableRef { .. }
            | NodeKind::BuiltinRef { .. }
            | NodeKind::ImportModule { .. }
            | NodeKind::BuiltinLocals
            | NodeKind::BuiltinGlobals => Vec::new(),
        }
    };
}

impl NodeKind {
    pub fn tag(&self) -> NodeTag {
        match self {
            NodeKind::Module { .. } => NodeTag::Module,
            NodeKind::Package { .. } => NodeTag::Package,
            NodeKind::FunctionBody { .. } => NodeTag::FunctionBody,
            NodeKind::ClassBody { .. } => NodeTag::ClassBody,
            NodeKind::ContractionBody { .. } => NodeTag::ContractionBody,
            NodeKind::StatementsSequence { .. } => NodeTag::StatementsSequence,
            NodeKind::Assignment { .. } => NodeTag::Assignment,
            NodeKind::AssignmentUnpack { .. } => NodeTag::AssignmentUnpack,
            NodeKind::DelVariable { .. } => NodeTag::DelVariable,
            NodeKind::ExpressionOnly { .. } => NodeTag::ExpressionOnly,
            NodeKind::Return { .. } => NodeTag::Return,
            NodeKind::If { .. } => NodeTag::If,
            NodeKind::While { .. } => NodeTag::While,
            NodeKind::For { .. } => NodeTag::For,
            NodeKind::Break { .. } => NodeTag::Break,
            NodeKind::Continue { .. } => NodeTag::Continue,
            NodeKind::TryExcept { .. } => NodeTag::TryExcept,
            NodeKind::TryFinally { .. } => NodeTag::TryFinally,
            NodeKind::Raise { .. } => NodeTag::Raise,
            NodeKind::Pass => NodeTag::Pass,
            NodeKind::GlobalDeclaration { .. } => NodeTag::GlobalDeclaration,
            NodeKind::Exec { .. } => NodeTag::Exec,
            NodeKind::ExceptHandler { .. } => NodeTag::ExceptHandler,
            NodeKind::KeyValuePair { .. } => NodeTag::KeyValuePair,
            NodeKind::TargetVariableRef { .. } => NodeTag::TargetVariableRef,
            NodeKind::TargetTempVariableRef { .. } => NodeTag::TargetTempVariableRef,
            NodeKind::TargetAttribute { .. } => NodeTag::TargetAttribute,
            NodeKind::TargetSubscript { .. } => NodeTag::TargetSubscript,
            NodeKind::Constant { .. } => NodeTag::Constant,
            NodeKind::VariableRef { .. } => NodeTag::VariableRef,
            NodeKind::TempVariableRef { .. } => NodeTag::TempVariableRef,
            NodeKind::BuiltinRef { .. } => NodeTag::BuiltinRef,
            NodeKind::Call { .. } => NodeTag::Call,
            NodeKind::BuiltinCall { .. } => NodeTag::BuiltinCall,
            NodeKind::BuiltinMakeException { .. } => NodeTag::BuiltinMakeException,
            NodeKind::AttributeLookup { .. } => NodeTag::AttributeLookup,
            NodeKind::Subscript { .. } => NodeTag::Subscript,
            NodeKind::BinaryOperation { .. } => NodeTag::BinaryOperation,
            NodeKind::UnaryOperation { .. } => NodeTag::UnaryOperation,
            NodeKind::Comparison { .. } => NodeTag::Comparison,
            NodeKind::BoolOperation { .. } => NodeTag::BoolOperation,
            NodeKind::Conditional { .. } => NodeTag::Conditional,
            NodeKind::MakeTuple { .. } => NodeTag::MakeTuple,
            NodeKind::MakeList { .. } => NodeTag::MakeList,
            NodeKind::MakeSet { .. } => NodeTag::MakeSet,
            NodeKind::MakeDict { .. } => NodeTag::MakeDict,
            NodeKind::FunctionCreation { .. } => NodeTag::FunctionCreation,
            NodeKind::ClassCreation { .. } => NodeTag::ClassCreation,
            NodeKind::Contraction { .. } => NodeTag::Contraction,
            NodeKind::ImportModule { .. } => NodeTag::ImportModule,
            NodeKind::ImportName { .. } => NodeTag::ImportName,
            NodeKind::BuiltinLocals => NodeTag::BuiltinLocals,
            NodeKind::BuiltinGlobals => NodeTag::BuiltinGlobals,
            NodeKind::BuiltinEval { .. } => NodeTag::BuiltinEval,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.tag().role()
    }

    pub fn is_expression(&self) -> bool {
        self.role() == NodeRole::Expression
    }

    pub fn is_statement(&self) -> bool {
        self.role() == NodeRole::Statement
    }

    pub fn is_target(&self) -> bool {
        self.role() == NodeRole::Target
    }

    /// Closure givers own variables and scope tables
    pub fn is_closure_giver(&self) -> bool {
        self.role() == NodeRole::Scope
    }

    /// Module-like scopes: the root of a tree
    pub fn is_module(&self) -> bool {
        matches!(self, NodeKind::Module { .. } | NodeKind::Package { .. })
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, NodeKind::While { .. } | NodeKind::For { .. })
    }

    /// Statements after which control never reaches the next statement
    pub fn is_aborting(&self) -> bool {
        matches!(
            self,
            NodeKind::Return { .. }
                | NodeKind::Raise { .. }
                | NodeKind::Break { .. }
                | NodeKind::Continue { .. }
        )
    }

    pub fn constant(&self) -> Option<&Constant> {
        match self {
            NodeKind::Constant { value } => Some(value),
            _ => None,
        }
    }

    pub fn slots(&self) -> Vec<SlotRef<'_>> {
        kind_slots!(self)
    }

    pub fn slots_mut(&mut self) -> Vec<SlotMut<'_>> {
        kind_slots!(self)
    }

    /// Children in slot order, skipping empty slots
    pub fn children(&self) -> Vec<NodeId> {
        let mut children = Vec::new();
        for slot in self.slots() {
            match slot {
                Slot::Single(id) => children.push(*id),
                Slot::Optional(id) => children.extend(id.iter().copied()),
                Slot::List(ids) => children.extend(ids.iter().copied()),
            }
        }
        children
    }

    /// Swap `old` for `new` in whichever slot holds it
    ///
    /// Returns false when `old` is not a child.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> bool {
        for slot in self.slots_mut() {
            match slot {
                Slot::Single(id) if *id == old => {
                    *id = new;
                    return true;
                }
                Slot::Optional(id) if *id == Some(old) => {
                    *id = Some(new);
                    return true;
                }
                Slot::List(ids) => {
                    if let Some(position) = ids.iter().position(|id| *id == old) {
                        ids[position] = new;
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Clear an optional slot or drop `old` from a list slot
    ///
    /// Returns false when `old` sits in a required slot or is not a child.
    pub fn remove_child(&mut self, old: NodeId) -> bool {
        for slot in self.slots_mut() {
            match slot {
                Slot::Optional(id) if *id == Some(old) => {
                    *id = None;
                    return true;
                }
                Slot::List(ids) => {
                    if let Some(position) = ids.iter().position(|id| *id == old) {
                        ids.remove(position);
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }
}
