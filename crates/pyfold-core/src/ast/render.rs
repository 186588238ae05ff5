use super::kind::NodeKind;
use super::operators::{ContractionKind, UnaryOp};
use super::tree::{ModuleTree, NodeId};
use crate::scope::VariableId;

/// Deterministic Python-like rendering of a whole module
///
/// Operators are always parenthesized, so two trees render equal exactly when
/// their shapes are equal. Used by tests and debug logging.
pub fn render(tree: &ModuleTree) -> String {
    let mut renderer = Renderer::new(tree);
    if let Some(body) = tree.children(tree.root()).first() {
        renderer.block_statements(*body);
    }
    renderer.output
}

/// Render a single statement or expression
pub fn render_node(tree: &ModuleTree, id: NodeId) -> String {
    let mut renderer = Renderer::new(tree);
    if tree.kind(id).is_expression() {
        renderer.expression(id)
    } else {
        renderer.statement(id);
        renderer.output.trim_end().to_string()
    }
}

struct Renderer<'a> {
    tree: &'a ModuleTree,
    output: String,
    indent_level: usize,
}

impl<'a> Renderer<'a> {
    fn new(tree: &'a ModuleTree) -> Self {
        Self {
            tree,
            output: String::new(),
            indent_level: 0,
        }
    }

    fn writeln(&mut self, line: &str) {
        for _ in 0..self.indent_level {
            self.output.push_str("    ");
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn name(&self, id: crate::string_interner::StringId) -> &'a str {
        self.tree.resolve_name(id)
    }

    fn temp(&self, variable: VariableId) -> String {
        format!("<tmp#{}>", variable.index())
    }

    fn block_statements(&mut self, sequence: NodeId) {
        for statement in self.tree.statements(sequence).to_vec() {
            self.statement(statement);
        }
    }

    /// Indented block; an absent block renders as `pass`
    fn block(&mut self, header: &str, body: Option<NodeId>) {
        self.writeln(header);
        self.indent();
        match body {
            Some(sequence) => self.block_statements(sequence),
            None => self.writeln("pass"),
        }
        self.dedent();
    }

    fn statement(&mut self, id: NodeId) {
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::StatementsSequence { .. } => self.block_statements(id),
            NodeKind::Assignment { target, source } => match tree.kind(*source) {
                NodeKind::FunctionCreation { body, .. } if !self.is_lambda(*body) => {
                    self.function_definition(*body);
                }
                NodeKind::ClassCreation { body, bases } => {
                    let NodeKind::ClassBody { name, body: class_body } = tree.kind(*body) else {
                        unreachable!("class creation without class body");
                    };
                    let bases: Vec<String> = bases.iter().map(|b| self.expression(*b)).collect();
                    let header = format!("class {}({}):", self.name(*name), bases.join(", "));
                    self.block(&header, *class_body);
                }
                _ => {
                    let line = format!("{} = {}", self.target(*target), self.expression(*source));
                    self.writeln(&line);
                }
            },
            NodeKind::AssignmentUnpack { targets, source } => {
                let targets: Vec<String> = targets.iter().map(|t| self.target(*t)).collect();
                let line = format!("{} = {}", targets.join(", "), self.expression(*source));
                self.writeln(&line);
            }
            NodeKind::DelVariable { target } => {
                let line = format!("del {}", self.target(*target));
                self.writeln(&line);
            }
            NodeKind::ExpressionOnly { expression } => {
                let line = self.expression(*expression);
                self.writeln(&line);
            }
            NodeKind::Return { expression } => match expression {
                Some(expression) => {
                    let line = format!("return {}", self.expression(*expression));
                    self.writeln(&line);
                }
                None => self.writeln("return"),
            },
            NodeKind::If {
                condition,
                yes_branch,
                no_branch,
            } => {
                let header = format!("if {}:", self.expression(*condition));
                self.block(&header, *yes_branch);
                if no_branch.is_some() {
                    self.block("else:", *no_branch);
                }
            }
            NodeKind::While {
                condition,
                body,
                no_enter,
                ..
            } => {
                let header = format!("while {}:", self.expression(*condition));
                self.block(&header, *body);
                if no_enter.is_some() {
                    self.block("else:", *no_enter);
                }
            }
            NodeKind::For {
                target,
                iterated,
                body,
                no_break,
                ..
            } => {
                let header = format!("for {} in {}:", self.target(*target), self.expression(*iterated));
                self.block(&header, *body);
                if no_break.is_some() {
                    self.block("else:", *no_break);
                }
            }
            NodeKind::Break { .. } => self.writeln("break"),
            NodeKind::Continue { .. } => self.writeln("continue"),
            NodeKind::Pass => self.writeln("pass"),
            NodeKind::TryExcept {
                tried,
                handlers,
                no_raise,
            } => {
                self.block("try:", *tried);
                for handler in handlers {
                    self.statement(*handler);
                }
                if no_raise.is_some() {
                    self.block("else:", *no_raise);
                }
            }
            NodeKind::ExceptHandler {
                exception_types,
                target,
                body,
            } => {
                let mut header = String::from("except");
                if let Some(types) = exception_types {
                    header.push(' ');
                    header.push_str(&self.expression(*types));
                }
                if let Some(target) = target {
                    header.push_str(" as ");
                    header.push_str(&self.target(*target));
                }
                header.push(':');
                self.block(&header, *body);
            }
            NodeKind::TryFinally { tried, finally, .. } => {
                self.block("try:", *tried);
                self.block("finally:", *finally);
            }
            NodeKind::Raise {
                exception_type,
                exception_value,
                ..
            } => {
                let line = match (exception_type, exception_value) {
                    (Some(t), Some(v)) => format!("raise {}, {}", self.expression(*t), self.expression(*v)),
                    (Some(t), None) => format!("raise {}", self.expression(*t)),
                    _ => "raise".to_string(),
                };
                self.writeln(&line);
            }
            NodeKind::GlobalDeclaration { names } => {
                let names: Vec<&str> = names.iter().map(|n| self.name(*n)).collect();
                let line = format!("global {}", names.join(", "));
                self.writeln(&line);
            }
            NodeKind::Exec {
                source,
                globals,
                locals,
                ..
            } => {
                let mut line = format!("exec {}", self.expression(*source));
                if let Some(globals) = globals {
                    line.push_str(" in ");
                    line.push_str(&self.expression(*globals));
                    if let Some(locals) = locals {
                        line.push_str(", ");
                        line.push_str(&self.expression(*locals));
                    }
                }
                self.writeln(&line);
            }
            other => {
                let line = format!("<{}>", other.tag().kind_name());
                self.writeln(&line);
            }
        }
    }

    fn is_lambda(&self, function: NodeId) -> bool {
        matches!(self.tree.kind(function), NodeKind::FunctionBody { is_lambda: true, .. })
    }

    fn function_definition(&mut self, function: NodeId) {
        let tree = self.tree;
        let NodeKind::FunctionBody {
            name,
            parameters,
            body,
            ..
        } = tree.kind(function)
        else {
            unreachable!("function creation without function body");
        };
        let parameters: Vec<&str> = parameters.iter().map(|p| self.name(*p)).collect();
        let header = format!("def {}({}):", self.name(*name), parameters.join(", "));
        self.block(&header, *body);
    }

    fn target(&mut self, id: NodeId) -> String {
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::TargetVariableRef { name, .. } => self.name(*name).to_string(),
            NodeKind::TargetTempVariableRef { variable } => self.temp(*variable),
            NodeKind::TargetAttribute { source, attribute } => {
                format!("{}.{}", self.expression(*source), self.name(*attribute))
            }
            NodeKind::TargetSubscript { source, subscript } => {
                format!("{}[{}]", self.expression(*source), self.expression(*subscript))
            }
            other => format!("<{}>", other.tag().kind_name()),
        }
    }

    fn list(&mut self, elements: &[NodeId]) -> String {
        let rendered: Vec<String> = elements.iter().map(|e| self.expression(*e)).collect();
        rendered.join(", ")
    }

    fn expression(&mut self, id: NodeId) -> String {
        let tree = self.tree;
        match tree.kind(id) {
            NodeKind::Constant { value } => value.repr(),
            NodeKind::VariableRef { name, .. } => self.name(*name).to_string(),
            NodeKind::TempVariableRef { variable } => self.temp(*variable),
            NodeKind::BuiltinRef { builtin } => builtin.name().to_string(),
            NodeKind::Call { called, args } => {
                format!("{}({})", self.expression(*called), self.list(args))
            }
            NodeKind::BuiltinCall { builtin, args } => format!("{}({})", builtin.name(), self.list(args)),
            NodeKind::BuiltinMakeException { exception, args } => {
                format!("{}({})", exception.name(), self.list(args))
            }
            NodeKind::AttributeLookup { source, attribute } => {
                format!("{}.{}", self.expression(*source), self.name(*attribute))
            }
            NodeKind::Subscript { source, subscript } => {
                format!("{}[{}]", self.expression(*source), self.expression(*subscript))
            }
            NodeKind::BinaryOperation { op, left, right } => format!(
                "({} {} {})",
                self.expression(*left),
                op.as_str(),
                self.expression(*right)
            ),
            NodeKind::UnaryOperation { op, operand } => match op {
                UnaryOp::Not => format!("(not {})", self.expression(*operand)),
                _ => format!("({}{})", op.as_str(), self.expression(*operand)),
            },
            NodeKind::Comparison { op, left, right } => format!(
                "({} {} {})",
                self.expression(*left),
                op.as_str(),
                self.expression(*right)
            ),
            NodeKind::BoolOperation { op, left, right } => format!(
                "({} {} {})",
                self.expression(*left),
                op.as_str(),
                self.expression(*right)
            ),
            NodeKind::Conditional { condition, yes, no } => format!(
                "({} if {} else {})",
                self.expression(*yes),
                self.expression(*condition),
                self.expression(*no)
            ),
            NodeKind::MakeTuple { elements } => match elements.len() {
                1 => format!("({},)", self.expression(elements[0])),
                _ => format!("({})", self.list(elements)),
            },
            NodeKind::MakeList { elements } => format!("[{}]", self.list(elements)),
            NodeKind::MakeSet { elements } if elements.is_empty() => "set()".to_string(),
            NodeKind::MakeSet { elements } => format!("{{{}}}", self.list(elements)),
            NodeKind::MakeDict { pairs } => format!("{{{}}}", self.list(pairs)),
            NodeKind::KeyValuePair { key, value } => {
                format!("{}: {}", self.expression(*key), self.expression(*value))
            }
            NodeKind::FunctionCreation { body, .. } => match tree.kind(*body) {
                NodeKind::FunctionBody {
                    parameters,
                    is_lambda: true,
                    body: Some(sequence),
                    ..
                } => {
                    let parameters: Vec<&str> = parameters.iter().map(|p| self.name(*p)).collect();
                    let result = match tree.statements(*sequence).first().map(|s| tree.kind(*s)) {
                        Some(NodeKind::Return {
                            expression: Some(expression),
                        }) => self.expression(*expression),
                        _ => "None".to_string(),
                    };
                    if parameters.is_empty() {
                        format!("(lambda: {result})")
                    } else {
                        format!("(lambda {}: {result})", parameters.join(", "))
                    }
                }
                NodeKind::FunctionBody { name, .. } => format!("<function {}>", self.name(*name)),
                _ => "<function>".to_string(),
            },
            NodeKind::ClassCreation { body, .. } => match tree.kind(*body) {
                NodeKind::ClassBody { name, .. } => format!("<class {}>", self.name(*name)),
                _ => "<class>".to_string(),
            },
            NodeKind::Contraction { iterated, body } => {
                let NodeKind::ContractionBody {
                    kind,
                    target,
                    conditions,
                    element,
                } = tree.kind(*body)
                else {
                    unreachable!("contraction without body");
                };
                let mut inner = format!(
                    "{} for {} in {}",
                    self.expression(*element),
                    self.target(*target),
                    self.expression(*iterated)
                );
                for condition in conditions {
                    inner.push_str(" if ");
                    inner.push_str(&self.expression(*condition));
                }
                match kind {
                    ContractionKind::List => format!("[{inner}]"),
                    ContractionKind::Set | ContractionKind::Dict => format!("{{{inner}}}"),
                    ContractionKind::Generator => format!("({inner})"),
                }
            }
            NodeKind::ImportModule {
                module_name, level, ..
            } => {
                if *level == 0 {
                    format!("__import__('{module_name}')")
                } else {
                    format!("__import__('{module_name}', level={level})")
                }
            }
            NodeKind::ImportName { module, name } => {
                format!("{}.{}", self.expression(*module), self.name(*name))
            }
            NodeKind::BuiltinLocals => "locals()".to_string(),
            NodeKind::BuiltinGlobals => "globals()".to_string(),
            NodeKind::BuiltinEval {
                source,
                globals,
                locals,
                ..
            } => {
                let mut args = vec![self.expression(*source)];
                if let Some(globals) = globals {
                    args.push(self.expression(*globals));
                }
                if let Some(locals) = locals {
                    args.push(self.expression(*locals));
                }
                format!("eval({})", args.join(", "))
            }
            other => format!("<{}>", other.tag().kind_name()),
        }
    }
}
