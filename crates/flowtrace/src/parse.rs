//! Parser: lowers the ruff AST to the internal AST.
//!
//! Unsupported syntax is rejected here, before execution, so every
//! instrumentation failure surfaces from `trace()` with a source location.
//! Chained comparisons are also rejected here: they cannot be normalised
//! into single calls without changing evaluation order.

use ruff_python_ast::{self as ast, Expr as AstExpr, Number, Stmt as AstStmt};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};
use thin_vec::ThinVec;

use crate::ast::{
    BinOpKind, BoolOpKind, CallArg, ClassDef, CmpOpKind, CodeRange, Expr, ExprLoc, FunctionDef,
    Kwarg, Literal, MethodKind, Param, ParamSpec, Stmt, StmtLoc, Target, UnaryOpKind,
};
use crate::error::InstrumentationError;
use std::rc::Rc;

type ParseResult<T> = Result<T, InstrumentationError>;

/// Parses source text into the internal AST.
pub fn parse(code: &str) -> ParseResult<Vec<StmtLoc>> {
    let mut parser = Parser::new(code);
    let parsed = parse_module(code).map_err(|e| InstrumentationError::Parse {
        message: e.to_string(),
    })?;
    let module = parsed.into_syntax();
    parser.parse_statements(module.body)
}

/// Converts ruff AST nodes, tracking enclosing definitions for qualified
/// names.
struct Parser {
    /// Byte offset of each newline, to convert ranges to line/column.
    line_ends: Vec<usize>,
    /// Enclosing definition names, for PEP 3155 style qualified names.
    qual_stack: Vec<QualSegment>,
}

enum QualSegment {
    Class(String),
    Function(String),
}

impl Parser {
    fn new(code: &str) -> Self {
        let mut line_ends = Vec::new();
        for (index, byte) in code.bytes().enumerate() {
            if byte == b'\n' {
                line_ends.push(index);
            }
        }
        Self {
            line_ends,
            qual_stack: Vec::new(),
        }
    }

    fn convert_range(&self, range: TextRange) -> CodeRange {
        let start: usize = range.start().into();
        let mut line_start = 0;
        let mut line_no = 0;
        for (index, line_end) in self.line_ends.iter().enumerate() {
            if start <= *line_end {
                line_no = index;
                break;
            }
            line_start = *line_end + 1;
            line_no = index + 1;
        }
        CodeRange::new(line_no as u32 + 1, (start - line_start) as u32)
    }

    fn unsupported<T>(&self, construct: &'static str, range: TextRange) -> ParseResult<T> {
        Err(InstrumentationError::Unsupported {
            construct,
            position: self.convert_range(range),
        })
    }

    /// Qualified name for a definition at the current nesting.
    fn qual_name(&self, name: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        for segment in &self.qual_stack {
            match segment {
                QualSegment::Class(class_name) => parts.push(class_name.clone()),
                QualSegment::Function(function_name) => {
                    parts.push(function_name.clone());
                    parts.push("<locals>".to_owned());
                }
            }
        }
        parts.push(name.to_owned());
        parts.join(".")
    }

    fn parse_statements(&mut self, statements: ThinVec<AstStmt>) -> ParseResult<Vec<StmtLoc>> {
        let mut nodes = Vec::new();
        for statement in statements {
            nodes.extend(self.parse_statement(statement)?);
        }
        Ok(nodes)
    }

    fn parse_statement(&mut self, statement: AstStmt) -> ParseResult<Vec<StmtLoc>> {
        match statement {
            AstStmt::Expr(ast::StmtExpr { value, range, .. }) => {
                let position = self.convert_range(range);
                let expr = self.parse_expression(*value)?;
                Ok(vec![StmtLoc::new(position, Stmt::Expr(expr))])
            }
            AstStmt::Assign(ast::StmtAssign {
                targets,
                value,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let targets: ParseResult<Vec<Target>> =
                    targets.into_iter().map(|t| self.parse_target(t)).collect();
                let value = self.parse_expression(*value)?;
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::Assign {
                        targets: targets?,
                        value,
                    },
                )])
            }
            AstStmt::AnnAssign(ast::StmtAnnAssign {
                target,
                value,
                range,
                ..
            }) => {
                // Annotations carry no runtime behaviour for this subset;
                // keep the assignment, drop the annotation.
                let position = self.convert_range(range);
                match value {
                    Some(value) => {
                        let target = self.parse_target(*target)?;
                        let value = self.parse_expression(*value)?;
                        Ok(vec![StmtLoc::new(
                            position,
                            Stmt::Assign {
                                targets: vec![target],
                                value,
                            },
                        )])
                    }
                    None => Ok(vec![]),
                }
            }
            AstStmt::AugAssign(ast::StmtAugAssign {
                target,
                op,
                value,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let target = self.parse_target(*target)?;
                let op = convert_binop(&op);
                let value = self.parse_expression(*value)?;
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::AugAssign { target, op, value },
                )])
            }
            AstStmt::Delete(ast::StmtDelete { targets, range, .. }) => {
                let position = self.convert_range(range);
                let targets: ParseResult<Vec<Target>> =
                    targets.into_iter().map(|t| self.parse_target(t)).collect();
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::Delete { targets: targets? },
                )])
            }
            AstStmt::FunctionDef(function) => {
                let position = self.convert_range(function.range);
                if function.is_async {
                    return self.unsupported("async function definition", function.range);
                }
                if function.type_params.is_some() {
                    return self.unsupported("type parameters", function.range);
                }
                let method_kind = self.parse_decorators(&function.decorator_list, function.range)?;
                let params = self.parse_parameters(*function.parameters)?;
                let name = function.name.id.to_string();
                let qual_name = self.qual_name(&name);
                self.qual_stack.push(QualSegment::Function(name.clone()));
                let body = self.parse_statements(function.body);
                self.qual_stack.pop();
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::FunctionDef(Rc::new(FunctionDef {
                        name,
                        qual_name,
                        params,
                        body: body?,
                        method_kind,
                        position,
                    })),
                )])
            }
            AstStmt::ClassDef(class) => {
                let position = self.convert_range(class.range);
                if class.type_params.is_some() {
                    return self.unsupported("type parameters", class.range);
                }
                if !class.decorator_list.is_empty() {
                    return self.unsupported("class decorators", class.range);
                }
                let mut bases = Vec::new();
                if let Some(arguments) = class.arguments {
                    if !arguments.keywords.is_empty() {
                        return self.unsupported("class keyword arguments", class.range);
                    }
                    for base in arguments.args.into_vec() {
                        bases.push(self.parse_expression(base)?);
                    }
                }
                let name = class.name.id.to_string();
                let qual_name = self.qual_name(&name);
                self.qual_stack.push(QualSegment::Class(name.clone()));
                let body = self.parse_statements(class.body);
                self.qual_stack.pop();
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::ClassDef(Rc::new(ClassDef {
                        name,
                        qual_name,
                        bases,
                        body: body?,
                        position,
                    })),
                )])
            }
            AstStmt::Return(ast::StmtReturn { value, range, .. }) => {
                let position = self.convert_range(range);
                let value = value.map(|v| self.parse_expression(*v)).transpose()?;
                Ok(vec![StmtLoc::new(position, Stmt::Return(value))])
            }
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let test = self.parse_expression(*test)?;
                let body = self.parse_statements(body)?;
                let orelse = self.parse_elif_else_clauses(elif_else_clauses)?;
                Ok(vec![StmtLoc::new(position, Stmt::If { test, body, orelse })])
            }
            AstStmt::While(ast::StmtWhile {
                test,
                body,
                orelse,
                range,
                ..
            }) => {
                if !orelse.is_empty() {
                    return self.unsupported("while-else", range);
                }
                let position = self.convert_range(range);
                let test = self.parse_expression(*test)?;
                let body = self.parse_statements(body)?;
                Ok(vec![StmtLoc::new(position, Stmt::While { test, body })])
            }
            AstStmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                is_async,
                range,
                ..
            }) => {
                if is_async {
                    return self.unsupported("async for", range);
                }
                if !orelse.is_empty() {
                    return self.unsupported("for-else", range);
                }
                let position = self.convert_range(range);
                let target = self.parse_target(*target)?;
                let iter = self.parse_expression(*iter)?;
                let body = self.parse_statements(body)?;
                Ok(vec![StmtLoc::new(position, Stmt::For { target, iter, body })])
            }
            AstStmt::Import(ast::StmtImport { names, range, .. }) => {
                let position = self.convert_range(range);
                let mut statements = Vec::new();
                for alias in names {
                    let module = alias.name.id.to_string();
                    if module.contains('.') {
                        return self.unsupported("dotted module import", range);
                    }
                    statements.push(StmtLoc::new(
                        position,
                        Stmt::Import {
                            module,
                            alias: alias.asname.map(|a| a.id.to_string()),
                        },
                    ));
                }
                Ok(statements)
            }
            AstStmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                range,
                ..
            }) => {
                if level != 0 {
                    return self.unsupported("relative import", range);
                }
                let Some(module) = module else {
                    return self.unsupported("import from unnamed module", range);
                };
                let position = self.convert_range(range);
                let mut imported = Vec::new();
                for alias in names {
                    let name = alias.name.id.to_string();
                    if name == "*" {
                        return self.unsupported("wildcard import", range);
                    }
                    imported.push((name, alias.asname.map(|a| a.id.to_string())));
                }
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::FromImport {
                        module: module.id.to_string(),
                        names: imported,
                    },
                )])
            }
            AstStmt::Pass(pass) => Ok(vec![StmtLoc::new(
                self.convert_range(pass.range),
                Stmt::Pass,
            )]),
            AstStmt::Break(stmt) => Ok(vec![StmtLoc::new(
                self.convert_range(stmt.range),
                Stmt::Break,
            )]),
            AstStmt::Continue(stmt) => Ok(vec![StmtLoc::new(
                self.convert_range(stmt.range),
                Stmt::Continue,
            )]),
            AstStmt::Global(stmt) => self.unsupported("global statement", stmt.range),
            AstStmt::Nonlocal(stmt) => self.unsupported("nonlocal statement", stmt.range),
            AstStmt::With(stmt) => self.unsupported("with statement", stmt.range),
            AstStmt::Try(stmt) => self.unsupported("try statement", stmt.range),
            AstStmt::Raise(stmt) => self.unsupported("raise statement", stmt.range),
            AstStmt::Assert(stmt) => self.unsupported("assert statement", stmt.range),
            AstStmt::Match(stmt) => self.unsupported("match statement", stmt.range),
            AstStmt::TypeAlias(stmt) => self.unsupported("type alias", stmt.range),
            AstStmt::IpyEscapeCommand(stmt) => {
                self.unsupported("shell escape command", stmt.range)
            }
        }
    }

    fn parse_elif_else_clauses(
        &mut self,
        clauses: Vec<ast::ElifElseClause>,
    ) -> ParseResult<Vec<StmtLoc>> {
        let mut tail: Vec<StmtLoc> = Vec::new();
        for clause in clauses.into_iter().rev() {
            match clause.test {
                Some(test) => {
                    let position = self.convert_range(clause.range);
                    let test = self.parse_expression(test)?;
                    let body = self.parse_statements(clause.body)?;
                    tail = vec![StmtLoc::new(
                        position,
                        Stmt::If {
                            test,
                            body,
                            orelse: tail,
                        },
                    )];
                }
                None => {
                    tail = self.parse_statements(clause.body)?;
                }
            }
        }
        Ok(tail)
    }

    fn parse_decorators(
        &self,
        decorators: &[ast::Decorator],
        range: TextRange,
    ) -> ParseResult<MethodKind> {
        let mut kind = MethodKind::Instance;
        for decorator in decorators {
            match &decorator.expression {
                AstExpr::Name(ast::ExprName { id, .. }) if id.as_str() == "staticmethod" => {
                    kind = MethodKind::Static;
                }
                AstExpr::Name(ast::ExprName { id, .. }) if id.as_str() == "classmethod" => {
                    kind = MethodKind::Class;
                }
                _ => return self.unsupported("decorator", range),
            }
        }
        Ok(kind)
    }

    fn parse_parameters(&mut self, parameters: ast::Parameters) -> ParseResult<ParamSpec> {
        let mut spec = ParamSpec::default();
        // Positional-only parameters join the regular list; the `/` marker
        // has no effect on the traced argument map.
        for parameter in parameters
            .posonlyargs
            .into_iter()
            .chain(parameters.args.into_iter())
        {
            let default = parameter
                .default
                .map(|d| self.parse_expression(*d))
                .transpose()?;
            spec.args.push(Param {
                name: parameter.parameter.name.id.to_string(),
                default,
            });
        }
        spec.vararg = parameters.vararg.map(|p| p.name.id.to_string());
        for parameter in parameters.kwonlyargs {
            let default = parameter
                .default
                .map(|d| self.parse_expression(*d))
                .transpose()?;
            spec.kwonly.push(Param {
                name: parameter.parameter.name.id.to_string(),
                default,
            });
        }
        spec.kwarg = parameters.kwarg.map(|p| p.name.id.to_string());
        Ok(spec)
    }

    fn parse_target(&mut self, expr: AstExpr) -> ParseResult<Target> {
        match expr {
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Target::Name(id.to_string())),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => {
                let elements: ParseResult<Vec<Target>> =
                    elts.into_iter().map(|e| self.parse_target(e)).collect();
                Ok(Target::Tuple(elements?))
            }
            AstExpr::List(ast::ExprList { elts, .. }) => {
                let elements: ParseResult<Vec<Target>> =
                    elts.into_iter().map(|e| self.parse_target(e)).collect();
                Ok(Target::List(elements?))
            }
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Target::Attribute {
                object: self.parse_expression(*value)?,
                attr: attr.id.to_string(),
            }),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Target::Subscript {
                object: self.parse_expression(*value)?,
                index: self.parse_expression(*slice)?,
            }),
            AstExpr::Starred(starred) => self.unsupported("starred assignment target", starred.range),
            other => self.unsupported("assignment target", other.range()),
        }
    }

    fn parse_expression(&mut self, expr: AstExpr) -> ParseResult<ExprLoc> {
        match expr {
            AstExpr::Name(ast::ExprName { id, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Name(id.to_string()),
            )),
            AstExpr::NoneLiteral(ast::ExprNoneLiteral { range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Literal(Literal::None),
            )),
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, range, .. }) => Ok(
                ExprLoc::new(self.convert_range(range), Expr::Literal(Literal::Bool(value))),
            ),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => {
                let position = self.convert_range(range);
                let literal = match value {
                    Number::Int(i) => match i.as_i64() {
                        Some(i) => Literal::Int(i),
                        None => {
                            return self.unsupported("integer literal exceeding 64 bits", range);
                        }
                    },
                    Number::Float(f) => Literal::Float(f),
                    Number::Complex { .. } => {
                        return self.unsupported("complex literal", range);
                    }
                };
                Ok(ExprLoc::new(position, Expr::Literal(literal)))
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, range, .. }) => Ok(
                ExprLoc::new(
                    self.convert_range(range),
                    Expr::Literal(Literal::Str(Rc::from(value.to_string().as_str()))),
                ),
            ),
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) => {
                let position = self.convert_range(range);
                let elements = self.parse_expression_list(elts, range)?;
                Ok(ExprLoc::new(position, Expr::Tuple(elements)))
            }
            AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let position = self.convert_range(range);
                let elements = self.parse_expression_list(elts, range)?;
                Ok(ExprLoc::new(position, Expr::List(elements)))
            }
            AstExpr::Set(ast::ExprSet { elts, range, .. }) => {
                let position = self.convert_range(range);
                let elements = self.parse_expression_list(elts, range)?;
                Ok(ExprLoc::new(position, Expr::Set(elements)))
            }
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let position = self.convert_range(range);
                let mut pairs = Vec::new();
                for item in items {
                    let Some(key) = item.key else {
                        return self.unsupported("dict unpacking", range);
                    };
                    pairs.push((self.parse_expression(key)?, self.parse_expression(item.value)?));
                }
                Ok(ExprLoc::new(position, Expr::Dict(pairs)))
            }
            AstExpr::Attribute(ast::ExprAttribute {
                value, attr, range, ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Attribute {
                    object: Box::new(self.parse_expression(*value)?),
                    attr: attr.id.to_string(),
                },
            )),
            AstExpr::Subscript(ast::ExprSubscript {
                value, slice, range, ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Subscript {
                    object: Box::new(self.parse_expression(*value)?),
                    index: Box::new(self.parse_expression(*slice)?),
                },
            )),
            AstExpr::Slice(ast::ExprSlice {
                lower,
                upper,
                step,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let lower = lower.map(|e| self.parse_expression(*e)).transpose()?;
                let upper = upper.map(|e| self.parse_expression(*e)).transpose()?;
                let step = step.map(|e| self.parse_expression(*e)).transpose()?;
                Ok(ExprLoc::new(
                    position,
                    Expr::SliceExpr {
                        lower: lower.map(Box::new),
                        upper: upper.map(Box::new),
                        step: step.map(Box::new),
                    },
                ))
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp {
                op, operand, range, ..
            }) => {
                let position = self.convert_range(range);
                let op = match op {
                    ast::UnaryOp::Not => UnaryOpKind::Not,
                    ast::UnaryOp::USub => UnaryOpKind::Minus,
                    ast::UnaryOp::UAdd => UnaryOpKind::Plus,
                    ast::UnaryOp::Invert => UnaryOpKind::Invert,
                };
                Ok(ExprLoc::new(
                    position,
                    Expr::UnaryOp {
                        op,
                        operand: Box::new(self.parse_expression(*operand)?),
                    },
                ))
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left,
                op,
                right,
                range,
                ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::BinaryOp {
                    op: convert_binop(&op),
                    left: Box::new(self.parse_expression(*left)?),
                    right: Box::new(self.parse_expression(*right)?),
                },
            )),
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                range,
                ..
            }) => {
                if ops.len() != 1 {
                    return Err(InstrumentationError::ChainedComparison {
                        position: self.convert_range(range),
                    });
                }
                let op = match ops[0] {
                    ast::CmpOp::Eq => CmpOpKind::Eq,
                    ast::CmpOp::NotEq => CmpOpKind::NotEq,
                    ast::CmpOp::Lt => CmpOpKind::Lt,
                    ast::CmpOp::LtE => CmpOpKind::LtE,
                    ast::CmpOp::Gt => CmpOpKind::Gt,
                    ast::CmpOp::GtE => CmpOpKind::GtE,
                    ast::CmpOp::Is => CmpOpKind::Is,
                    ast::CmpOp::IsNot => CmpOpKind::IsNot,
                    ast::CmpOp::In => CmpOpKind::In,
                    ast::CmpOp::NotIn => CmpOpKind::NotIn,
                };
                let mut comparators = comparators.into_vec();
                let right = comparators.pop().expect("one comparator per op");
                Ok(ExprLoc::new(
                    self.convert_range(range),
                    Expr::Compare {
                        op,
                        left: Box::new(self.parse_expression(*left)?),
                        right: Box::new(self.parse_expression(right)?),
                    },
                ))
            }
            AstExpr::BoolOp(ast::ExprBoolOp {
                op, values, range, ..
            }) => {
                let position = self.convert_range(range);
                let op = match op {
                    ast::BoolOp::And => BoolOpKind::And,
                    ast::BoolOp::Or => BoolOpKind::Or,
                };
                let values: ParseResult<Vec<ExprLoc>> = values
                    .into_iter()
                    .map(|v| self.parse_expression(v))
                    .collect();
                Ok(ExprLoc::new(
                    position,
                    Expr::BoolOp {
                        op,
                        values: values?,
                    },
                ))
            }
            AstExpr::If(ast::ExprIf {
                test,
                body,
                orelse,
                range,
                ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::IfExpr {
                    test: Box::new(self.parse_expression(*test)?),
                    body: Box::new(self.parse_expression(*body)?),
                    orelse: Box::new(self.parse_expression(*orelse)?),
                },
            )),
            AstExpr::Lambda(ast::ExprLambda {
                parameters,
                body,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let params = match parameters {
                    Some(parameters) => self.parse_parameters(*parameters)?,
                    None => ParamSpec::default(),
                };
                let qual_name = self.qual_name("<lambda>");
                let body_expr = self.parse_expression(*body)?;
                let body = vec![StmtLoc::new(position, Stmt::Return(Some(body_expr)))];
                Ok(ExprLoc::new(
                    position,
                    Expr::Lambda {
                        def: Rc::new(FunctionDef {
                            name: "<lambda>".to_owned(),
                            qual_name,
                            params,
                            body,
                            method_kind: MethodKind::Instance,
                            position,
                        }),
                    },
                ))
            }
            AstExpr::Call(ast::ExprCall {
                func,
                arguments,
                range,
                ..
            }) => {
                let position = self.convert_range(range);
                let func = self.parse_expression(*func)?;
                let mut args = Vec::new();
                for arg in arguments.args.into_vec() {
                    match arg {
                        AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                            args.push(CallArg::Starred(self.parse_expression(*value)?));
                        }
                        other => args.push(CallArg::Positional(self.parse_expression(other)?)),
                    }
                }
                let mut keywords = Vec::new();
                for keyword in arguments.keywords.into_iter() {
                    keywords.push(Kwarg {
                        name: keyword.arg.map(|a| a.id.to_string()),
                        value: self.parse_expression(keyword.value)?,
                    });
                }
                Ok(ExprLoc::new(
                    position,
                    Expr::Call {
                        func: Box::new(func),
                        args,
                        keywords,
                    },
                ))
            }
            AstExpr::Starred(starred) => self.unsupported("starred expression", starred.range),
            AstExpr::Named(named) => self.unsupported("assignment expression", named.range),
            AstExpr::ListComp(comp) => self.unsupported("list comprehension", comp.range),
            AstExpr::SetComp(comp) => self.unsupported("set comprehension", comp.range),
            AstExpr::DictComp(comp) => self.unsupported("dict comprehension", comp.range),
            AstExpr::Generator(generator) => {
                self.unsupported("generator expression", generator.range)
            }
            AstExpr::Await(await_expr) => self.unsupported("await expression", await_expr.range),
            AstExpr::Yield(yield_expr) => self.unsupported("yield expression", yield_expr.range),
            AstExpr::YieldFrom(yield_from) => {
                self.unsupported("yield from expression", yield_from.range)
            }
            AstExpr::FString(fstring) => self.unsupported("f-string", fstring.range),
            AstExpr::BytesLiteral(bytes) => self.unsupported("bytes literal", bytes.range),
            AstExpr::EllipsisLiteral(ellipsis) => {
                self.unsupported("ellipsis literal", ellipsis.range)
            }
            other => self.unsupported("expression", other.range()),
        }
    }

    fn parse_expression_list(
        &mut self,
        elements: Vec<AstExpr>,
        range: TextRange,
    ) -> ParseResult<Vec<ExprLoc>> {
        let mut parsed = Vec::new();
        for element in elements {
            if matches!(element, AstExpr::Starred(_)) {
                return self.unsupported("starred element in literal", range);
            }
            parsed.push(self.parse_expression(element)?);
        }
        Ok(parsed)
    }
}

fn convert_binop(op: &ast::Operator) -> BinOpKind {
    match op {
        ast::Operator::Add => BinOpKind::Add,
        ast::Operator::Sub => BinOpKind::Sub,
        ast::Operator::Mult => BinOpKind::Mul,
        ast::Operator::Div => BinOpKind::Div,
        ast::Operator::FloorDiv => BinOpKind::FloorDiv,
        ast::Operator::Mod => BinOpKind::Mod,
        ast::Operator::Pow => BinOpKind::Pow,
        ast::Operator::MatMult => BinOpKind::MatMul,
        ast::Operator::LShift => BinOpKind::LShift,
        ast::Operator::RShift => BinOpKind::RShift,
        ast::Operator::BitAnd => BinOpKind::BitAnd,
        ast::Operator::BitOr => BinOpKind::BitOr,
        ast::Operator::BitXor => BinOpKind::BitXor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignment() {
        let nodes = parse("x = f(1)").unwrap();
        assert_eq!(nodes.len(), 1);
        let Stmt::Assign { targets, value } = &nodes[0].stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(targets[0], Target::Name(ref n) if n == "x"));
        assert!(matches!(value.expr, Expr::Call { .. }));
    }

    #[test]
    fn qualifies_nested_definitions() {
        let nodes = parse("def outer():\n    def inner():\n        pass\n").unwrap();
        let Stmt::FunctionDef(outer) = &nodes[0].stmt else {
            panic!("expected def");
        };
        let Stmt::FunctionDef(inner) = &outer.body[0].stmt else {
            panic!("expected nested def");
        };
        assert_eq!(inner.qual_name, "outer.<locals>.inner");
    }

    #[test]
    fn qualifies_methods_with_class_name() {
        let nodes = parse("class Foo:\n    def bar(self):\n        pass\n").unwrap();
        let Stmt::ClassDef(class) = &nodes[0].stmt else {
            panic!("expected class");
        };
        let Stmt::FunctionDef(method) = &class.body[0].stmt else {
            panic!("expected method");
        };
        assert_eq!(method.qual_name, "Foo.bar");
    }

    #[test]
    fn rejects_chained_comparison() {
        let error = parse("x = a < b < c").unwrap_err();
        assert!(matches!(
            error,
            InstrumentationError::ChainedComparison { .. }
        ));
    }

    #[test]
    fn rejects_comprehensions() {
        let error = parse("x = [i for i in y]").unwrap_err();
        assert!(matches!(error, InstrumentationError::Unsupported { .. }));
    }

    #[test]
    fn reports_line_numbers() {
        let error = parse("x = 1\ny = [i for i in z]\n").unwrap_err();
        let InstrumentationError::Unsupported { position, .. } = error else {
            panic!("expected unsupported");
        };
        assert_eq!(position.line, 2);
    }
}
