//! AST normalisation.
//!
//! Rewrites non-call syntax into plain calls so a single call-tracing
//! mechanism suffices downstream. Passes are applied in a fixed order
//! (order matters):
//!
//! 1. eliminate multiple assignment targets;
//! 2. attribute access to `getattr`/`setattr`/`delattr` calls;
//! 3. indexing to `getitem`/`setitem`/`delitem` calls, slices to explicit
//!    `slice(...)` calls;
//! 4. unary, binary and comparison operators to `operator` module calls;
//! 5. in-place operators on names to assignment plus call;
//! 6. container literals in load context to `__list__`/`__tuple__`/
//!    `__set__`/`__dict__` calls.
//!
//! The composite is idempotent past the first pass: a second application
//! finds none of the rewritten forms left.

use std::rc::Rc;

use crate::ast::{
    CallArg, CmpOpKind, CodeRange, Expr, ExprLoc, Kwarg, Literal, Stmt, StmtLoc, Target,
    UnaryOpKind,
};
use crate::builtins::Builtin;
use crate::error::InstrumentationError;
use crate::operator::OperatorFn;

type PassResult<T> = Result<T, InstrumentationError>;

/// Applies all normalisation passes in order.
pub fn normalise(statements: Vec<StmtLoc>) -> PassResult<Vec<StmtLoc>> {
    let statements = rewrite_block(&mut EliminateMultipleTargets::default(), statements)?;
    let statements = rewrite_block(&mut AttributesToCalls::default(), statements)?;
    let statements = rewrite_block(&mut IndexingToCalls::default(), statements)?;
    let statements = rewrite_block(&mut OperatorsToCalls, statements)?;
    let statements = rewrite_block(&mut InPlaceToAssignments, statements)?;
    rewrite_block(&mut LiteralsToCalls, statements)
}

// ============================================================================
// Rewriter plumbing
// ============================================================================

/// One normalisation pass. Default methods recurse; passes override the
/// nodes they rewrite and delegate the rest.
trait Rewriter {
    fn rewrite_stmt(&mut self, stmt: StmtLoc) -> PassResult<Vec<StmtLoc>> {
        default_rewrite_stmt(self, stmt)
    }

    fn rewrite_expr(&mut self, expr: ExprLoc) -> PassResult<ExprLoc> {
        default_rewrite_expr(self, expr)
    }
}

fn rewrite_block<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    statements: Vec<StmtLoc>,
) -> PassResult<Vec<StmtLoc>> {
    let mut out = Vec::with_capacity(statements.len());
    for statement in statements {
        out.extend(rewriter.rewrite_stmt(statement)?);
    }
    Ok(out)
}

fn default_rewrite_stmt<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    StmtLoc { position, stmt }: StmtLoc,
) -> PassResult<Vec<StmtLoc>> {
    let stmt = match stmt {
        Stmt::Expr(expr) => Stmt::Expr(rewriter.rewrite_expr(expr)?),
        Stmt::Assign { targets, value } => {
            let targets: PassResult<Vec<Target>> = targets
                .into_iter()
                .map(|t| rewrite_target_exprs(rewriter, t))
                .collect();
            Stmt::Assign {
                targets: targets?,
                value: rewriter.rewrite_expr(value)?,
            }
        }
        Stmt::AugAssign { target, op, value } => Stmt::AugAssign {
            target: rewrite_target_exprs(rewriter, target)?,
            op,
            value: rewriter.rewrite_expr(value)?,
        },
        Stmt::Delete { targets } => {
            let targets: PassResult<Vec<Target>> = targets
                .into_iter()
                .map(|t| rewrite_target_exprs(rewriter, t))
                .collect();
            Stmt::Delete { targets: targets? }
        }
        Stmt::FunctionDef(def) => {
            let mut def = Rc::try_unwrap(def).unwrap_or_else(|rc| (*rc).clone());
            def.body = rewrite_block(rewriter, def.body)?;
            let mut params = def.params;
            for param in params.args.iter_mut().chain(params.kwonly.iter_mut()) {
                if let Some(default) = param.default.take() {
                    param.default = Some(rewriter.rewrite_expr(default)?);
                }
            }
            def.params = params;
            Stmt::FunctionDef(Rc::new(def))
        }
        Stmt::ClassDef(def) => {
            let mut def = Rc::try_unwrap(def).unwrap_or_else(|rc| (*rc).clone());
            def.bases = def
                .bases
                .into_iter()
                .map(|b| rewriter.rewrite_expr(b))
                .collect::<PassResult<Vec<_>>>()?;
            def.body = rewrite_block(rewriter, def.body)?;
            Stmt::ClassDef(Rc::new(def))
        }
        Stmt::Return(value) => Stmt::Return(value.map(|v| rewriter.rewrite_expr(v)).transpose()?),
        Stmt::If { test, body, orelse } => Stmt::If {
            test: rewriter.rewrite_expr(test)?,
            body: rewrite_block(rewriter, body)?,
            orelse: rewrite_block(rewriter, orelse)?,
        },
        Stmt::While { test, body } => Stmt::While {
            test: rewriter.rewrite_expr(test)?,
            body: rewrite_block(rewriter, body)?,
        },
        Stmt::For { target, iter, body } => Stmt::For {
            target: rewrite_target_exprs(rewriter, target)?,
            iter: rewriter.rewrite_expr(iter)?,
            body: rewrite_block(rewriter, body)?,
        },
        passthrough @ (Stmt::Import { .. }
        | Stmt::FromImport { .. }
        | Stmt::Pass
        | Stmt::Break
        | Stmt::Continue
        | Stmt::TraceDelete { .. }) => passthrough,
    };
    Ok(vec![StmtLoc::new(position, stmt)])
}

/// Rewrites the expressions embedded in a target (attribute receivers and
/// subscript indices) without touching the target structure itself.
fn rewrite_target_exprs<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    target: Target,
) -> PassResult<Target> {
    Ok(match target {
        Target::Name(name) => Target::Name(name),
        Target::Tuple(elements) => Target::Tuple(
            elements
                .into_iter()
                .map(|t| rewrite_target_exprs(rewriter, t))
                .collect::<PassResult<Vec<_>>>()?,
        ),
        Target::List(elements) => Target::List(
            elements
                .into_iter()
                .map(|t| rewrite_target_exprs(rewriter, t))
                .collect::<PassResult<Vec<_>>>()?,
        ),
        Target::Attribute { object, attr } => Target::Attribute {
            object: rewriter.rewrite_expr(object)?,
            attr,
        },
        Target::Subscript { object, index } => Target::Subscript {
            object: rewriter.rewrite_expr(object)?,
            index: rewriter.rewrite_expr(index)?,
        },
    })
}

fn default_rewrite_expr<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    ExprLoc { position, expr }: ExprLoc,
) -> PassResult<ExprLoc> {
    let expr = match expr {
        leaf @ (Expr::Literal(_)
        | Expr::Name(_)
        | Expr::BuiltinRef(_)
        | Expr::OperatorRef(_)) => leaf,
        Expr::Tuple(elements) => Expr::Tuple(rewrite_exprs(rewriter, elements)?),
        Expr::List(elements) => Expr::List(rewrite_exprs(rewriter, elements)?),
        Expr::Set(elements) => Expr::Set(rewrite_exprs(rewriter, elements)?),
        Expr::Dict(pairs) => {
            let pairs: PassResult<Vec<(ExprLoc, ExprLoc)>> = pairs
                .into_iter()
                .map(|(k, v)| Ok((rewriter.rewrite_expr(k)?, rewriter.rewrite_expr(v)?)))
                .collect();
            Expr::Dict(pairs?)
        }
        Expr::Attribute { object, attr } => Expr::Attribute {
            object: Box::new(rewriter.rewrite_expr(*object)?),
            attr,
        },
        Expr::Subscript { object, index } => Expr::Subscript {
            object: Box::new(rewriter.rewrite_expr(*object)?),
            index: Box::new(rewriter.rewrite_expr(*index)?),
        },
        Expr::SliceExpr { lower, upper, step } => Expr::SliceExpr {
            lower: lower
                .map(|e| rewriter.rewrite_expr(*e).map(Box::new))
                .transpose()?,
            upper: upper
                .map(|e| rewriter.rewrite_expr(*e).map(Box::new))
                .transpose()?,
            step: step
                .map(|e| rewriter.rewrite_expr(*e).map(Box::new))
                .transpose()?,
        },
        Expr::UnaryOp { op, operand } => Expr::UnaryOp {
            op,
            operand: Box::new(rewriter.rewrite_expr(*operand)?),
        },
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op,
            left: Box::new(rewriter.rewrite_expr(*left)?),
            right: Box::new(rewriter.rewrite_expr(*right)?),
        },
        Expr::Compare { op, left, right } => Expr::Compare {
            op,
            left: Box::new(rewriter.rewrite_expr(*left)?),
            right: Box::new(rewriter.rewrite_expr(*right)?),
        },
        Expr::BoolOp { op, values } => Expr::BoolOp {
            op,
            values: rewrite_exprs(rewriter, values)?,
        },
        Expr::IfExpr { test, body, orelse } => Expr::IfExpr {
            test: Box::new(rewriter.rewrite_expr(*test)?),
            body: Box::new(rewriter.rewrite_expr(*body)?),
            orelse: Box::new(rewriter.rewrite_expr(*orelse)?),
        },
        Expr::Lambda { def } => {
            let mut def = Rc::try_unwrap(def).unwrap_or_else(|rc| (*rc).clone());
            def.body = rewrite_block(rewriter, def.body)?;
            let mut params = def.params;
            for param in params.args.iter_mut().chain(params.kwonly.iter_mut()) {
                if let Some(default) = param.default.take() {
                    param.default = Some(rewriter.rewrite_expr(default)?);
                }
            }
            def.params = params;
            Expr::Lambda { def: Rc::new(def) }
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            let args: PassResult<Vec<CallArg>> = args
                .into_iter()
                .map(|arg| {
                    Ok(match arg {
                        CallArg::Positional(e) => CallArg::Positional(rewriter.rewrite_expr(e)?),
                        CallArg::Starred(e) => CallArg::Starred(rewriter.rewrite_expr(e)?),
                    })
                })
                .collect();
            let keywords: PassResult<Vec<Kwarg>> = keywords
                .into_iter()
                .map(|kw| {
                    Ok(Kwarg {
                        name: kw.name,
                        value: rewriter.rewrite_expr(kw.value)?,
                    })
                })
                .collect();
            Expr::Call {
                func: Box::new(rewriter.rewrite_expr(*func)?),
                args: args?,
                keywords: keywords?,
            }
        }
        hook @ (Expr::TraceFunction { .. }
        | Expr::TraceArgument { .. }
        | Expr::TraceReturn { .. }
        | Expr::TraceAccess { .. }
        | Expr::TraceAssign { .. }) => hook,
    };
    Ok(ExprLoc::new(position, expr))
}

fn rewrite_exprs<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    exprs: Vec<ExprLoc>,
) -> PassResult<Vec<ExprLoc>> {
    exprs
        .into_iter()
        .map(|e| rewriter.rewrite_expr(e))
        .collect()
}

// Call-construction helpers used by every pass.

fn call_builtin(position: CodeRange, builtin: Builtin, args: Vec<ExprLoc>) -> ExprLoc {
    ExprLoc::new(
        position,
        Expr::Call {
            func: Box::new(ExprLoc::new(position, Expr::BuiltinRef(builtin))),
            args: args.into_iter().map(CallArg::Positional).collect(),
            keywords: vec![],
        },
    )
}

fn call_operator(position: CodeRange, op: OperatorFn, args: Vec<ExprLoc>) -> ExprLoc {
    ExprLoc::new(
        position,
        Expr::Call {
            func: Box::new(ExprLoc::new(position, Expr::OperatorRef(op))),
            args: args.into_iter().map(CallArg::Positional).collect(),
            keywords: vec![],
        },
    )
}

fn str_literal(position: CodeRange, text: &str) -> ExprLoc {
    ExprLoc::new(position, Expr::Literal(Literal::Str(Rc::from(text))))
}

fn none_literal(position: CodeRange) -> ExprLoc {
    ExprLoc::new(position, Expr::Literal(Literal::None))
}

fn name_load(position: CodeRange, name: &str) -> ExprLoc {
    ExprLoc::new(position, Expr::Name(name.to_owned()))
}

/// Whether an expression can be evaluated twice without visible effects,
/// deciding if the in-place rewrites need a temporary.
fn is_repeatable(expr: &Expr) -> bool {
    matches!(expr, Expr::Name(_) | Expr::Literal(_))
}

// ============================================================================
// Pass 1: eliminate multiple assignment targets
// ============================================================================

/// Rewrites `a = b = ... = rhs` into a temporary assignment followed by
/// single assignments.
///
/// When every target is a destructuring pattern, per-position temporaries
/// are introduced so the single destructure of `rhs` is preserved; patterns
/// with differing arities are rejected.
#[derive(Default)]
struct EliminateMultipleTargets {
    tmp_counter: u32,
}

impl EliminateMultipleTargets {
    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("__{prefix}_{}__", self.tmp_counter);
        self.tmp_counter += 1;
        name
    }
}

impl Rewriter for EliminateMultipleTargets {
    fn rewrite_stmt(&mut self, stmt: StmtLoc) -> PassResult<Vec<StmtLoc>> {
        let StmtLoc { position, stmt } = stmt;
        let Stmt::Assign { targets, value } = stmt else {
            return default_rewrite_stmt(self, StmtLoc::new(position, stmt));
        };
        if targets.len() <= 1 {
            return default_rewrite_stmt(
                self,
                StmtLoc::new(position, Stmt::Assign { targets, value }),
            );
        }
        let value = self.rewrite_expr(value)?;

        let pattern_arities: Vec<usize> = targets
            .iter()
            .filter_map(|t| match t {
                Target::Tuple(elements) | Target::List(elements) => Some(elements.len()),
                _ => None,
            })
            .collect();
        if let Some(first) = pattern_arities.first() {
            if pattern_arities.iter().any(|arity| arity != first) {
                return Err(InstrumentationError::MixedArityTargets { position });
            }
        }

        let all_patterns = targets.iter().all(Target::is_pattern);
        let mut out = Vec::new();
        if all_patterns {
            // One destructure of the value into per-position temporaries,
            // then per-target rebinding of each position.
            let arity = pattern_arities[0];
            let temps: Vec<String> = (0..arity).map(|_| self.fresh("target")).collect();
            out.push(StmtLoc::new(
                position,
                Stmt::Assign {
                    targets: vec![Target::Tuple(
                        temps.iter().map(|t| Target::Name(t.clone())).collect(),
                    )],
                    value,
                },
            ));
            for target in targets {
                let (Target::Tuple(elements) | Target::List(elements)) = target else {
                    unreachable!("all targets are patterns");
                };
                for (element, temp) in elements.into_iter().zip(&temps) {
                    out.push(StmtLoc::new(
                        position,
                        Stmt::Assign {
                            targets: vec![element],
                            value: name_load(position, temp),
                        },
                    ));
                }
            }
        } else {
            // A scalar temporary; each target receives the whole value.
            let temp = self.fresh("target");
            out.push(StmtLoc::new(
                position,
                Stmt::Assign {
                    targets: vec![Target::Name(temp.clone())],
                    value,
                },
            ));
            for target in targets {
                out.push(StmtLoc::new(
                    position,
                    Stmt::Assign {
                        targets: vec![target],
                        value: name_load(position, &temp),
                    },
                ));
            }
        }

        // The generated single assignments may still contain nested bodies
        // or sub-expressions with multiple targets inside them.
        let mut final_out = Vec::new();
        for stmt in out {
            final_out.extend(default_rewrite_stmt(self, stmt)?);
        }
        Ok(final_out)
    }
}

// ============================================================================
// Pass 2: attribute access to calls
// ============================================================================

/// `o.x` -> `getattr(o, 'x')`; `o.x = v` -> `setattr(o, 'x', v)`;
/// `del o.x` -> `delattr(o, 'x')`; `o.x op= v` -> `setattr` over `getattr`.
#[derive(Default)]
struct AttributesToCalls {
    tmp_counter: u32,
}

impl AttributesToCalls {
    fn fresh(&mut self) -> String {
        let name = format!("__obj_{}__", self.tmp_counter);
        self.tmp_counter += 1;
        name
    }
}

impl Rewriter for AttributesToCalls {
    fn rewrite_expr(&mut self, expr: ExprLoc) -> PassResult<ExprLoc> {
        let ExprLoc { position, expr } = default_rewrite_expr(self, expr)?;
        match expr {
            Expr::Attribute { object, attr } => Ok(call_builtin(
                position,
                Builtin::Getattr,
                vec![*object, str_literal(position, &attr)],
            )),
            other => Ok(ExprLoc::new(position, other)),
        }
    }

    fn rewrite_stmt(&mut self, stmt: StmtLoc) -> PassResult<Vec<StmtLoc>> {
        let StmtLoc { position, stmt } = stmt;
        match stmt {
            Stmt::Assign { mut targets, value } if targets.len() == 1 => {
                match targets.pop().expect("one target") {
                    Target::Attribute { object, attr } => {
                        let object = self.rewrite_expr(object)?;
                        let value = self.rewrite_expr(value)?;
                        let call = call_builtin(
                            position,
                            Builtin::Setattr,
                            vec![object, str_literal(position, &attr), value],
                        );
                        Ok(vec![StmtLoc::new(position, Stmt::Expr(call))])
                    }
                    target => default_rewrite_stmt(
                        self,
                        StmtLoc::new(
                            position,
                            Stmt::Assign {
                                targets: vec![target],
                                value,
                            },
                        ),
                    ),
                }
            }
            Stmt::AugAssign {
                target: Target::Attribute { object, attr },
                op,
                value,
            } => {
                let object = self.rewrite_expr(object)?;
                let value = self.rewrite_expr(value)?;
                let mut out = Vec::new();
                let receiver = if is_repeatable(&object.expr) {
                    object
                } else {
                    let temp = self.fresh();
                    out.push(StmtLoc::new(
                        position,
                        Stmt::Assign {
                            targets: vec![Target::Name(temp.clone())],
                            value: object,
                        },
                    ));
                    name_load(position, &temp)
                };
                let current = call_builtin(
                    position,
                    Builtin::Getattr,
                    vec![receiver.clone(), str_literal(position, &attr)],
                );
                let updated =
                    call_operator(position, OperatorFn::for_inplace(op), vec![current, value]);
                let store = call_builtin(
                    position,
                    Builtin::Setattr,
                    vec![receiver, str_literal(position, &attr), updated],
                );
                out.push(StmtLoc::new(position, Stmt::Expr(store)));
                Ok(out)
            }
            Stmt::Delete { targets } => {
                let mut out = Vec::new();
                for target in targets {
                    match target {
                        Target::Attribute { object, attr } => {
                            let object = self.rewrite_expr(object)?;
                            let call = call_builtin(
                                position,
                                Builtin::Delattr,
                                vec![object, str_literal(position, &attr)],
                            );
                            out.push(StmtLoc::new(position, Stmt::Expr(call)));
                        }
                        other => {
                            let other = rewrite_target_exprs(self, other)?;
                            out.push(StmtLoc::new(
                                position,
                                Stmt::Delete {
                                    targets: vec![other],
                                },
                            ));
                        }
                    }
                }
                Ok(out)
            }
            other => default_rewrite_stmt(self, StmtLoc::new(position, other)),
        }
    }
}

// ============================================================================
// Pass 3: indexing to calls
// ============================================================================

/// `o[k]` -> `getitem(o, k)`; `o[k] = v` -> `setitem(o, k, v)`;
/// `del o[k]` -> `delitem(o, k)`; slices become explicit `slice(...)`
/// calls; `o[k] op= v` -> `setitem(o, k, iop(getitem(o, k), v))` with the
/// object and key lifted to temporaries when not plain names.
#[derive(Default)]
struct IndexingToCalls {
    tmp_counter: u32,
}

impl IndexingToCalls {
    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("__{prefix}_{}__", self.tmp_counter);
        self.tmp_counter += 1;
        name
    }

    /// Rewrites a subscript index: slices become `slice(...)` calls with
    /// omitted positions filled by `None`; multi-dimensional subscripts
    /// keep their tuple shape with each element rewritten.
    fn rewrite_index(&mut self, index: ExprLoc) -> PassResult<ExprLoc> {
        let ExprLoc { position, expr } = index;
        match expr {
            Expr::SliceExpr { lower, upper, step } => {
                let mut part = |slot: Option<Box<ExprLoc>>| -> PassResult<ExprLoc> {
                    match slot {
                        Some(expr) => self.rewrite_expr(*expr),
                        None => Ok(none_literal(position)),
                    }
                };
                let lower = part(lower)?;
                let upper = part(upper)?;
                let step = part(step)?;
                Ok(call_builtin(
                    position,
                    Builtin::Slice,
                    vec![lower, upper, step],
                ))
            }
            Expr::Tuple(elements) => {
                let elements: PassResult<Vec<ExprLoc>> = elements
                    .into_iter()
                    .map(|e| self.rewrite_index(e))
                    .collect();
                Ok(ExprLoc::new(position, Expr::Tuple(elements?)))
            }
            other => self.rewrite_expr(ExprLoc::new(position, other)),
        }
    }
}

impl Rewriter for IndexingToCalls {
    fn rewrite_expr(&mut self, expr: ExprLoc) -> PassResult<ExprLoc> {
        let ExprLoc { position, expr } = expr;
        match expr {
            Expr::Subscript { object, index } => {
                let object = self.rewrite_expr(*object)?;
                let index = self.rewrite_index(*index)?;
                Ok(call_operator(
                    position,
                    OperatorFn::Getitem,
                    vec![object, index],
                ))
            }
            other => default_rewrite_expr(self, ExprLoc::new(position, other)),
        }
    }

    fn rewrite_stmt(&mut self, stmt: StmtLoc) -> PassResult<Vec<StmtLoc>> {
        let StmtLoc { position, stmt } = stmt;
        match stmt {
            Stmt::Assign { mut targets, value } if targets.len() == 1 => {
                match targets.pop().expect("one target") {
                    Target::Subscript { object, index } => {
                        let object = self.rewrite_expr(object)?;
                        let index = self.rewrite_index(index)?;
                        let value = self.rewrite_expr(value)?;
                        let call = call_operator(
                            position,
                            OperatorFn::Setitem,
                            vec![object, index, value],
                        );
                        Ok(vec![StmtLoc::new(position, Stmt::Expr(call))])
                    }
                    target => default_rewrite_stmt(
                        self,
                        StmtLoc::new(
                            position,
                            Stmt::Assign {
                                targets: vec![target],
                                value,
                            },
                        ),
                    ),
                }
            }
            Stmt::AugAssign {
                target: Target::Subscript { object, index },
                op,
                value,
            } => {
                let object = self.rewrite_expr(object)?;
                let index = self.rewrite_index(index)?;
                let value = self.rewrite_expr(value)?;
                let mut out = Vec::new();
                let mut lift = |expr: ExprLoc, prefix: &str, out: &mut Vec<StmtLoc>| {
                    if is_repeatable(&expr.expr) {
                        expr
                    } else {
                        let temp = self.fresh(prefix);
                        out.push(StmtLoc::new(
                            position,
                            Stmt::Assign {
                                targets: vec![Target::Name(temp.clone())],
                                value: expr,
                            },
                        ));
                        name_load(position, &temp)
                    }
                };
                let receiver = lift(object, "obj", &mut out);
                let key = lift(index, "key", &mut out);
                let current = call_operator(
                    position,
                    OperatorFn::Getitem,
                    vec![receiver.clone(), key.clone()],
                );
                let updated =
                    call_operator(position, OperatorFn::for_inplace(op), vec![current, value]);
                let store = call_operator(
                    position,
                    OperatorFn::Setitem,
                    vec![receiver, key, updated],
                );
                out.push(StmtLoc::new(position, Stmt::Expr(store)));
                Ok(out)
            }
            Stmt::Delete { targets } => {
                let mut out = Vec::new();
                for target in targets {
                    match target {
                        Target::Subscript { object, index } => {
                            let object = self.rewrite_expr(object)?;
                            let index = self.rewrite_index(index)?;
                            let call = call_operator(
                                position,
                                OperatorFn::Delitem,
                                vec![object, index],
                            );
                            out.push(StmtLoc::new(position, Stmt::Expr(call)));
                        }
                        other => {
                            let other = rewrite_target_exprs(self, other)?;
                            out.push(StmtLoc::new(
                                position,
                                Stmt::Delete {
                                    targets: vec![other],
                                },
                            ));
                        }
                    }
                }
                Ok(out)
            }
            other => default_rewrite_stmt(self, StmtLoc::new(position, other)),
        }
    }
}

// ============================================================================
// Pass 4: operators to calls
// ============================================================================

/// Unary, binary and comparison operators become `operator` module calls.
/// Negations of pure numeric literals are folded into the literal.
struct OperatorsToCalls;

impl Rewriter for OperatorsToCalls {
    fn rewrite_expr(&mut self, expr: ExprLoc) -> PassResult<ExprLoc> {
        let ExprLoc { position, expr } = default_rewrite_expr(self, expr)?;
        match expr {
            Expr::UnaryOp { op, operand } => {
                if op == UnaryOpKind::Minus {
                    match operand.expr {
                        Expr::Literal(Literal::Int(i)) => {
                            return Ok(ExprLoc::new(position, Expr::Literal(Literal::Int(-i))));
                        }
                        Expr::Literal(Literal::Float(f)) => {
                            return Ok(ExprLoc::new(position, Expr::Literal(Literal::Float(-f))));
                        }
                        _ => {}
                    }
                }
                Ok(call_operator(
                    position,
                    OperatorFn::for_unary(op),
                    vec![*operand],
                ))
            }
            Expr::BinaryOp { op, left, right } => Ok(call_operator(
                position,
                OperatorFn::for_binop(op),
                vec![*left, *right],
            )),
            Expr::Compare { op, left, right } => match op {
                CmpOpKind::In => Ok(call_operator(
                    position,
                    OperatorFn::Contains,
                    vec![*right, *left],
                )),
                CmpOpKind::NotIn => {
                    let membership =
                        call_operator(position, OperatorFn::Contains, vec![*right, *left]);
                    Ok(call_operator(position, OperatorFn::Not, vec![membership]))
                }
                other => Ok(call_operator(
                    position,
                    OperatorFn::for_compare(other),
                    vec![*left, *right],
                )),
            },
            other => Ok(ExprLoc::new(position, other)),
        }
    }
}

// ============================================================================
// Pass 5: in-place operators to assignment plus call
// ============================================================================

/// `x op= v` -> `x = iop(x, v)`. Attribute and subscript targets were
/// already rewritten by earlier passes, so only name targets remain.
struct InPlaceToAssignments;

impl Rewriter for InPlaceToAssignments {
    fn rewrite_stmt(&mut self, stmt: StmtLoc) -> PassResult<Vec<StmtLoc>> {
        let StmtLoc { position, stmt } = stmt;
        match stmt {
            Stmt::AugAssign {
                target: Target::Name(name),
                op,
                value,
            } => {
                let value = self.rewrite_expr(value)?;
                let call = call_operator(
                    position,
                    OperatorFn::for_inplace(op),
                    vec![name_load(position, &name), value],
                );
                Ok(vec![StmtLoc::new(
                    position,
                    Stmt::Assign {
                        targets: vec![Target::Name(name)],
                        value: call,
                    },
                )])
            }
            other => default_rewrite_stmt(self, StmtLoc::new(position, other)),
        }
    }
}

// ============================================================================
// Pass 6: container literals to calls
// ============================================================================

/// Load-context list, tuple and set literals become `__list__`,
/// `__tuple__` and `__set__` calls; a dict literal with all-string keys
/// becomes a `__dict__` call with keyword arguments. Dict literals with
/// other keys are left alone.
struct LiteralsToCalls;

impl Rewriter for LiteralsToCalls {
    fn rewrite_expr(&mut self, expr: ExprLoc) -> PassResult<ExprLoc> {
        let ExprLoc { position, expr } = default_rewrite_expr(self, expr)?;
        match expr {
            Expr::List(elements) => Ok(call_operator(position, OperatorFn::ListLiteral, elements)),
            Expr::Tuple(elements) => {
                Ok(call_operator(position, OperatorFn::TupleLiteral, elements))
            }
            Expr::Set(elements) => Ok(call_operator(position, OperatorFn::SetLiteral, elements)),
            Expr::Dict(pairs) => {
                let all_string_keys = pairs
                    .iter()
                    .all(|(key, _)| matches!(key.expr, Expr::Literal(Literal::Str(_))));
                if all_string_keys {
                    let keywords = pairs
                        .into_iter()
                        .map(|(key, value)| {
                            let Expr::Literal(Literal::Str(name)) = key.expr else {
                                unreachable!("checked all keys are strings");
                            };
                            Kwarg {
                                name: Some(name.to_string()),
                                value,
                            }
                        })
                        .collect();
                    Ok(ExprLoc::new(
                        position,
                        Expr::Call {
                            func: Box::new(ExprLoc::new(
                                position,
                                Expr::OperatorRef(OperatorFn::DictLiteral),
                            )),
                            args: vec![],
                            keywords,
                        },
                    ))
                } else {
                    Ok(ExprLoc::new(position, Expr::Dict(pairs)))
                }
            }
            other => Ok(ExprLoc::new(position, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn normalised(code: &str) -> Vec<StmtLoc> {
        normalise(parse(code).unwrap()).unwrap()
    }

    fn expr_of(stmt: &StmtLoc) -> &Expr {
        match &stmt.stmt {
            Stmt::Expr(expr) => &expr.expr,
            Stmt::Assign { value, .. } => &value.expr,
            other => panic!("unexpected statement {other:?}"),
        }
    }

    fn callee(expr: &Expr) -> &Expr {
        let Expr::Call { func, .. } = expr else {
            panic!("expected call, got {expr:?}");
        };
        &func.expr
    }

    #[test]
    fn attribute_read_becomes_getattr() {
        let stmts = normalised("x = obj.field");
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::BuiltinRef(Builtin::Getattr)
        ));
    }

    #[test]
    fn compound_attribute_nests_getattr() {
        let stmts = normalised("x = container.obj.field");
        let Expr::Call { args, .. } = expr_of(&stmts[0]) else {
            panic!("expected call");
        };
        let CallArg::Positional(inner) = &args[0] else {
            panic!("expected positional");
        };
        assert!(matches!(
            callee(&inner.expr),
            Expr::BuiltinRef(Builtin::Getattr)
        ));
    }

    #[test]
    fn attribute_store_becomes_setattr_statement() {
        let stmts = normalised("obj.field = 10");
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::BuiltinRef(Builtin::Setattr)
        ));
    }

    #[test]
    fn attribute_delete_becomes_delattr() {
        let stmts = normalised("del obj.field");
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::BuiltinRef(Builtin::Delattr)
        ));
    }

    #[test]
    fn mixed_delete_splits_statements() {
        let stmts = normalised("del foo.x, other, foo.y");
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[1].stmt, Stmt::Delete { .. }));
    }

    #[test]
    fn subscript_read_becomes_getitem() {
        let stmts = normalised("x = data[0]");
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::OperatorRef(OperatorFn::Getitem)
        ));
    }

    #[test]
    fn slice_becomes_explicit_slice_call() {
        let stmts = normalised("x = data[1:]");
        let Expr::Call { args, .. } = expr_of(&stmts[0]) else {
            panic!("expected call");
        };
        let CallArg::Positional(index) = &args[1] else {
            panic!("expected positional index");
        };
        assert!(matches!(
            callee(&index.expr),
            Expr::BuiltinRef(Builtin::Slice)
        ));
        let Expr::Call { args: slice_args, .. } = &index.expr else {
            panic!("expected slice call");
        };
        assert_eq!(slice_args.len(), 3);
    }

    #[test]
    fn binary_operator_becomes_call() {
        let stmts = normalised("x = a + b");
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::OperatorRef(OperatorFn::Add)
        ));
    }

    #[test]
    fn negated_literal_stays_a_literal() {
        let stmts = normalised("x = -5");
        assert!(matches!(
            expr_of(&stmts[0]),
            Expr::Literal(Literal::Int(-5))
        ));
    }

    #[test]
    fn membership_swaps_operands() {
        let stmts = normalised("x = a in b");
        let Expr::Call { args, .. } = expr_of(&stmts[0]) else {
            panic!("expected call");
        };
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::OperatorRef(OperatorFn::Contains)
        ));
        let CallArg::Positional(first) = &args[0] else {
            panic!("expected positional");
        };
        assert!(matches!(&first.expr, Expr::Name(n) if n == "b"));
    }

    #[test]
    fn augmented_name_becomes_assignment_with_call() {
        let stmts = normalised("x += 1");
        let Stmt::Assign { targets, value } = &stmts[0].stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], Target::Name(n) if n == "x"));
        assert!(matches!(
            callee(&value.expr),
            Expr::OperatorRef(OperatorFn::IAdd)
        ));
    }

    #[test]
    fn augmented_subscript_reads_then_writes() {
        let stmts = normalised("data[k] += 1");
        let last = stmts.last().unwrap();
        assert!(matches!(
            callee(expr_of(last)),
            Expr::OperatorRef(OperatorFn::Setitem)
        ));
    }

    #[test]
    fn multiple_targets_become_temporary_then_singles() {
        let stmts = normalised("a = b = f()");
        assert_eq!(stmts.len(), 3);
        let Stmt::Assign { targets, .. } = &stmts[0].stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], Target::Name(n) if n.starts_with("__target_")));
    }

    #[test]
    fn pattern_multiple_targets_use_positional_temporaries() {
        let stmts = normalised("a, b = c, d = f()");
        // One destructure plus four rebindings.
        assert_eq!(stmts.len(), 5);
        let Stmt::Assign { targets, .. } = &stmts[0].stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], Target::Tuple(elements) if elements.len() == 2));
    }

    #[test]
    fn mixed_arity_patterns_are_rejected() {
        let error = normalise(parse("a, b = c, d, e = f()").unwrap()).unwrap_err();
        assert!(matches!(
            error,
            InstrumentationError::MixedArityTargets { .. }
        ));
    }

    #[test]
    fn list_literal_becomes_list_call() {
        let stmts = normalised("x = [1, 2]");
        assert!(matches!(
            callee(expr_of(&stmts[0])),
            Expr::OperatorRef(OperatorFn::ListLiteral)
        ));
    }

    #[test]
    fn string_keyed_dict_becomes_keyword_call() {
        let stmts = normalised("x = {'a': 1, 'b': 2}");
        let Expr::Call { keywords, .. } = expr_of(&stmts[0]) else {
            panic!("expected call");
        };
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[0].name.as_deref(), Some("a"));
    }

    #[test]
    fn non_string_keyed_dict_is_left_alone() {
        let stmts = normalised("x = {1: 'a'}");
        assert!(matches!(expr_of(&stmts[0]), Expr::Dict(_)));
    }

    #[test]
    fn normalisation_is_idempotent() {
        let code = "y = obj.items[1:3] + [a, b]\nobj.count += 1\nz = {'k': y}\n";
        let once = normalise(parse(code).unwrap()).unwrap();
        let twice = normalise(once.clone()).unwrap();
        assert_eq!(format!("{once:?}"), format!("{twice:?}"));
    }
}
