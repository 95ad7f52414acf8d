//! The trace transform.
//!
//! Rewrites every call, name read, assignment and deletion to route through
//! the tracer hooks:
//!
//! ```text
//! f(a, b, k=c)   =>   trace_return(trace_function(f, 3)(
//!                         trace_argument(a), trace_argument(b),
//!                         k=trace_argument(c, 'k')), multiple_values)
//! x              =>   trace_access('x', x)
//! x = rhs        =>   x = trace_assign('x', rhs)
//! del x          =>   trace_delete('x'); del x
//! ```
//!
//! The transformer's only state is a flag saying whether the currently
//! visited expression's parent permits a boxed value. Only the immediate
//! child observes it; it resets on any generic subtree visit. A second
//! flag, threaded the same way, tells the immediate call of an assignment
//! that its return value is destructured.

use std::rc::Rc;

use crate::ast::{CallArg, Expr, ExprLoc, Kwarg, Stmt, StmtLoc, Target};
use crate::error::InstrumentationError;

type PassResult<T> = Result<T, InstrumentationError>;

/// Applies the trace transform to a whole program.
pub fn instrument(statements: Vec<StmtLoc>) -> PassResult<Vec<StmtLoc>> {
    let mut transformer = TraceTransformer::default();
    transformer.transform_block(statements)
}

#[derive(Default)]
struct TraceTransformer {
    /// Whether the parent expression can consume a boxed value.
    allow_boxed: bool,
    /// Whether the enclosing assignment destructures the call's value.
    multiple_values: bool,
}

impl TraceTransformer {
    fn transform_block(&mut self, statements: Vec<StmtLoc>) -> PassResult<Vec<StmtLoc>> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            out.extend(self.transform_stmt(statement)?);
        }
        Ok(out)
    }

    fn transform_stmt(&mut self, StmtLoc { position, stmt }: StmtLoc) -> PassResult<Vec<StmtLoc>> {
        let stmt = match stmt {
            Stmt::Expr(expr) => Stmt::Expr(self.visit(expr)?),
            Stmt::Assign { mut targets, value } => {
                let target = match targets.pop() {
                    Some(target) if targets.is_empty() => target,
                    // Multiple targets were eliminated during normalisation.
                    _ => {
                        return Err(InstrumentationError::Unsupported {
                            construct: "multiple assignment targets",
                            position,
                        });
                    }
                };
                let Some(symbol) = target.symbol() else {
                    return Err(InstrumentationError::Unsupported {
                        construct: "non-name assignment target",
                        position,
                    });
                };
                // The right-hand side's producer is boxed so the Assign
                // event links to it; a pattern target tells the immediate
                // call that its value is destructured.
                self.multiple_values = target.is_pattern();
                let value = self.visit_boxed(value)?;
                self.multiple_values = false;
                let wrapped = ExprLoc::new(
                    value.position,
                    Expr::TraceAssign {
                        target: symbol,
                        value: Box::new(value),
                    },
                );
                Stmt::Assign {
                    targets: vec![target],
                    value: wrapped,
                }
            }
            Stmt::Delete { targets } => {
                let mut out = Vec::new();
                for target in targets {
                    let Target::Name(name) = target else {
                        return Err(InstrumentationError::Unsupported {
                            construct: "non-name deletion target",
                            position,
                        });
                    };
                    out.push(StmtLoc::new(
                        position,
                        Stmt::TraceDelete { name: name.clone() },
                    ));
                    out.push(StmtLoc::new(
                        position,
                        Stmt::Delete {
                            targets: vec![Target::Name(name)],
                        },
                    ));
                }
                return Ok(out);
            }
            Stmt::AugAssign { .. } => {
                return Err(InstrumentationError::Unsupported {
                    construct: "augmented assignment after normalisation",
                    position,
                });
            }
            Stmt::FunctionDef(def) => {
                let mut def = Rc::try_unwrap(def).unwrap_or_else(|rc| (*rc).clone());
                def.body = self.transform_block(def.body)?;
                let mut params = def.params;
                for param in params.args.iter_mut().chain(params.kwonly.iter_mut()) {
                    if let Some(default) = param.default.take() {
                        param.default = Some(self.visit(default)?);
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
                    .map(|b| self.visit(b))
                    .collect::<PassResult<Vec<_>>>()?;
                def.body = self.transform_block(def.body)?;
                Stmt::ClassDef(Rc::new(def))
            }
            Stmt::Return(value) => Stmt::Return(value.map(|v| self.visit(v)).transpose()?),
            Stmt::If { test, body, orelse } => Stmt::If {
                test: self.visit(test)?,
                body: self.transform_block(body)?,
                orelse: self.transform_block(orelse)?,
            },
            Stmt::While { test, body } => Stmt::While {
                test: self.visit(test)?,
                body: self.transform_block(body)?,
            },
            Stmt::For { target, iter, body } => Stmt::For {
                target,
                iter: self.visit(iter)?,
                body: self.transform_block(body)?,
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

    /// Visits an expression, enabling boxed values immediately but not
    /// recursively.
    fn visit_boxed(&mut self, expr: ExprLoc) -> PassResult<ExprLoc> {
        self.allow_boxed = true;
        self.visit(expr)
    }

    fn visit(&mut self, ExprLoc { position, expr }: ExprLoc) -> PassResult<ExprLoc> {
        let allowed = self.allow_boxed;
        self.allow_boxed = false;
        let multiple = self.multiple_values;
        self.multiple_values = false;

        let expr = match expr {
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let nargs = args.len() + keywords.len();
                let func = self.visit(*func)?;
                let traced_func = ExprLoc::new(
                    func.position,
                    Expr::TraceFunction {
                        func: Box::new(func),
                        nargs,
                    },
                );
                let args = args
                    .into_iter()
                    .map(|arg| {
                        Ok(match arg {
                            CallArg::Positional(value) => {
                                CallArg::Positional(self.trace_argument(value, None, 0)?)
                            }
                            CallArg::Starred(value) => {
                                CallArg::Starred(self.trace_argument(value, None, 1)?)
                            }
                        })
                    })
                    .collect::<PassResult<Vec<_>>>()?;
                let keywords = keywords
                    .into_iter()
                    .map(|kw| {
                        let nstars = if kw.name.is_none() { 2 } else { 0 };
                        Ok(Kwarg {
                            value: self.trace_argument(kw.value, kw.name.clone(), nstars)?,
                            name: kw.name,
                        })
                    })
                    .collect::<PassResult<Vec<_>>>()?;
                let inner = ExprLoc::new(
                    position,
                    Expr::Call {
                        func: Box::new(traced_func),
                        args,
                        keywords,
                    },
                );
                Expr::TraceReturn {
                    value: Box::new(inner),
                    multiple_values: multiple,
                    boxed: allowed,
                }
            }
            Expr::Name(name) => Expr::TraceAccess {
                name: name.clone(),
                value: Box::new(ExprLoc::new(position, Expr::Name(name))),
                boxed: allowed,
            },
            leaf @ (Expr::Literal(_) | Expr::BuiltinRef(_) | Expr::OperatorRef(_)) => leaf,
            Expr::Lambda { def } => {
                let mut def = Rc::try_unwrap(def).unwrap_or_else(|rc| (*rc).clone());
                def.body = self.transform_block(def.body)?;
                Expr::Lambda { def: Rc::new(def) }
            }
            Expr::BoolOp { op, values } => Expr::BoolOp {
                op,
                values: values
                    .into_iter()
                    .map(|v| self.visit(v))
                    .collect::<PassResult<Vec<_>>>()?,
            },
            Expr::IfExpr { test, body, orelse } => Expr::IfExpr {
                test: Box::new(self.visit(*test)?),
                body: Box::new(self.visit(*body)?),
                orelse: Box::new(self.visit(*orelse)?),
            },
            Expr::Dict(pairs) => Expr::Dict(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((self.visit(k)?, self.visit(v)?)))
                    .collect::<PassResult<Vec<_>>>()?,
            ),
            Expr::Tuple(elements) => Expr::Tuple(
                elements
                    .into_iter()
                    .map(|e| self.visit(e))
                    .collect::<PassResult<Vec<_>>>()?,
            ),
            Expr::List(elements) => Expr::List(
                elements
                    .into_iter()
                    .map(|e| self.visit(e))
                    .collect::<PassResult<Vec<_>>>()?,
            ),
            Expr::Set(elements) => Expr::Set(
                elements
                    .into_iter()
                    .map(|e| self.visit(e))
                    .collect::<PassResult<Vec<_>>>()?,
            ),
            // Already instrumented, or a form the normaliser leaves alone.
            other => other,
        };
        Ok(ExprLoc::new(position, expr))
    }

    fn trace_argument(
        &mut self,
        value: ExprLoc,
        name: Option<String>,
        nstars: u8,
    ) -> PassResult<ExprLoc> {
        let value = self.visit_boxed(value)?;
        Ok(ExprLoc::new(
            value.position,
            Expr::TraceArgument {
                value: Box::new(value),
                name,
                nstars,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AssignSymbol;
    use crate::parse::parse;
    use crate::trace::normalise::normalise;

    fn instrumented(code: &str) -> Vec<StmtLoc> {
        instrument(normalise(parse(code).unwrap()).unwrap()).unwrap()
    }

    #[test]
    fn call_is_wrapped_in_trace_return() {
        let stmts = instrumented("f(x)");
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        let Expr::TraceReturn {
            value,
            multiple_values,
            boxed,
        } = &expr.expr
        else {
            panic!("expected trace_return, got {:?}", expr.expr);
        };
        assert!(!multiple_values);
        assert!(!boxed);
        let Expr::Call { func, args, .. } = &value.expr else {
            panic!("expected inner call");
        };
        assert!(matches!(func.expr, Expr::TraceFunction { nargs: 1, .. }));
        let CallArg::Positional(arg) = &args[0] else {
            panic!("expected positional");
        };
        assert!(matches!(arg.expr, Expr::TraceArgument { .. }));
    }

    #[test]
    fn argument_producers_are_boxed() {
        let stmts = instrumented("f(g())");
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        let Expr::TraceReturn { value, .. } = &expr.expr else {
            panic!("expected trace_return");
        };
        let Expr::Call { args, .. } = &value.expr else {
            panic!("expected inner call");
        };
        let CallArg::Positional(arg) = &args[0] else {
            panic!("expected positional");
        };
        let Expr::TraceArgument { value: inner, .. } = &arg.expr else {
            panic!("expected trace_argument");
        };
        assert!(matches!(
            inner.expr,
            Expr::TraceReturn { boxed: true, .. }
        ));
    }

    #[test]
    fn name_reads_become_trace_access() {
        let stmts = instrumented("y = x");
        let Stmt::Assign { value, .. } = &stmts[0].stmt else {
            panic!("expected assignment");
        };
        let Expr::TraceAssign { target, value } = &value.expr else {
            panic!("expected trace_assign");
        };
        assert_eq!(*target, AssignSymbol::Name("y".to_owned()));
        assert!(matches!(
            value.expr,
            Expr::TraceAccess { boxed: true, .. }
        ));
    }

    #[test]
    fn pattern_assignment_sets_multiple_values() {
        let stmts = instrumented("a, b = f()");
        let Stmt::Assign { value, .. } = &stmts[0].stmt else {
            panic!("expected assignment");
        };
        let Expr::TraceAssign { target, value } = &value.expr else {
            panic!("expected trace_assign");
        };
        assert_eq!(
            *target,
            AssignSymbol::Pattern(vec![
                AssignSymbol::Name("a".to_owned()),
                AssignSymbol::Name("b".to_owned()),
            ])
        );
        assert!(matches!(
            value.expr,
            Expr::TraceReturn {
                multiple_values: true,
                boxed: true,
                ..
            }
        ));
    }

    #[test]
    fn deletion_is_preceded_by_trace_delete() {
        let stmts = instrumented("del x");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0].stmt, Stmt::TraceDelete { name } if name == "x"));
        assert!(matches!(&stmts[1].stmt, Stmt::Delete { .. }));
    }

    #[test]
    fn keyword_arguments_carry_their_name() {
        let stmts = instrumented("f(k=1)");
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        let Expr::TraceReturn { value, .. } = &expr.expr else {
            panic!("expected trace_return");
        };
        let Expr::Call { keywords, .. } = &value.expr else {
            panic!("expected call");
        };
        let Expr::TraceArgument { name, nstars, .. } = &keywords[0].value.expr else {
            panic!("expected trace_argument");
        };
        assert_eq!(name.as_deref(), Some("k"));
        assert_eq!(*nstars, 0);
    }

    #[test]
    fn splats_carry_nstars() {
        let stmts = instrumented("f(*xs, **kw)");
        let Stmt::Expr(expr) = &stmts[0].stmt else {
            panic!("expected expression statement");
        };
        let Expr::TraceReturn { value, .. } = &expr.expr else {
            panic!("expected trace_return");
        };
        let Expr::Call { args, keywords, .. } = &value.expr else {
            panic!("expected call");
        };
        let CallArg::Starred(star) = &args[0] else {
            panic!("expected starred argument");
        };
        assert!(matches!(star.expr, Expr::TraceArgument { nstars: 1, .. }));
        assert!(matches!(
            keywords[0].value.expr,
            Expr::TraceArgument { nstars: 2, .. }
        ));
    }

    #[test]
    fn function_bodies_are_instrumented() {
        let stmts = instrumented("def f():\n    return g()\n");
        let Stmt::FunctionDef(def) = &stmts[0].stmt else {
            panic!("expected def");
        };
        let Stmt::Return(Some(value)) = &def.body[0].stmt else {
            panic!("expected return");
        };
        assert!(matches!(value.expr, Expr::TraceReturn { .. }));
    }
}
