//! Internal abstract syntax tree.
//!
//! Every pipeline stage — the parser, the normaliser, the trace transformer
//! and the interpreter — works on this tree rather than on the ruff AST.
//! Keeping one owned representation lets the rewrite passes synthesize nodes
//! freely (the normaliser turns most non-call syntax into calls) and lets the
//! interpreter evaluate both instrumented and plain code with one walker.
//!
//! The `Trace*` variants are inserted by the trace transformer only; the
//! parser and normaliser never produce them.

use std::fmt;
use std::rc::Rc;

use crate::builtins::Builtin;
use crate::operator::OperatorFn;

/// Source location of a node: 1-indexed line and column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeRange {
    pub line: u32,
    pub column: u32,
}

impl CodeRange {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Location for synthesized nodes with no source counterpart.
    pub fn synthetic() -> Self {
        Self::default()
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// An expression with its source location.
#[derive(Debug, Clone)]
pub struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }

    /// Wraps an expression at a synthetic (rewriter-generated) position.
    pub fn synthetic(expr: Expr) -> Self {
        Self::new(CodeRange::synthetic(), expr)
    }
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

/// Unary operator surface forms, eliminated by the normaliser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
    Minus,
    Plus,
    Invert,
}

/// Binary operator surface forms, eliminated by the normaliser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

/// Comparison operator surface forms, eliminated by the normaliser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// Boolean operator. `and`/`or` short-circuit, so they are interpreted
/// directly instead of being rewritten into calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// A positional argument at a call site, possibly splatted.
#[derive(Debug, Clone)]
pub enum CallArg {
    Positional(ExprLoc),
    /// `*expr` — extends the positional list with an iterable.
    Starred(ExprLoc),
}

/// A keyword argument at a call site. `name: None` is a `**mapping` splat.
#[derive(Debug, Clone)]
pub struct Kwarg {
    pub name: Option<String>,
    pub value: ExprLoc,
}

/// The symbolic shape of an assignment target, passed to `trace_assign`.
///
/// Mirrors the target tree with names only: a plain name, or a nested
/// tuple/list of names for destructuring patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignSymbol {
    Name(String),
    Pattern(Vec<AssignSymbol>),
}

impl AssignSymbol {
    /// Number of positions in a pattern; `None` for a plain name.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::Name(_) => None,
            Self::Pattern(elements) => Some(elements.len()),
        }
    }
}

/// An expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    /// A variable read. Assignment and deletion targets use [`Target`].
    Name(String),
    /// A direct reference to a builtin, synthesized by the normaliser.
    ///
    /// Using a dedicated node rather than a `Name` load keeps the trace
    /// transformer from wrapping machinery references in `trace_access`.
    BuiltinRef(Builtin),
    /// A direct reference to an `operator`-module function, synthesized by
    /// the normaliser.
    OperatorRef(OperatorFn),
    Tuple(Vec<ExprLoc>),
    List(Vec<ExprLoc>),
    Set(Vec<ExprLoc>),
    Dict(Vec<(ExprLoc, ExprLoc)>),
    /// Attribute read `o.x`. Eliminated by the normaliser.
    Attribute { object: Box<ExprLoc>, attr: String },
    /// Subscript read `o[k]`. Eliminated by the normaliser.
    Subscript {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// Slice expression `lo:hi:step` inside a subscript. Eliminated by the
    /// normaliser in favour of an explicit `slice(...)` call.
    SliceExpr {
        lower: Option<Box<ExprLoc>>,
        upper: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    /// Eliminated by the normaliser, except for negated numeric literals
    /// which are folded into the literal itself.
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<ExprLoc>,
    },
    /// Eliminated by the normaliser.
    BinaryOp {
        op: BinOpKind,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    /// A single comparison. Chained comparisons are rejected during
    /// normalisation. Eliminated by the normaliser.
    Compare {
        op: CmpOpKind,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<ExprLoc>,
    },
    /// Conditional expression `body if test else orelse`.
    IfExpr {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Lambda {
        def: Rc<FunctionDef>,
    },
    Call {
        func: Box<ExprLoc>,
        args: Vec<CallArg>,
        keywords: Vec<Kwarg>,
    },

    // Hook forms, inserted by the trace transformer.
    /// `trace_function(f, nargs)` — evaluates `func`, announces the pending
    /// call to the tracer, and yields the callable unchanged.
    TraceFunction { func: Box<ExprLoc>, nargs: usize },
    /// `trace_argument(v [, name] [, nstars])` — evaluates its operand in
    /// boxed position, feeds it to the pending call, and yields the raw
    /// value.
    TraceArgument {
        value: Box<ExprLoc>,
        name: Option<String>,
        nstars: u8,
    },
    /// `trace_return(call, multiple_values)` — wraps the whole rewritten
    /// call. When `boxed`, its result carries the Return event to the
    /// enclosing hook instead of being delivered bare.
    TraceReturn {
        value: Box<ExprLoc>,
        multiple_values: bool,
        boxed: bool,
    },
    /// `trace_access(name, value)` — wraps a name read in load context.
    TraceAccess {
        name: String,
        value: Box<ExprLoc>,
        boxed: bool,
    },
    /// `trace_assign(pattern, rhs)` — wraps the right-hand side of an
    /// assignment. Evaluates the operand in boxed position so the Assign
    /// event can link to the event that produced the value.
    TraceAssign {
        target: AssignSymbol,
        value: Box<ExprLoc>,
    },
}

/// An assignment or deletion target.
#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
    List(Vec<Target>),
    /// `o.x = ...` / `del o.x`. Eliminated by the normaliser.
    Attribute { object: ExprLoc, attr: String },
    /// `o[k] = ...` / `del o[k]`. Eliminated by the normaliser.
    Subscript { object: ExprLoc, index: ExprLoc },
}

impl Target {
    /// The symbolic name shape of this target, if it consists of names only.
    pub fn symbol(&self) -> Option<AssignSymbol> {
        match self {
            Self::Name(name) => Some(AssignSymbol::Name(name.clone())),
            Self::Tuple(elements) | Self::List(elements) => {
                let symbols: Option<Vec<_>> = elements.iter().map(Self::symbol).collect();
                symbols.map(AssignSymbol::Pattern)
            }
            Self::Attribute { .. } | Self::Subscript { .. } => None,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Tuple(_) | Self::List(_))
    }
}

/// A single formal parameter with an optional default expression.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<ExprLoc>,
}

/// Parsed parameter list of a `def` or `lambda`.
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    /// Positional-or-keyword parameters, in order.
    pub args: Vec<Param>,
    /// `*args` name, if present.
    pub vararg: Option<String>,
    /// Keyword-only parameters (after `*` or `*args`).
    pub kwonly: Vec<Param>,
    /// `**kwargs` name, if present.
    pub kwarg: Option<String>,
}

/// How a function defined in a class body binds when looked up on the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodKind {
    #[default]
    Instance,
    /// `@classmethod` — receiver is the class.
    Class,
    /// `@staticmethod` — no receiver.
    Static,
}

/// A function definition (`def`, method, or `lambda`).
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    /// Dotted qualified name, e.g. `Foo.do_sum` or `outer.<locals>.inner`.
    pub qual_name: String,
    pub params: ParamSpec,
    pub body: Vec<StmtLoc>,
    pub method_kind: MethodKind,
    pub position: CodeRange,
}

/// A class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub qual_name: String,
    pub bases: Vec<ExprLoc>,
    pub body: Vec<StmtLoc>,
    pub position: CodeRange,
}

/// A statement with its source location.
#[derive(Debug, Clone)]
pub struct StmtLoc {
    pub position: CodeRange,
    pub stmt: Stmt,
}

impl StmtLoc {
    pub fn new(position: CodeRange, stmt: Stmt) -> Self {
        Self { position, stmt }
    }

    pub fn synthetic(stmt: Stmt) -> Self {
        Self::new(CodeRange::synthetic(), stmt)
    }
}

/// A statement.
#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(ExprLoc),
    /// `t1 = t2 = ... = value`. The normaliser reduces this to exactly one
    /// target per statement.
    Assign { targets: Vec<Target>, value: ExprLoc },
    /// `target op= value`. Eliminated by the normaliser.
    AugAssign {
        target: Target,
        op: BinOpKind,
        value: ExprLoc,
    },
    /// `del t1, t2, ...`. The normaliser splits this into one target per
    /// statement and reduces targets to names.
    Delete { targets: Vec<Target> },
    FunctionDef(Rc<FunctionDef>),
    ClassDef(Rc<ClassDef>),
    Return(Option<ExprLoc>),
    If {
        test: ExprLoc,
        body: Vec<StmtLoc>,
        orelse: Vec<StmtLoc>,
    },
    While {
        test: ExprLoc,
        body: Vec<StmtLoc>,
    },
    For {
        target: Target,
        iter: ExprLoc,
        body: Vec<StmtLoc>,
    },
    /// `import module [as alias]`, resolved against the host module registry.
    Import {
        module: String,
        alias: Option<String>,
    },
    /// `from module import name [as alias], ...`
    FromImport {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    Pass,
    Break,
    Continue,

    /// `trace_delete(name)`, inserted by the trace transformer immediately
    /// before the `del` statement it instruments.
    TraceDelete { name: String },
}
