//! Tree-walking interpreter.
//!
//! Evaluates the internal AST directly. Instrumented programs contain the
//! `Trace*` hook forms, which route through the tracer; plain programs
//! (host-registered modules) contain the surface forms, which are
//! evaluated natively. One walker serves both, so module code and traced
//! code share call, attribute and operator semantics exactly.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    BoolOpKind, CallArg, ClassDef, CmpOpKind, CodeRange, Expr, ExprLoc, FunctionDef, Literal,
    Param, Stmt, StmtLoc, Target,
};
use crate::builtins::{Builtin, call_builtin};
use crate::error::TraceError;
use crate::exception::{ExcType, Exception, RunResult};
use crate::namespace::{EnvRef, Scope};
use crate::operator::{OperatorFn, call_operator};
use crate::parse::parse;
use crate::signature::Signature;
use crate::trace::event::{EventSink, NullSink};
use crate::trace::tracer::{TracedValue, Tracer};
use crate::value::{
    ClassValue, FunctionValue, HashKey, InstanceValue, ModuleValue, SliceValue, Value,
    getattr_value, setattr_value,
};

/// Maximum interpreted call depth before a recursion error.
const MAX_RECURSION_DEPTH: usize = 200;

/// Statement outcome, for loop and function control flow.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Host-registered modules available to `import`.
///
/// The operator support module and `builtins` are always present. Modules
/// registered from source are executed untraced at registration time, so
/// their callables are atomic when invoked from traced code.
pub struct ModuleRegistry {
    modules: IndexMap<String, Rc<ModuleValue>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut modules = IndexMap::new();
        let operator = Rc::new(ModuleValue {
            name: "operator".to_owned(),
            attrs: RefCell::new(OperatorFn::module_attrs()),
        });
        let builtins = Rc::new(ModuleValue {
            name: "builtins".to_owned(),
            attrs: RefCell::new(Builtin::all()),
        });
        modules.insert("operator".to_owned(), operator);
        modules.insert("builtins".to_owned(), builtins);
        Self { modules }
    }

    /// The operator support module, injected into every traced
    /// environment.
    #[must_use]
    pub fn operator_module(&self) -> Value {
        Value::Module(Rc::clone(&self.modules["operator"]))
    }

    /// Executes `source` untraced under `name` and registers the resulting
    /// module.
    pub fn register_source(&mut self, name: &str, source: &str) -> Result<(), TraceError> {
        let statements = parse(source)?;
        let env = Scope::root();
        {
            let mut tracer = Tracer::new([]);
            let mut sink = NullSink;
            let mut interp = Interp::new(&mut tracer, self, name, &mut sink);
            interp
                .exec_module(&statements, &env)
                .map_err(TraceError::Program)?;
        }
        let module = Rc::new(ModuleValue {
            name: name.to_owned(),
            attrs: RefCell::new(Scope::bindings(&env)),
        });
        self.modules.insert(name.to_owned(), module);
        Ok(())
    }

    /// Registers a prebuilt module value.
    pub fn register(&mut self, module: Rc<ModuleValue>) {
        self.modules.insert(module.name.clone(), module);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<ModuleValue>> {
        self.modules.get(name).cloned()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The evaluator. Borrows the tracer and sink for the duration of one
/// program execution.
pub struct Interp<'a, S: EventSink> {
    tracer: &'a mut Tracer,
    registry: &'a ModuleRegistry,
    /// Module currently executing; stamped onto definitions.
    module_name: String,
    sink: &'a mut S,
    depth: usize,
}

impl<'a, S: EventSink> Interp<'a, S> {
    pub fn new(
        tracer: &'a mut Tracer,
        registry: &'a ModuleRegistry,
        module_name: &str,
        sink: &'a mut S,
    ) -> Self {
        Self {
            tracer,
            registry,
            module_name: module_name.to_owned(),
            sink,
            depth: 0,
        }
    }

    /// Executes a module body to completion.
    pub fn exec_module(&mut self, statements: &[StmtLoc], env: &EnvRef) -> RunResult<()> {
        match self.exec_block(statements, env)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(Exception::type_error("'return' outside function")),
            Flow::Break => Err(Exception::type_error("'break' outside loop")),
            Flow::Continue => Err(Exception::type_error("'continue' outside loop")),
        }
    }

    fn exec_block(&mut self, statements: &[StmtLoc], env: &EnvRef) -> RunResult<Flow> {
        for statement in statements {
            match self.exec_stmt(statement, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, statement: &StmtLoc, env: &EnvRef) -> RunResult<Flow> {
        let position = statement.position;
        match &statement.stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value, env)?;
                for target in targets {
                    self.bind_target(target, value.clone(), env)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::AugAssign { target, op, value } => {
                // Reached only in untraced module code; instrumented code
                // has these normalised away.
                let current = match target {
                    Target::Name(name) => Scope::get(env, name)
                        .ok_or_else(|| Exception::name_error(name).at(position))?,
                    Target::Attribute { object, attr } => {
                        let object = self.eval(object, env)?;
                        getattr_value(&object, attr).map_err(|e| e.at(position))?
                    }
                    Target::Subscript { object, index } => {
                        let object = self.eval(object, env)?;
                        let index = self.eval(index, env)?;
                        call_operator(OperatorFn::Getitem, vec![object, index], IndexMap::new())
                            .map_err(|e| e.at(position))?
                    }
                    Target::Tuple(_) | Target::List(_) => {
                        return Err(Exception::type_error(
                            "augmented assignment to a pattern",
                        )
                        .at(position));
                    }
                };
                let operand = self.eval(value, env)?;
                let updated = call_operator(
                    OperatorFn::for_inplace(*op),
                    vec![current, operand],
                    IndexMap::new(),
                )
                .map_err(|e| e.at(position))?;
                self.bind_target(target, updated, env)
                    .map(|()| Flow::Normal)
            }
            Stmt::Delete { targets } => {
                for target in targets {
                    self.delete_target(target, env, position)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::FunctionDef(def) => {
                let function = self.make_function(def, env)?;
                Scope::set(env, &def.name, function);
                Ok(Flow::Normal)
            }
            Stmt::ClassDef(def) => {
                let class = self.make_class(def, env)?;
                Scope::set(env, &def.name, class);
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value, env)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If { test, body, orelse } => {
                if self.eval(test, env)?.truthy() {
                    self.exec_block(body, env)
                } else {
                    self.exec_block(orelse, env)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test, env)?.truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { target, iter, body } => {
                let items = self
                    .eval(iter, env)?
                    .iterate()
                    .map_err(|e| e.at(position))?;
                for item in items {
                    self.bind_target(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Import { module, alias } => {
                let value = self
                    .registry
                    .get(module)
                    .ok_or_else(|| Exception::import_error(module).at(position))?;
                let binding = alias.as_deref().unwrap_or(module);
                Scope::set(env, binding, Value::Module(value));
                Ok(Flow::Normal)
            }
            Stmt::FromImport { module, names } => {
                let value = self
                    .registry
                    .get(module)
                    .ok_or_else(|| Exception::import_error(module).at(position))?;
                for (name, alias) in names {
                    let attr = value.attrs.borrow().get(name).cloned().ok_or_else(|| {
                        Exception::new(
                            ExcType::ImportError,
                            format!("cannot import name '{name}' from '{module}'"),
                        )
                        .at(position)
                    })?;
                    Scope::set(env, alias.as_deref().unwrap_or(name), attr);
                }
                Ok(Flow::Normal)
            }
            Stmt::Pass => Ok(Flow::Normal),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::TraceDelete { name } => {
                self.tracer.trace_delete(name, self.sink);
                Ok(Flow::Normal)
            }
        }
    }

    fn bind_target(&mut self, target: &Target, value: Value, env: &EnvRef) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                Scope::set(env, name, value);
                Ok(())
            }
            Target::Tuple(elements) | Target::List(elements) => {
                let items = value.iterate()?;
                if items.len() != elements.len() {
                    return Err(Exception::value_error(format!(
                        "expected {} values to unpack, got {}",
                        elements.len(),
                        items.len()
                    )));
                }
                for (element, item) in elements.iter().zip(items) {
                    self.bind_target(element, item, env)?;
                }
                Ok(())
            }
            Target::Attribute { object, attr } => {
                let object = self.eval(object, env)?;
                setattr_value(&object, attr, value)
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                call_operator(
                    OperatorFn::Setitem,
                    vec![object, index, value],
                    IndexMap::new(),
                )
                .map(|_| ())
            }
        }
    }

    fn delete_target(
        &mut self,
        target: &Target,
        env: &EnvRef,
        position: CodeRange,
    ) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                if Scope::remove(env, name) {
                    Ok(())
                } else {
                    Err(Exception::name_error(name).at(position))
                }
            }
            Target::Attribute { object, attr } => {
                let object = self.eval(object, env)?;
                crate::value::delattr_value(&object, attr).map_err(|e| e.at(position))
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                call_operator(OperatorFn::Delitem, vec![object, index], IndexMap::new())
                    .map(|_| ())
                    .map_err(|e| e.at(position))
            }
            Target::Tuple(_) | Target::List(_) => {
                Err(Exception::type_error("cannot delete a pattern").at(position))
            }
        }
    }

    /// Evaluates an expression to a raw value.
    fn eval(&mut self, expr: &ExprLoc, env: &EnvRef) -> RunResult<Value> {
        self.eval_boxed(expr, env).map(TracedValue::into_value)
    }

    /// Evaluates an expression, preserving a boxed trace event when the
    /// expression is a hook in boxed position.
    fn eval_boxed(&mut self, expr: &ExprLoc, env: &EnvRef) -> RunResult<TracedValue> {
        let position = expr.position;
        match &expr.expr {
            Expr::Literal(literal) => Ok(TracedValue::Raw(literal_value(literal))),
            Expr::Name(name) => self
                .lookup_name(name, env)
                .map(TracedValue::Raw)
                .map_err(|e| e.at(position)),
            Expr::BuiltinRef(builtin) => Ok(TracedValue::Raw(Value::Builtin(*builtin))),
            Expr::OperatorRef(op) => Ok(TracedValue::Raw(Value::Operator(*op))),
            Expr::Tuple(elements) => {
                let values = self.eval_all(elements, env)?;
                Ok(TracedValue::Raw(Value::tuple(values)))
            }
            Expr::List(elements) => {
                let values = self.eval_all(elements, env)?;
                Ok(TracedValue::Raw(Value::list(values)))
            }
            Expr::Set(elements) => {
                let values = self.eval_all(elements, env)?;
                let mut set = indexmap::IndexSet::new();
                for value in values {
                    set.insert(HashKey::from_value(&value).map_err(|e| e.at(position))?);
                }
                Ok(TracedValue::Raw(Value::Set(Rc::new(RefCell::new(set)))))
            }
            Expr::Dict(pairs) => {
                let mut map = IndexMap::new();
                for (key, value) in pairs {
                    let key_value = self.eval(key, env)?;
                    let key = HashKey::from_value(&key_value).map_err(|e| e.at(position))?;
                    map.insert(key, self.eval(value, env)?);
                }
                Ok(TracedValue::Raw(Value::Dict(Rc::new(RefCell::new(map)))))
            }
            Expr::Attribute { object, attr } => {
                let object = self.eval(object, env)?;
                getattr_value(&object, attr)
                    .map(TracedValue::Raw)
                    .map_err(|e| e.at(position))
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                call_operator(OperatorFn::Getitem, vec![object, index], IndexMap::new())
                    .map(TracedValue::Raw)
                    .map_err(|e| e.at(position))
            }
            Expr::SliceExpr { lower, upper, step } => {
                let mut part = |slot: &Option<Box<ExprLoc>>| -> RunResult<Option<i64>> {
                    match slot {
                        None => Ok(None),
                        Some(expr) => match self.eval(expr, env)? {
                            Value::None => Ok(None),
                            Value::Int(i) => Ok(Some(i)),
                            other => Err(Exception::type_error(format!(
                                "slice indices must be integers or None, not '{}'",
                                other.type_name()
                            ))
                            .at(position)),
                        },
                    }
                };
                let slice = SliceValue {
                    start: part(lower)?,
                    stop: part(upper)?,
                    step: part(step)?,
                };
                Ok(TracedValue::Raw(Value::Slice(Rc::new(slice))))
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(operand, env)?;
                call_operator(
                    OperatorFn::for_unary(*op),
                    vec![operand],
                    IndexMap::new(),
                )
                .map(TracedValue::Raw)
                .map_err(|e| e.at(position))
            }
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                call_operator(
                    OperatorFn::for_binop(*op),
                    vec![left, right],
                    IndexMap::new(),
                )
                .map(TracedValue::Raw)
                .map_err(|e| e.at(position))
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                let result = match op {
                    CmpOpKind::In => {
                        call_operator(OperatorFn::Contains, vec![right, left], IndexMap::new())
                    }
                    CmpOpKind::NotIn => {
                        call_operator(OperatorFn::Contains, vec![right, left], IndexMap::new())
                            .map(|v| Value::Bool(!v.truthy()))
                    }
                    other => call_operator(
                        OperatorFn::for_compare(*other),
                        vec![left, right],
                        IndexMap::new(),
                    ),
                };
                result.map(TracedValue::Raw).map_err(|e| e.at(position))
            }
            Expr::BoolOp { op, values } => {
                let mut result = Value::None;
                for (index, value) in values.iter().enumerate() {
                    result = self.eval(value, env)?;
                    let stop = match op {
                        BoolOpKind::And => !result.truthy(),
                        BoolOpKind::Or => result.truthy(),
                    };
                    if stop && index + 1 < values.len() {
                        return Ok(TracedValue::Raw(result));
                    }
                }
                Ok(TracedValue::Raw(result))
            }
            Expr::IfExpr { test, body, orelse } => {
                if self.eval(test, env)?.truthy() {
                    self.eval_boxed(body, env)
                } else {
                    self.eval_boxed(orelse, env)
                }
            }
            Expr::Lambda { def } => self
                .make_function(def, env)
                .map(TracedValue::Raw),
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let callee = self.eval(func, env)?;
                let mut positional = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        CallArg::Positional(value) => positional.push(self.eval(value, env)?),
                        CallArg::Starred(value) => {
                            let value = self.eval(value, env)?;
                            positional
                                .extend(value.iterate().map_err(|e| e.at(position))?);
                        }
                    }
                }
                let mut keyword_values: IndexMap<String, Value> = IndexMap::new();
                for keyword in keywords {
                    match &keyword.name {
                        Some(name) => {
                            keyword_values.insert(name.clone(), self.eval(&keyword.value, env)?);
                        }
                        None => {
                            let mapping = self.eval(&keyword.value, env)?;
                            let Value::Dict(map) = &mapping else {
                                return Err(Exception::type_error(format!(
                                    "argument after ** must be a mapping, not '{}'",
                                    mapping.type_name()
                                ))
                                .at(position));
                            };
                            for (key, item) in map.borrow().iter() {
                                if let HashKey::Str(key) = key {
                                    keyword_values.insert(key.to_string(), item.clone());
                                }
                            }
                        }
                    }
                }
                self.call_value(callee, positional, keyword_values, position)
                    .map(TracedValue::Raw)
            }

            // Hook forms inserted by the trace transformer.
            Expr::TraceFunction { func, nargs } => {
                let function = self.eval(func, env)?;
                self.tracer
                    .trace_function(function.clone(), *nargs, self.sink)?;
                Ok(TracedValue::Raw(function))
            }
            Expr::TraceArgument {
                value,
                name,
                nstars,
            } => {
                let argument = self.eval_boxed(value, env)?;
                let raw = self.tracer.trace_argument(
                    argument,
                    name.as_deref(),
                    *nstars,
                    self.sink,
                )?;
                Ok(TracedValue::Raw(raw))
            }
            Expr::TraceReturn {
                value,
                multiple_values,
                boxed,
            } => {
                let result = self.eval(value, env)?;
                let (result, event) =
                    self.tracer
                        .trace_return(result, *multiple_values, self.sink)?;
                if *boxed {
                    Ok(TracedValue::Event {
                        id: event.id,
                        value: result,
                    })
                } else {
                    Ok(TracedValue::Raw(result))
                }
            }
            Expr::TraceAccess { name, value, boxed } => {
                let observed = self.eval(value, env)?;
                let event = self.tracer.trace_access(name, observed.clone(), self.sink);
                if *boxed {
                    Ok(TracedValue::Event {
                        id: event.id,
                        value: observed,
                    })
                } else {
                    Ok(TracedValue::Raw(observed))
                }
            }
            Expr::TraceAssign { target, value } => {
                let (raw, event) = self.eval_boxed(value, env)?.into_parts();
                self.tracer
                    .trace_assign(target.clone(), raw.clone(), event, self.sink);
                Ok(TracedValue::Raw(raw))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[ExprLoc], env: &EnvRef) -> RunResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }

    fn lookup_name(&self, name: &str, env: &EnvRef) -> RunResult<Value> {
        if let Some(value) = Scope::get(env, name) {
            return Ok(value);
        }
        if let Some(builtin) = Builtin::from_name(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(Exception::name_error(name))
    }

    /// Invokes any callable value with evaluated arguments.
    fn call_value(
        &mut self,
        callee: Value,
        positional: Vec<Value>,
        keywords: IndexMap<String, Value>,
        position: CodeRange,
    ) -> RunResult<Value> {
        match callee {
            Value::Builtin(builtin) => {
                call_builtin(builtin, positional, keywords).map_err(|e| e.at(position))
            }
            Value::Operator(op) => {
                call_operator(op, positional, keywords).map_err(|e| e.at(position))
            }
            Value::Function(function) => {
                self.call_function(&function, positional, keywords, position)
            }
            Value::BoundMethod(method) => {
                let mut full = Vec::with_capacity(positional.len() + 1);
                full.push(method.receiver.clone());
                full.extend(positional);
                self.call_function(&method.function, full, keywords, position)
            }
            Value::Class(class) => self.instantiate(&class, positional, keywords, position),
            other => Err(Exception::not_callable(&other.type_name()).at(position)),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<FunctionValue>,
        positional: Vec<Value>,
        keywords: IndexMap<String, Value>,
        position: CodeRange,
    ) -> RunResult<Value> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(Exception::new(
                ExcType::RecursionError,
                "maximum recursion depth exceeded",
            )
            .at(position));
        }
        let bound = function
            .signature
            .bind(positional, keywords, &function.defaults)
            .map_err(|error| {
                Exception::type_error(error.message(function.name())).at(position)
            })?;
        let frame = Scope::child(&function.env);
        for (name, value) in bound {
            Scope::set(&frame, &name, value);
        }
        let saved_module = std::mem::replace(&mut self.module_name, function.module.clone());
        self.depth += 1;
        let flow = self.exec_block(&function.def.body, &frame);
        self.depth -= 1;
        self.module_name = saved_module;
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn instantiate(
        &mut self,
        class: &Rc<ClassValue>,
        positional: Vec<Value>,
        keywords: IndexMap<String, Value>,
        position: CodeRange,
    ) -> RunResult<Value> {
        let instance = Value::Instance(Rc::new(RefCell::new(InstanceValue {
            class: Rc::clone(class),
            attrs: IndexMap::new(),
        })));
        match class.lookup("__init__") {
            Some(Value::Function(init)) => {
                let mut full = Vec::with_capacity(positional.len() + 1);
                full.push(instance.clone());
                full.extend(positional);
                self.call_function(&init, full, keywords, position)?;
            }
            Some(_) => {
                return Err(
                    Exception::type_error(format!("{}.__init__ is not a function", class.name))
                        .at(position),
                );
            }
            None => {
                if !positional.is_empty() || !keywords.is_empty() {
                    return Err(Exception::type_error(format!(
                        "{}() takes no arguments",
                        class.name
                    ))
                    .at(position));
                }
            }
        }
        Ok(instance)
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, env: &EnvRef) -> RunResult<Value> {
        let mut defaults = Vec::new();
        let mut arg_defaults_count = 0;
        for Param { default, .. } in &def.params.args {
            if let Some(default) = default {
                defaults.push(self.eval(default, env)?);
                arg_defaults_count += 1;
            }
        }
        let mut kwonly_default_map = Vec::with_capacity(def.params.kwonly.len());
        let mut kwonly_defaults = 0;
        for Param { default, .. } in &def.params.kwonly {
            match default {
                Some(default) => {
                    defaults.push(self.eval(default, env)?);
                    kwonly_default_map.push(Some(kwonly_defaults));
                    kwonly_defaults += 1;
                }
                None => kwonly_default_map.push(None),
            }
        }
        let signature = Signature {
            args: def.params.args.iter().map(|p| p.name.clone()).collect(),
            arg_defaults_count,
            vararg: def.params.vararg.clone(),
            kwonly: def.params.kwonly.iter().map(|p| p.name.clone()).collect(),
            kwonly_default_map,
            kwarg: def.params.kwarg.clone(),
        };
        Ok(Value::Function(Rc::new(FunctionValue {
            def: Rc::clone(def),
            module: self.module_name.clone(),
            signature,
            defaults,
            env: Rc::clone(env),
        })))
    }

    fn make_class(&mut self, def: &Rc<ClassDef>, env: &EnvRef) -> RunResult<Value> {
        let mut bases = Vec::with_capacity(def.bases.len());
        for base in &def.bases {
            match self.eval(base, env)? {
                Value::Class(class) => bases.push(class),
                other => {
                    return Err(Exception::type_error(format!(
                        "class base must be a class, not '{}'",
                        other.type_name()
                    ))
                    .at(def.position));
                }
            }
        }
        let body_env = Scope::child(env);
        match self.exec_block(&def.body, &body_env)? {
            Flow::Normal => {}
            _ => {
                return Err(
                    Exception::type_error("control flow escaping class body").at(def.position)
                );
            }
        }
        Ok(Value::Class(Rc::new(ClassValue {
            name: def.name.clone(),
            qual_name: def.qual_name.clone(),
            module: self.module_name.clone(),
            bases,
            attrs: RefCell::new(Scope::bindings(&body_env)),
        })))
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(Rc::clone(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> IndexMap<String, Value> {
        let registry = ModuleRegistry::new();
        let statements = parse(source).unwrap();
        let env = Scope::root();
        let mut tracer = Tracer::new([]);
        let mut sink = NullSink;
        let mut interp = Interp::new(&mut tracer, &registry, "test", &mut sink);
        interp.exec_module(&statements, &env).unwrap();
        Scope::bindings(&env)
    }

    #[test]
    fn evaluates_arithmetic_and_calls() {
        let env = run("x = 1 + 2 * 3\ny = len('abcd')\n");
        assert!(matches!(env["x"], Value::Int(7)));
        assert!(matches!(env["y"], Value::Int(4)));
    }

    #[test]
    fn user_functions_bind_and_return() {
        let env = run("def add(a, b=10):\n    return a + b\n\nx = add(1)\ny = add(1, 2)\n");
        assert!(matches!(env["x"], Value::Int(11)));
        assert!(matches!(env["y"], Value::Int(3)));
    }

    #[test]
    fn classes_construct_and_mutate_instances() {
        let env = run(
            "class Point:\n    def __init__(self, x):\n        self.x = x\n    def shift(self, d):\n        self.x = self.x + d\n        return self.x\n\np = Point(3)\nq = p.shift(4)\n",
        );
        assert!(matches!(env["q"], Value::Int(7)));
        let Value::Instance(instance) = &env["p"] else {
            panic!("expected instance");
        };
        assert!(matches!(instance.borrow().attrs["x"], Value::Int(7)));
    }

    #[test]
    fn inheritance_resolves_methods_through_bases() {
        let env = run(
            "class Base:\n    def ping(self):\n        return 'base'\n\nclass Child(Base):\n    pass\n\nc = Child()\nx = c.ping()\n",
        );
        assert_eq!(env["x"].py_str(), "base");
    }

    #[test]
    fn loops_and_conditionals_run() {
        let env = run(
            "total = 0\nfor i in range(5):\n    if i == 3:\n        continue\n    total = total + i\n",
        );
        assert!(matches!(env["total"], Value::Int(7)));
    }

    #[test]
    fn destructuring_assignment_unpacks() {
        let env = run("a, b = (1, 2)\n");
        assert!(matches!(env["a"], Value::Int(1)));
        assert!(matches!(env["b"], Value::Int(2)));
    }

    #[test]
    fn lambdas_capture_their_environment() {
        let env = run("k = 10\nf = lambda x: x + k\ny = f(5)\n");
        assert!(matches!(env["y"], Value::Int(15)));
    }

    #[test]
    fn registered_modules_are_importable() {
        let mut registry = ModuleRegistry::new();
        registry
            .register_source("shapes", "def area(w, h):\n    return w * h\n")
            .unwrap();
        let statements = parse("import shapes\nx = shapes.area(3, 4)\n").unwrap();
        let env = Scope::root();
        let mut tracer = Tracer::new([]);
        let mut sink = NullSink;
        let mut interp = Interp::new(&mut tracer, &registry, "test", &mut sink);
        interp.exec_module(&statements, &env).unwrap();
        assert!(matches!(Scope::get(&env, "x"), Some(Value::Int(12))));
    }

    #[test]
    fn name_errors_carry_positions() {
        let registry = ModuleRegistry::new();
        let statements = parse("x = missing\n").unwrap();
        let env = Scope::root();
        let mut tracer = Tracer::new([]);
        let mut sink = NullSink;
        let mut interp = Interp::new(&mut tracer, &registry, "test", &mut sink);
        let error = interp.exec_module(&statements, &env).unwrap_err();
        assert_eq!(error.exc_type, ExcType::NameError);
        assert!(error.position.is_some());
    }

    #[test]
    fn recursion_is_bounded() {
        let registry = ModuleRegistry::new();
        let statements = parse("def f():\n    return f()\n\nf()\n").unwrap();
        let env = Scope::root();
        let mut tracer = Tracer::new([]);
        let mut sink = NullSink;
        let mut interp = Interp::new(&mut tracer, &registry, "test", &mut sink);
        let error = interp.exec_module(&statements, &env).unwrap_err();
        assert_eq!(error.exc_type, ExcType::RecursionError);
    }
}
