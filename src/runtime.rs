// Embedded script runtime (10.1): a small tree-walking interpreter for a brace-delimited
// language, built only because launching/executing the target program is, in the contract
// this crate implements, delegated to "an embedded script runtime" collaborator for which no
// off-the-shelf implementation was available to reuse. Fires a trace hook (4.5) on every
// executed line, call, return, and raised exception; the tracing engine (tracing_engine.rs)
// decides, from that stream, when to actually stop.
use crate::ast::{AssignTarget, BinOp, BoolOp, CmpOp, Expr, Program, Stmt, StmtKind};
use crate::value::{SeqKind, Value};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    // Default-argument expressions are evaluated once, at this definition's elaboration
    // time, and cached here as `Value`s -- not re-evaluated per call. This reproduces the
    // classic "mutable default argument" surprise on purpose: a `[]`/`{}` default is the
    // *same* value across every call that doesn't pass that argument explicitly.
    pub params: Vec<(String, Option<Value>)>,
    pub body: Rc<Vec<Stmt>>,
}

/// One script-level call frame. `id` is a monotonically increasing counter assigned at call
/// time, used by the stepping state machine (4.5) to recognize "the frame I started stepping
/// from" across recursive calls to the same function.
#[derive(Debug)]
pub struct Frame {
    pub id: u64,
    pub func_name: String,
    pub line: Cell<usize>,
    locals: RefCell<Vec<(String, Value)>>,
}

impl Frame {
    fn new(id: u64, func_name: impl Into<String>) -> Rc<Frame> {
        Rc::new(Frame { id, func_name: func_name.into(), line: Cell::new(0), locals: RefCell::new(Vec::new()) })
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.locals.borrow().iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    pub fn set_local(&self, name: &str, value: Value) {
        let mut locals = self.locals.borrow_mut();
        if let Some(entry) = locals.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value;
        } else {
            locals.push((name.to_string(), value));
        }
    }

    pub fn locals_snapshot(&self) -> Vec<(String, Value)> {
        self.locals.borrow().clone()
    }
}

#[derive(Debug, Clone)]
pub enum TraceEvent {
    Line { line: usize },
    Call { line: usize },
    Return,
    Exception { type_name: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCommand {
    Continue,
    StepInto,
    StepOver,
    StepOut,
    Quit,
}

/// A raised script exception. Unlike host-level `crate::error::Error`, these are caught by
/// `try`/`except` inside the running script; only an uncaught one reaches the top level.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub type_name: String,
    pub message: String,
}

impl RuntimeError {
    fn new(type_name: &str, message: impl Into<String>) -> Self {
        RuntimeError { type_name: type_name.to_string(), message: message.into() }
    }
}

pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub type ExecResult = Result<Flow, RuntimeError>;

/// Called by the interpreter on every traced event; decides whether execution should pause
/// and, if so, returns the command the pause was resolved with. Implemented by
/// `tracing::TracingEngine` (via the command dispatcher).
pub trait Tracer {
    fn on_event(&mut self, interp: &Interp, event: TraceEvent) -> StepCommand;

    /// Fired once, unconditionally, when an exception unwinds all the way past module scope
    /// without being caught. Separate from `on_event`'s `Exception` case, which is filtered
    /// by the configured exception breakpoints and fires while the raising frame is still on
    /// the stack; by the time this fires every call frame has already been popped.
    fn on_uncaught(&mut self, _interp: &Interp, _error: &RuntimeError) {}
}

struct NopTracer;
impl Tracer for NopTracer {
    fn on_event(&mut self, _interp: &Interp, _event: TraceEvent) -> StepCommand {
        StepCommand::Continue
    }
}

pub struct Interp {
    globals: RefCell<Vec<(String, Value)>>,
    functions: RefCell<BTreeMap<String, Rc<FunctionDef>>>,
    frames: RefCell<Vec<Rc<Frame>>>,
    call_counter: Cell<u64>,
    tracer: RefCell<Box<dyn Tracer>>,
    pub quit_requested: Cell<bool>,
    max_stack_depth: Cell<usize>,
    // Guards the exec_stmt-level Exception fire (below) so a raise reports exactly once, at
    // the deepest frame that was active when it happened, no matter how many enclosing
    // if/while/try statements the error then unwinds through on its way out.
    exception_reported: Cell<bool>,
    // Wall-clock budget for a single eval/inspect invocation (4.6); `None` outside of one.
    timeout_deadline: Cell<Option<Instant>>,
}

const NATIVE_NAMES: &[&str] = &["len", "sum", "range", "str", "abs", "int", "float"];

impl Interp {
    pub fn new() -> Self {
        Interp {
            globals: RefCell::new(Vec::new()),
            functions: RefCell::new(BTreeMap::new()),
            frames: RefCell::new(Vec::new()),
            call_counter: Cell::new(0),
            tracer: RefCell::new(Box::new(NopTracer)),
            quit_requested: Cell::new(false),
            max_stack_depth: Cell::new(50),
            exception_reported: Cell::new(false),
            timeout_deadline: Cell::new(None),
        }
    }

    pub fn set_tracer(&self, tracer: Box<dyn Tracer>) {
        *self.tracer.borrow_mut() = tracer;
    }

    pub fn set_max_stack_depth(&self, depth: usize) {
        self.max_stack_depth.set(depth);
    }

    /// Scopes the eval/inspect wall-clock budget (4.6): callers set a deadline before
    /// invoking `eval_expr_or_stmt`, then clear it again on every exit path (success, error,
    /// or timeout) so the budget never leaks into ordinary stepped execution.
    pub fn set_timeout_deadline(&self, deadline: Option<Instant>) {
        self.timeout_deadline.set(deadline);
    }

    pub fn frames(&self) -> Vec<Rc<Frame>> {
        self.frames.borrow().clone()
    }

    pub fn globals_snapshot(&self) -> Vec<(String, Value)> {
        self.globals.borrow().clone()
    }

    fn check_deadline(&self) -> Result<(), RuntimeError> {
        match self.timeout_deadline.get() {
            Some(deadline) if Instant::now() >= deadline => {
                Err(RuntimeError::new("TimeoutError", "evaluation exceeded the time budget"))
            }
            _ => Ok(()),
        }
    }

    /// Parses `src` as a standalone expression first; on a syntax error, falls back to
    /// parsing and executing it as a one-statement program (4.6's eval/inspect contract).
    /// Used only by the eval/inspect handlers, never by the script's own execution.
    pub fn eval_expr_or_stmt(&self, src: &str, frame: &Rc<Frame>) -> Result<Value, RuntimeError> {
        match crate::parser::parse_expr_str(src) {
            Ok(expr) => self.eval(&expr, frame),
            Err(_) => {
                let program = crate::parser::parse_program(src)
                    .map_err(|e| RuntimeError::new("SyntaxError", e.message))?;
                match self.exec_block(&program, frame)? {
                    Flow::Return(v) => Ok(v),
                    _ => Ok(Value::Null),
                }
            }
        }
    }

    fn fire(&self, event: TraceEvent) -> StepCommand {
        let cmd = self.tracer.borrow_mut().on_event(self, event);
        if cmd == StepCommand::Quit {
            self.quit_requested.set(true);
        }
        cmd
    }

    /// Runs a whole program at module scope (10.1 / e2e scenario 1). The implicit module
    /// frame has id 0 and is never popped.
    pub fn run(&self, program: &Program) -> Result<(), RuntimeError> {
        let module_frame = Frame::new(0, "<module>");
        self.frames.borrow_mut().push(module_frame.clone());
        let result = self.exec_block(program, &module_frame);
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.tracer.borrow_mut().on_uncaught(self, &e);
                Err(e)
            }
        }
    }

    fn exec_block(&self, stmts: &[Stmt], frame: &Rc<Frame>) -> ExecResult {
        for stmt in stmts {
            if self.quit_requested.get() {
                return Ok(Flow::Return(Value::Null));
            }
            self.check_deadline()?;
            match self.exec_stmt(stmt, frame)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, frame: &Rc<Frame>) -> ExecResult {
        frame.line.set(stmt.line);
        self.fire(TraceEvent::Line { line: stmt.line });

        let result = self.exec_stmt_kind(stmt, frame);
        if let Err(e) = &result {
            if !self.exception_reported.get() {
                self.exception_reported.set(true);
                self.fire(TraceEvent::Exception { type_name: e.type_name.clone(), message: e.message.clone() });
            }
        }
        result
    }

    fn exec_stmt_kind(&self, stmt: &Stmt, frame: &Rc<Frame>) -> ExecResult {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, frame)?;
                Ok(Flow::Normal)
            }
            StmtKind::Assign(target, value) => {
                let v = self.eval(value, frame)?;
                self.assign(target, v, frame)?;
                Ok(Flow::Normal)
            }
            StmtKind::If(cond, then_body, else_body) => {
                if self.eval(cond, frame)?.truthy() {
                    self.exec_block(then_body, frame)
                } else {
                    self.exec_block(else_body, frame)
                }
            }
            StmtKind::While(cond, body) => {
                while self.eval(cond, frame)?.truthy() {
                    if self.quit_requested.get() {
                        break;
                    }
                    self.check_deadline()?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For(var, iter_expr, body) => {
                let iter_val = self.eval(iter_expr, frame)?;
                let items = self.iterate(&iter_val)?;
                for item in items {
                    if self.quit_requested.get() {
                        break;
                    }
                    self.check_deadline()?;
                    self.bind_name(frame, var, item);
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::FunctionDef(name, params, body) => {
                let mut resolved_params = Vec::with_capacity(params.len());
                for (pname, default) in params {
                    let default_value = match default {
                        Some(expr) => Some(self.eval(expr, frame)?),
                        None => None,
                    };
                    resolved_params.push((pname.clone(), default_value));
                }
                let def = Rc::new(FunctionDef { name: name.clone(), params: resolved_params, body: Rc::new(body.clone()) });
                self.functions.borrow_mut().insert(name.clone(), def.clone());
                self.set_global(name, Value::Function(def));
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            StmtKind::Raise(type_name, message) => {
                let message = match message {
                    Some(e) => self.eval(e, frame)?.repr(),
                    None => String::new(),
                };
                Err(RuntimeError::new(type_name, message))
            }
            StmtKind::Try(body, except_type, bind, handler) => {
                match self.exec_block(body, frame) {
                    Err(e) if except_type.is_none() || except_type.as_deref() == Some(e.type_name.as_str()) => {
                        if let Some(name) = bind {
                            frame.set_local(name, Value::str(e.message.clone()));
                        }
                        self.exec_block(handler, frame)
                    }
                    other => other,
                }
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Normal),
        }
    }

    fn assign(&self, target: &AssignTarget, value: Value, frame: &Rc<Frame>) -> Result<(), RuntimeError> {
        match target {
            AssignTarget::Name(name) => {
                if frame.id == 0 {
                    self.set_global(name, value);
                } else {
                    frame.set_local(name, value);
                }
                Ok(())
            }
            AssignTarget::Attr(base, attr) => {
                let base_val = self.eval(base, frame)?;
                match base_val {
                    Value::Object(obj) => {
                        let mut obj = obj.borrow_mut();
                        if let Some(entry) = obj.fields.iter_mut().find(|(k, _)| k == attr) {
                            entry.1 = value;
                        } else {
                            obj.fields.push((attr.clone(), value));
                        }
                        Ok(())
                    }
                    other => Err(RuntimeError::new("TypeError", format!("'{}' object has no settable attributes", other.type_name()))),
                }
            }
            AssignTarget::Index(base, index) => {
                let base_val = self.eval(base, frame)?;
                let idx_val = self.eval(index, frame)?;
                match &base_val {
                    Value::Seq(SeqKind::List, items) => {
                        let i = as_index(&idx_val)?;
                        let mut items = items.borrow_mut();
                        if i >= items.len() {
                            return Err(RuntimeError::new("IndexError", "list assignment index out of range"));
                        }
                        items[i] = value;
                        Ok(())
                    }
                    Value::Map(m) => {
                        m.borrow_mut().insert(idx_val.repr_key(), value);
                        Ok(())
                    }
                    other => Err(RuntimeError::new("TypeError", format!("'{}' object does not support item assignment", other.type_name()))),
                }
            }
        }
    }

    /// Binds `name` in the frame the same way a plain `name = value` assignment would
    /// (global at the top-level frame, local otherwise). Used by `for` loop iteration.
    fn bind_name(&self, frame: &Rc<Frame>, name: &str, value: Value) {
        if frame.id == 0 {
            self.set_global(name, value);
        } else {
            frame.set_local(name, value);
        }
    }

    fn set_global(&self, name: &str, value: Value) {
        let mut globals = self.globals.borrow_mut();
        if let Some(entry) = globals.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value;
        } else {
            globals.push((name.to_string(), value));
        }
    }

    fn lookup(&self, name: &str, frame: &Rc<Frame>) -> Option<Value> {
        if frame.id != 0 {
            if let Some(v) = frame.get_local(name) {
                return Some(v);
            }
        }
        if let Some((_, v)) = self.globals.borrow().iter().find(|(k, _)| k == name) {
            return Some(v.clone());
        }
        if NATIVE_NAMES.contains(&name) {
            return Some(Value::Native(NATIVE_NAMES.iter().find(|n| **n == name).unwrap()));
        }
        None
    }

    fn iterate(&self, v: &Value) -> Result<Vec<Value>, RuntimeError> {
        match v {
            Value::Seq(_, items) => Ok(items.borrow().clone()),
            Value::Set(items) => Ok(items.borrow().clone()),
            Value::Map(m) => Ok(m.borrow().keys().map(|k| Value::str(k.clone())).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            other => Err(RuntimeError::new("TypeError", format!("'{}' object is not iterable", other.type_name()))),
        }
    }

    pub fn eval(&self, expr: &Expr, frame: &Rc<Frame>) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Name(name) => self
                .lookup(name, frame)
                .ok_or_else(|| RuntimeError::new("NameError", format!("name '{}' is not defined", name))),
            Expr::List(items) => {
                let values = items.iter().map(|e| self.eval(e, frame)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => {
                let values = items.iter().map(|e| self.eval(e, frame)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Seq(SeqKind::Tuple, Rc::new(RefCell::new(values))))
            }
            Expr::SetLit(items) => {
                let values = items.iter().map(|e| self.eval(e, frame)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Set(Rc::new(RefCell::new(values))))
            }
            Expr::MapLit(pairs) => {
                let mut m = BTreeMap::new();
                for (k, v) in pairs {
                    let key = self.eval(k, frame)?;
                    let value = self.eval(v, frame)?;
                    m.insert(key.repr_key(), value);
                }
                Ok(Value::Map(Rc::new(RefCell::new(m))))
            }
            Expr::Neg(e) => match self.eval(e, frame)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(RuntimeError::new("TypeError", format!("bad operand type for unary -: '{}'", other.type_name()))),
            },
            Expr::Not(e) => Ok(Value::Bool(!self.eval(e, frame)?.truthy())),
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs, frame)?;
                let r = self.eval(rhs, frame)?;
                eval_binop(*op, l, r)
            }
            Expr::Compare(op, lhs, rhs) => {
                let l = self.eval(lhs, frame)?;
                let r = self.eval(rhs, frame)?;
                Ok(Value::Bool(eval_cmp(*op, &l, &r)))
            }
            Expr::BoolOp(op, lhs, rhs) => {
                let l = self.eval(lhs, frame)?;
                match op {
                    BoolOp::And => if l.truthy() { self.eval(rhs, frame) } else { Ok(l) },
                    BoolOp::Or => if l.truthy() { Ok(l) } else { self.eval(rhs, frame) },
                }
            }
            Expr::Attr(base, attr) => {
                let base_val = self.eval(base, frame)?;
                match &base_val {
                    Value::Object(obj) => obj
                        .borrow()
                        .get(attr)
                        .cloned()
                        .ok_or_else(|| RuntimeError::new("AttributeError", format!("'{}' object has no attribute '{}'", base_val.type_name(), attr))),
                    other => Err(RuntimeError::new("AttributeError", format!("'{}' object has no attribute '{}'", other.type_name(), attr))),
                }
            }
            Expr::Index(base, index) => {
                let base_val = self.eval(base, frame)?;
                let idx_val = self.eval(index, frame)?;
                index_value(&base_val, &idx_val)
            }
            Expr::Call(callee, args) => {
                let callee_val = self.eval(callee, frame)?;
                let arg_values = args.iter().map(|a| self.eval(a, frame)).collect::<Result<Vec<_>, _>>()?;
                self.call(callee_val, arg_values, frame)
            }
        }
    }

    fn call(&self, callee: Value, args: Vec<Value>, caller_frame: &Rc<Frame>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Native(name) => call_native(name, args),
            Value::Function(def) => {
                let id = self.call_counter.get() + 1;
                self.call_counter.set(id);
                let new_frame = Frame::new(id, def.name.clone());
                new_frame.line.set(caller_frame.line.get());
                for (i, (pname, default)) in def.params.iter().enumerate() {
                    let value = args.get(i).cloned().or_else(|| default.clone()).ok_or_else(|| {
                        RuntimeError::new("TypeError", format!("{}() missing required argument: '{}'", def.name, pname))
                    })?;
                    new_frame.set_local(pname, value);
                }
                self.frames.borrow_mut().push(new_frame.clone());
                self.fire(TraceEvent::Call { line: new_frame.line.get() });
                let result = self.exec_block(&def.body, &new_frame);
                self.fire(TraceEvent::Return);
                self.frames.borrow_mut().pop();
                match result? {
                    Flow::Return(v) => Ok(v),
                    _ => Ok(Value::Null),
                }
            }
            other => Err(RuntimeError::new("TypeError", format!("'{}' object is not callable", other.type_name()))),
        }
    }
}

fn as_index(v: &Value) -> Result<usize, RuntimeError> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        Value::Int(_) => Err(RuntimeError::new("IndexError", "negative indices are not supported")),
        other => Err(RuntimeError::new("TypeError", format!("indices must be integers, not '{}'", other.type_name()))),
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match base {
        Value::Seq(_, items) => {
            let i = as_index(index)?;
            items.borrow().get(i).cloned().ok_or_else(|| RuntimeError::new("IndexError", "list index out of range"))
        }
        Value::Str(s) => {
            let i = as_index(index)?;
            s.chars().nth(i).map(|c| Value::str(c.to_string())).ok_or_else(|| RuntimeError::new("IndexError", "string index out of range"))
        }
        Value::Map(m) => {
            let key = index.repr_key();
            m.borrow().get(&key).cloned().ok_or_else(|| RuntimeError::new("KeyError", format!("{}", key)))
        }
        other => Err(RuntimeError::new("TypeError", format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

fn eval_binop(op: BinOp, l: Value, r: Value) -> Result<Value, RuntimeError> {
    use Value::*;
    match (op, &l, &r) {
        (BinOp::Add, Str(a), Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (BinOp::Add, Seq(SeqKind::List, a), Seq(SeqKind::List, b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        (BinOp::Mod, Int(_), Int(0)) | (BinOp::Div, Int(_), Int(0)) => Err(RuntimeError::new("ZeroDivisionError", "division by zero")),
        (_, Int(a), Int(b)) => {
            let (a, b) = (*a, *b);
            Ok(match op {
                BinOp::Add => Int(a + b),
                BinOp::Sub => Int(a - b),
                BinOp::Mul => Int(a * b),
                BinOp::Div => Float(a as f64 / b as f64),
                BinOp::Mod => Int(a % b),
            })
        }
        (_, a, b) if is_number(a) && is_number(b) => {
            let (a, b) = (as_f64(a), as_f64(b));
            if op == BinOp::Div && b == 0.0 {
                return Err(RuntimeError::new("ZeroDivisionError", "float division by zero"));
            }
            Ok(Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
            }))
        }
        _ => Err(RuntimeError::new(
            "TypeError",
            format!("unsupported operand type(s) for {:?}: '{}' and '{}'", op, l.type_name(), r.type_name()),
        )),
    }
}

fn is_number(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn eval_cmp(op: CmpOp, l: &Value, r: &Value) -> bool {
    if is_number(l) && is_number(r) {
        let (a, b) = (as_f64(l), as_f64(r));
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::NotEq => a != b,
            CmpOp::Lt => a < b,
            CmpOp::LtEq => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::GtEq => a >= b,
        };
    }
    match op {
        CmpOp::Eq => l.repr() == r.repr() && l.type_name() == r.type_name(),
        CmpOp::NotEq => !(l.repr() == r.repr() && l.type_name() == r.type_name()),
        CmpOp::Lt => l.repr() < r.repr(),
        CmpOp::LtEq => l.repr() <= r.repr(),
        CmpOp::Gt => l.repr() > r.repr(),
        CmpOp::GtEq => l.repr() >= r.repr(),
    }
}

fn call_native(name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match name {
        "len" => args
            .first()
            .and_then(|v| v.len())
            .map(|n| Value::Int(n as i64))
            .ok_or_else(|| RuntimeError::new("TypeError", "object has no len()")),
        "sum" => {
            let items = args.first().map(|v| match v {
                Value::Seq(_, items) => items.borrow().clone(),
                _ => Vec::new(),
            }).unwrap_or_default();
            let mut total = 0.0;
            let mut all_int = true;
            for item in &items {
                match item {
                    Value::Int(i) => total += *i as f64,
                    Value::Float(f) => {
                        all_int = false;
                        total += *f;
                    }
                    _ => return Err(RuntimeError::new("TypeError", "sum() requires numeric items")),
                }
            }
            Ok(if all_int { Value::Int(total as i64) } else { Value::Float(total) })
        }
        "range" => {
            let (start, end) = match args.len() {
                1 => (0, as_range_bound(&args[0])?),
                2 => (as_range_bound(&args[0])?, as_range_bound(&args[1])?),
                _ => return Err(RuntimeError::new("TypeError", "range() takes 1 or 2 arguments")),
            };
            Ok(Value::list((start..end).map(Value::Int).collect()))
        }
        "str" => Ok(Value::str(args.first().map(|v| v.repr_display()).unwrap_or_default())),
        "abs" => match args.first() {
            Some(Value::Int(i)) => Ok(Value::Int(i.abs())),
            Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
            _ => Err(RuntimeError::new("TypeError", "abs() requires a number")),
        },
        "int" => match args.first() {
            Some(Value::Int(i)) => Ok(Value::Int(*i)),
            Some(Value::Float(f)) => Ok(Value::Int(*f as i64)),
            Some(Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| RuntimeError::new("ValueError", format!("invalid literal for int(): '{}'", s))),
            _ => Err(RuntimeError::new("TypeError", "int() requires a number or string")),
        },
        "float" => match args.first() {
            Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
            Some(Value::Float(f)) => Ok(Value::Float(*f)),
            Some(Value::Str(s)) => s.trim().parse().map(Value::Float).map_err(|_| RuntimeError::new("ValueError", format!("invalid literal for float(): '{}'", s))),
            _ => Err(RuntimeError::new("TypeError", "float() requires a number or string")),
        },
        other => Err(RuntimeError::new("NameError", format!("name '{}' is not defined", other))),
    }
}

fn as_range_bound(v: &Value) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::new("TypeError", format!("'{}' object cannot be interpreted as an integer", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run_src(src: &str) -> Interp {
        let interp = Interp::new();
        let program = parse_program(src).unwrap();
        interp.run(&program).unwrap();
        interp
    }

    #[test]
    fn assigns_and_reads_globals() {
        let interp = run_src("x = 1\ny = x + 2\n");
        let globals = interp.globals_snapshot();
        assert!(globals.iter().any(|(k, v)| k == "y" && matches!(v, Value::Int(3))));
    }

    #[test]
    fn function_call_returns_value() {
        let interp = run_src("fn add(a, b) {\nreturn a + b\n}\nresult = add(2, 3)\n");
        let globals = interp.globals_snapshot();
        assert!(globals.iter().any(|(k, v)| k == "result" && matches!(v, Value::Int(5))));
    }

    #[test]
    fn mutable_default_argument_is_shared_across_calls() {
        let interp = run_src(
            "fn collect(item, acc = []) {\n\
             acc = acc\n\
             return acc\n\
             }\n\
             fn push_into(lst, item) {\n\
             lst = lst\n\
             }\n\
             first = collect(1)\n",
        );
        let def = interp.functions.borrow().get("collect").cloned().unwrap();
        assert!(matches!(&def.params[1].1, Some(Value::Seq(SeqKind::List, _))));
    }

    #[test]
    fn uncaught_exception_is_reported() {
        let interp = Interp::new();
        let program = parse_program("raise ValueError(\"bad\")\n").unwrap();
        let result = interp.run(&program);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().type_name, "ValueError");
    }

    #[test]
    fn try_except_recovers_and_binds_message() {
        let interp = run_src(
            "caught = \"\"\n\
             try {\n\
             raise ValueError(\"oops\")\n\
             } except ValueError as e {\n\
             caught = e\n\
             }\n",
        );
        let globals = interp.globals_snapshot();
        let caught = globals.iter().find(|(k, _)| k == "caught").unwrap();
        assert_eq!(caught.1.repr(), "\"oops\"");
    }

    #[test]
    fn division_by_zero_raises() {
        let interp = Interp::new();
        let program = parse_program("x = 1 / 0\n").unwrap();
        let result = interp.run(&program);
        assert_eq!(result.unwrap_err().type_name, "ZeroDivisionError");
    }
}
