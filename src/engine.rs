// Tracing Engine (4.5) + Command Dispatcher & Stop Loop (4.6). This is the daemon's main
// controller: it implements `runtime::Tracer`, so the interpreter calls straight into it on
// every line/call/return/exception event; when an event warrants a stop, the *same* call
// parks the target thread inside the command loop and only returns once a resuming command
// has been served, exactly as §5's single-thread, lock-free model requires.
use crate::breakpoints::BreakpointTable;
use crate::ipc::IpcServer;
use crate::protocol::{self, Request};
use crate::runtime::{Frame, Interp, RuntimeError, StepCommand, TraceEvent, Tracer};
use crate::session::{Registry, SessionStatus};
use crate::settings::Settings;
use crate::{format, inspect, log_error, log_info, log_warn};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Set by the daemon's SIGTERM/SIGINT handler (installed in main.rs); polled once per
/// accept-timeout iteration of the stop loop so the daemon can shut down between commands
/// without needing to interrupt a blocking syscall (5).
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Step,
    Return,
    Exception,
    Initial,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
            StopReason::Return => "return",
            StopReason::Exception => "exception",
            StopReason::Initial => "initial",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    pub type_name: String,
    pub message: String,
    pub formatted_traceback: String,
}

impl ExceptionRecord {
    fn to_json(&self) -> Value {
        json!({
            "type": self.type_name,
            "message": self.message,
            "traceback": self.formatted_traceback,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    Running,
    SteppingIn,
    SteppingOver { anchor_id: u64 },
    SteppingOut { anchor_id: u64 },
}

/// The daemon's controller. Owns the breakpoint table, the stepping state machine, the
/// frozen stack from the most recent stop, and the IPC server it serves commands through.
pub struct Engine {
    settings: Settings,
    script_path: PathBuf,
    registry: Registry,
    session_id: String,
    ipc: IpcServer,
    breakpoints: BreakpointTable,
    step_mode: StepMode,
    started: bool,
    stack: Vec<Rc<Frame>>,
    selected: usize,
    last_stop_reason: Option<StopReason>,
    exception_record: Option<ExceptionRecord>,
}

/// Canonicalizes `path` once on insertion (4.5/§3): resolves symlinks and relative
/// components via the filesystem, falling back to a plain cwd-join when the path doesn't
/// exist yet (or is otherwise unreachable) rather than rejecting the breakpoint.
fn canonical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map(|d| d.join(path)).unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

impl Engine {
    pub fn new(settings: Settings, script_path: PathBuf, registry: Registry, session_id: String, ipc: IpcServer) -> Self {
        Engine {
            settings,
            script_path: canonical_path(&script_path),
            registry,
            session_id,
            ipc,
            breakpoints: BreakpointTable::new(),
            step_mode: StepMode::Running,
            started: false,
            stack: Vec::new(),
            selected: 0,
            last_stop_reason: None,
            exception_record: None,
        }
    }

    fn update_status(&self, status: SessionStatus) {
        if let Err(e) = self.registry.update(&self.session_id, |s| s.status = status) {
            log_warn!("failed to update session status: {}", e);
        }
    }

    fn innermost(&self) -> &Rc<Frame> {
        &self.stack[0]
    }

    fn selected_frame(&self) -> &Rc<Frame> {
        &self.stack[self.selected]
    }

    fn build_traceback(&self, type_name: &str, message: &str) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.stack.iter().rev() {
            out.push_str(&format!("  File \"{}\", line {}, in {}\n", self.script_path.display(), frame.line.get(), frame.func_name));
        }
        out.push_str(&format!("{}: {}", type_name, message));
        out
    }

    /// Freezes the stack, resets the selected-frame index, records the stop reason, and
    /// enters the command loop (4.6 step 1-4). Returns the `StepCommand` the eventual
    /// resuming command resolved to.
    fn stop(&mut self, interp: &Interp, reason: StopReason) -> StepCommand {
        let mut frames = interp.frames();
        frames.reverse(); // index 0 = innermost, per the stack view's data model (§3)
        self.stack = frames;
        self.selected = 0;
        self.last_stop_reason = Some(reason);
        if !matches!(reason, StopReason::Exception) {
            self.exception_record = None;
        }
        self.update_status(SessionStatus::Paused);
        log_info!(
            "stopped: reason={} file={} line={}",
            reason.as_str(),
            self.script_path.display(),
            self.innermost().line.get()
        );

        loop {
            if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                self.teardown("signal");
                std::process::exit(0);
            }
            match self.ipc.accept(self.settings.accept_timeout) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log_error!("accept failed: {}", e);
                    continue;
                }
            }
            let request_json = match self.ipc.receive() {
                Ok(Some(v)) => v,
                Ok(None) => continue, // peer disconnected mid-stop: remain paused (4.4/5)
                Err(e) => {
                    log_warn!("receive failed: {}", e);
                    continue;
                }
            };
            let request = match Request::from_json(request_json) {
                Ok(r) => r,
                Err(msg) => {
                    let _ = self.ipc.send(&protocol::error(msg));
                    continue;
                }
            };
            let is_quit = request.command == "quit";
            let (response, resuming, step_cmd) = self.dispatch(interp, &request);
            let _ = self.ipc.send(&response);
            if is_quit {
                self.teardown("quit");
                std::process::exit(0);
            }
            if resuming {
                self.update_status(SessionStatus::Running);
                return step_cmd;
            }
        }
    }

    /// Tears down the IPC server and the session descriptor. Idempotent; called from every
    /// path that ends the daemon (quit, signal, normal completion, uncaught exception after
    /// its final stop is resolved).
    fn teardown(&mut self, reason: &str) {
        log_info!("shutting down ({})", reason);
        if let Some(session) = self.registry.find_by_id(&self.session_id) {
            self.registry.delete(&session);
        }
        self.ipc.close();
    }

    /// Called once, after `Interp::run` returns, regardless of outcome: an uncaught
    /// exception has already been handled (and blocked until a resuming command) via
    /// `on_uncaught`, so by this point there is nothing left to do but clean up (7).
    pub fn finalize(&mut self, result: &Result<(), RuntimeError>) {
        if result.is_ok() {
            self.update_status(SessionStatus::Terminated);
        }
        self.teardown("script completed");
    }

    fn dispatch(&mut self, interp: &Interp, request: &Request) -> (Value, bool, StepCommand) {
        match request.command.as_str() {
            "status" => (self.status_bundle(), false, StepCommand::Continue),
            "continue" => {
                self.step_mode = StepMode::Running;
                self.exception_record = None;
                (protocol::ok(vec![("resumed", json!(true))]), true, StepCommand::Continue)
            }
            "step" => {
                self.step_mode = StepMode::SteppingIn;
                self.exception_record = None;
                (protocol::ok(vec![("resumed", json!(true))]), true, StepCommand::StepInto)
            }
            "next" => {
                self.step_mode = StepMode::SteppingOver { anchor_id: self.innermost().id };
                (protocol::ok(vec![("resumed", json!(true))]), true, StepCommand::StepOver)
            }
            "finish" => {
                self.step_mode = StepMode::SteppingOut { anchor_id: self.innermost().id };
                (protocol::ok(vec![("resumed", json!(true))]), true, StepCommand::StepOut)
            }
            "quit" => (protocol::ok(vec![]), true, StepCommand::Quit),
            "break" => (self.handle_break(request), false, StepCommand::Continue),
            "delete" => (self.handle_delete(request), false, StepCommand::Continue),
            "breakpoints" => (self.handle_breakpoints(), false, StepCommand::Continue),
            "locals" => (self.handle_locals(request), false, StepCommand::Continue),
            "globals" => (self.handle_globals(interp, request), false, StepCommand::Continue),
            "eval" => (self.handle_eval(interp, request, false), false, StepCommand::Continue),
            "inspect" => (self.handle_eval(interp, request, true), false, StepCommand::Continue),
            "stack" => (self.handle_stack(), false, StepCommand::Continue),
            "up" => (self.handle_up(), false, StepCommand::Continue),
            "down" => (self.handle_down(), false, StepCommand::Continue),
            other => (protocol::error(format!("unknown command '{}'", other)), false, StepCommand::Continue),
        }
    }

    fn location_json(&self, frame: &Rc<Frame>) -> Value {
        json!({
            "file": self.script_path,
            "line": frame.line.get(),
            "function": frame.func_name,
        })
    }

    fn one_level_locals(&self) -> Value {
        let mut m = serde_json::Map::new();
        for (name, value) in self.innermost().locals_snapshot() {
            if is_dunder(&name) {
                continue;
            }
            m.insert(name, format::format_value(&value, 1, &self.settings).into_json());
        }
        Value::Object(m)
    }

    fn status_bundle(&self) -> Value {
        let reason = self.last_stop_reason.unwrap_or(StopReason::Initial);
        let mut fields = vec![
            ("stop_reason", json!(reason.as_str())),
            ("location", self.location_json(self.innermost())),
            ("variables", json!({ "locals": self.one_level_locals() })),
        ];
        if let Some(exc) = &self.exception_record {
            fields.push(("exception", exc.to_json()));
        }
        protocol::ok(fields)
    }

    fn handle_break(&mut self, request: &Request) -> Value {
        let file = request.str_arg("file");
        let line = request.u64_arg("line");
        let exception_name = request.str_arg("exception");
        let condition_src = request.str_arg("condition").map(|s| s.to_string());

        if let (Some(file), Some(line)) = (file, line) {
            let file_path = canonical_path(&PathBuf::from(file));
            let condition = match &condition_src {
                Some(src) => match crate::parser::parse_expr_str(src) {
                    Ok(e) => Some(e),
                    Err(e) => return protocol::error(format!("bad condition expression: {}", e)),
                },
                None => None,
            };
            let id = self.breakpoints.set_line(&file_path, line as usize, condition_src, condition);
            return protocol::ok(vec![("id", json!(id))]);
        }
        if let Some(name) = exception_name {
            if name == "*" {
                self.breakpoints.exceptions.wildcard = true;
            } else {
                self.breakpoints.exceptions.names.insert(name.to_string());
            }
            return protocol::ok(vec![("exception", json!(name))]);
        }
        protocol::error("break requires either a file+line or an exception name")
    }

    fn handle_delete(&mut self, request: &Request) -> Value {
        if let Some(number) = request.u64_arg("number") {
            let removed = self.breakpoints.delete_by_id(number as u32);
            return protocol::ok(vec![("removed", json!(removed))]);
        }
        if let (Some(file), Some(line)) = (request.str_arg("file"), request.u64_arg("line")) {
            let removed = self.breakpoints.delete_by_location(&canonical_path(&PathBuf::from(file)), line as usize);
            return protocol::ok(vec![("removed", json!(removed))]);
        }
        if let Some(name) = request.str_arg("exception") {
            if name == "*" {
                self.breakpoints.exceptions.wildcard = false;
                self.breakpoints.exceptions.names.clear();
            } else {
                self.breakpoints.exceptions.names.remove(name);
            }
            return protocol::ok(vec![("removed", json!(true))]);
        }
        protocol::error("delete requires a number, a file+line, or an exception name")
    }

    fn handle_breakpoints(&self) -> Value {
        let lines: Vec<Value> = self
            .breakpoints
            .list()
            .into_iter()
            .map(|b| {
                json!({
                    "id": b.id,
                    "file": b.file,
                    "line": b.line,
                    "enabled": b.enabled,
                    "condition": b.condition_src,
                    "hit_count": b.hit_count,
                })
            })
            .collect();
        let exceptions = json!({
            "wildcard": self.breakpoints.exceptions.wildcard,
            "names": self.breakpoints.exceptions.names.iter().cloned().collect::<Vec<_>>(),
        });
        protocol::ok(vec![("lines", Value::Array(lines)), ("exceptions", exceptions)])
    }

    fn request_depth(&self, request: &Request) -> usize {
        request.u64_arg("depth").map(|d| d as usize).unwrap_or(self.settings.max_depth)
    }

    fn handle_locals(&self, request: &Request) -> Value {
        let depth = self.request_depth(request);
        let mut m = serde_json::Map::new();
        for (name, value) in self.selected_frame().locals_snapshot() {
            if is_dunder(&name) {
                continue;
            }
            m.insert(name, format::format_value(&value, depth, &self.settings).into_json());
        }
        protocol::ok(vec![("locals", Value::Object(m))])
    }

    fn handle_globals(&self, interp: &Interp, request: &Request) -> Value {
        let depth = self.request_depth(request);
        let mut m = serde_json::Map::new();
        for (name, value) in interp.globals_snapshot() {
            if is_dunder(&name) {
                continue;
            }
            m.insert(name, format::format_value(&value, depth, &self.settings).into_json());
        }
        protocol::ok(vec![("globals", Value::Object(m))])
    }

    /// Shared by `eval` and `inspect` (4.6): evaluates `expr` in the selected frame's
    /// bindings under a hard wall-clock budget, then formats the result -- with the plain
    /// formatter for `eval`, with the deep inspector for `inspect`.
    fn handle_eval(&self, interp: &Interp, request: &Request, deep: bool) -> Value {
        let expr = match request.str_arg("expr") {
            Some(e) => e,
            None => return protocol::error("missing required field 'expr'"),
        };
        let depth = self.request_depth(request);
        let deadline = Instant::now() + self.settings.eval_timeout;
        interp.set_timeout_deadline(Some(deadline));
        let result = interp.eval_expr_or_stmt(expr, self.selected_frame());
        interp.set_timeout_deadline(None);

        match result {
            Ok(value) => {
                let record = if deep { inspect::inspect_value(&value, depth, &self.settings) } else { format::format_value(&value, depth, &self.settings) };
                protocol::ok(vec![("result", record.into_json())])
            }
            Err(e) if e.type_name == "TimeoutError" => protocol::error(format!("evaluation timed out after {:?}", self.settings.eval_timeout)),
            Err(e) => protocol::error_with_traceback(format!("{}: {}", e.type_name, e.message), self.build_traceback(&e.type_name, &e.message)),
        }
    }

    fn handle_stack(&self) -> Value {
        let frames: Vec<Value> = self
            .stack
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                json!({
                    "index": i,
                    "function": frame.func_name,
                    "line": frame.line.get(),
                    "current": i == self.selected,
                })
            })
            .collect();
        protocol::ok(vec![("frames", Value::Array(frames)), ("current_index", json!(self.selected))])
    }

    fn handle_up(&mut self) -> Value {
        if self.selected + 1 < self.stack.len() {
            self.selected += 1;
        }
        protocol::ok(vec![("selected", json!(self.selected))])
    }

    fn handle_down(&mut self) -> Value {
        if self.selected > 0 {
            self.selected -= 1;
        }
        protocol::ok(vec![("selected", json!(self.selected))])
    }
}

fn is_dunder(name: &str) -> bool {
    name.starts_with("__") && name.ends_with("__")
}

impl Tracer for Engine {
    fn on_event(&mut self, interp: &Interp, event: TraceEvent) -> StepCommand {
        match event {
            TraceEvent::Line { line } => {
                if !self.started {
                    self.started = true;
                    return self.stop(interp, StopReason::Initial);
                }
                let frames = interp.frames();
                let cur = frames.last().expect("at least one frame is always active").clone();

                if self.check_breakpoint(interp, &cur, line) {
                    return self.stop(interp, StopReason::Breakpoint);
                }

                match self.step_mode {
                    StepMode::SteppingIn => return self.stop(interp, StopReason::Step),
                    StepMode::SteppingOver { anchor_id } => {
                        let anchor_still_active = frames.iter().any(|f| f.id == anchor_id);
                        if cur.id == anchor_id || !anchor_still_active {
                            return self.stop(interp, StopReason::Step);
                        }
                    }
                    // SteppingOut never stops on line events (4.5).
                    StepMode::SteppingOut { .. } | StepMode::Running => {}
                }
                StepCommand::Continue
            }
            TraceEvent::Call { .. } => StepCommand::Continue,
            TraceEvent::Return => {
                if let StepMode::SteppingOut { anchor_id } = self.step_mode {
                    let frames = interp.frames();
                    if let Some(returning) = frames.last() {
                        if returning.id == anchor_id {
                            return self.stop(interp, StopReason::Return);
                        }
                    }
                }
                StepCommand::Continue
            }
            TraceEvent::Exception { type_name, message } => {
                if self.breakpoints.exceptions.matches(&type_name) {
                    let traceback = self.build_traceback(&type_name, &message);
                    self.exception_record = Some(ExceptionRecord { type_name, message, formatted_traceback: traceback });
                    return self.stop(interp, StopReason::Exception);
                }
                StepCommand::Continue
            }
        }
    }

    /// Fired once an exception unwinds past module scope uncaught (4.5): the daemon reports
    /// it as a final `exception` stop and blocks until `quit`, then this call returns and
    /// the caller finalizes the daemon (7).
    fn on_uncaught(&mut self, interp: &Interp, error: &RuntimeError) {
        let traceback = self.build_traceback(&error.type_name, &error.message);
        self.exception_record = Some(ExceptionRecord { type_name: error.type_name.clone(), message: error.message.clone(), formatted_traceback: traceback });
        self.stop(interp, StopReason::Exception);
    }
}

impl Engine {
    /// Line-event breakpoint check (4.5): enabled, location matches, and (if present) the
    /// condition evaluates truthy in the current frame. A condition-evaluation failure
    /// counts as "did not match" -- never re-raised into the target, hit_count unchanged.
    fn check_breakpoint(&mut self, interp: &Interp, cur_frame: &Rc<Frame>, line: usize) -> bool {
        let matched = {
            let bp = match self.breakpoints.get(&self.script_path, line) {
                Some(b) if b.enabled => b,
                _ => return false,
            };
            match &bp.condition {
                Some(cond) => matches!(interp.eval(cond, cur_frame), Ok(v) if v.truthy()),
                None => true,
            }
        };
        if matched {
            if let Some(bp) = self.breakpoints.get_mut(&self.script_path, line) {
                bp.hit_count += 1;
            }
        }
        matched
    }
}
