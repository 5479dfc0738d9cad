// Binary entry point: dispatches into the CLI façade (4.7/6) for ordinary invocations, or
// into the daemon loop for the hidden `__daemon` invocation that `start` spawns itself as.
mod ast;
mod breakpoints;
mod engine;
mod error;
mod format;
mod inspect;
mod ipc;
mod lexer;
mod log;
mod parser;
mod protocol;
mod runtime;
mod session;
mod settings;
mod value;

use crate::engine::Engine;
use crate::error::{Error, ErrorKind, Result};
use crate::ipc::IpcClient;
use crate::protocol::{self, Request};
use crate::runtime::{Interp, RuntimeError, StepCommand, TraceEvent, Tracer};
use crate::session::{Registry, Session, SessionStatus};
use crate::settings::Settings;
use crate::{err, log_error, log_info};
use serde_json::{json, Value as Json};
use std::cell::RefCell;
use std::env;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const DAEMON_ENTRYPOINT: &str = "__daemon";
const RESUME_STATUS_DELAY: Duration = Duration::from_millis(100);

fn main() {
    let args: Vec<String> = env::args().collect();
    let settings = Settings::from_env();
    log::init(&settings.state_dir);

    if args.len() >= 2 && args[1] == DAEMON_ENTRYPOINT {
        run_daemon(settings, &args[2..]);
        return;
    }

    let record = match run_cli(&settings, &args[1..]) {
        Ok(record) => record,
        Err(e) => protocol::error(e.message),
    };
    let is_ok = record.get("status").and_then(|v| v.as_str()) == Some("ok");
    println!("{}", record);
    std::process::exit(if is_ok { 0 } else { 1 });
}

// ---------------------------------------------------------------------------------------
// CLI façade (4.7/6)
// ---------------------------------------------------------------------------------------

fn run_cli(settings: &Settings, args: &[String]) -> Result<Json> {
    let command = args.first().map(|s| s.as_str()).ok_or_else(|| Error::new(ErrorKind::Protocol, "missing subcommand".to_string()))?;
    let rest = &args[1..];
    let registry = Registry::new(settings.state_dir.clone())?;

    match command {
        "start" => cli_start(&registry, rest),
        "status" => cli_status(settings, &registry, rest),
        "continue" | "step" | "next" | "finish" => cli_resume(settings, &registry, command, rest),
        "break" | "delete" | "breakpoints" | "stack" | "up" | "down" | "locals" | "globals" | "eval" | "inspect" | "quit" => {
            cli_round_trip(settings, &registry, command, rest)
        }
        other => err!(Protocol, "unknown subcommand '{}'", other),
    }
}

/// Removes `flag` and its following value from `args` in place, returning the value if present.
fn extract_flag(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.remove(pos);
    if pos < args.len() {
        Some(args.remove(pos))
    } else {
        None
    }
}

fn absolute_path(script: &str) -> Result<PathBuf> {
    let p = PathBuf::from(script);
    if p.is_absolute() {
        Ok(p)
    } else {
        Ok(env::current_dir()?.join(p))
    }
}

fn resolve_session(registry: &Registry, script: &str) -> Result<Session> {
    let path = absolute_path(script)?;
    registry.find_active(&path).ok_or_else(|| Error::new(ErrorKind::NoSession, format!("no active session for {}", path.display())))
}

fn send_one(settings: &Settings, session: &Session, request: Request) -> Result<Json> {
    let mut client = IpcClient::connect(&session.socket_path, settings.socket_timeout, settings.socket_timeout)?;
    client.send_command(&request.into_json())
}

fn cli_start(registry: &Registry, args: &[String]) -> Result<Json> {
    let mut args = args.to_vec();
    if args.is_empty() {
        return err!(Protocol, "start requires a script path");
    }
    let script = args.remove(0);
    let script_path = absolute_path(&script)?;
    let script_args = args;

    if let Some(existing) = registry.find_active(&script_path) {
        return err!(AlreadyAttached, "session {} is already attached to {}", existing.session_id, script_path.display());
    }

    let exe = env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.arg(DAEMON_ENTRYPOINT).arg(&script_path).args(&script_args);
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    let child = cmd.spawn()?;
    let session = registry.create(&script_path, child.id() as i32)?;
    Ok(protocol::ok(vec![("session_id", json!(session.session_id)), ("pid", json!(session.pid))]))
}

fn cli_status(settings: &Settings, registry: &Registry, args: &[String]) -> Result<Json> {
    let mut args = args.to_vec();
    if let Some(script) = extract_flag(&mut args, "-s") {
        let session = resolve_session(registry, &script)?;
        send_one(settings, &session, Request::new("status"))
    } else {
        let sessions = registry.list_active();
        if sessions.is_empty() {
            return Ok(protocol::ok(vec![("sessions", json!([])), ("message", json!("no_active_sessions"))]));
        }
        let list: Vec<Json> = sessions
            .iter()
            .map(|s| json!({ "session_id": s.session_id, "script_path": s.script_path, "pid": s.pid, "status": s.status }))
            .collect();
        Ok(protocol::ok(vec![("sessions", Json::Array(list))]))
    }
}

fn cli_resume(settings: &Settings, registry: &Registry, command: &str, args: &[String]) -> Result<Json> {
    let mut args = args.to_vec();
    let script = extract_flag(&mut args, "-s").ok_or_else(|| Error::new(ErrorKind::Protocol, "missing required -s <script>".to_string()))?;
    let session = resolve_session(registry, &script)?;
    send_one(settings, &session, Request::new(command))?;
    std::thread::sleep(RESUME_STATUS_DELAY);
    send_one(settings, &session, Request::new("status"))
}

fn cli_round_trip(settings: &Settings, registry: &Registry, command: &str, args: &[String]) -> Result<Json> {
    let mut args = args.to_vec();
    let script = extract_flag(&mut args, "-s").ok_or_else(|| Error::new(ErrorKind::Protocol, "missing required -s <script>".to_string()))?;
    let session = resolve_session(registry, &script)?;
    let request = build_request(command, &args)?;
    send_one(settings, &session, request)
}

fn parse_u64_flag(value: Option<String>, label: &str) -> Result<Option<u64>> {
    match value {
        Some(v) => v.parse::<u64>().map(Some).map_err(|_| Error::new(ErrorKind::Protocol, format!("{} must be a number", label))),
        None => Ok(None),
    }
}

fn build_request(command: &str, args: &[String]) -> Result<Request> {
    let mut args = args.to_vec();
    let mut req = Request::new(command);
    match command {
        "break" => {
            if let Some(f) = extract_flag(&mut args, "-f") {
                req = req.with("file", f);
            }
            if let Some(l) = parse_u64_flag(extract_flag(&mut args, "-l"), "line")? {
                req = req.with("line", l);
            }
            if let Some(c) = extract_flag(&mut args, "-c") {
                req = req.with("condition", c);
            }
            if let Some(e) = extract_flag(&mut args, "-e") {
                req = req.with("exception", e);
            }
        }
        "delete" => {
            if let Some(f) = extract_flag(&mut args, "-f") {
                req = req.with("file", f);
            }
            if let Some(l) = parse_u64_flag(extract_flag(&mut args, "-l"), "line")? {
                req = req.with("line", l);
            }
            if let Some(n) = parse_u64_flag(extract_flag(&mut args, "-n"), "number")? {
                req = req.with("number", n);
            }
            if let Some(e) = extract_flag(&mut args, "-e") {
                req = req.with("exception", e);
            }
        }
        "locals" | "globals" => {
            if let Some(d) = parse_u64_flag(extract_flag(&mut args, "-d"), "depth")? {
                req = req.with("depth", d);
            }
        }
        "eval" | "inspect" => {
            if let Some(d) = parse_u64_flag(extract_flag(&mut args, "-d"), "depth")? {
                req = req.with("depth", d);
            }
            let expr = args.join(" ");
            if expr.is_empty() {
                return err!(Protocol, "{} requires an expression", command);
            }
            req = req.with("expr", expr);
        }
        _ => {}
    }
    Ok(req)
}

// ---------------------------------------------------------------------------------------
// Daemon entry point
// ---------------------------------------------------------------------------------------

/// Delegates the `Tracer` impl on `Engine` to a shared handle so `run_daemon` can still call
/// `finalize` on the same `Engine` once `Interp::run` returns -- `Interp::set_tracer` only
/// keeps a `Box<dyn Tracer>`, which would otherwise make the engine unreachable afterward.
struct EngineTracer(Rc<RefCell<Engine>>);

impl Tracer for EngineTracer {
    fn on_event(&mut self, interp: &Interp, event: TraceEvent) -> StepCommand {
        self.0.borrow_mut().on_event(interp, event)
    }

    fn on_uncaught(&mut self, interp: &Interp, error: &RuntimeError) {
        self.0.borrow_mut().on_uncaught(interp, error)
    }
}

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    engine::SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t);
    }
}

/// Runs as `scriptdbg __daemon <script> [args...]`, spawned detached by `start` (4.6/10.1).
/// Never returns; exits 0 on normal script completion (including a resolved uncaught-exception
/// stop), 1 on startup failure.
fn run_daemon(settings: Settings, args: &[String]) {
    install_signal_handlers();

    let script_path = match args.first() {
        Some(p) => PathBuf::from(p),
        None => {
            log_error!("daemon invoked without a script path");
            std::process::exit(1);
        }
    };

    let registry = match Registry::new(settings.state_dir.clone()) {
        Ok(r) => r,
        Err(e) => {
            log_error!("failed to open registry: {}", e);
            std::process::exit(1);
        }
    };
    let session_id = session::session_id_for(&script_path);

    let source = match std::fs::read_to_string(&script_path) {
        Ok(s) => s,
        Err(e) => {
            let _ = registry.update(&session_id, |s| {
                s.status = SessionStatus::Error;
                s.error_message = Some(e.to_string());
            });
            log_error!("failed to read {}: {}", script_path.display(), e);
            std::process::exit(1);
        }
    };
    let program = match parser::parse_program(&source) {
        Ok(p) => p,
        Err(e) => {
            let _ = registry.update(&session_id, |s| {
                s.status = SessionStatus::Error;
                s.error_message = Some(e.to_string());
            });
            log_error!("parse error in {}: {}", script_path.display(), e);
            std::process::exit(1);
        }
    };

    let socket_path = Session::socket_file_path(&settings.state_dir, &session_id);
    let ipc = match ipc::IpcServer::start(&socket_path, settings.socket_timeout) {
        Ok(s) => s,
        Err(e) => {
            log_error!("failed to start IPC server: {}", e);
            std::process::exit(1);
        }
    };

    let _ = registry.update(&session_id, |s| s.status = SessionStatus::Running);
    log_info!("attached to {} (session {})", script_path.display(), session_id);

    let engine = Rc::new(RefCell::new(Engine::new(settings, script_path, registry, session_id, ipc)));
    let interp = Interp::new();
    interp.set_tracer(Box::new(EngineTracer(engine.clone())));

    let result = interp.run(&program);
    engine.borrow_mut().finalize(&result);
    std::process::exit(if result.is_ok() { 0 } else { 1 });
}
