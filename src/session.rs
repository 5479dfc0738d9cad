// Session Registry (4.3): an on-disk directory of session descriptors, one per attached
// target, keyed by a hash of the target's absolute script path. Creation, lookup, listing,
// and reaping of stale (dead-pid) entries all live here; the daemon is the only other writer
// of a descriptor's status fields, via `update`.
use crate::error::{ErrorKind, Result};
use crate::{err, log_warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Paused,
    Terminated,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub script_path: PathBuf,
    pub pid: i32,
    pub socket_path: PathBuf,
    pub created_at: u64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl Session {
    pub fn descriptor_path(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(format!("{}.json", self.session_id))
    }

    pub fn socket_file_path(state_dir: &Path, session_id: &str) -> PathBuf {
        state_dir.join(format!("{}.sock", session_id))
    }
}

/// `session_id` is a truncated CRC32 digest of the absolute script path, rendered as
/// lowercase hex and prefixed `debug_` (data model §3) -- collision-proofing beyond what
/// CRC32 offers is unnecessary because script paths are developer-controlled, not
/// adversarial input.
pub fn session_id_for(script_path: &Path) -> String {
    let digest = crc32fast::hash(script_path.to_string_lossy().as_bytes());
    format!("debug_{:08x}", digest)
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Signal-0 liveness probe (4.3): `ESRCH` means the pid is dead, any other errno (notably
/// `EPERM`) means the process exists but is not owned by us, which still counts as alive.
pub fn is_pid_alive(pid: i32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

pub struct Registry {
    state_dir: PathBuf,
}

impl Registry {
    pub fn new(state_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&state_dir)?;
        Ok(Registry { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Atomic write-then-rename in the descriptor's own directory, so a concurrent reader
    /// never observes a half-written file (4.3).
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let suffix: u32 = rand::thread_rng().gen();
        let tmp = path.with_extension(format!("tmp{:08x}", suffix));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn create(&self, script_path: &Path, pid: i32) -> Result<Session> {
        let session_id = session_id_for(script_path);
        let socket_path = Session::socket_file_path(&self.state_dir, &session_id);
        let session = Session {
            session_id,
            script_path: script_path.to_path_buf(),
            pid,
            socket_path,
            created_at: now_unix(),
            status: SessionStatus::Starting,
            error_message: None,
        };
        self.persist(&session)?;
        Ok(session)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let path = session.descriptor_path(&self.state_dir);
        let bytes = serde_json::to_vec_pretty(session)?;
        self.write_atomic(&path, &bytes)
    }

    /// Read-modify-write. On a parse error of the existing descriptor, the new fields
    /// replace it outright rather than aborting the update (4.3).
    pub fn update(&self, session_id: &str, f: impl FnOnce(&mut Session)) -> Result<Session> {
        let path = self.state_dir.join(format!("{}.json", session_id));
        let mut session = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    log_warn!("session descriptor {} is corrupt ({}), reconstructing from new fields", session_id, e);
                    self.blank(session_id)
                }
            },
            Err(e) => return err!(Registry, "session descriptor {} not found: {}", session_id, e),
        };
        f(&mut session);
        self.persist(&session)?;
        Ok(session)
    }

    /// Placeholder descriptor used when `update` can't recover the prior one (missing or
    /// corrupt) -- `f` then fills in whatever fields the caller actually knows (4.3).
    fn blank(&self, session_id: &str) -> Session {
        Session {
            session_id: session_id.to_string(),
            script_path: PathBuf::new(),
            pid: 0,
            socket_path: Session::socket_file_path(&self.state_dir, session_id),
            created_at: now_unix(),
            status: SessionStatus::Starting,
            error_message: None,
        }
    }

    fn read(&self, path: &Path) -> Option<Session> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn reap(&self, session: &Session) {
        let descriptor = session.descriptor_path(&self.state_dir);
        let _ = fs::remove_file(&descriptor);
        let _ = fs::remove_file(&session.socket_path);
        log_warn!("reaped stale session {} (pid {} not alive)", session.session_id, session.pid);
    }

    /// Returns the descriptor iff the recorded pid is alive; otherwise deletes both the
    /// descriptor and its socket and returns None (4.3).
    pub fn find_active(&self, script_path: &Path) -> Option<Session> {
        let session_id = session_id_for(script_path);
        let path = self.state_dir.join(format!("{}.json", session_id));
        let session = self.read(&path)?;
        if is_pid_alive(session.pid) {
            Some(session)
        } else {
            self.reap(&session);
            None
        }
    }

    pub fn find_by_id(&self, session_id: &str) -> Option<Session> {
        let path = self.state_dir.join(format!("{}.json", session_id));
        let session = self.read(&path)?;
        if is_pid_alive(session.pid) {
            Some(session)
        } else {
            self.reap(&session);
            None
        }
    }

    /// Scans `<dir>/debug_*.json`, applying the same liveness reap as `find_active` (4.3).
    pub fn list_active(&self) -> Vec<Session> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.state_dir) {
            Ok(e) => e,
            Err(_) => return out,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !(name.starts_with("debug_") && name.ends_with(".json")) {
                continue;
            }
            if let Some(session) = self.read(&path) {
                if is_pid_alive(session.pid) {
                    out.push(session);
                } else {
                    self.reap(&session);
                }
            }
        }
        out
    }

    /// Unlinks descriptor and socket; missing files are not errors (4.3).
    pub fn delete(&self, session: &Session) {
        let _ = fs::remove_file(session.descriptor_path(&self.state_dir));
        let _ = fs::remove_file(&session.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    fn temp_registry() -> Registry {
        let dir = std::env::temp_dir().join(format!("scriptdbg-test-{:08x}", rand::thread_rng().gen::<u32>()));
        Registry::new(dir).unwrap()
    }

    #[test]
    fn create_then_find_active_round_trips() {
        let reg = temp_registry();
        let script = PathBuf::from("/tmp/example.script");
        let pid = process::id() as i32;
        let created = reg.create(&script, pid).unwrap();
        let found = reg.find_active(&script).unwrap();
        assert_eq!(found.session_id, created.session_id);
        assert_eq!(found.pid, pid);
    }

    #[test]
    fn dead_pid_is_reaped_on_lookup() {
        let reg = temp_registry();
        let script = PathBuf::from("/tmp/dead.script");
        // A pid essentially guaranteed not to be alive in this test environment.
        let session = reg.create(&script, 999_999).unwrap();
        let path = session.descriptor_path(reg.state_dir());
        assert!(path.exists());
        assert!(reg.find_active(&script).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn list_active_only_returns_live_sessions() {
        let reg = temp_registry();
        let pid = process::id() as i32;
        reg.create(&PathBuf::from("/tmp/a.script"), pid).unwrap();
        reg.create(&PathBuf::from("/tmp/b.script"), 999_999).unwrap();
        let active = reg.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pid, pid);
    }

    #[test]
    fn update_rewrites_descriptor_fields() {
        let reg = temp_registry();
        let script = PathBuf::from("/tmp/update.script");
        let pid = process::id() as i32;
        let created = reg.create(&script, pid).unwrap();
        reg.update(&created.session_id, |s| s.status = SessionStatus::Paused).unwrap();
        let found = reg.find_active(&script).unwrap();
        assert_eq!(found.status, SessionStatus::Paused);
    }

    #[test]
    fn delete_removes_descriptor_and_is_idempotent() {
        let reg = temp_registry();
        let script = PathBuf::from("/tmp/del.script");
        let pid = process::id() as i32;
        let session = reg.create(&script, pid).unwrap();
        reg.delete(&session);
        assert!(reg.find_active(&script).is_none());
        reg.delete(&session); // missing files are not errors
    }
}
