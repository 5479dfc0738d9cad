use std::path::PathBuf;
use std::time::Duration;

// Every tunable in the spec, read once at process start and threaded through by value/Arc,
// following the teacher's single-Settings-value convention rather than ad-hoc global lookups.
#[derive(Debug, Clone)]
pub struct Settings {
    pub state_dir: PathBuf,

    // Value Formatter bounds (4.1).
    pub max_depth: usize,
    pub max_collection_items: usize,
    pub max_string_length: usize,
    pub max_value_length: usize,

    // Framed IPC timeouts (4.4).
    pub accept_timeout: Duration,
    pub socket_timeout: Duration,

    // Command Dispatcher evaluation budget (4.6/5).
    pub eval_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_depth: 2,
            max_collection_items: 50,
            max_string_length: 200,
            max_value_length: 1000,
            accept_timeout: Duration::from_secs(1),
            socket_timeout: Duration::from_secs(30),
            eval_timeout: Duration::from_secs(5),
        }
    }
}

fn default_state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".scriptdbg")
}

impl Settings {
    /// Builds settings from defaults overridden by environment variables. Read once at
    /// process start; never re-read mid-session.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        if let Ok(v) = std::env::var("SCRIPTDBG_STATE_DIR") {
            s.state_dir = PathBuf::from(v);
        }
        if let Some(v) = env_usize("SCRIPTDBG_MAX_DEPTH") {
            s.max_depth = v;
        }
        if let Some(v) = env_usize("SCRIPTDBG_MAX_COLLECTION_ITEMS") {
            s.max_collection_items = v;
        }
        if let Some(v) = env_usize("SCRIPTDBG_MAX_STRING_LENGTH") {
            s.max_string_length = v;
        }
        if let Some(v) = env_usize("SCRIPTDBG_MAX_VALUE_LENGTH") {
            s.max_value_length = v;
        }
        if let Some(v) = env_usize("SCRIPTDBG_ACCEPT_TIMEOUT_SECS") {
            s.accept_timeout = Duration::from_secs(v as u64);
        }
        if let Some(v) = env_usize("SCRIPTDBG_SOCKET_TIMEOUT_SECS") {
            s.socket_timeout = Duration::from_secs(v as u64);
        }
        if let Some(v) = env_usize("SCRIPTDBG_EVAL_TIMEOUT_SECS") {
            s.eval_timeout = Duration::from_secs(v as u64);
        }
        s
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.max_depth, 2);
        assert_eq!(s.max_collection_items, 50);
        assert_eq!(s.max_string_length, 200);
        assert_eq!(s.max_value_length, 1000);
        assert_eq!(s.accept_timeout, Duration::from_secs(1));
        assert_eq!(s.socket_timeout, Duration::from_secs(30));
        assert_eq!(s.eval_timeout, Duration::from_secs(5));
    }
}
