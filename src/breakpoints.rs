// Breakpoint store (4.5 / data model §3). Line breakpoints are keyed by (file, line) for
// O(1) per-line lookup during tracing; a secondary id index supports delete-by-number.
// Exception breakpoints are a separate, much smaller set: either the wildcard or a set of
// named exception types.
use crate::ast::Expr;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LineBreakpoint {
    pub id: u32,
    pub file: PathBuf,
    pub line: usize,
    pub enabled: bool,
    pub condition_src: Option<String>,
    // Parsed once at insertion time so per-hit evaluation never re-parses (4.5).
    pub condition: Option<Expr>,
    pub hit_count: u64,
}

#[derive(Debug, Default)]
pub struct ExceptionBreakpoints {
    pub wildcard: bool,
    pub names: HashSet<String>,
}

impl ExceptionBreakpoints {
    pub fn matches(&self, type_name: &str) -> bool {
        self.wildcard || self.names.contains(type_name)
    }

    pub fn is_empty(&self) -> bool {
        !self.wildcard && self.names.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct BreakpointTable {
    by_location: HashMap<PathBuf, BTreeMap<usize, LineBreakpoint>>,
    // id -> (file, line), used only for delete-by-number; breakpoint identities are never
    // reused even when a (file, line) slot is later replaced (data model §3 invariant).
    by_id: HashMap<u32, (PathBuf, usize)>,
    next_id: u32,
    pub exceptions: ExceptionBreakpoints,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the line breakpoint at `(file, line)`. A duplicate insertion at
    /// the same location replaces the existing breakpoint in place, preserving its id and
    /// resetting hit_count to zero -- the "replace, not reject" resolution of the open
    /// question in §9 (see DESIGN.md).
    pub fn set_line(&mut self, file: &Path, line: usize, condition_src: Option<String>, condition: Option<Expr>) -> u32 {
        let existing_id = self.by_location.get(file).and_then(|m| m.get(&line)).map(|b| b.id);
        let id = existing_id.unwrap_or_else(|| {
            self.next_id += 1;
            self.next_id
        });
        let bp = LineBreakpoint {
            id,
            file: file.to_path_buf(),
            line,
            enabled: true,
            condition_src,
            condition,
            hit_count: 0,
        };
        self.by_location.entry(file.to_path_buf()).or_default().insert(line, bp);
        self.by_id.insert(id, (file.to_path_buf(), line));
        id
    }

    pub fn get(&self, file: &Path, line: usize) -> Option<&LineBreakpoint> {
        self.by_location.get(file)?.get(&line)
    }

    pub fn get_mut(&mut self, file: &Path, line: usize) -> Option<&mut LineBreakpoint> {
        self.by_location.get_mut(file)?.get_mut(&line)
    }

    pub fn delete_by_location(&mut self, file: &Path, line: usize) -> bool {
        if let Some(lines) = self.by_location.get_mut(file) {
            if let Some(bp) = lines.remove(&line) {
                self.by_id.remove(&bp.id);
                return true;
            }
        }
        false
    }

    pub fn delete_by_id(&mut self, id: u32) -> bool {
        if let Some((file, line)) = self.by_id.remove(&id) {
            if let Some(lines) = self.by_location.get_mut(&file) {
                lines.remove(&line);
            }
            true
        } else {
            false
        }
    }

    pub fn list(&self) -> Vec<&LineBreakpoint> {
        let mut out: Vec<&LineBreakpoint> = self.by_location.values().flat_map(|m| m.values()).collect();
        out.sort_by_key(|b| b.id);
        out
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn f() -> PathBuf {
        PathBuf::from("/tmp/x.script")
    }

    #[test]
    fn insert_and_lookup_is_o1_by_location() {
        let mut t = BreakpointTable::new();
        let id = t.set_line(&f(), 3, None, None);
        assert_eq!(t.get(&f(), 3).unwrap().id, id);
        assert!(t.get(&f(), 4).is_none());
    }

    #[test]
    fn duplicate_insertion_replaces_and_keeps_id() {
        let mut t = BreakpointTable::new();
        let id1 = t.set_line(&f(), 3, None, None);
        t.get_mut(&f(), 3).unwrap().hit_count = 5;
        let id2 = t.set_line(&f(), 3, Some("i == 1".to_string()), None);
        assert_eq!(id1, id2);
        assert_eq!(t.get(&f(), 3).unwrap().hit_count, 0);
        assert_eq!(t.get(&f(), 3).unwrap().condition_src.as_deref(), Some("i == 1"));
    }

    #[test]
    fn identities_are_never_reused() {
        let mut t = BreakpointTable::new();
        let id1 = t.set_line(&f(), 3, None, None);
        t.delete_by_id(id1);
        let id2 = t.set_line(&f(), 3, None, None);
        assert_ne!(id1, id2);
    }

    #[test]
    fn delete_by_id_and_by_location_are_o1() {
        let mut t = BreakpointTable::new();
        let id = t.set_line(&f(), 10, None, None);
        assert!(t.delete_by_id(id));
        assert!(t.get(&f(), 10).is_none());

        let id2 = t.set_line(&f(), 20, None, None);
        assert!(t.delete_by_location(&f(), 20));
        assert_eq!(t.len(), 0);
        let _ = id2;
    }

    #[test]
    fn round_trip_length_changes() {
        let mut t = BreakpointTable::new();
        assert_eq!(t.list().len(), 0);
        let id = t.set_line(&f(), 1, None, None);
        assert_eq!(t.list().len(), 1);
        t.delete_by_id(id);
        assert_eq!(t.list().len(), 0);
    }

    #[test]
    fn exception_wildcard_matches_anything() {
        let mut e = ExceptionBreakpoints::default();
        e.wildcard = true;
        assert!(e.matches("ZeroDivisionError"));
        assert!(e.matches("AnythingAtAll"));
    }

    #[test]
    fn exception_named_set_is_selective() {
        let mut e = ExceptionBreakpoints::default();
        e.names.insert("ZeroDivisionError".to_string());
        assert!(e.matches("ZeroDivisionError"));
        assert!(!e.matches("ValueError"));
    }
}
