// Value Formatter (4.1): format(value, max_depth) -> record. Bounded, cycle-safe,
// reused both for plain variable dumps (locals/globals/eval) and, with `deep: true`, as
// the entry point the Deep Inspector (4.2, in inspect.rs) builds on.
use crate::settings::Settings;
use crate::value::{SeqKind, Value};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Record(pub JsonMap<String, Json>);

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        let mut m = JsonMap::new();
        m.insert("type".to_string(), Json::String(type_name.into()));
        Record(m)
    }

    pub fn set(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn value(self, v: impl Into<String>) -> Self {
        self.set("value", v.into())
    }

    pub fn into_json(self) -> Json {
        Json::Object(self.0)
    }
}

/// Truncates a string to `max_length` bytes (by char boundary), matching the reference
/// implementation's ellipsis-on-overflow behavior.
pub fn truncate(s: &str, max_length: usize) -> String {
    if s.chars().count() > max_length {
        let mut out: String = s.chars().take(max_length.saturating_sub(3)).collect();
        out.push_str("...");
        out
    } else {
        s.to_string()
    }
}

pub fn format_value(value: &Value, max_depth: usize, settings: &Settings) -> Record {
    let mut seen = HashSet::new();
    render(value, 0, max_depth, &mut seen, settings, false)
}

/// Shared recursive dispatcher. `deep` selects whether Object/Frame/Series/NdArray values
/// get the Deep Inspector's attribute-walk and type-family specializations (inspect.rs),
/// or the plain formatter's repr-like fallback.
pub(crate) fn render(
    value: &Value,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<usize>,
    settings: &Settings,
    deep: bool,
) -> Record {
    if let Some(id) = value.identity() {
        if seen.contains(&id) {
            return Record::new(value.type_name()).value("<circular reference>").set("circular", true);
        }
    }
    if depth > max_depth {
        return Record::new(value.type_name())
            .value(format!("<max depth {} exceeded>", max_depth))
            .set("truncated", true);
    }

    let id = value.identity();
    if let Some(id) = id {
        seen.insert(id);
    }

    let result = match value {
        // Bool must be checked ahead of any generic-integer handling: in this runtime it is
        // already a distinct variant, but the ordering mirrors the reference implementation's
        // isinstance(obj, bool) check preceding isinstance(obj, int).
        Value::Bool(b) => Record::new("bool").value(if *b { "True" } else { "False" }),
        Value::Null => Record::new("NoneType").value("None"),
        Value::Int(i) => Record::new("int").value(i.to_string()),
        Value::Float(f) => format_float(*f),
        // String/bytes are checked ahead of the generic sequence branch.
        Value::Str(s) => format_string(s, settings),
        Value::Bytes(b) => format_bytes(b, settings),
        Value::Seq(kind, items) => format_sequence(*kind, items, depth, max_depth, seen, settings, deep),
        // Mapping is checked ahead of the generic-iterable fallback.
        Value::Map(m) => format_map(m, depth, max_depth, seen, settings, deep),
        Value::Set(s) => format_set(s, depth, max_depth, seen, settings, deep),
        Value::Function(f) => Record::new("function").value(format!("<function {}>", f.name)),
        Value::Native(n) => Record::new("builtin_function").value(format!("<built-in function {}>", n)),
        Value::Object(o) if deep => crate::inspect::inspect_object(&o.borrow(), depth, max_depth, seen, settings),
        Value::Frame(fr) if deep => crate::inspect::inspect_frame(&fr.borrow()),
        Value::Series(sr) if deep => crate::inspect::inspect_series(&sr.borrow()),
        Value::NdArray(a) if deep => crate::inspect::inspect_ndarray(&a.borrow()),
        // Fallback: repr-like rendering plus length if the value exposes one (4.1's final
        // clause, and also where non-deep formatting of Object/Frame/Series/NdArray lands).
        other => format_generic(other, settings),
    };

    if let Some(id) = id {
        seen.remove(&id);
    }
    result
}

fn format_float(f: f64) -> Record {
    let mut r = Record::new("float").value(format!("{}", f));
    if f.is_infinite() {
        r = r.set("special", "infinity");
    } else if f.is_nan() {
        r = r.set("special", "nan");
    }
    r
}

fn format_string(s: &str, settings: &Settings) -> Record {
    let len = s.chars().count();
    let mut r = Record::new("str").set("length", len as u64).value(truncate(&format!("{:?}", s), settings.max_string_length));
    if len > settings.max_string_length {
        r = r.set("truncated", true).set("full_length", len as u64);
    }
    r
}

fn format_bytes(b: &[u8], settings: &Settings) -> Record {
    let repr = format!("b{:?}", String::from_utf8_lossy(b).into_owned());
    let mut r = Record::new("bytes").set("length", b.len() as u64).value(truncate(&repr, settings.max_string_length));
    if b.len() > settings.max_string_length {
        r = r.set("truncated", true);
    }
    r
}

fn format_sequence(
    kind: SeqKind,
    items: &std::cell::RefCell<Vec<Value>>,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<usize>,
    settings: &Settings,
    deep: bool,
) -> Record {
    let items = items.borrow();
    let type_name = kind.type_name();
    let mut r = Record::new(type_name).set("length", items.len() as u64).value(format!("<{} with {} items>", type_name, items.len()));
    if items.is_empty() {
        return r.set("items", Json::Array(vec![]));
    }
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i >= settings.max_collection_items {
            out.push(Record::new("...").value(format!("... ({} more items)", items.len() - i)).set("truncated", true).into_json());
            break;
        }
        out.push(render(item, depth + 1, max_depth, seen, settings, deep).into_json());
    }
    r = r.set("items", Json::Array(out));
    if items.len() > settings.max_collection_items {
        r = r.set("truncated", true);
    }
    r
}

fn format_map(
    m: &std::cell::RefCell<std::collections::BTreeMap<String, Value>>,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<usize>,
    settings: &Settings,
    deep: bool,
) -> Record {
    let m = m.borrow();
    let mut r = Record::new("dict").set("length", m.len() as u64).value(format!("<dict with {} keys>", m.len()));
    if m.is_empty() {
        return r.set("items", Json::Object(JsonMap::new()));
    }
    let mut out = JsonMap::new();
    for (i, (key, value)) in m.iter().enumerate() {
        if i >= settings.max_collection_items {
            out.insert("...".to_string(), Record::new("...").value(format!("... ({} more keys)", m.len() - i)).set("truncated", true).into_json());
            break;
        }
        out.insert(truncate(key, 100), render(value, depth + 1, max_depth, seen, settings, deep).into_json());
    }
    r = r.set("items", Json::Object(out));
    if m.len() > settings.max_collection_items {
        r = r.set("truncated", true);
    }
    r
}

fn format_set(
    s: &std::cell::RefCell<Vec<Value>>,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<usize>,
    settings: &Settings,
    deep: bool,
) -> Record {
    let s = s.borrow();
    let mut r = Record::new("set").set("length", s.len() as u64).value(format!("<set with {} items>", s.len()));
    if s.is_empty() {
        return r.set("items", Json::Array(vec![]));
    }
    let mut out = Vec::new();
    for (i, item) in s.iter().enumerate() {
        if i >= settings.max_collection_items {
            out.push(Record::new("...").value(format!("... ({} more items)", s.len() - i)).set("truncated", true).into_json());
            break;
        }
        out.push(render(item, depth + 1, max_depth, seen, settings, deep).into_json());
    }
    r = r.set("items", Json::Array(out));
    if s.len() > settings.max_collection_items {
        r = r.set("truncated", true);
    }
    r
}

fn format_generic(value: &Value, settings: &Settings) -> Record {
    let mut r = Record::new(value.type_name());
    if let Some(module) = value.module_name() {
        r = r.set("module", module);
    }
    r = r.value(truncate(&value.repr(), settings.max_value_length));
    if let Some(len) = value.len() {
        r = r.set("length", len as u64);
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn formats_scalars() {
        let s = settings();
        assert_eq!(format_value(&Value::Null, 2, &s).0["value"], "None");
        assert_eq!(format_value(&Value::Bool(true), 2, &s).0["value"], "True");
        assert_eq!(format_value(&Value::Int(42), 2, &s).0["type"], "int");
    }

    #[test]
    fn flags_non_finite_floats() {
        let s = settings();
        let r = format_value(&Value::Float(f64::INFINITY), 2, &s);
        assert_eq!(r.0["special"], "infinity");
        let r = format_value(&Value::Float(f64::NAN), 2, &s);
        assert_eq!(r.0["special"], "nan");
    }

    #[test]
    fn empty_sequence_has_zero_length() {
        let s = settings();
        let v = Value::list(vec![]);
        let r = format_value(&v, 2, &s);
        assert_eq!(r.0["length"], 0);
        assert_eq!(r.0["items"], Json::Array(vec![]));
    }

    #[test]
    fn truncates_oversized_collection() {
        let mut s = settings();
        s.max_collection_items = 3;
        let v = Value::list((0..10).map(Value::Int).collect());
        let r = format_value(&v, 2, &s);
        assert_eq!(r.0["truncated"], true);
        let items = r.0["items"].as_array().unwrap();
        assert_eq!(items.len(), 4); // 3 items + truncation marker
    }

    #[test]
    fn depth_cap_marks_truncated() {
        let s = settings();
        let inner = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![inner]);
        let r = format_value(&outer, 0, &s);
        let inner_rec = &r.0["items"].as_array().unwrap()[0];
        assert_eq!(inner_rec["truncated"], true);
    }

    #[test]
    fn detects_self_reference_cycle() {
        let s = settings();
        let cell = Rc::new(RefCell::new(Vec::new()));
        let list = Value::Seq(SeqKind::List, cell.clone());
        cell.borrow_mut().push(list.clone());
        let r = format_value(&list, 5, &s);
        let child = &r.0["items"].as_array().unwrap()[0];
        assert_eq!(child["circular"], true);
    }

    #[test]
    fn diamond_reference_is_not_a_false_cycle() {
        // Same shared object appearing twice as a sibling, not an ancestor, must not be
        // flagged circular (design note 9: per-branch removal avoids spurious positives).
        let s = settings();
        let shared = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![shared.clone(), shared]);
        let r = format_value(&outer, 5, &s);
        let items = r.0["items"].as_array().unwrap();
        assert!(items[0].get("circular").is_none());
        assert!(items[1].get("circular").is_none());
    }
}
