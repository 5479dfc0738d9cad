// Runtime value representation shared by the embedded script runtime (10.1) and the
// value formatter (4.1): the formatter is the single constructor of *output* records,
// but both it and the interpreter operate on this one `Value` type, so there is no
// translation layer between "the thing the script computed" and "the thing we format".
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqKind {
    List,
    Tuple,
}

impl SeqKind {
    pub fn type_name(self) -> &'static str {
        match self {
            SeqKind::List => "list",
            SeqKind::Tuple => "tuple",
        }
    }
}

#[derive(Debug, Default)]
pub struct ObjectData {
    pub type_name: String,
    // Insertion-ordered, like a real object's __dict__.
    pub fields: Vec<(String, Value)>,
}

impl ObjectData {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Structural stand-in for a pandas-like tabular frame (4.2), since the embedded runtime
/// has no real pandas to host. Constructible by the runtime's builtins and by tests.
#[derive(Debug, Default)]
pub struct TabularFrame {
    pub columns: Vec<String>,
    pub dtypes: Vec<String>,
    // row-major cells, already stringified (keeps this a pure data holder, no numeric engine)
    pub rows: Vec<Vec<Value>>,
}

impl TabularFrame {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }
}

#[derive(Debug, Default)]
pub struct NumericSeries {
    pub name: Option<String>,
    pub dtype: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub dtype: String,
    pub data: Vec<Value>,
}

impl NdArray {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<Vec<u8>>),
    Seq(SeqKind, Rc<RefCell<Vec<Value>>>),
    // Ordered map keyed by display-string, matching the reference implementation's dict
    // (which the embedded language only ever indexes with strings or numbers rendered as keys).
    Map(Rc<RefCell<BTreeMap<String, Value>>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectData>>),
    Function(Rc<crate::runtime::FunctionDef>),
    Native(&'static str),
    Frame(Rc<RefCell<TabularFrame>>),
    Series(Rc<RefCell<NumericSeries>>),
    NdArray(Rc<RefCell<NdArray>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::from(s.into().as_str()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::Seq(SeqKind::List, Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Seq(k, _) => k.type_name().to_string(),
            Value::Map(_) => "dict".to_string(),
            Value::Set(_) => "set".to_string(),
            Value::Object(o) => o.borrow().type_name.clone(),
            Value::Function(_) => "function".to_string(),
            Value::Native(_) => "builtin_function".to_string(),
            Value::Frame(_) => "DataFrame".to_string(),
            Value::Series(_) => "Series".to_string(),
            Value::NdArray(_) => "ndarray".to_string(),
        }
    }

    /// Module namespace used by the deep inspector's type-family recognition (4.2).
    pub fn module_name(&self) -> Option<&'static str> {
        match self {
            Value::Frame(_) => Some("pandas.core.frame"),
            Value::Series(_) => Some("pandas.core.series"),
            Value::NdArray(_) => Some("numpy"),
            Value::Object(_) => Some("__main__"),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Seq(_, v) => !v.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Object(_) | Value::Function(_) | Value::Native(_) => true,
            Value::Frame(f) => f.borrow().shape().0 != 0,
            Value::Series(s) => !s.borrow().values.is_empty(),
            Value::NdArray(a) => a.borrow().size() != 0,
        }
    }

    /// Identity token for cycle detection (4.1): only heap-allocated, mutable, shareable
    /// values can participate in a reference cycle.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Seq(_, rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Map(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Set(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Object(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Frame(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Series(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::NdArray(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
            | Value::Bytes(_) | Value::Function(_) | Value::Native(_) => None,
        }
    }

    /// A short repr-like rendering, used both as a fallback for unrecognized values and as
    /// the textual "value" field of scalar records.
    pub fn repr(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{}", f),
            Value::Str(s) => format!("{:?}", s.as_ref()),
            Value::Bytes(b) => format!("b{:?}", String::from_utf8_lossy(b).into_owned()),
            Value::Seq(k, v) => {
                let items: Vec<String> = v.borrow().iter().map(|x| x.repr()).collect();
                match k {
                    SeqKind::List => format!("[{}]", items.join(", ")),
                    SeqKind::Tuple => format!("({})", items.join(", ")),
                }
            }
            Value::Map(m) => {
                let items: Vec<String> = m.borrow().iter().map(|(k, v)| format!("{:?}: {}", k, v.repr())).collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Set(s) => {
                let items: Vec<String> = s.borrow().iter().map(|x| x.repr()).collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Object(o) => format!("<{} object>", o.borrow().type_name),
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Native(n) => format!("<built-in function {}>", n),
            Value::Frame(f) => {
                let (r, c) = f.borrow().shape();
                format!("<DataFrame {}x{}>", r, c)
            }
            Value::Series(s) => format!("<Series length={}>", s.borrow().values.len()),
            Value::NdArray(a) => format!("<ndarray shape={:?}>", a.borrow().shape),
        }
    }

    /// Key form used when this value is used as a dict key or set member: plain text for
    /// strings (so `{"a": 1}["a"]` works without re-quoting), `repr()` otherwise.
    pub fn repr_key(&self) -> String {
        match self {
            Value::Str(s) => s.as_ref().to_string(),
            other => other.repr(),
        }
    }

    /// Display form used by `str(x)`: unquoted text for strings, `repr()` otherwise.
    pub fn repr_display(&self) -> String {
        match self {
            Value::Str(s) => s.as_ref().to_string(),
            other => other.repr(),
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::Seq(_, v) => Some(v.borrow().len()),
            Value::Map(m) => Some(m.borrow().len()),
            Value::Set(s) => Some(s.borrow().len()),
            Value::Frame(f) => Some(f.borrow().shape().0),
            Value::Series(s) => Some(s.borrow().values.len()),
            Value::NdArray(a) => Some(a.borrow().size()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}
