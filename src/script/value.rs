//! Runtime values of the sandbox scripting language.

use crate::dataset::{Cell, Dataset};
use crate::errors::{Result, SandboxError};
use crate::policy::{Builtin, FrameMember, Library, LibraryFn, SeriesMember, StrMethod};

/// A single column detached from its frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub cells: Vec<Cell>,
}

impl Series {
    pub fn new(name: Option<String>, cells: Vec<Cell>) -> Self {
        Self { name, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Bytes held by the text cells.
    pub fn text_len(&self) -> usize {
        cells_text_len(&self.cells)
    }

    /// Same name, new cells.
    pub fn with_cells(&self, cells: Vec<Cell>) -> Series {
        Series {
            name: self.name.clone(),
            cells,
        }
    }

    /// The pandas dtype this column would have.
    pub fn dtype(&self) -> &'static str {
        let mut has_int = false;
        let mut has_float = false;
        let mut has_bool = false;
        let mut has_missing = false;
        for cell in &self.cells {
            match cell {
                Cell::Missing => has_missing = true,
                Cell::Float(v) if v.is_nan() => has_missing = true,
                Cell::Int(_) => has_int = true,
                Cell::Float(_) => has_float = true,
                Cell::Bool(_) => has_bool = true,
                Cell::Text(_) => return "object",
            }
        }
        if self.cells.is_empty() {
            return "object";
        }
        match (has_bool, has_int || has_float) {
            (true, true) => "object",
            (true, false) if has_missing => "object",
            (true, false) => "bool",
            (false, _) if has_float || has_missing => "float64",
            (false, true) => "int64",
            (false, false) => "float64",
        }
    }
}

/// A member resolved on a value but not yet called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Series(SeriesMember),
    Frame(FrameMember),
    Str(StrMethod),
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Series(m) => m.name(),
            Method::Frame(m) => m.name(),
            Method::Str(m) => m.name(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Series(Series),
    Frame(Dataset),
    /// `frame.loc`, waiting for a subscript.
    Loc(Dataset),
    /// `series.str`, waiting for a method.
    StrAccessor(Series),
    Builtin(Builtin),
    Library(Library),
    Function(LibraryFn),
    Method {
        receiver: Box<Value>,
        method: Method,
    },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Series(_) => "Series",
            Value::Frame(_) => "DataFrame",
            Value::Loc(_) => "_LocIndexer",
            Value::StrAccessor(_) => "StringMethods",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Library(_) => "module",
            Value::Function(_) => "function",
            Value::Method { .. } => "method",
        }
    }

    /// Bytes of text reachable from this value.
    pub fn text_len(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(items) | Value::Tuple(items) => items.iter().map(Value::text_len).sum(),
            Value::Dict(items) => items
                .iter()
                .map(|(k, v)| k.text_len() + v.text_len())
                .sum(),
            Value::Series(s) | Value::StrAccessor(s) => s.text_len(),
            Value::Frame(ds) | Value::Loc(ds) => {
                ds.columns().iter().map(|c| cells_text_len(c.cells())).sum()
            }
            Value::Method { receiver, .. } => receiver.text_len(),
            _ => 0,
        }
    }

    pub fn truthy(&self) -> Result<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Dict(v) => !v.is_empty(),
            Value::Series(_) | Value::Frame(_) => {
                return Err(SandboxError::value_error(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    pub fn from_cell(cell: &Cell) -> Value {
        match cell {
            Cell::Missing => Value::Float(f64::NAN),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(v) => Value::Int(*v),
            Cell::Float(v) => Value::Float(*v),
            Cell::Text(s) => Value::Str(s.clone()),
        }
    }

    /// Store a scalar in a dataset cell.
    pub fn to_cell(&self) -> Result<Cell> {
        match self {
            Value::None => Ok(Cell::Missing),
            Value::Bool(b) => Ok(Cell::Bool(*b)),
            Value::Int(v) => Ok(Cell::Int(*v)),
            Value::Float(v) => Ok(Cell::float(*v)),
            Value::Str(s) => Ok(Cell::Text(s.clone())),
            other => Err(SandboxError::type_error(format!(
                "cannot store a '{}' value in a DataFrame cell",
                other.type_name()
            ))),
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Value::None => true,
            Value::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `str(x)`.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(x)`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => format!("[{}]", join_repr(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Dict(items) => {
                let body: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
            Value::Series(s) => format_series(s),
            Value::Frame(ds) => format!(
                "DataFrame(rows={}, columns=[{}])",
                ds.row_count(),
                ds.column_names()
                    .iter()
                    .map(|n| format!("'{}'", n))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Loc(_) => "<_LocIndexer>".to_string(),
            Value::StrAccessor(_) => "<StringMethods>".to_string(),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::Library(l) => format!("<module '{}'>", l.bound_name()),
            Value::Function(f) => format!("<function {}>", f.qualified_name()),
            Value::Method { receiver, method } => {
                format!("<bound method {}.{}>", receiver.type_name(), method.name())
            }
        }
    }
}

pub fn cells_text_len(cells: &[Cell]) -> usize {
    cells
        .iter()
        .map(|c| match c {
            Cell::Text(s) => s.len(),
            _ => 0,
        })
        .sum()
}

pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if v == v.trunc() && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn format_series(s: &Series) -> String {
    let shown: Vec<String> = s
        .cells
        .iter()
        .take(20)
        .map(|c| Value::from_cell(c).repr())
        .collect();
    let more = if s.len() > 20 { ", ..." } else { "" };
    match &s.name {
        Some(name) => format!("Series(name='{}', [{}{}])", name, shown.join(", "), more),
        None => format!("Series([{}{}])", shown.join(", "), more),
    }
}

/// Python `==` on scalars and containers. NaN is never equal to anything.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .any(|(k2, v2)| values_equal(k, k2) && values_equal(v, v2))
                })
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Equality used when matching cells by value (`replace`, `map`, `isin`).
/// Unlike `==`, missing matches missing.
pub fn cells_match(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        _ if a.is_missing() || b.is_missing() => a.is_missing() && b.is_missing(),
        (Cell::Text(x), Cell::Text(y)) => x == y,
        (Cell::Int(x), Cell::Int(y)) => x == y,
        (Cell::Text(_), _) | (_, Cell::Text(_)) => false,
        _ => a.as_f64() == b.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_inference() {
        let ints = Series::new(None, vec![Cell::Int(1), Cell::Int(2)]);
        assert_eq!(ints.dtype(), "int64");
        let with_missing = Series::new(None, vec![Cell::Int(1), Cell::Missing]);
        assert_eq!(with_missing.dtype(), "float64");
        let text = Series::new(None, vec![Cell::Text("a".into()), Cell::Int(1)]);
        assert_eq!(text.dtype(), "object");
        let flags = Series::new(None, vec![Cell::Bool(true)]);
        assert_eq!(flags.dtype(), "bool");
    }

    #[test]
    fn test_repr_matches_python() {
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::Float(f64::NAN).repr(), "nan");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("a".into()), Value::None]).repr(),
            "[1, 'a', None]"
        );
        assert_eq!(Value::Tuple(vec![Value::Int(3)]).repr(), "(3,)");
        assert_eq!(Value::Str("x".into()).display(), "x");
    }

    #[test]
    fn test_series_truthiness_is_ambiguous() {
        let s = Value::Series(Series::new(None, vec![Cell::Bool(true)]));
        let err = s.truthy().unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_equality_rules() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
        assert!(cells_match(&Cell::Missing, &Cell::Float(f64::NAN)));
        assert!(!cells_match(&Cell::Text("1".into()), &Cell::Int(1)));
    }
}
