//! Operators: arithmetic, comparisons and unary operators, scalar and
//! element-wise.

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::budget::Budget;
use super::value::{values_equal, Series, Value};
use crate::dataset::Cell;
use crate::errors::{Result, ScriptErrorKind, SandboxError};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

impl Num {
    fn f(self) -> f64 {
        match self {
            Num::I(v) => v as f64,
            Num::F(v) => v,
        }
    }

    fn of_value(v: &Value) -> Option<Num> {
        match v {
            Value::Int(i) => Some(Num::I(*i)),
            Value::Bool(b) => Some(Num::I(*b as i64)),
            Value::Float(f) => Some(Num::F(*f)),
            _ => None,
        }
    }

    fn of_cell(c: &Cell) -> Option<Num> {
        match c {
            Cell::Int(i) => Some(Num::I(*i)),
            Cell::Bool(b) => Some(Num::I(*b as i64)),
            Cell::Float(f) => Some(Num::F(*f)),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::I(v) => Value::Int(v),
            Num::F(v) => Value::Float(v),
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            Num::I(v) => Cell::Int(v),
            Num::F(v) => Cell::float(v),
        }
    }
}

fn zero_division(message: &str) -> SandboxError {
    SandboxError::script(ScriptErrorKind::ZeroDivisionError, message)
}

fn unsupported(op: &str, a: &str, b: &str) -> SandboxError {
    SandboxError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op, a, b
    ))
}

fn floor_div_i64(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn mod_i64(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

/// Numeric arithmetic. `strict` selects scalar Python semantics (division by
/// zero raises), otherwise numpy semantics (±inf or NaN).
fn arith(op: BinOp, a: Num, b: Num, strict: bool) -> Result<Num> {
    if let (Num::I(x), Num::I(y)) = (a, b) {
        let widened = || Num::F(apply_float(op, x as f64, y as f64));
        return Ok(match op {
            BinOp::Add => x.checked_add(y).map(Num::I).unwrap_or_else(widened),
            BinOp::Sub => x.checked_sub(y).map(Num::I).unwrap_or_else(widened),
            BinOp::Mul => x.checked_mul(y).map(Num::I).unwrap_or_else(widened),
            BinOp::Div => {
                if y == 0 && strict {
                    return Err(zero_division("division by zero"));
                }
                Num::F(x as f64 / y as f64)
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    if strict {
                        return Err(zero_division("integer division or modulo by zero"));
                    }
                    Num::F(x as f64 / 0.0)
                } else {
                    floor_div_i64(x, y).map(Num::I).unwrap_or_else(widened)
                }
            }
            BinOp::Mod => {
                if y == 0 {
                    if strict {
                        return Err(zero_division("integer division or modulo by zero"));
                    }
                    Num::F(f64::NAN)
                } else {
                    Num::I(mod_i64(x, y))
                }
            }
            BinOp::Pow => {
                if y >= 0 {
                    u32::try_from(y)
                        .ok()
                        .and_then(|e| x.checked_pow(e))
                        .map(Num::I)
                        .unwrap_or_else(widened)
                } else {
                    if x == 0 && strict {
                        return Err(zero_division(
                            "0.0 cannot be raised to a negative power",
                        ));
                    }
                    widened()
                }
            }
            BinOp::BitAnd => Num::I(x & y),
            BinOp::BitOr => Num::I(x | y),
            BinOp::BitXor => Num::I(x ^ y),
        });
    }

    let (x, y) = (a.f(), b.f());
    if strict && y == 0.0 {
        match op {
            BinOp::Div => return Err(zero_division("float division by zero")),
            BinOp::FloorDiv => return Err(zero_division("float floor division by zero")),
            BinOp::Mod => return Err(zero_division("float modulo")),
            _ => {}
        }
    }
    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
        return Err(unsupported(op.symbol(), "float", "float"));
    }
    Ok(Num::F(apply_float(op, x, y)))
}

fn apply_float(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => {
            if y == 0.0 {
                f64::NAN
            } else {
                x - y * (x / y).floor()
            }
        }
        BinOp::Pow => x.powf(y),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => f64::NAN,
    }
}

fn logical(op: BinOp, x: bool, y: bool) -> bool {
    match op {
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        _ => x ^ y,
    }
}

// ----------------------------------------------------------------------
// binary operators
// ----------------------------------------------------------------------

pub fn binary(op: BinOp, left: &Value, right: &Value, budget: &mut Budget) -> Result<Value> {
    match (left, right) {
        (Value::Series(_), _) | (_, Value::Series(_)) => {
            let series = broadcast(left, right, budget, |a, b, budget| {
                cell_binary(op, a, b, budget)
            })?;
            Ok(Value::Series(series))
        }
        (Value::Frame(_), _) | (_, Value::Frame(_)) => Err(SandboxError::type_error(format!(
            "operator {} on whole DataFrames is not supported; operate on columns",
            op.symbol()
        ))),
        _ => scalar_binary(op, left, right, budget),
    }
}

fn scalar_binary(op: BinOp, left: &Value, right: &Value, budget: &mut Budget) -> Result<Value> {
    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
        if let (Value::Bool(x), Value::Bool(y)) = (left, right) {
            return Ok(Value::Bool(logical(op, *x, *y)));
        }
    }
    if let (Some(a), Some(b)) = (Num::of_value(left), Num::of_value(right)) {
        return Ok(arith(op, a, b, true)?.into_value());
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            budget.charge_text(a.len().saturating_add(b.len()))?;
            Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            budget.check_cells(a.len() + b.len())?;
            budget.charge_text(left.text_len().saturating_add(right.text_len()))?;
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            budget.check_cells(a.len() + b.len())?;
            budget.charge_text(left.text_len().saturating_add(right.text_len()))?;
            Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let n = usize::try_from(*n).unwrap_or(0);
            budget.charge_text_copies(s.len(), n)?;
            budget.tick(n)?;
            Ok(Value::Str(s.repeat(n)))
        }
        (BinOp::Mul, Value::List(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            let n = usize::try_from(*n).unwrap_or(0);
            budget.check_cells(items.len().saturating_mul(n))?;
            budget.charge_text_copies(
                items.iter().map(Value::text_len).sum(),
                n,
            )?;
            budget.tick(items.len().saturating_mul(n))?;
            let mut out = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                out.extend(items.iter().cloned());
            }
            Ok(Value::List(out))
        }
        (BinOp::Mod, Value::Str(_), _) => Err(SandboxError::type_error(
            "printf-style string formatting is not supported",
        )),
        _ => Err(unsupported(op.symbol(), left.type_name(), right.type_name())),
    }
}

fn cell_binary(op: BinOp, a: &Cell, b: &Cell, budget: &mut Budget) -> Result<Cell> {
    if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) {
        if let (Cell::Int(x), Cell::Int(y)) = (a, b) {
            return Ok(arith(op, Num::I(*x), Num::I(*y), false)?.into_cell());
        }
        return Ok(Cell::Bool(logical(op, mask_bool(a, op)?, mask_bool(b, op)?)));
    }
    if a.is_missing() || b.is_missing() {
        return Ok(Cell::Missing);
    }
    if let (Some(x), Some(y)) = (Num::of_cell(a), Num::of_cell(b)) {
        return Ok(arith(op, x, y, false)?.into_cell());
    }
    match (op, a, b) {
        (BinOp::Add, Cell::Text(x), Cell::Text(y)) => {
            budget.charge_text(x.len().saturating_add(y.len()))?;
            Ok(Cell::Text(format!("{}{}", x, y)))
        }
        (BinOp::Mul, Cell::Text(s), Cell::Int(n)) | (BinOp::Mul, Cell::Int(n), Cell::Text(s)) => {
            let n = usize::try_from(*n).unwrap_or(0);
            budget.charge_text_copies(s.len(), n)?;
            Ok(Cell::Text(s.repeat(n)))
        }
        _ => Err(unsupported(op.symbol(), a.type_name(), b.type_name())),
    }
}

/// Boolean view of a mask element. Missing counts as false.
fn mask_bool(cell: &Cell, op: BinOp) -> Result<bool> {
    match cell {
        Cell::Bool(b) => Ok(*b),
        Cell::Int(v) => Ok(*v != 0),
        c if c.is_missing() => Ok(false),
        other => Err(unsupported(op.symbol(), other.type_name(), "bool")),
    }
}

/// Apply `f` element-wise over two operands, at least one of which is a
/// Series. Scalars are broadcast; Series must have equal length.
fn broadcast(
    left: &Value,
    right: &Value,
    budget: &mut Budget,
    mut f: impl FnMut(&Cell, &Cell, &mut Budget) -> Result<Cell>,
) -> Result<Series> {
    let cells = match (left, right) {
        (Value::Series(a), Value::Series(b)) => {
            if a.len() != b.len() {
                return Err(SandboxError::value_error(format!(
                    "operands could not be broadcast together with shapes ({},) ({},)",
                    a.len(),
                    b.len()
                )));
            }
            budget.tick(a.len())?;
            a.cells
                .iter()
                .zip(&b.cells)
                .map(|(x, y)| f(x, y, budget))
                .collect::<Result<Vec<_>>>()?
        }
        (Value::Series(a), scalar) => {
            let y = scalar_cell(scalar)?;
            budget.tick(a.len())?;
            a.cells
                .iter()
                .map(|x| f(x, &y, budget))
                .collect::<Result<Vec<_>>>()?
        }
        (scalar, Value::Series(b)) => {
            let x = scalar_cell(scalar)?;
            budget.tick(b.len())?;
            b.cells
                .iter()
                .map(|y| f(&x, y, budget))
                .collect::<Result<Vec<_>>>()?
        }
        _ => return Err(SandboxError::InternalError("broadcast without a Series".into())),
    };
    budget.check_cells(cells.len())?;
    let name = match (left, right) {
        (Value::Series(a), Value::Series(b)) if a.name == b.name => a.name.clone(),
        (Value::Series(_), Value::Series(_)) => None,
        (Value::Series(a), _) => a.name.clone(),
        (_, Value::Series(b)) => b.name.clone(),
        _ => None,
    };
    Ok(Series::new(name, cells))
}

fn scalar_cell(value: &Value) -> Result<Cell> {
    if !value.is_scalar() {
        return Err(SandboxError::type_error(format!(
            "cannot combine a Series with a '{}'",
            value.type_name()
        )));
    }
    value.to_cell()
}

// ----------------------------------------------------------------------
// comparisons
// ----------------------------------------------------------------------

pub fn compare(op: CmpOp, left: &Value, right: &Value, budget: &mut Budget) -> Result<Value> {
    match op {
        CmpOp::In => Ok(Value::Bool(contains(right, left)?)),
        CmpOp::NotIn => Ok(Value::Bool(!contains(right, left)?)),
        CmpOp::Is => Ok(Value::Bool(identical(left, right))),
        CmpOp::IsNot => Ok(Value::Bool(!identical(left, right))),
        _ => match (left, right) {
            (Value::Series(_), _) | (_, Value::Series(_)) => {
                let series = broadcast(left, right, budget, |a, b, _| cell_compare(op, a, b))?;
                Ok(Value::Series(series))
            }
            _ => Ok(Value::Bool(scalar_compare(op, left, right)?)),
        },
    }
}

fn ordering_result(op: CmpOp, ord: Option<Ordering>) -> bool {
    match ord {
        None => op == CmpOp::Ne,
        Some(o) => match op {
            CmpOp::Eq => o == Ordering::Equal,
            CmpOp::Ne => o != Ordering::Equal,
            CmpOp::Lt => o == Ordering::Less,
            CmpOp::Le => o != Ordering::Greater,
            CmpOp::Gt => o == Ordering::Greater,
            CmpOp::Ge => o != Ordering::Less,
            _ => false,
        },
    }
}

fn not_orderable(op: CmpOp, a: &str, b: &str) -> SandboxError {
    SandboxError::type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        op.symbol(),
        a,
        b
    ))
}

fn cell_compare(op: CmpOp, a: &Cell, b: &Cell) -> Result<Cell> {
    if a.is_missing() || b.is_missing() {
        return Ok(Cell::Bool(op == CmpOp::Ne));
    }
    let ord = match (a, b) {
        (Cell::Int(x), Cell::Int(y)) => Some(x.cmp(y)),
        (Cell::Text(x), Cell::Text(y)) => Some(x.cmp(y)),
        (Cell::Text(_), _) | (_, Cell::Text(_)) => {
            return match op {
                CmpOp::Eq => Ok(Cell::Bool(false)),
                CmpOp::Ne => Ok(Cell::Bool(true)),
                _ => Err(not_orderable(op, a.type_name(), b.type_name())),
            }
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    Ok(Cell::Bool(ordering_result(op, ord)))
}

fn scalar_compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CmpOp::Eq => return Ok(values_equal(left, right)),
        CmpOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }
    let ord = match (left, right) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            sequence_order(x, y)?
        }
        _ => match (Num::of_value(left), Num::of_value(right)) {
            (Some(x), Some(y)) => x.f().partial_cmp(&y.f()),
            _ => return Err(not_orderable(op, left.type_name(), right.type_name())),
        },
    };
    Ok(match ord {
        None => false,
        some => ordering_result(op, some),
    })
}

/// Lexicographic ordering of two sequences, Python style.
pub fn sequence_order(x: &[Value], y: &[Value]) -> Result<Option<Ordering>> {
    for (a, b) in x.iter().zip(y) {
        if values_equal(a, b) {
            continue;
        }
        return Ok(value_order(a, b)?);
    }
    Ok(Some(x.len().cmp(&y.len())))
}

/// Ordering of two scalars, for `sorted`, `min` and `max`.
pub fn value_order(a: &Value, b: &Value) -> Result<Option<Ordering>> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(y))),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            sequence_order(x, y)
        }
        _ => match (Num::of_value(a), Num::of_value(b)) {
            (Some(x), Some(y)) => Ok(x.f().partial_cmp(&y.f())),
            _ => Err(not_orderable(CmpOp::Lt, a.type_name(), b.type_name())),
        },
    }
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Library(x), Value::Library(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x == y,
        _ => false,
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(items) => Ok(items.iter().any(|(k, _)| values_equal(k, item))),
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            other => Err(SandboxError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Frame(ds) => Ok(match item {
            Value::Str(name) => ds.column(name).is_some(),
            _ => false,
        }),
        Value::Series(_) => Err(SandboxError::type_error(
            "'in' on a Series is not supported; use Series.isin()",
        )),
        other => Err(SandboxError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

// ----------------------------------------------------------------------
// unary operators
// ----------------------------------------------------------------------

pub fn unary(op: UnaryOp, operand: &Value, budget: &mut Budget) -> Result<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.truthy()?));
    }
    match operand {
        Value::Series(s) => {
            budget.tick(s.len())?;
            let cells = s
                .cells
                .iter()
                .map(|c| cell_unary(op, c))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Series(s.with_cells(cells)))
        }
        Value::Bool(b) => Ok(match op {
            UnaryOp::Neg => Value::Int(-(*b as i64)),
            UnaryOp::Pos => Value::Int(*b as i64),
            _ => Value::Int(!(*b as i64)),
        }),
        Value::Int(v) => Ok(match op {
            UnaryOp::Neg => v
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(*v as f64))),
            UnaryOp::Pos => Value::Int(*v),
            _ => Value::Int(!v),
        }),
        Value::Float(v) => match op {
            UnaryOp::Neg => Ok(Value::Float(-v)),
            UnaryOp::Pos => Ok(Value::Float(*v)),
            _ => Err(bad_unary(op, "float")),
        },
        other => Err(bad_unary(op, other.type_name())),
    }
}

fn bad_unary(op: UnaryOp, type_name: &str) -> SandboxError {
    let symbol = match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Invert => "~",
        UnaryOp::Not => "not",
    };
    SandboxError::type_error(format!(
        "bad operand type for unary {}: '{}'",
        symbol, type_name
    ))
}

fn cell_unary(op: UnaryOp, cell: &Cell) -> Result<Cell> {
    match (op, cell) {
        (UnaryOp::Invert, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
        (UnaryOp::Invert, Cell::Int(v)) => Ok(Cell::Int(!v)),
        (UnaryOp::Neg | UnaryOp::Pos, c) if c.is_missing() => Ok(Cell::Missing),
        (UnaryOp::Neg, Cell::Int(v)) => Ok(v
            .checked_neg()
            .map(Cell::Int)
            .unwrap_or(Cell::Float(-(*v as f64)))),
        (UnaryOp::Neg, Cell::Float(v)) => Ok(Cell::Float(-v)),
        (UnaryOp::Neg, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
        (UnaryOp::Pos, c) if c.is_numeric() => Ok(c.clone()),
        (_, c) => Err(bad_unary(op, c.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;

    fn budget() -> Budget {
        Budget::new(&ResourceLimits::default())
    }

    fn series(cells: Vec<Cell>) -> Value {
        Value::Series(Series::new(Some("a".into()), cells))
    }

    #[test]
    fn test_python_integer_semantics() {
        let b = &mut budget();
        let v = binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2), b).unwrap();
        assert!(matches!(v, Value::Int(-4)));
        let v = binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2), b).unwrap();
        assert!(matches!(v, Value::Int(1)));
        let v = binary(BinOp::Div, &Value::Int(7), &Value::Int(2), b).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 3.5));
    }

    #[test]
    fn test_scalar_division_by_zero_raises() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), &mut budget()).unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::ZeroDivisionError));
    }

    #[test]
    fn test_series_division_by_zero_follows_numpy() {
        let s = series(vec![Cell::Int(1), Cell::Int(0), Cell::Int(-2)]);
        let Value::Series(out) = binary(BinOp::Div, &s, &Value::Int(0), &mut budget()).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(
            out.cells,
            vec![
                Cell::Float(f64::INFINITY),
                Cell::Missing,
                Cell::Float(f64::NEG_INFINITY)
            ]
        );
    }

    #[test]
    fn test_missing_propagates_and_compares_false() {
        let b = &mut budget();
        let s = series(vec![Cell::Int(1), Cell::Missing]);
        let Value::Series(sum) = binary(BinOp::Add, &s, &Value::Int(1), b).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(sum.cells, vec![Cell::Int(2), Cell::Missing]);
        let Value::Series(mask) = compare(CmpOp::Gt, &s, &Value::Int(0), b).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(mask.cells, vec![Cell::Bool(true), Cell::Bool(false)]);
    }

    #[test]
    fn test_mask_combination() {
        let b = &mut budget();
        let x = series(vec![Cell::Bool(true), Cell::Bool(false)]);
        let y = series(vec![Cell::Bool(true), Cell::Bool(true)]);
        let Value::Series(and) = binary(BinOp::BitAnd, &x, &y, b).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(and.cells, vec![Cell::Bool(true), Cell::Bool(false)]);
        let Value::Series(inv) = unary(UnaryOp::Invert, &x, b).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(inv.cells, vec![Cell::Bool(false), Cell::Bool(true)]);
    }

    #[test]
    fn test_length_mismatch_is_value_error() {
        let a = series(vec![Cell::Int(1), Cell::Int(2)]);
        let c = series(vec![Cell::Int(1)]);
        let err = binary(BinOp::Add, &a, &c, &mut budget()).unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::ValueError));
    }

    #[test]
    fn test_text_and_number_ordering_fails() {
        let err = compare(
            CmpOp::Lt,
            &Value::Str("a".into()),
            &Value::Int(1),
            &mut budget(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'<' not supported"));
    }

    #[test]
    fn test_text_repeat_is_charged_before_allocation() {
        let names = series(vec![Cell::Text("ab".into()), Cell::Missing]);
        let err = binary(BinOp::Mul, &names, &Value::Int(i64::MAX / 2), &mut budget()).unwrap_err();
        assert!(err.to_string().starts_with("ResourceLimit:"), "{}", err);

        let err = binary(
            BinOp::Mul,
            &Value::Str("ab".into()),
            &Value::Int(i64::MAX / 2),
            &mut budget(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("ResourceLimit:"), "{}", err);
    }

    #[test]
    fn test_text_concatenation_draws_on_allowance() {
        let limits = ResourceLimits {
            max_text_bytes: 64,
            ..ResourceLimits::default()
        };
        let b = &mut Budget::new(&limits);
        let mut s = Value::Str("abcd".into());
        let mut rounds = 0;
        let err = loop {
            match binary(BinOp::Add, &s, &s, b) {
                Ok(next) => s = next,
                Err(e) => break e,
            }
            rounds += 1;
        };
        assert_eq!(rounds, 3);
        assert!(err.to_string().contains("text allowance of 64 bytes"), "{}", err);
    }

    #[test]
    fn test_membership() {
        let cols = Value::List(vec![Value::Str("age".into())]);
        assert!(contains(&cols, &Value::Str("age".into())).unwrap());
        assert!(!contains(&Value::Str("hello".into()), &Value::Str("z".into())).unwrap());
    }
}
