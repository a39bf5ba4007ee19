//! Builtin primitives and the `pd` / `np` / `scipy.stats` functions.

use super::args::Args;
use super::ast::BinOp;
use super::budget::Budget;
use super::ops::{binary, value_order};
use super::value::{values_equal, Series, Value};
use crate::dataset::Cell;
use crate::errors::{Result, SandboxError};
use crate::policy::{Builtin, LibraryConst, LibraryFn};
use std::cmp::Ordering;

// ----------------------------------------------------------------------
// numeric helpers shared with the Series methods
// ----------------------------------------------------------------------

/// Non-missing numeric values of a column. Text cannot be aggregated.
pub fn numeric_values(cells: &[Cell]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(cells.len());
    for cell in cells {
        match cell {
            Cell::Text(s) => {
                return Err(SandboxError::type_error(format!(
                    "could not convert string to float: '{}'",
                    s
                )))
            }
            c => {
                if let Some(v) = c.as_f64() {
                    out.push(v);
                }
            }
        }
    }
    Ok(out)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - ddof) as f64
}

/// Linear-interpolated quantile, `q` in `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Round half to even, as numpy and Python 3 do.
pub fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}

pub fn round_to(x: f64, decimals: i64) -> f64 {
    if decimals == 0 {
        return round_half_even(x);
    }
    let factor = 10f64.powi(decimals.clamp(-300, 300) as i32);
    round_half_even(x * factor) / factor
}

/// Parse text as an integer or float cell.
pub fn parse_number(text: &str) -> Option<Cell> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(v) = t.parse::<i64>() {
        return Some(Cell::Int(v));
    }
    t.parse::<f64>().ok().map(Cell::float)
}

pub fn constant(c: LibraryConst) -> Value {
    match c {
        LibraryConst::Nan | LibraryConst::Na => Value::Float(f64::NAN),
        LibraryConst::Inf => Value::Float(f64::INFINITY),
        LibraryConst::Pi => Value::Float(std::f64::consts::PI),
    }
}

/// Items of an iterable value.
pub fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
        Value::Dict(items) => Ok(items.iter().map(|(k, _)| k.clone()).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Series(s) => Ok(s.cells.iter().map(Value::from_cell).collect()),
        Value::Frame(ds) => Ok(ds
            .column_names()
            .into_iter()
            .map(|n| Value::Str(n.to_string()))
            .collect()),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

// ----------------------------------------------------------------------
// builtins
// ----------------------------------------------------------------------

fn require_hashable(value: &Value) -> Result<()> {
    match value {
        Value::Tuple(items) => items.iter().try_for_each(require_hashable),
        v if v.is_scalar() => Ok(()),
        other => Err(SandboxError::type_error(format!(
            "unhashable type: '{}'",
            other.type_name()
        ))),
    }
}

pub fn call_builtin(
    builtin: Builtin,
    args: &Args,
    budget: &mut Budget,
    output: &mut Vec<String>,
) -> Result<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Print => {
            for (key, _) in &args.keywords {
                if key != "sep" && key != "end" {
                    return Err(SandboxError::type_error(format!(
                        "'{}' is an invalid keyword argument for print()",
                        key
                    )));
                }
            }
            let sep = args
                .keywords
                .iter()
                .find(|(k, _)| k == "sep")
                .map(|(_, v)| v.display())
                .unwrap_or_else(|| " ".to_string());
            let line: Vec<String> = args.positional.iter().map(Value::display).collect();
            let bytes = line.iter().map(String::len).sum::<usize>();
            budget.charge_text(bytes.saturating_add(sep.len().saturating_mul(line.len())))?;
            output.push(line.join(&sep));
            Ok(Value::None)
        }
        Builtin::Range => {
            args.check(name, &["start", "stop", "step"])?;
            let ints: Vec<i64> = args
                .positional
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Ok(*i),
                    Value::Bool(b) => Ok(*b as i64),
                    other => Err(SandboxError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name()
                    ))),
                })
                .collect::<Result<_>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => {
                    return Err(SandboxError::type_error(
                        "range expected at least 1 argument, got 0",
                    ))
                }
            };
            if step == 0 {
                return Err(SandboxError::value_error("range() arg 3 must not be zero"));
            }
            let span = if step > 0 {
                stop.saturating_sub(start).max(0) as u64
            } else {
                start.saturating_sub(stop).max(0) as u64
            };
            let len = span.div_ceil(step.unsigned_abs()) as usize;
            budget.check_cells(len)?;
            budget.tick(len)?;
            Ok(Value::List(
                (0..len)
                    .map(|i| Value::Int(start + i as i64 * step))
                    .collect(),
            ))
        }
        Builtin::Len => {
            args.check(name, &["obj"])?;
            let n = match args.required(0, "obj", name)? {
                Value::Str(s) => s.chars().count(),
                Value::List(v) | Value::Tuple(v) => v.len(),
                Value::Dict(v) => v.len(),
                Value::Series(s) => s.len(),
                Value::Frame(ds) => ds.row_count(),
                other => {
                    return Err(SandboxError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Builtin::Str => {
            args.check(name, &["object"])?;
            let text = args
                .positional
                .first()
                .map(Value::display)
                .unwrap_or_default();
            budget.charge_text(text.len())?;
            Ok(Value::Str(text))
        }
        Builtin::Int => {
            args.check(name, &["x"])?;
            match args.get(0, "x") {
                None => Ok(Value::Int(0)),
                Some(v) => to_int(v),
            }
        }
        Builtin::Float => {
            args.check(name, &["x"])?;
            match args.get(0, "x") {
                None => Ok(Value::Float(0.0)),
                Some(v) => to_float(v),
            }
        }
        Builtin::Bool => {
            args.check(name, &["x"])?;
            match args.get(0, "x") {
                None => Ok(Value::Bool(false)),
                Some(v) => Ok(Value::Bool(v.truthy()?)),
            }
        }
        Builtin::List => {
            args.check(name, &["iterable"])?;
            match args.get(0, "iterable") {
                None => Ok(Value::List(Vec::new())),
                Some(v) => Ok(Value::List(iterate(v)?)),
            }
        }
        Builtin::Tuple => {
            args.check(name, &["iterable"])?;
            match args.get(0, "iterable") {
                None => Ok(Value::Tuple(Vec::new())),
                Some(v) => Ok(Value::Tuple(iterate(v)?)),
            }
        }
        Builtin::Set => {
            args.check(name, &["iterable"])?;
            let items = match args.get(0, "iterable") {
                None => Vec::new(),
                Some(v) => iterate(v)?,
            };
            budget.tick(items.len())?;
            let mut distinct: Vec<Value> = Vec::new();
            for item in items {
                require_hashable(&item)?;
                if !distinct.iter().any(|seen| values_equal(seen, &item)) {
                    distinct.push(item);
                }
            }
            Ok(Value::List(distinct))
        }
        Builtin::Dict => {
            if args.positional.len() > 1 {
                return Err(SandboxError::type_error(format!(
                    "dict expected at most 1 argument, got {}",
                    args.positional.len()
                )));
            }
            let mut pairs: Vec<(Value, Value)> = match args.positional.first() {
                None => Vec::new(),
                Some(Value::Dict(items)) => items.clone(),
                Some(other) => iterate(other)?
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| match item {
                        Value::List(mut kv) | Value::Tuple(mut kv) if kv.len() == 2 => {
                            let v = kv.pop().unwrap_or(Value::None);
                            let k = kv.pop().unwrap_or(Value::None);
                            Ok((k, v))
                        }
                        Value::List(kv) | Value::Tuple(kv) => Err(SandboxError::value_error(
                            format!(
                                "dictionary update sequence element #{} has length {}; 2 is required",
                                i,
                                kv.len()
                            ),
                        )),
                        other => Err(SandboxError::type_error(format!(
                            "cannot convert dictionary update sequence element #{} ('{}') to a sequence",
                            i,
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<_>>()?,
            };
            pairs.extend(
                args.keywords
                    .iter()
                    .map(|(k, v)| (Value::Str(k.clone()), v.clone())),
            );
            budget.tick(pairs.len())?;
            let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                require_hashable(&k)?;
                match out.iter_mut().find(|(seen, _)| values_equal(seen, &k)) {
                    Some((_, slot)) => *slot = v,
                    None => out.push((k, v)),
                }
            }
            Ok(Value::Dict(out))
        }
        Builtin::Abs => {
            args.check(name, &["x"])?;
            match args.required(0, "x", name)? {
                Value::Int(v) => Ok(v
                    .checked_abs()
                    .map(Value::Int)
                    .unwrap_or(Value::Float((*v as f64).abs()))),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Float(v) => Ok(Value::Float(v.abs())),
                s @ Value::Series(_) => elementwise_abs(s, budget),
                other => Err(SandboxError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
        Builtin::Max | Builtin::Min => {
            if !args.keywords.is_empty() {
                return Err(SandboxError::type_error(format!(
                    "{}() keyword arguments are not supported",
                    name
                )));
            }
            let items = match args.positional.as_slice() {
                [] => {
                    return Err(SandboxError::type_error(format!(
                        "{} expected at least 1 argument, got 0",
                        name
                    )))
                }
                [single] => iterate(single)?,
                many => many.to_vec(),
            };
            budget.tick(items.len())?;
            let want = if builtin == Builtin::Max {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            let mut iter = items.into_iter();
            let mut best = iter.next().ok_or_else(|| {
                SandboxError::value_error(format!("{}() arg is an empty sequence", name))
            })?;
            for item in iter {
                if value_order(&item, &best)? == Some(want) {
                    best = item;
                }
            }
            Ok(best)
        }
        Builtin::Sum => {
            args.check(name, &["iterable", "start"])?;
            let items = iterate(args.required(0, "iterable", name)?)?;
            budget.tick(items.len())?;
            let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
            for item in &items {
                total = binary(BinOp::Add, &total, item, budget)?;
            }
            Ok(total)
        }
        Builtin::Round => {
            args.check(name, &["number", "ndigits"])?;
            let number = args.required(0, "number", name)?;
            let ndigits = match args.get(1, "ndigits") {
                None => None,
                Some(Value::Int(n)) => Some(*n),
                Some(other) => {
                    return Err(SandboxError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name()
                    )))
                }
            };
            match (number, ndigits) {
                (Value::Int(v), _) => Ok(Value::Int(*v)),
                (Value::Bool(b), _) => Ok(Value::Int(*b as i64)),
                (Value::Float(v), None) => {
                    if !v.is_finite() {
                        return Err(SandboxError::value_error(format!(
                            "cannot convert float {} to integer",
                            super::value::format_float(*v)
                        )));
                    }
                    Ok(Value::Int(round_half_even(*v) as i64))
                }
                (Value::Float(v), Some(n)) => Ok(Value::Float(round_to(*v, n))),
                (s @ Value::Series(_), n) => {
                    map_numeric(s, "round", budget, |x| round_to(x, n.unwrap_or(0)), true)
                }
                (other, _) => Err(SandboxError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))),
            }
        }
        Builtin::Sorted => {
            args.check(name, &["iterable", "reverse"])?;
            if args.positional.len() > 1 {
                return Err(SandboxError::type_error(
                    "sorted expected 1 argument, got 2",
                ));
            }
            let mut items = iterate(args.required(0, "iterable", name)?)?;
            let reverse = args.flag(1, "reverse", false)?;
            budget.tick(items.len().saturating_mul(8))?;
            let mut failure = None;
            items.sort_by(|a, b| match value_order(a, b) {
                Ok(Some(o)) => o,
                Ok(None) => Ordering::Equal,
                Err(e) => {
                    failure.get_or_insert(e);
                    Ordering::Equal
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            if reverse {
                items.reverse();
            }
            Ok(Value::List(items))
        }
    }
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(v) => {
            if v.is_nan() {
                Err(SandboxError::value_error("cannot convert float NaN to integer"))
            } else if v.is_infinite() {
                Err(SandboxError::value_error(
                    "cannot convert float infinity to integer",
                ))
            } else {
                Ok(Value::Int(v.trunc() as i64))
            }
        }
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            SandboxError::value_error(format!(
                "invalid literal for int() with base 10: '{}'",
                s
            ))
        }),
        other => Err(SandboxError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            SandboxError::value_error(format!("could not convert string to float: '{}'", s))
        }),
        other => other.as_f64().map(Value::Float).ok_or_else(|| {
            SandboxError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

// ----------------------------------------------------------------------
// element-wise plumbing
// ----------------------------------------------------------------------

/// Apply a float function to a scalar, list or Series. With `keep_int`,
/// integer inputs stay integers (`abs`, `round`).
pub(crate) fn map_numeric(
    value: &Value,
    fname: &str,
    budget: &mut Budget,
    f: impl Fn(f64) -> f64,
    keep_int: bool,
) -> Result<Value> {
    let unsupported = || {
        SandboxError::type_error(format!(
            "ufunc '{}' not supported for the input types",
            fname
        ))
    };
    let apply_cell = |cell: &Cell| -> Result<Cell> {
        match cell {
            Cell::Text(_) => Err(unsupported()),
            Cell::Int(v) if keep_int => Ok(Cell::Int(f(*v as f64) as i64)),
            c => Ok(c.as_f64().map(|x| Cell::float(f(x))).unwrap_or(Cell::Missing)),
        }
    };
    match value {
        Value::Series(s) => {
            budget.tick(s.len())?;
            let cells = s.cells.iter().map(apply_cell).collect::<Result<Vec<_>>>()?;
            Ok(Value::Series(s.with_cells(cells)))
        }
        Value::List(items) | Value::Tuple(items) => {
            budget.tick(items.len())?;
            let out = items
                .iter()
                .map(|v| {
                    let cell = v.to_cell().map_err(|_| unsupported())?;
                    Ok(Value::from_cell(&apply_cell(&cell)?))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(out))
        }
        Value::Int(v) if keep_int => Ok(Value::Int(f(*v as f64) as i64)),
        other => other
            .as_f64()
            .map(|x| Value::Float(f(x)))
            .ok_or_else(|| unsupported()),
    }
}

fn elementwise_abs(value: &Value, budget: &mut Budget) -> Result<Value> {
    map_numeric(value, "absolute", budget, f64::abs, true)
}

/// Missing mask for a scalar, list or Series.
fn missing_mask(value: &Value, fname: &str, negate: bool, text_ok: bool, budget: &mut Budget) -> Result<Value> {
    let test = |cell: &Cell| -> Result<bool> {
        if !text_ok && matches!(cell, Cell::Text(_)) {
            return Err(SandboxError::type_error(format!(
                "ufunc '{}' not supported for the input types",
                fname
            )));
        }
        Ok(cell.is_missing() != negate)
    };
    match value {
        Value::Series(s) => {
            budget.tick(s.len())?;
            let cells = s
                .cells
                .iter()
                .map(|c| test(c).map(Cell::Bool))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Series(s.with_cells(cells)))
        }
        Value::List(items) | Value::Tuple(items) => Ok(Value::List(
            items
                .iter()
                .map(|v| Ok(Value::Bool(test(&v.to_cell()?)?)))
                .collect::<Result<Vec<_>>>()?,
        )),
        scalar => Ok(Value::Bool(test(&scalar.to_cell()?)?)),
    }
}

/// Numeric values for an aggregate. Series skip missing values; plain
/// lists keep NaN so the result propagates it.
fn aggregate_input(value: &Value, fname: &str) -> Result<Vec<f64>> {
    match value {
        Value::Series(s) => numeric_values(&s.cells),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    SandboxError::type_error(format!(
                        "{}() requires numeric input, found '{}'",
                        fname,
                        v.type_name()
                    ))
                })
            })
            .collect(),
        other => other.as_f64().map(|v| vec![v]).ok_or_else(|| {
            SandboxError::type_error(format!(
                "{}() requires numeric input, found '{}'",
                fname,
                other.type_name()
            ))
        }),
    }
}

fn series_input<'a>(value: &'a Value, fname: &str) -> Result<std::borrow::Cow<'a, Series>> {
    match value {
        Value::Series(s) => Ok(std::borrow::Cow::Borrowed(s)),
        Value::List(items) | Value::Tuple(items) => Ok(std::borrow::Cow::Owned(Series::new(
            None,
            items.iter().map(Value::to_cell).collect::<Result<Vec<_>>>()?,
        ))),
        other => Err(SandboxError::type_error(format!(
            "{}() requires a Series or list, found '{}'",
            fname,
            other.type_name()
        ))),
    }
}

pub fn clip_cells(
    series: &Series,
    lower: Option<f64>,
    upper: Option<f64>,
    budget: &mut Budget,
) -> Result<Series> {
    budget.tick(series.len())?;
    let cells = series
        .cells
        .iter()
        .map(|cell| match cell {
            Cell::Text(_) => Err(SandboxError::type_error(
                "'<' not supported between instances of 'str' and 'float'",
            )),
            c if c.is_missing() => Ok(Cell::Missing),
            Cell::Int(v) => {
                let x = *v as f64;
                let clipped = bound(x, lower, upper);
                Ok(if clipped == x {
                    Cell::Int(*v)
                } else if clipped.fract() == 0.0 {
                    Cell::Int(clipped as i64)
                } else {
                    Cell::Float(clipped)
                })
            }
            c => Ok(c
                .as_f64()
                .map(|x| Cell::float(bound(x, lower, upper)))
                .unwrap_or(Cell::Missing)),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(series.with_cells(cells))
}

fn bound(x: f64, lower: Option<f64>, upper: Option<f64>) -> f64 {
    let x = lower.map_or(x, |lo| x.max(lo));
    upper.map_or(x, |hi| x.min(hi))
}

pub fn optional_f64(value: Option<&Value>, name: &str) -> Result<Option<f64>> {
    match value {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            SandboxError::type_error(format!(
                "'{}' must be a number, not '{}'",
                name,
                v.type_name()
            ))
        }),
    }
}

// ----------------------------------------------------------------------
// library functions
// ----------------------------------------------------------------------

pub fn call_function(function: LibraryFn, args: &Args, budget: &mut Budget) -> Result<Value> {
    let name = function.qualified_name();
    match function {
        LibraryFn::PdIsna | LibraryFn::PdNotna => {
            args.check(name, &["obj"])?;
            let obj = args.positional.first().ok_or_else(|| {
                SandboxError::type_error(format!("{}() missing required argument: 'obj'", name))
            })?;
            missing_mask(obj, name, function == LibraryFn::PdNotna, true, budget)
        }
        LibraryFn::NpIsnan => {
            args.check(name, &["x"])?;
            missing_mask(args.required(0, "x", name)?, "isnan", false, false, budget)
        }
        LibraryFn::PdToNumeric => {
            args.check(name, &["arg", "errors"])?;
            let errors = args.str_or(1, "errors", "raise")?;
            if !matches!(errors, "raise" | "coerce" | "ignore") {
                return Err(SandboxError::value_error(
                    "invalid error value specified",
                ));
            }
            to_numeric(args.required(0, "arg", name)?, errors, budget)
        }
        LibraryFn::NpLog => unary_numeric(args, name, budget, f64::ln),
        LibraryFn::NpLog1p => unary_numeric(args, name, budget, f64::ln_1p),
        LibraryFn::NpExp => unary_numeric(args, name, budget, f64::exp),
        LibraryFn::NpSqrt => unary_numeric(args, name, budget, f64::sqrt),
        LibraryFn::NpFloor => unary_numeric(args, name, budget, f64::floor),
        LibraryFn::NpCeil => unary_numeric(args, name, budget, f64::ceil),
        LibraryFn::NpAbs => {
            args.check(name, &["x"])?;
            elementwise_abs(args.required(0, "x", name)?, budget)
        }
        LibraryFn::NpRound => {
            args.check(name, &["a", "decimals"])?;
            let decimals = args.int_or(1, "decimals", 0)?;
            map_numeric(
                args.required(0, "a", name)?,
                "round",
                budget,
                |x| round_to(x, decimals),
                true,
            )
        }
        LibraryFn::NpWhere => {
            args.check(name, &["condition", "x", "y"])?;
            let cond = args.required(0, "condition", name)?;
            let x = args.positional.get(1).ok_or_else(|| {
                SandboxError::type_error("np.where() requires condition, x and y")
            })?;
            let y = args.positional.get(2).ok_or_else(|| {
                SandboxError::type_error("np.where() requires condition, x and y")
            })?;
            np_where(cond, x, y, budget)
        }
        LibraryFn::NpMean | LibraryFn::NpMedian | LibraryFn::NpStd => {
            args.check(name, &["a", "ddof"])?;
            let values = aggregate_input(args.required(0, "a", name)?, name)?;
            budget.tick(values.len())?;
            let result = match function {
                LibraryFn::NpMean => mean(&values),
                LibraryFn::NpMedian => {
                    if values.iter().any(|v| v.is_nan()) {
                        f64::NAN
                    } else {
                        quantile(&values, 0.5)
                    }
                }
                _ => {
                    let ddof = args.int_or(1, "ddof", 0)?.max(0) as usize;
                    variance(&values, ddof).sqrt()
                }
            };
            Ok(Value::Float(result))
        }
        LibraryFn::NpClip => {
            args.check(name, &["a", "a_min", "a_max"])?;
            let input = args.required(0, "a", name)?;
            let lower = optional_f64(args.get(1, "a_min"), "a_min")?;
            let upper = optional_f64(args.get(2, "a_max"), "a_max")?;
            match input {
                Value::Series(s) => Ok(Value::Series(clip_cells(s, lower, upper, budget)?)),
                other => other
                    .as_f64()
                    .map(|x| Value::Float(bound(x, lower, upper)))
                    .ok_or_else(|| {
                        SandboxError::type_error(format!(
                            "np.clip() requires numeric input, found '{}'",
                            other.type_name()
                        ))
                    }),
            }
        }
        LibraryFn::StatsZscore => {
            args.check(name, &["a", "ddof"])?;
            let series = series_input(args.required(0, "a", name)?, "zscore")?;
            let ddof = args.int_or(1, "ddof", 0)?.max(0) as usize;
            budget.tick(series.len() * 2)?;
            let propagate = series.cells.iter().any(Cell::is_missing);
            let values = numeric_values(&series.cells)?;
            let m = mean(&values);
            let sd = variance(&values, ddof).sqrt();
            let cells = series
                .cells
                .iter()
                .map(|c| match c.as_f64() {
                    Some(x) if !propagate => Cell::float((x - m) / sd),
                    _ => Cell::Missing,
                })
                .collect();
            Ok(Value::Series(series.with_cells(cells)))
        }
        LibraryFn::StatsIqr => {
            args.check(name, &["x"])?;
            let series = series_input(args.required(0, "x", name)?, "iqr")?;
            budget.tick(series.len())?;
            if series.cells.iter().any(Cell::is_missing) {
                return Ok(Value::Float(f64::NAN));
            }
            let values = numeric_values(&series.cells)?;
            Ok(Value::Float(
                quantile(&values, 0.75) - quantile(&values, 0.25),
            ))
        }
    }
}

fn unary_numeric(
    args: &Args,
    name: &str,
    budget: &mut Budget,
    f: impl Fn(f64) -> f64,
) -> Result<Value> {
    args.check(name, &["x"])?;
    let short = name.rsplit('.').next().unwrap_or(name);
    map_numeric(args.required(0, "x", name)?, short, budget, f, false)
}

fn to_numeric(value: &Value, errors: &str, budget: &mut Budget) -> Result<Value> {
    let convert = |cell: &Cell, position: usize| -> Result<Cell> {
        match cell {
            Cell::Text(s) => match parse_number(s) {
                Some(c) => Ok(c),
                None if errors == "coerce" => Ok(Cell::Missing),
                None if errors == "ignore" => Ok(cell.clone()),
                None => Err(SandboxError::value_error(format!(
                    "Unable to parse string \"{}\" at position {}",
                    s, position
                ))),
            },
            Cell::Bool(b) => Ok(Cell::Int(*b as i64)),
            other => Ok(other.clone()),
        }
    };
    match value {
        Value::Series(s) => {
            budget.tick(s.len())?;
            let converted = s
                .cells
                .iter()
                .enumerate()
                .map(|(i, c)| convert(c, i))
                .collect::<Result<Vec<_>>>()?;
            if errors == "ignore" && converted.iter().any(|c| matches!(c, Cell::Text(_))) {
                return Ok(Value::Series(s.clone()));
            }
            Ok(Value::Series(s.with_cells(converted)))
        }
        scalar if scalar.is_scalar() => Ok(Value::from_cell(&convert(&scalar.to_cell()?, 0)?)),
        other => Err(SandboxError::type_error(format!(
            "arg must be a list, tuple, 1-d array, or Series, not '{}'",
            other.type_name()
        ))),
    }
}

fn np_where(cond: &Value, x: &Value, y: &Value, budget: &mut Budget) -> Result<Value> {
    let mask: Vec<bool> = match cond {
        Value::Series(s) => s
            .cells
            .iter()
            .map(|c| match c {
                Cell::Bool(b) => *b,
                c if c.is_missing() => false,
                c => c.as_f64().is_some_and(|v| v != 0.0) || matches!(c, Cell::Text(t) if !t.is_empty()),
            })
            .collect(),
        scalar => return Ok(if scalar.truthy()? { x.clone() } else { y.clone() }),
    };
    let n = mask.len();
    let pick = |value: &Value, i: usize| -> Result<Cell> {
        match value {
            Value::Series(s) => {
                if s.len() != n {
                    return Err(SandboxError::value_error(format!(
                        "operands could not be broadcast together with shapes ({},) ({},)",
                        n,
                        s.len()
                    )));
                }
                Ok(s.cells[i].clone())
            }
            scalar => scalar.to_cell(),
        }
    };
    budget.tick(n)?;
    budget.check_cells(n)?;
    let picked = mask.iter().filter(|m| **m).count();
    for (value, count) in [(x, picked), (y, n - picked)] {
        if value.is_scalar() {
            budget.charge_text_copies(value.text_len(), count)?;
        }
    }
    let cells = mask
        .iter()
        .enumerate()
        .map(|(i, keep)| if *keep { pick(x, i) } else { pick(y, i) })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Series(Series::new(None, cells)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;

    fn budget() -> Budget {
        Budget::new(&ResourceLimits::default())
    }

    fn series(cells: Vec<Cell>) -> Value {
        Value::Series(Series::new(Some("x".into()), cells))
    }

    #[test]
    fn test_quantile_and_median() {
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
        assert_eq!(quantile(&[4.0, 1.0, 3.0], 0.5), 3.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_to(1.2345, 2), 1.23);
    }

    #[test]
    fn test_range_and_len() {
        let mut out = Vec::new();
        let b = &mut budget();
        let r = call_builtin(
            Builtin::Range,
            &Args::positional(vec![Value::Int(1), Value::Int(10), Value::Int(3)]),
            b,
            &mut out,
        )
        .unwrap();
        assert_eq!(r.repr(), "[1, 4, 7]");
        let n = call_builtin(Builtin::Len, &Args::positional(vec![r]), b, &mut out).unwrap();
        assert!(matches!(n, Value::Int(3)));
    }

    #[test]
    fn test_print_is_captured() {
        let mut out = Vec::new();
        call_builtin(
            Builtin::Print,
            &Args::positional(vec![Value::Str("rows".into()), Value::Int(3)]),
            &mut budget(),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, vec!["rows 3".to_string()]);
    }

    #[test]
    fn test_int_conversion_errors() {
        let err = call_builtin(
            Builtin::Int,
            &Args::positional(vec![Value::Str("abc".into())]),
            &mut budget(),
            &mut Vec::new(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: invalid literal for int() with base 10: 'abc'"
        );
    }

    #[test]
    fn test_sorted_and_max() {
        let items = Value::List(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]);
        let b = &mut budget();
        let sorted = call_builtin(
            Builtin::Sorted,
            &Args::positional(vec![items.clone()]),
            b,
            &mut Vec::new(),
        )
        .unwrap();
        assert_eq!(sorted.repr(), "[1.5, 2, 3]");
        let max = call_builtin(Builtin::Max, &Args::positional(vec![items]), b, &mut Vec::new())
            .unwrap();
        assert!(matches!(max, Value::Int(3)));
    }

    #[test]
    fn test_dict_set_tuple() {
        let b = &mut budget();
        let pairs = Value::List(vec![
            Value::Tuple(vec![Value::Str("a".into()), Value::Int(1)]),
            Value::List(vec![Value::Str("b".into()), Value::Int(2)]),
        ]);
        let args = Args::new(
            vec![pairs],
            vec![("a".into(), Value::Int(3)), ("c".into(), Value::None)],
        );
        let d = call_builtin(Builtin::Dict, &args, b, &mut Vec::new()).unwrap();
        assert_eq!(d.repr(), "{'a': 3, 'b': 2, 'c': None}");

        let items = Value::List(vec![
            Value::Str("x".into()),
            Value::Int(1),
            Value::Str("x".into()),
            Value::Int(1),
        ]);
        let set = call_builtin(Builtin::Set, &Args::positional(vec![items.clone()]), b, &mut Vec::new())
            .unwrap();
        assert_eq!(set.repr(), "['x', 1]");

        let t = call_builtin(Builtin::Tuple, &Args::positional(vec![items]), b, &mut Vec::new())
            .unwrap();
        assert_eq!(t.repr(), "('x', 1, 'x', 1)");

        let nested = Value::List(vec![Value::List(vec![Value::Int(1)])]);
        let err = call_builtin(Builtin::Set, &Args::positional(vec![nested]), b, &mut Vec::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");

        let bad = Value::List(vec![Value::List(vec![Value::Int(1)])]);
        let err = call_builtin(Builtin::Dict, &Args::positional(vec![bad]), b, &mut Vec::new())
            .unwrap_err();
        assert!(err.to_string().contains("has length 1; 2 is required"));
    }

    #[test]
    fn test_to_numeric_coerce() {
        let s = series(vec![Cell::Text("1".into()), Cell::Text("x".into()), Cell::Text("2.5".into())]);
        let args = Args::new(vec![s.clone()], vec![("errors".into(), Value::Str("coerce".into()))]);
        let Value::Series(out) = call_function(LibraryFn::PdToNumeric, &args, &mut budget()).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(out.cells, vec![Cell::Int(1), Cell::Missing, Cell::Float(2.5)]);

        let err = call_function(LibraryFn::PdToNumeric, &Args::positional(vec![s]), &mut budget())
            .unwrap_err();
        assert!(err.to_string().contains("Unable to parse string \"x\" at position 1"));
    }

    #[test]
    fn test_np_log_and_where() {
        let b = &mut budget();
        let s = series(vec![Cell::Int(1), Cell::Int(0), Cell::Missing]);
        let Value::Series(logs) =
            call_function(LibraryFn::NpLog, &Args::positional(vec![s.clone()]), b).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(
            logs.cells,
            vec![Cell::Float(0.0), Cell::Float(f64::NEG_INFINITY), Cell::Missing]
        );

        let mask = series(vec![Cell::Bool(true), Cell::Bool(false), Cell::Missing]);
        let Value::Series(picked) = call_function(
            LibraryFn::NpWhere,
            &Args::positional(vec![mask, Value::Int(1), s]),
            b,
        )
        .unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(picked.cells, vec![Cell::Int(1), Cell::Int(0), Cell::Missing]);
    }

    #[test]
    fn test_zscore_and_iqr() {
        let b = &mut budget();
        let s = series(vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)]);
        let Value::Series(z) =
            call_function(LibraryFn::StatsZscore, &Args::positional(vec![s.clone()]), b).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(z.cells[1], Cell::Float(0.0));
        let iqr = call_function(LibraryFn::StatsIqr, &Args::positional(vec![s]), b).unwrap();
        assert!(matches!(iqr, Value::Float(v) if v == 1.0));
    }

    #[test]
    fn test_isna_on_scalars_and_series() {
        let b = &mut budget();
        let nan = call_function(LibraryFn::PdIsna, &Args::positional(vec![Value::Float(f64::NAN)]), b)
            .unwrap();
        assert!(matches!(nan, Value::Bool(true)));
        let s = series(vec![Cell::Text("a".into()), Cell::Missing]);
        let err = call_function(LibraryFn::NpIsnan, &Args::positional(vec![s]), b).unwrap_err();
        assert!(err.to_string().contains("isnan"));
    }
}
