//! Attribute resolution and the Series / DataFrame / `.str` methods.
//!
//! Every member reachable here is one of the enumerated `policy` members;
//! anything else is a policy violation, not a missing attribute.

use super::args::Args;
use super::budget::Budget;
use super::library::{
    self, clip_cells, map_numeric, mean, numeric_values, optional_f64, parse_number, quantile,
    round_to, variance,
};
use super::value::{cells_match, cells_text_len, Method, Series, Value};
use crate::dataset::{Cell, Column, Dataset};
use crate::errors::{Result, SandboxError};
use crate::policy::{FrameMember, LibraryMember, SeriesMember, StrMethod};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Compiled size ceiling for script-supplied regular expressions.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

fn not_allowed(type_name: &str, attr: &str) -> SandboxError {
    SandboxError::policy(
        attr,
        format!(
            "'{}' object has no allowed attribute '{}'",
            type_name, attr
        ),
    )
}

// ----------------------------------------------------------------------
// attribute resolution
// ----------------------------------------------------------------------

/// The callable member `attr` of `base`, if it is one.
pub fn resolve_method(base: &Value, attr: &str) -> Option<Method> {
    match base {
        Value::Series(_) => SeriesMember::from_name(attr)
            .filter(|m| !m.is_property())
            .map(Method::Series),
        Value::Frame(_) => FrameMember::from_name(attr)
            .filter(|m| !m.is_property())
            .map(Method::Frame),
        Value::StrAccessor(_) => StrMethod::from_name(attr).map(Method::Str),
        _ => None,
    }
}

pub fn get_attr(base: &Value, attr: &str) -> Result<Value> {
    if let Some(method) = resolve_method(base, attr) {
        return Ok(Value::Method {
            receiver: Box::new(base.clone()),
            method,
        });
    }
    match base {
        Value::Library(lib) => match lib.member(attr) {
            Some(LibraryMember::Function(f)) => Ok(Value::Function(f)),
            Some(LibraryMember::Constant(c)) => Ok(library::constant(c)),
            Some(LibraryMember::Module(sub)) => Ok(Value::Library(sub)),
            None => {
                let symbol = format!("{}.{}", lib.bound_name(), attr);
                Err(SandboxError::policy(
                    symbol.clone(),
                    format!("'{}' is not an allowed capability", symbol),
                ))
            }
        },
        Value::Series(s) => match SeriesMember::from_name(attr) {
            Some(SeriesMember::Dtype) => Ok(Value::Str(s.dtype().to_string())),
            Some(SeriesMember::Shape) => Ok(Value::Tuple(vec![Value::Int(s.len() as i64)])),
            Some(SeriesMember::Size) => Ok(Value::Int(s.len() as i64)),
            Some(SeriesMember::Str) => Ok(Value::StrAccessor(s.clone())),
            _ => Err(not_allowed("Series", attr)),
        },
        Value::Frame(ds) => match FrameMember::from_name(attr) {
            Some(FrameMember::Columns) => Ok(Value::List(
                ds.column_names()
                    .into_iter()
                    .map(|n| Value::Str(n.to_string()))
                    .collect(),
            )),
            Some(FrameMember::Shape) => Ok(Value::Tuple(vec![
                Value::Int(ds.row_count() as i64),
                Value::Int(ds.column_count() as i64),
            ])),
            Some(FrameMember::Loc) => Ok(Value::Loc(ds.clone())),
            _ => match ds.column(attr) {
                Some(column) => Ok(Value::Series(Series::new(
                    Some(attr.to_string()),
                    column.cells().to_vec(),
                ))),
                None => Err(not_allowed("DataFrame", attr)),
            },
        },
        other => Err(not_allowed(other.type_name(), attr)),
    }
}

pub fn call_method(receiver: &Value, method: Method, args: &Args, budget: &mut Budget) -> Result<Value> {
    match (receiver, method) {
        (Value::Series(s), Method::Series(m)) => series_method(s, m, args, budget),
        (Value::Frame(ds), Method::Frame(m)) => frame_method(ds, m, args, budget),
        (Value::StrAccessor(s), Method::Str(m)) => str_method(s, m, args, budget),
        (other, m) => Err(not_allowed(other.type_name(), m.name())),
    }
}

// ----------------------------------------------------------------------
// cell keys and ordering
// ----------------------------------------------------------------------

/// Hashable identity of a cell value; `1`, `1.0` and `True` coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CellKey {
    Missing,
    Int(i64),
    Float(u64),
    Text(String),
}

fn cell_key(cell: &Cell) -> CellKey {
    match cell {
        c if c.is_missing() => CellKey::Missing,
        Cell::Text(s) => CellKey::Text(s.clone()),
        Cell::Int(v) => CellKey::Int(*v),
        Cell::Bool(b) => CellKey::Int(*b as i64),
        Cell::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => CellKey::Int(*f as i64),
        Cell::Float(f) => CellKey::Float(f.to_bits()),
        Cell::Missing => CellKey::Missing,
    }
}

/// Sort order for cells: numbers, then text, missing last.
fn cell_order(a: &Cell, b: &Cell) -> Ordering {
    match (a.is_missing(), b.is_missing()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match (a, b) {
        (Cell::Int(x), Cell::Int(y)) => x.cmp(y),
        (Cell::Text(x), Cell::Text(y)) => x.cmp(y),
        (Cell::Text(_), _) => Ordering::Greater,
        (_, Cell::Text(_)) => Ordering::Less,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

fn cells_of(value: &Value, what: &str) -> Result<Vec<Cell>> {
    match value {
        Value::List(items) | Value::Tuple(items) => items.iter().map(Value::to_cell).collect(),
        Value::Series(s) => Ok(s.cells.clone()),
        scalar if scalar.is_scalar() => Ok(vec![scalar.to_cell()?]),
        other => Err(SandboxError::type_error(format!(
            "{} must be a list-like, not '{}'",
            what,
            other.type_name()
        ))),
    }
}

fn fill_direction(cells: &mut [Cell], method: &str) -> Result<()> {
    match method {
        "ffill" | "pad" => {
            let mut last: Option<Cell> = None;
            for cell in cells.iter_mut() {
                if cell.is_missing() {
                    if let Some(v) = &last {
                        *cell = v.clone();
                    }
                } else {
                    last = Some(cell.clone());
                }
            }
            Ok(())
        }
        "bfill" | "backfill" => {
            let mut next: Option<Cell> = None;
            for cell in cells.iter_mut().rev() {
                if cell.is_missing() {
                    if let Some(v) = &next {
                        *cell = v.clone();
                    }
                } else {
                    next = Some(cell.clone());
                }
            }
            Ok(())
        }
        other => Err(SandboxError::value_error(format!(
            "Invalid fill method. Expecting pad (ffill) or backfill (bfill). Got {}",
            other
        ))),
    }
}

// ----------------------------------------------------------------------
// Series
// ----------------------------------------------------------------------

fn bool_series(s: &Series, f: impl Fn(&Cell) -> bool) -> Value {
    Value::Series(s.with_cells(s.cells.iter().map(|c| Cell::Bool(f(c))).collect()))
}

/// Non-missing cells, or `None` when `skipna=False` meets a missing value.
fn skipna_values(s: &Series, args: &Args, index: usize) -> Result<Option<Vec<f64>>> {
    let skipna = args.flag(index, "skipna", true)?;
    if !skipna && s.cells.iter().any(Cell::is_missing) {
        return Ok(None);
    }
    Ok(Some(numeric_values(&s.cells)?))
}

fn series_method(s: &Series, member: SeriesMember, args: &Args, budget: &mut Budget) -> Result<Value> {
    let name = member.name();
    budget.tick(s.len())?;
    match member {
        SeriesMember::Fillna => {
            args.check(name, &["value", "method"])?;
            let mut cells = s.cells.clone();
            match (args.get(0, "value"), args.get(1, "method")) {
                (Some(Value::Series(other)), _) => {
                    for (i, cell) in cells.iter_mut().enumerate() {
                        if cell.is_missing() {
                            if let Some(v) = other.cells.get(i) {
                                *cell = v.clone();
                            }
                        }
                    }
                }
                (Some(value), _) => {
                    let fill = value.to_cell()?;
                    budget.charge_cell_copies(&fill, s.cells.iter().filter(|c| c.is_missing()).count())?;
                    for cell in cells.iter_mut().filter(|c| c.is_missing()) {
                        *cell = fill.clone();
                    }
                }
                (None, Some(Value::Str(method))) => fill_direction(&mut cells, method)?,
                _ => {
                    return Err(SandboxError::value_error(
                        "Must specify a fill 'value' or 'method'.",
                    ))
                }
            }
            Ok(Value::Series(s.with_cells(cells)))
        }
        SeriesMember::Dropna => {
            args.check(name, &[])?;
            Ok(Value::Series(s.with_cells(
                s.cells.iter().filter(|c| !c.is_missing()).cloned().collect(),
            )))
        }
        SeriesMember::Isna | SeriesMember::Isnull => {
            args.check(name, &[])?;
            Ok(bool_series(s, Cell::is_missing))
        }
        SeriesMember::Notna | SeriesMember::Notnull => {
            args.check(name, &[])?;
            Ok(bool_series(s, |c| !c.is_missing()))
        }
        SeriesMember::Mean | SeriesMember::Median => {
            args.check(name, &["skipna"])?;
            let Some(values) = skipna_values(s, args, 0)? else {
                return Ok(Value::Float(f64::NAN));
            };
            Ok(Value::Float(if member == SeriesMember::Mean {
                mean(&values)
            } else {
                quantile(&values, 0.5)
            }))
        }
        SeriesMember::Std | SeriesMember::Var => {
            args.check(name, &["ddof", "skipna"])?;
            let ddof = args.int_or(0, "ddof", 1)?.max(0) as usize;
            let Some(values) = skipna_values(s, args, 1)? else {
                return Ok(Value::Float(f64::NAN));
            };
            let var = variance(&values, ddof);
            Ok(Value::Float(if member == SeriesMember::Std {
                var.sqrt()
            } else {
                var
            }))
        }
        SeriesMember::Sum => {
            args.check(name, &["skipna"])?;
            series_sum(s, args.flag(0, "skipna", true)?)
        }
        SeriesMember::Min | SeriesMember::Max => {
            args.check(name, &["skipna"])?;
            if !args.flag(0, "skipna", true)? && s.cells.iter().any(Cell::is_missing) {
                return Ok(Value::Float(f64::NAN));
            }
            series_extreme(s, member == SeriesMember::Max)
        }
        SeriesMember::Count => {
            args.check(name, &[])?;
            Ok(Value::Int(
                s.cells.iter().filter(|c| !c.is_missing()).count() as i64,
            ))
        }
        SeriesMember::Nunique => {
            args.check(name, &["dropna"])?;
            let dropna = args.flag(0, "dropna", true)?;
            let distinct: HashSet<CellKey> = s
                .cells
                .iter()
                .filter(|c| !(dropna && c.is_missing()))
                .map(cell_key)
                .collect();
            Ok(Value::Int(distinct.len() as i64))
        }
        SeriesMember::Mode => {
            args.check(name, &["dropna"])?;
            let dropna = args.flag(0, "dropna", true)?;
            let mut counts: HashMap<CellKey, (usize, Cell)> = HashMap::new();
            for cell in s.cells.iter().filter(|c| !(dropna && c.is_missing())) {
                counts
                    .entry(cell_key(cell))
                    .or_insert_with(|| (0, cell.clone()))
                    .0 += 1;
            }
            let top = counts.values().map(|(n, _)| *n).max().unwrap_or(0);
            let mut modes: Vec<Cell> = counts
                .into_values()
                .filter(|(n, _)| *n == top)
                .map(|(_, c)| c)
                .collect();
            modes.sort_by(cell_order);
            Ok(Value::Series(s.with_cells(modes)))
        }
        SeriesMember::Quantile => {
            args.check(name, &["q"])?;
            let values = numeric_values(&s.cells)?;
            match args.get(0, "q") {
                None => Ok(Value::Float(quantile(&values, 0.5))),
                Some(Value::List(qs)) => {
                    let cells = qs
                        .iter()
                        .map(|q| Ok(Cell::float(quantile(&values, checked_q(q)?))))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Value::Series(s.with_cells(cells)))
                }
                Some(q) => Ok(Value::Float(quantile(&values, checked_q(q)?))),
            }
        }
        SeriesMember::Abs => {
            args.check(name, &[])?;
            map_numeric(&Value::Series(s.clone()), "absolute", budget, f64::abs, true)
        }
        SeriesMember::Round => {
            args.check(name, &["decimals"])?;
            let decimals = args.int_or(0, "decimals", 0)?;
            map_numeric(
                &Value::Series(s.clone()),
                "round",
                budget,
                |x| round_to(x, decimals),
                true,
            )
        }
        SeriesMember::Clip => {
            args.check(name, &["lower", "upper"])?;
            let lower = optional_f64(args.get(0, "lower"), "lower")?;
            let upper = optional_f64(args.get(1, "upper"), "upper")?;
            Ok(Value::Series(clip_cells(s, lower, upper, budget)?))
        }
        SeriesMember::Astype => {
            args.check(name, &["dtype"])?;
            let dtype = match args.required(0, "dtype", name)? {
                Value::Str(d) => d.clone(),
                Value::Builtin(b) => b.name().to_string(),
                other => {
                    return Err(SandboxError::type_error(format!(
                        "data type '{}' not understood",
                        other.repr()
                    )))
                }
            };
            let cells = s
                .cells
                .iter()
                .map(|c| cast_cell(c, &dtype))
                .collect::<Result<Vec<_>>>()?;
            budget.charge_text(cells_text_len(&cells))?;
            Ok(Value::Series(s.with_cells(cells)))
        }
        SeriesMember::Replace => {
            args.check(name, &["to_replace", "value"])?;
            let pairs = replacement_pairs(args)?;
            let mut cells = Vec::with_capacity(s.len());
            for c in &s.cells {
                match pairs.iter().find(|(from, _)| cells_match(from, c)) {
                    Some((_, to)) => {
                        budget.charge_cell_copies(to, 1)?;
                        cells.push(to.clone());
                    }
                    None => cells.push(c.clone()),
                }
            }
            Ok(Value::Series(s.with_cells(cells)))
        }
        SeriesMember::Map => {
            args.check(name, &["arg"])?;
            series_map(s, args.required(0, "arg", name)?, budget)
        }
        SeriesMember::Isin => {
            args.check(name, &["values"])?;
            let candidates = cells_of(args.required(0, "values", name)?, "values")?;
            Ok(bool_series(s, |c| {
                !c.is_missing() && candidates.iter().any(|v| cells_match(v, c))
            }))
        }
        SeriesMember::Unique => {
            args.check(name, &[])?;
            let mut seen = HashSet::new();
            Ok(Value::List(
                s.cells
                    .iter()
                    .filter(|c| seen.insert(cell_key(c)))
                    .map(Value::from_cell)
                    .collect(),
            ))
        }
        SeriesMember::Tolist => {
            args.check(name, &[])?;
            Ok(Value::List(s.cells.iter().map(Value::from_cell).collect()))
        }
        SeriesMember::Any | SeriesMember::All => {
            args.check(name, &[])?;
            let mut truths = s
                .cells
                .iter()
                .filter(|c| !c.is_missing())
                .map(|c| Value::from_cell(c).truthy())
                .collect::<Result<Vec<_>>>()?
                .into_iter();
            Ok(Value::Bool(if member == SeriesMember::Any {
                truths.any(|t| t)
            } else {
                truths.all(|t| t)
            }))
        }
        SeriesMember::Copy => {
            args.check(name, &["deep"])?;
            Ok(Value::Series(s.clone()))
        }
        SeriesMember::Dtype | SeriesMember::Shape | SeriesMember::Size | SeriesMember::Str => {
            Err(SandboxError::type_error(format!(
                "'{}' is an attribute, not a method",
                name
            )))
        }
    }
}

fn checked_q(q: &Value) -> Result<f64> {
    match q.as_f64() {
        Some(v) if (0.0..=1.0).contains(&v) => Ok(v),
        _ => Err(SandboxError::value_error(
            "percentiles should all be in the interval [0, 1]",
        )),
    }
}

fn series_sum(s: &Series, skipna: bool) -> Result<Value> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut saw_float = false;
    for cell in &s.cells {
        match cell {
            c if c.is_missing() => {
                if !skipna {
                    return Ok(Value::Float(f64::NAN));
                }
            }
            Cell::Int(v) => {
                int_total = int_total.and_then(|t| t.checked_add(*v));
                float_total += *v as f64;
            }
            Cell::Bool(b) => {
                int_total = int_total.and_then(|t| t.checked_add(*b as i64));
                float_total += *b as i64 as f64;
            }
            Cell::Float(v) => {
                saw_float = true;
                float_total += v;
            }
            Cell::Text(t) => {
                return Err(SandboxError::type_error(format!(
                    "unsupported operand type(s) for +: 'int' and 'str' ('{}')",
                    t
                )))
            }
            Cell::Missing => {}
        }
    }
    Ok(match (saw_float, int_total) {
        (false, Some(total)) => Value::Int(total),
        _ => Value::Float(float_total),
    })
}

fn series_extreme(s: &Series, want_max: bool) -> Result<Value> {
    let mut best: Option<&Cell> = None;
    let mut saw_text = false;
    let mut saw_number = false;
    for cell in s.cells.iter().filter(|c| !c.is_missing()) {
        match cell {
            Cell::Text(_) => saw_text = true,
            _ => saw_number = true,
        }
        if saw_text && saw_number {
            return Err(SandboxError::type_error(
                "'<' not supported between instances of 'str' and 'int'",
            ));
        }
        best = match best {
            None => Some(cell),
            Some(current) => {
                let ord = cell_order(cell, current);
                if (want_max && ord == Ordering::Greater) || (!want_max && ord == Ordering::Less) {
                    Some(cell)
                } else {
                    Some(current)
                }
            }
        };
    }
    Ok(best.map(Value::from_cell).unwrap_or(Value::Float(f64::NAN)))
}

fn cast_cell(cell: &Cell, dtype: &str) -> Result<Cell> {
    match dtype {
        "int" | "int64" | "int32" | "Int64" => match cell {
            Cell::Int(v) => Ok(Cell::Int(*v)),
            Cell::Bool(b) => Ok(Cell::Int(*b as i64)),
            Cell::Text(t) => t.trim().parse::<i64>().map(Cell::Int).map_err(|_| {
                SandboxError::value_error(format!(
                    "invalid literal for int() with base 10: '{}'",
                    t
                ))
            }),
            Cell::Float(v) if v.is_finite() => Ok(Cell::Int(v.trunc() as i64)),
            Cell::Float(v) if v.is_infinite() => Err(SandboxError::value_error(
                "cannot convert float infinity to integer",
            )),
            _ if dtype == "Int64" => Ok(Cell::Missing),
            _ => Err(SandboxError::value_error(
                "cannot convert float NaN to integer",
            )),
        },
        "float" | "float64" | "float32" => match cell {
            Cell::Text(t) => match parse_number(t) {
                Some(c) => Ok(Cell::float(c.as_f64().unwrap_or(f64::NAN))),
                None => Err(SandboxError::value_error(format!(
                    "could not convert string to float: '{}'",
                    t
                ))),
            },
            c if c.is_missing() => Ok(Cell::Missing),
            c => Ok(c.as_f64().map(Cell::float).unwrap_or(Cell::Missing)),
        },
        "str" => Ok(Cell::Text(match cell {
            c if c.is_missing() => "nan".to_string(),
            c => Value::from_cell(c).display(),
        })),
        "string" => Ok(match cell {
            c if c.is_missing() => Cell::Missing,
            c => Cell::Text(Value::from_cell(c).display()),
        }),
        "bool" => Ok(Cell::Bool(match cell {
            Cell::Missing => true,
            c => Value::from_cell(c).truthy()?,
        })),
        "object" | "category" => Ok(cell.clone()),
        other => Err(SandboxError::type_error(format!(
            "data type '{}' not understood",
            other
        ))),
    }
}

/// `(from, to)` pairs for `replace(to_replace, value)` or `replace({a: b})`.
fn replacement_pairs(args: &Args) -> Result<Vec<(Cell, Cell)>> {
    let to_replace = args.required(0, "to_replace", "replace")?;
    if let Value::Dict(items) = to_replace {
        return items
            .iter()
            .map(|(k, v)| Ok((k.to_cell()?, v.to_cell()?)))
            .collect();
    }
    let value = args
        .positional
        .get(1)
        .or_else(|| args.keywords.iter().find(|(k, _)| k == "value").map(|(_, v)| v))
        .cloned()
        .unwrap_or(Value::None);
    let sources = cells_of(to_replace, "to_replace")?;
    match &value {
        Value::List(targets) | Value::Tuple(targets) => {
            if targets.len() != sources.len() {
                return Err(SandboxError::value_error(format!(
                    "Replacement lists must match in length. Expecting {} got {}",
                    sources.len(),
                    targets.len()
                )));
            }
            sources
                .into_iter()
                .zip(targets)
                .map(|(from, to)| Ok((from, to.to_cell()?)))
                .collect()
        }
        scalar => {
            let to = scalar.to_cell()?;
            Ok(sources.into_iter().map(|from| (from, to.clone())).collect())
        }
    }
}

fn series_map(s: &Series, arg: &Value, budget: &mut Budget) -> Result<Value> {
    match arg {
        Value::Dict(items) => {
            let table: Vec<(Cell, Cell)> = items
                .iter()
                .map(|(k, v)| Ok((k.to_cell()?, v.to_cell()?)))
                .collect::<Result<_>>()?;
            let mut cells = Vec::with_capacity(s.len());
            for c in &s.cells {
                match table.iter().find(|(k, _)| cells_match(k, c)) {
                    Some((_, v)) => {
                        budget.charge_cell_copies(v, 1)?;
                        cells.push(v.clone());
                    }
                    None => cells.push(Cell::Missing),
                }
            }
            Ok(Value::Series(s.with_cells(cells)))
        }
        Value::Builtin(b) => {
            let mut sink = Vec::new();
            let mut cells = Vec::with_capacity(s.len());
            for cell in &s.cells {
                let out = library::call_builtin(
                    *b,
                    &Args::positional(vec![Value::from_cell(cell)]),
                    budget,
                    &mut sink,
                )?;
                cells.push(out.to_cell()?);
            }
            Ok(Value::Series(s.with_cells(cells)))
        }
        Value::Function(f) => {
            let mut cells = Vec::with_capacity(s.len());
            for cell in &s.cells {
                let out = library::call_function(
                    *f,
                    &Args::positional(vec![Value::from_cell(cell)]),
                    budget,
                )?;
                cells.push(out.to_cell()?);
            }
            Ok(Value::Series(s.with_cells(cells)))
        }
        other => Err(SandboxError::type_error(format!(
            "map() expects a dict or a builtin function, not '{}'",
            other.type_name()
        ))),
    }
}

// ----------------------------------------------------------------------
// DataFrame
// ----------------------------------------------------------------------

fn name_list(value: &Value, what: &str) -> Result<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.clone()),
                other => Err(SandboxError::type_error(format!(
                    "{} must contain column names, found '{}'",
                    what,
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(SandboxError::type_error(format!(
            "{} must be a column name or a list of column names, not '{}'",
            what,
            other.type_name()
        ))),
    }
}

fn require_columns(ds: &Dataset, names: &[String]) -> Result<()> {
    let missing: Vec<&String> = names.iter().filter(|n| ds.column(n).is_none()).collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(SandboxError::script(
        crate::errors::ScriptErrorKind::KeyError,
        format!(
            "[{}]",
            missing
                .iter()
                .map(|n| format!("'{}'", n))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ))
}

fn subset_columns(ds: &Dataset, args: &Args, index: usize) -> Result<Vec<String>> {
    match args.get(index, "subset") {
        None => Ok(ds.column_names().iter().map(|n| n.to_string()).collect()),
        Some(v) => {
            let names = name_list(v, "subset")?;
            require_columns(ds, &names)?;
            Ok(names)
        }
    }
}

fn axis_is_columns(args: &Args, index: usize) -> Result<bool> {
    match args.get(index, "axis") {
        None | Some(Value::Int(0)) => Ok(false),
        Some(Value::Int(1)) => Ok(true),
        Some(Value::Str(s)) if s == "index" || s == "rows" => Ok(false),
        Some(Value::Str(s)) if s == "columns" => Ok(true),
        Some(other) => Err(SandboxError::value_error(format!(
            "No axis named {} for object type DataFrame",
            other.repr()
        ))),
    }
}

/// Which rows repeat an earlier (or later) row on the given columns.
fn duplicate_flags(ds: &Dataset, subset: &[String], keep: &Value) -> Result<Vec<bool>> {
    let columns: Vec<&Column> = subset.iter().filter_map(|n| ds.column(n)).collect();
    let keys: Vec<Vec<CellKey>> = (0..ds.row_count())
        .map(|row| columns.iter().map(|c| cell_key(&c.cells()[row])).collect())
        .collect();
    let mut flags = vec![false; keys.len()];
    match keep {
        Value::Str(k) if k == "first" => {
            let mut seen = HashSet::new();
            for (i, key) in keys.iter().enumerate() {
                flags[i] = !seen.insert(key);
            }
        }
        Value::Str(k) if k == "last" => {
            let mut seen = HashSet::new();
            for (i, key) in keys.iter().enumerate().rev() {
                flags[i] = !seen.insert(key);
            }
        }
        Value::Bool(false) => {
            let mut counts: HashMap<&Vec<CellKey>, usize> = HashMap::new();
            for key in &keys {
                *counts.entry(key).or_insert(0) += 1;
            }
            for (i, key) in keys.iter().enumerate() {
                flags[i] = counts.get(key).copied().unwrap_or(0) > 1;
            }
        }
        _ => {
            return Err(SandboxError::value_error(
                "keep must be either \"first\", \"last\" or False",
            ))
        }
    }
    Ok(flags)
}

fn keep_arg(args: &Args, index: usize) -> Value {
    args.positional
        .get(index)
        .or_else(|| args.keywords.iter().find(|(k, _)| k == "keep").map(|(_, v)| v))
        .cloned()
        .unwrap_or_else(|| Value::Str("first".to_string()))
}

fn frame_method(ds: &Dataset, member: FrameMember, args: &Args, budget: &mut Budget) -> Result<Value> {
    let name = member.name();
    budget.tick(ds.cell_count())?;
    match member {
        FrameMember::Dropna => {
            args.check(name, &["axis", "how", "thresh", "subset"])?;
            let how = args.str_or(1, "how", "any")?;
            if how != "any" && how != "all" {
                return Err(SandboxError::value_error(format!("invalid how option: {}", how)));
            }
            let thresh = match args.get(2, "thresh") {
                None => None,
                Some(_) => Some(args.int_or(2, "thresh", 0)?.max(0) as usize),
            };
            if axis_is_columns(args, 0)? {
                let kept: Vec<String> = ds
                    .columns()
                    .iter()
                    .filter(|c| {
                        let present = c.len() - c.missing_count();
                        match thresh {
                            Some(t) => present >= t,
                            None if how == "all" => present > 0 || c.is_empty(),
                            None => c.missing_count() == 0,
                        }
                    })
                    .map(|c| c.name().to_string())
                    .collect();
                return Ok(Value::Frame(ds.select(&kept)?));
            }
            let subset = subset_columns(ds, args, 3)?;
            let columns: Vec<&Column> = subset.iter().filter_map(|n| ds.column(n)).collect();
            let mask: Vec<bool> = (0..ds.row_count())
                .map(|row| {
                    let missing = columns.iter().filter(|c| c.cells()[row].is_missing()).count();
                    let present = columns.len() - missing;
                    match thresh {
                        Some(t) => present >= t,
                        None if how == "all" => missing < columns.len() || columns.is_empty(),
                        None => missing == 0,
                    }
                })
                .collect();
            Ok(Value::Frame(ds.filter_rows(&mask)))
        }
        FrameMember::DropDuplicates => {
            args.check(name, &["subset", "keep", "ignore_index"])?;
            let subset = subset_columns(ds, args, 0)?;
            let dups = duplicate_flags(ds, &subset, &keep_arg(args, 1))?;
            let mask: Vec<bool> = dups.iter().map(|d| !d).collect();
            Ok(Value::Frame(ds.filter_rows(&mask)))
        }
        FrameMember::Duplicated => {
            args.check(name, &["subset", "keep"])?;
            let subset = subset_columns(ds, args, 0)?;
            let dups = duplicate_flags(ds, &subset, &keep_arg(args, 1))?;
            Ok(Value::Series(Series::new(
                None,
                dups.into_iter().map(Cell::Bool).collect(),
            )))
        }
        FrameMember::Drop => {
            args.check(name, &["labels", "axis", "index", "columns", "errors"])?;
            let errors = args.str_or(4, "errors", "raise")?;
            let by_columns = axis_is_columns(args, 1)?;
            let (column_labels, row_labels) = match (args.get(0, "labels"), by_columns) {
                (Some(labels), true) => (Some(labels), args.get(2, "index")),
                (Some(labels), false) => (args.get(3, "columns"), Some(labels)),
                (None, _) => (args.get(3, "columns"), args.get(2, "index")),
            };
            if column_labels.is_none() && row_labels.is_none() {
                return Err(SandboxError::value_error(
                    "Need to specify at least one of 'labels', 'index' or 'columns'",
                ));
            }
            let mut out = ds.clone();
            if let Some(labels) = column_labels {
                let names = name_list(labels, "columns")?;
                if errors != "ignore" {
                    require_columns(ds, &names).map_err(|_| {
                        SandboxError::script(
                            crate::errors::ScriptErrorKind::KeyError,
                            format!("{} not found in axis", Value::List(
                                names.iter().map(|n| Value::Str(n.clone())).collect()
                            ).repr()),
                        )
                    })?;
                }
                for n in &names {
                    out.remove_column(n);
                }
            }
            if let Some(labels) = row_labels {
                let rows = match labels {
                    Value::Int(i) => vec![*i],
                    Value::List(items) => items
                        .iter()
                        .map(|v| match v {
                            Value::Int(i) => Ok(*i),
                            other => Err(SandboxError::type_error(format!(
                                "row labels must be integers, not '{}'",
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "row labels must be integers, not '{}'",
                            other.type_name()
                        )))
                    }
                };
                let mut mask = vec![true; out.row_count()];
                for r in rows {
                    match usize::try_from(r).ok().filter(|r| *r < mask.len()) {
                        Some(r) => mask[r] = false,
                        None if errors == "ignore" => {}
                        None => {
                            return Err(SandboxError::script(
                                crate::errors::ScriptErrorKind::KeyError,
                                format!("[{}] not found in axis", r),
                            ))
                        }
                    }
                }
                out = out.filter_rows(&mask);
            }
            Ok(Value::Frame(out))
        }
        FrameMember::Rename => {
            args.check(name, &["mapper", "index", "columns", "axis"])?;
            let mapping = match (args.get(2, "columns"), args.get(0, "mapper")) {
                (Some(m), _) => m,
                (None, Some(m)) if axis_is_columns(args, 3)? => m,
                (None, Some(_)) => return Ok(Value::Frame(ds.clone())),
                (None, None) => {
                    return Err(SandboxError::type_error(
                        "must pass an index to rename",
                    ))
                }
            };
            let Value::Dict(pairs) = mapping else {
                return Err(SandboxError::type_error(format!(
                    "rename() expects a dict of column names, not '{}'",
                    mapping.type_name()
                )));
            };
            let mut table = HashMap::new();
            for (k, v) in pairs {
                match (k, v) {
                    (Value::Str(from), Value::Str(to)) => {
                        table.insert(from.as_str(), to.as_str());
                    }
                    _ => {
                        return Err(SandboxError::type_error(
                            "rename() mapping must be from column names to column names",
                        ))
                    }
                }
            }
            let columns = ds
                .columns()
                .iter()
                .map(|c| {
                    let new_name = table.get(c.name()).copied().unwrap_or(c.name());
                    Column::new(new_name, c.cells().to_vec())
                })
                .collect();
            Dataset::new(columns)
                .map(Value::Frame)
                .map_err(|e| SandboxError::value_error(e.to_string()))
        }
        FrameMember::Fillna => {
            args.check(name, &["value", "method"])?;
            let mut out = ds.clone();
            let names: Vec<String> = ds.column_names().iter().map(|n| n.to_string()).collect();
            match (args.get(0, "value"), args.get(1, "method")) {
                (Some(Value::Dict(pairs)), _) => {
                    for (k, v) in pairs {
                        let Value::Str(col) = k else { continue };
                        if let Some(column) = ds.column(col) {
                            let fill = v.to_cell()?;
                            budget.charge_cell_copies(&fill, column.missing_count())?;
                            let cells = column
                                .cells()
                                .iter()
                                .map(|c| if c.is_missing() { fill.clone() } else { c.clone() })
                                .collect();
                            out.set_column(col, cells)?;
                        }
                    }
                }
                (Some(value), _) => {
                    let fill = value.to_cell()?;
                    for n in &names {
                        if let Some(column) = ds.column(n) {
                            budget.charge_cell_copies(&fill, column.missing_count())?;
                            let cells = column
                                .cells()
                                .iter()
                                .map(|c| if c.is_missing() { fill.clone() } else { c.clone() })
                                .collect();
                            out.set_column(n, cells)?;
                        }
                    }
                }
                (None, Some(Value::Str(method))) => {
                    for n in &names {
                        if let Some(column) = ds.column(n) {
                            let mut cells = column.cells().to_vec();
                            fill_direction(&mut cells, method)?;
                            out.set_column(n, cells)?;
                        }
                    }
                }
                _ => {
                    return Err(SandboxError::value_error(
                        "Must specify a fill 'value' or 'method'.",
                    ))
                }
            }
            Ok(Value::Frame(out))
        }
        FrameMember::Copy => {
            args.check(name, &["deep"])?;
            Ok(Value::Frame(ds.clone()))
        }
        FrameMember::Head | FrameMember::Tail => {
            args.check(name, &["n"])?;
            let n = args.int_or(0, "n", 5)?;
            let rows = ds.row_count();
            let count = if n >= 0 {
                (n as usize).min(rows)
            } else {
                rows.saturating_sub(n.unsigned_abs() as usize)
            };
            let indices: Vec<usize> = if member == FrameMember::Head {
                (0..count).collect()
            } else {
                (rows - count..rows).collect()
            };
            Ok(Value::Frame(ds.take_rows(&indices)))
        }
        FrameMember::ResetIndex => {
            args.check(name, &["drop"])?;
            Ok(Value::Frame(ds.clone()))
        }
        FrameMember::SortValues => {
            args.check(name, &["by", "ascending", "na_position"])?;
            let by = name_list(args.required(0, "by", name)?, "by")?;
            require_columns(ds, &by)?;
            let ascending: Vec<bool> = match args.get(1, "ascending") {
                None => vec![true; by.len()],
                Some(Value::List(flags)) => {
                    if flags.len() != by.len() {
                        return Err(SandboxError::value_error(format!(
                            "Length of ascending ({}) != length of by ({})",
                            flags.len(),
                            by.len()
                        )));
                    }
                    flags.iter().map(Value::truthy).collect::<Result<_>>()?
                }
                Some(flag) => vec![flag.truthy()?; by.len()],
            };
            let na_first = args.str_or(2, "na_position", "last")? == "first";
            let columns: Vec<&Column> = by.iter().filter_map(|n| ds.column(n)).collect();
            let mut order: Vec<usize> = (0..ds.row_count()).collect();
            budget.tick(ds.row_count().saturating_mul(8))?;
            order.sort_by(|&a, &b| {
                for (column, asc) in columns.iter().zip(&ascending) {
                    let (x, y) = (&column.cells()[a], &column.cells()[b]);
                    let ord = match (x.is_missing(), y.is_missing()) {
                        (true, true) => Ordering::Equal,
                        (true, false) if na_first => Ordering::Less,
                        (true, false) => Ordering::Greater,
                        (false, true) if na_first => Ordering::Greater,
                        (false, true) => Ordering::Less,
                        _ if *asc => cell_order(x, y),
                        _ => cell_order(y, x),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            Ok(Value::Frame(ds.take_rows(&order)))
        }
        FrameMember::Columns | FrameMember::Shape | FrameMember::Loc => Err(
            SandboxError::type_error(format!("'{}' is an attribute, not a method", name)),
        ),
    }
}

// ----------------------------------------------------------------------
// .str
// ----------------------------------------------------------------------

fn text_map(s: &Series, f: impl Fn(&str) -> Cell) -> Value {
    Value::Series(s.with_cells(
        s.cells
            .iter()
            .map(|c| match c {
                Cell::Text(t) => f(t),
                _ => Cell::Missing,
            })
            .collect(),
    ))
}

fn text_test(s: &Series, na: Option<Cell>, f: impl Fn(&str) -> bool) -> Value {
    Value::Series(s.with_cells(
        s.cells
            .iter()
            .map(|c| match c {
                Cell::Text(t) => Cell::Bool(f(t)),
                _ => na.clone().unwrap_or(Cell::Missing),
            })
            .collect(),
    ))
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<regex::Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| SandboxError::value_error(format!("invalid regular expression: {}", e)))
}

fn str_method(s: &Series, member: StrMethod, args: &Args, budget: &mut Budget) -> Result<Value> {
    budget.tick(s.len())?;
    let out = str_method_inner(s, member, args, budget)?;
    if matches!(
        member,
        StrMethod::Strip | StrMethod::Lower | StrMethod::Upper | StrMethod::Title
    ) {
        budget.charge_text(out.text_len())?;
    }
    Ok(out)
}

/// Pre-charge a replace over every text cell: each cell may grow by
/// `growth(text)` bytes.
fn charge_replacements(s: &Series, budget: &mut Budget, growth: impl Fn(&str) -> usize) -> Result<()> {
    let mut total = 0usize;
    for cell in &s.cells {
        if let Cell::Text(t) = cell {
            total = total.saturating_add(t.len()).saturating_add(growth(t));
        }
    }
    budget.charge_text(total)
}

fn str_method_inner(s: &Series, member: StrMethod, args: &Args, budget: &mut Budget) -> Result<Value> {
    let name = member.name();
    match member {
        StrMethod::Strip => {
            args.check(name, &["to_strip"])?;
            match args.get(0, "to_strip") {
                None => Ok(text_map(s, |t| Cell::Text(t.trim().to_string()))),
                Some(Value::Str(chars)) => {
                    let set: Vec<char> = chars.chars().collect();
                    Ok(text_map(s, |t| {
                        Cell::Text(t.trim_matches(|c| set.contains(&c)).to_string())
                    }))
                }
                Some(other) => Err(SandboxError::type_error(format!(
                    "strip arg must be None or str, not '{}'",
                    other.type_name()
                ))),
            }
        }
        StrMethod::Lower => {
            args.check(name, &[])?;
            Ok(text_map(s, |t| Cell::Text(t.to_lowercase())))
        }
        StrMethod::Upper => {
            args.check(name, &[])?;
            Ok(text_map(s, |t| Cell::Text(t.to_uppercase())))
        }
        StrMethod::Title => {
            args.check(name, &[])?;
            Ok(text_map(s, |t| Cell::Text(title_case(t))))
        }
        StrMethod::Replace => {
            args.check(name, &["pat", "repl", "n", "case", "regex"])?;
            let pat = args.str_or(0, "pat", "")?.to_string();
            let repl = match args.get(1, "repl") {
                Some(Value::Str(r)) => r.clone(),
                _ => {
                    return Err(SandboxError::type_error(
                        "repl must be a string",
                    ))
                }
            };
            let n = args.int_or(2, "n", -1)?;
            let case = args.flag(3, "case", true)?;
            let cap = if n < 0 { usize::MAX } else { n as usize };
            if args.flag(4, "regex", false)? {
                let re = compile_pattern(&pat, case)?;
                let limit = if n < 0 { 0 } else { n as usize };
                if n == 0 {
                    return Ok(Value::Series(s.clone()));
                }
                // `$group` references can each expand to the whole input
                let refs = repl.matches('$').count();
                charge_replacements(s, budget, |t| {
                    re.find_iter(t)
                        .take(cap)
                        .count()
                        .saturating_mul(repl.len().saturating_add(refs.saturating_mul(t.len())))
                })?;
                Ok(text_map(s, |t| {
                    Cell::Text(re.replacen(t, limit, repl.as_str()).into_owned())
                }))
            } else {
                charge_replacements(s, budget, |t| {
                    t.matches(pat.as_str()).take(cap).count().saturating_mul(repl.len())
                })?;
                if n < 0 {
                    Ok(text_map(s, |t| Cell::Text(t.replace(&pat, &repl))))
                } else {
                    Ok(text_map(s, |t| Cell::Text(t.replacen(&pat, &repl, n as usize))))
                }
            }
        }
        StrMethod::Contains => {
            args.check(name, &["pat", "case", "na", "regex"])?;
            let pat = match args.required(0, "pat", name)? {
                Value::Str(p) => p.clone(),
                other => {
                    return Err(SandboxError::type_error(format!(
                        "pat must be a string, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let case = args.flag(1, "case", true)?;
            let na = args.get(2, "na").map(Value::to_cell).transpose()?;
            if args.flag(3, "regex", true)? {
                let re = compile_pattern(&pat, case)?;
                Ok(text_test(s, na, |t| re.is_match(t)))
            } else if case {
                Ok(text_test(s, na, |t| t.contains(pat.as_str())))
            } else {
                let needle = pat.to_lowercase();
                Ok(text_test(s, na, |t| t.to_lowercase().contains(&needle)))
            }
        }
        StrMethod::Startswith | StrMethod::Endswith => {
            args.check(name, &["pat", "na"])?;
            let pat = args.str_or(0, "pat", "")?.to_string();
            let na = args.get(1, "na").map(Value::to_cell).transpose()?;
            if member == StrMethod::Startswith {
                Ok(text_test(s, na, |t| t.starts_with(pat.as_str())))
            } else {
                Ok(text_test(s, na, |t| t.ends_with(pat.as_str())))
            }
        }
        StrMethod::Len => {
            args.check(name, &[])?;
            Ok(text_map(s, |t| Cell::Int(t.chars().count() as i64)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;

    fn budget() -> Budget {
        Budget::new(&ResourceLimits::default())
    }

    fn ages() -> Series {
        Series::new(
            Some("age".into()),
            vec![Cell::Int(30), Cell::Missing, Cell::Int(40), Cell::Int(20)],
        )
    }

    fn frame() -> Dataset {
        Dataset::new(vec![
            Column::new(
                "city",
                vec![
                    Cell::Text("Oslo".into()),
                    Cell::Text("Rome".into()),
                    Cell::Text("Oslo".into()),
                    Cell::Missing,
                ],
            ),
            Column::new("age", ages().cells),
        ])
        .unwrap()
    }

    fn call_series(s: &Series, m: &str, args: Args) -> Result<Value> {
        let method = resolve_method(&Value::Series(s.clone()), m).unwrap();
        call_method(&Value::Series(s.clone()), method, &args, &mut budget())
    }

    fn call_frame(ds: &Dataset, m: &str, args: Args) -> Result<Value> {
        let method = resolve_method(&Value::Frame(ds.clone()), m).unwrap();
        call_method(&Value::Frame(ds.clone()), method, &args, &mut budget())
    }

    #[test]
    fn test_fillna_with_median() {
        let median = call_series(&ages(), "median", Args::default()).unwrap();
        assert!(matches!(median, Value::Float(v) if v == 30.0));
        let Value::Series(filled) = call_series(&ages(), "fillna", Args::positional(vec![median])).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(filled.cells[1], Cell::Float(30.0));
        assert_eq!(filled.name.as_deref(), Some("age"));
    }

    #[test]
    fn test_aggregates() {
        assert!(matches!(call_series(&ages(), "sum", Args::default()).unwrap(), Value::Int(90)));
        assert!(matches!(call_series(&ages(), "max", Args::default()).unwrap(), Value::Int(40)));
        assert!(matches!(call_series(&ages(), "count", Args::default()).unwrap(), Value::Int(3)));
        assert!(matches!(call_series(&ages(), "mean", Args::default()).unwrap(), Value::Float(v) if v == 30.0));
        let std = call_series(&ages(), "std", Args::default()).unwrap();
        assert!(matches!(std, Value::Float(v) if (v - 10.0).abs() < 1e-9));
    }

    #[test]
    fn test_unknown_member_is_policy_violation() {
        let err = get_attr(&Value::Series(ages()), "to_csv").unwrap_err();
        assert!(err.is_policy_violation());
        let err = get_attr(&Value::Library(crate::policy::Library::Numpy), "load").unwrap_err();
        assert!(err.to_string().contains("np.load"));
    }

    #[test]
    fn test_frame_column_attribute() {
        let Value::Series(s) = get_attr(&Value::Frame(frame()), "age").unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn test_dropna_subset_and_how() {
        let args = Args::new(vec![], vec![("subset".into(), Value::Str("age".into()))]);
        let Value::Frame(out) = call_frame(&frame(), "dropna", args).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(out.row_count(), 3);

        let args = Args::new(vec![], vec![("how".into(), Value::Str("all".into()))]);
        let Value::Frame(out) = call_frame(&frame(), "dropna", args).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(out.row_count(), 4);

        let args = Args::new(vec![], vec![("subset".into(), Value::Str("nope".into()))]);
        assert!(call_frame(&frame(), "dropna", args).is_err());
    }

    #[test]
    fn test_drop_duplicates_keep_options() {
        let subset = ("subset".to_string(), Value::Str("city".into()));
        let Value::Frame(first) =
            call_frame(&frame(), "drop_duplicates", Args::new(vec![], vec![subset.clone()])).unwrap()
        else {
            panic!("expected a frame");
        };
        assert_eq!(first.row_count(), 3);

        let none = Args::new(vec![], vec![subset, ("keep".into(), Value::Bool(false))]);
        let Value::Frame(out) = call_frame(&frame(), "drop_duplicates", none).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(out.row_count(), 2);
    }

    #[test]
    fn test_rename_and_drop() {
        let mapping = Value::Dict(vec![(Value::Str("age".into()), Value::Str("years".into()))]);
        let Value::Frame(out) =
            call_frame(&frame(), "rename", Args::new(vec![], vec![("columns".into(), mapping)])).unwrap()
        else {
            panic!("expected a frame");
        };
        assert_eq!(out.column_names(), vec!["city", "years"]);

        let Value::Frame(out) = call_frame(
            &frame(),
            "drop",
            Args::new(vec![], vec![("columns".into(), Value::List(vec![Value::Str("city".into())]))]),
        )
        .unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(out.column_names(), vec!["age"]);

        let err = call_frame(
            &frame(),
            "drop",
            Args::new(vec![], vec![("columns".into(), Value::Str("zip".into()))]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found in axis"));
    }

    #[test]
    fn test_sort_values_puts_missing_last() {
        let args = Args::new(
            vec![Value::Str("age".into())],
            vec![("ascending".into(), Value::Bool(false))],
        );
        let Value::Frame(out) = call_frame(&frame(), "sort_values", args).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(
            out.column("age").unwrap().cells(),
            &[Cell::Int(40), Cell::Int(30), Cell::Int(20), Cell::Missing]
        );
    }

    #[test]
    fn test_str_accessor() {
        let names = Series::new(
            Some("name".into()),
            vec![Cell::Text("  ada LOVELACE ".into()), Cell::Missing, Cell::Int(3)],
        );
        let accessor = get_attr(&Value::Series(names), "str").unwrap();
        let strip = resolve_method(&accessor, "strip").unwrap();
        let Value::Series(stripped) = call_method(&accessor, strip, &Args::default(), &mut budget()).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(
            stripped.cells,
            vec![Cell::Text("ada LOVELACE".into()), Cell::Missing, Cell::Missing]
        );
        assert_eq!(title_case("ada LOVELACE"), "Ada Lovelace");

        let contains = resolve_method(&accessor, "contains").unwrap();
        let args = Args::new(
            vec![Value::Str("love".into())],
            vec![("case".into(), Value::Bool(false)), ("na".into(), Value::Bool(false))],
        );
        let Value::Series(mask) = call_method(&accessor, contains, &args, &mut budget()).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(mask.cells, vec![Cell::Bool(true), Cell::Bool(false), Cell::Bool(false)]);
    }

    #[test]
    fn test_str_replace_draws_on_text_allowance() {
        let words = Series::new(Some("w".into()), vec![Cell::Text("aaaa".into()), Cell::Missing]);
        let accessor = get_attr(&Value::Series(words), "str").unwrap();
        let replace = resolve_method(&accessor, "replace").unwrap();
        let limits = ResourceLimits {
            max_text_bytes: 256,
            ..ResourceLimits::default()
        };
        let b = &mut Budget::new(&limits);

        let small = Args::positional(vec![Value::Str("a".into()), Value::Str("bc".into())]);
        let Value::Series(out) = call_method(&accessor, replace, &small, b).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(out.cells[0], Cell::Text("bcbcbcbc".into()));

        let wide = Args::positional(vec![Value::Str("a".into()), Value::Str("x".repeat(100))]);
        let err = call_method(&accessor, replace, &wide, b).unwrap_err();
        assert!(err.to_string().starts_with("ResourceLimit:"), "{}", err);
    }

    #[test]
    fn test_astype_and_replace() {
        let Value::Series(text) =
            call_series(&ages(), "astype", Args::positional(vec![Value::Str("str".into())])).unwrap()
        else {
            panic!("expected a Series");
        };
        assert_eq!(text.cells[0], Cell::Text("30".into()));
        assert_eq!(text.cells[1], Cell::Text("nan".into()));

        let err = call_series(&ages(), "astype", Args::positional(vec![Value::Str("int".into())]))
            .unwrap_err();
        assert!(err.to_string().contains("NaN"));

        let Value::Series(replaced) = call_series(
            &ages(),
            "replace",
            Args::positional(vec![Value::Int(30), Value::Int(31)]),
        )
        .unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(replaced.cells[0], Cell::Int(31));
    }

    #[test]
    fn test_mode_unique_isin() {
        let s = Series::new(None, vec![Cell::Int(2), Cell::Int(1), Cell::Int(2), Cell::Missing]);
        let Value::Series(mode) = call_series(&s, "mode", Args::default()).unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(mode.cells, vec![Cell::Int(2)]);
        let unique = call_series(&s, "unique", Args::default()).unwrap();
        assert_eq!(unique.repr(), "[2, 1, nan]");
        let Value::Series(mask) = call_series(
            &s,
            "isin",
            Args::positional(vec![Value::List(vec![Value::Int(1)])]),
        )
        .unwrap() else {
            panic!("expected a Series");
        };
        assert_eq!(
            mask.cells,
            vec![Cell::Bool(false), Cell::Bool(true), Cell::Bool(false), Cell::Bool(false)]
        );
    }
}
