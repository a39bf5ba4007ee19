//! Subscript reads and writes: `df['c']`, `df[mask]`, `s[0]`, `df.loc[...]`.

use super::budget::Budget;
use super::value::{values_equal, Series, Value};
use crate::dataset::{Cell, Dataset};
use crate::errors::{Result, ScriptErrorKind, SandboxError};

fn key_error(key: &Value) -> SandboxError {
    SandboxError::script(ScriptErrorKind::KeyError, key.repr())
}

fn index_error(index: i64, len: usize) -> SandboxError {
    SandboxError::script(
        ScriptErrorKind::IndexError,
        format!(
            "index {} is out of bounds for axis 0 with size {}",
            index, len
        ),
    )
}

fn normalize_index(index: i64, len: usize) -> Result<usize> {
    let resolved = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= len {
        return Err(index_error(index, len));
    }
    Ok(resolved as usize)
}

/// Boolean mask from a Series, requiring one entry per row.
pub fn mask_of(series: &Series, rows: usize) -> Result<Vec<bool>> {
    if series.len() != rows {
        return Err(SandboxError::value_error(format!(
            "Item wrong length {} instead of {}.",
            series.len(),
            rows
        )));
    }
    series
        .cells
        .iter()
        .map(|c| match c {
            Cell::Bool(b) => Ok(*b),
            c if c.is_missing() => Err(SandboxError::value_error(
                "Cannot mask with non-boolean array containing NA / NaN values",
            )),
            other => Err(SandboxError::script(
                ScriptErrorKind::KeyError,
                format!(
                    "boolean mask expected, found a '{}' value",
                    other.type_name()
                ),
            )),
        })
        .collect()
}

fn column_list(items: &[Value]) -> Result<Vec<String>> {
    items
        .iter()
        .map(|v| match v {
            Value::Str(s) => Ok(s.clone()),
            other => Err(key_error(other)),
        })
        .collect()
}

fn column_series(ds: &Dataset, name: &str) -> Result<Series> {
    let column = ds
        .column(name)
        .ok_or_else(|| key_error(&Value::Str(name.to_string())))?;
    Ok(Series::new(Some(name.to_string()), column.cells().to_vec()))
}

fn filter_series(series: &Series, mask: &[bool]) -> Series {
    let cells = series
        .cells
        .iter()
        .zip(mask)
        .filter(|(_, keep)| **keep)
        .map(|(c, _)| c.clone())
        .collect();
    series.with_cells(cells)
}

// ----------------------------------------------------------------------
// reads
// ----------------------------------------------------------------------

pub fn get_item(base: &Value, key: &Value, budget: &mut Budget) -> Result<Value> {
    match base {
        Value::Frame(ds) => match key {
            Value::Str(name) => {
                budget.tick(ds.row_count())?;
                Ok(Value::Series(column_series(ds, name)?))
            }
            Value::List(items) => {
                let names = column_list(items)?;
                budget.tick(ds.row_count() * names.len())?;
                Ok(Value::Frame(ds.select(&names)?))
            }
            Value::Series(mask) => {
                let mask = mask_of(mask, ds.row_count())?;
                budget.tick(ds.cell_count())?;
                Ok(Value::Frame(ds.filter_rows(&mask)))
            }
            other => Err(key_error(other)),
        },
        Value::Series(s) => match key {
            Value::Int(i) => {
                let idx = normalize_index(*i, s.len())?;
                Ok(Value::from_cell(&s.cells[idx]))
            }
            Value::Series(mask) => {
                let mask = mask_of(mask, s.len())?;
                budget.tick(s.len())?;
                Ok(Value::Series(filter_series(s, &mask)))
            }
            Value::List(items) => {
                let mut cells = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Int(i) => cells.push(s.cells[normalize_index(*i, s.len())?].clone()),
                        other => return Err(key_error(other)),
                    }
                }
                Ok(Value::Series(s.with_cells(cells)))
            }
            other => Err(key_error(other)),
        },
        Value::Loc(ds) => loc_get(ds, key, budget),
        Value::List(items) | Value::Tuple(items) => match key {
            Value::Int(i) => {
                let idx = normalize_index(*i, items.len()).map_err(|_| {
                    SandboxError::script(
                        ScriptErrorKind::IndexError,
                        format!("{} index out of range", base.type_name()),
                    )
                })?;
                Ok(items[idx].clone())
            }
            other => Err(SandboxError::type_error(format!(
                "{} indices must be integers, not {}",
                base.type_name(),
                other.type_name()
            ))),
        },
        Value::Str(s) => match key {
            Value::Int(i) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = normalize_index(*i, chars.len()).map_err(|_| {
                    SandboxError::script(ScriptErrorKind::IndexError, "string index out of range")
                })?;
                Ok(Value::Str(chars[idx].to_string()))
            }
            other => Err(SandboxError::type_error(format!(
                "string indices must be integers, not '{}'",
                other.type_name()
            ))),
        },
        Value::Dict(items) => items
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| key_error(key)),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Row mask of a `.loc` subscript: a boolean Series or row labels.
fn row_selector(ds: &Dataset, rows: &Value) -> Result<Vec<bool>> {
    match rows {
        Value::Series(mask) => mask_of(mask, ds.row_count()),
        Value::Int(i) => {
            let idx = if *i >= 0 && (*i as usize) < ds.row_count() {
                *i as usize
            } else {
                return Err(key_error(rows));
            };
            let mut mask = vec![false; ds.row_count()];
            mask[idx] = true;
            Ok(mask)
        }
        Value::List(items) => {
            let mut mask = vec![false; ds.row_count()];
            for item in items {
                match item {
                    Value::Int(i) if *i >= 0 && (*i as usize) < ds.row_count() => {
                        mask[*i as usize] = true
                    }
                    Value::Bool(_) => {
                        return Err(SandboxError::type_error(
                            "use a boolean Series, not a list, as a .loc row mask",
                        ))
                    }
                    other => return Err(key_error(other)),
                }
            }
            Ok(mask)
        }
        other => Err(SandboxError::type_error(format!(
            "unsupported .loc row selector of type '{}'",
            other.type_name()
        ))),
    }
}

fn split_loc_key(key: &Value) -> (&Value, Option<&Value>) {
    match key {
        Value::Tuple(parts) if parts.len() == 2 => (&parts[0], Some(&parts[1])),
        other => (other, None),
    }
}

fn loc_get(ds: &Dataset, key: &Value, budget: &mut Budget) -> Result<Value> {
    let (rows, cols) = split_loc_key(key);
    let selected = ds.filter_rows(&row_selector(ds, rows)?);
    budget.tick(selected.cell_count())?;
    match cols {
        None => Ok(Value::Frame(selected)),
        Some(Value::Str(name)) => {
            let series = column_series(&selected, name)?;
            if let Value::Int(_) = rows {
                return Ok(series
                    .cells
                    .first()
                    .map(Value::from_cell)
                    .unwrap_or(Value::None));
            }
            Ok(Value::Series(series))
        }
        Some(Value::List(items)) => Ok(Value::Frame(selected.select(&column_list(items)?)?)),
        Some(other) => Err(key_error(other)),
    }
}

// ----------------------------------------------------------------------
// writes
// ----------------------------------------------------------------------

/// Cells for a whole-column assignment: a Series or list must match the row
/// count, a scalar is broadcast. Stored text is charged to the budget.
fn column_cells(value: &Value, rows: usize, budget: &mut Budget) -> Result<Vec<Cell>> {
    match value {
        Value::Series(_) | Value::List(_) | Value::Tuple(_) => {
            budget.charge_text(value.text_len())?;
            match value {
                Value::Series(s) => Ok(s.cells.clone()),
                Value::List(items) | Value::Tuple(items) => {
                    items.iter().map(Value::to_cell).collect::<Result<Vec<_>>>()
                }
                _ => Ok(Vec::new()),
            }
        }
        scalar => budget.replicate(&scalar.to_cell()?, rows),
    }
}

pub fn set_item(target: &mut Value, key: &Value, value: Value, budget: &mut Budget) -> Result<()> {
    match target {
        Value::Frame(ds) => match key {
            Value::Str(name) => {
                let rows = if ds.column_count() == 0 {
                    match &value {
                        Value::Series(s) => s.len(),
                        Value::List(items) | Value::Tuple(items) => items.len(),
                        _ => ds.row_count(),
                    }
                } else {
                    ds.row_count()
                };
                let cells = column_cells(&value, rows, budget)?;
                let added = if ds.column(name).is_some() { 0 } else { cells.len() };
                budget.check_cells(ds.cell_count() + added)?;
                budget.tick(cells.len())?;
                ds.set_column(name, cells)
            }
            Value::List(items) => {
                let names = column_list(items)?;
                match value {
                    Value::Frame(ref src) => {
                        if src.column_count() != names.len() {
                            return Err(SandboxError::value_error(
                                "Columns must be same length as key",
                            ));
                        }
                        budget.charge_text(value.text_len())?;
                        for (name, column) in names.iter().zip(src.columns()) {
                            ds.set_column(name, column.cells().to_vec())?;
                        }
                        Ok(())
                    }
                    scalar if scalar.is_scalar() => {
                        let cell = scalar.to_cell()?;
                        let rows = ds.row_count();
                        for name in &names {
                            let cells = budget.replicate(&cell, rows)?;
                            ds.set_column(name, cells)?;
                        }
                        Ok(())
                    }
                    other => Err(SandboxError::type_error(format!(
                        "cannot assign a '{}' to several columns",
                        other.type_name()
                    ))),
                }
            }
            Value::Series(mask) => {
                let mask = mask_of(mask, ds.row_count())?;
                let names: Vec<String> = ds.column_names().iter().map(|n| n.to_string()).collect();
                for name in names {
                    masked_assign(ds, &mask, &name, &value, budget)?;
                }
                Ok(())
            }
            other => Err(key_error(other)),
        },
        Value::Series(s) => match key {
            Value::Int(i) => {
                let idx = normalize_index(*i, s.len())?;
                budget.charge_text(value.text_len())?;
                s.cells[idx] = value.to_cell()?;
                Ok(())
            }
            Value::Series(mask) => {
                let mask = mask_of(mask, s.len())?;
                let fill = value.to_cell()?;
                budget.charge_cell_copies(&fill, mask.iter().filter(|m| **m).count())?;
                for (cell, keep) in s.cells.iter_mut().zip(mask) {
                    if keep {
                        *cell = fill.clone();
                    }
                }
                Ok(())
            }
            other => Err(key_error(other)),
        },
        Value::List(items) => match key {
            Value::Int(i) => {
                let len = items.len();
                let idx = normalize_index(*i, len).map_err(|_| {
                    SandboxError::script(
                        ScriptErrorKind::IndexError,
                        "list assignment index out of range",
                    )
                })?;
                budget.charge_text(value.text_len())?;
                items[idx] = value;
                Ok(())
            }
            other => Err(SandboxError::type_error(format!(
                "list indices must be integers, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(items) => {
            if !key.is_scalar() && !matches!(key, Value::Tuple(_)) {
                return Err(SandboxError::type_error(format!(
                    "unhashable type: '{}'",
                    key.type_name()
                )));
            }
            budget.charge_text(value.text_len().saturating_add(key.text_len()))?;
            match items.iter_mut().find(|(k, _)| values_equal(k, key)) {
                Some((_, slot)) => *slot = value,
                None => items.push((key.clone(), value)),
            }
            Ok(())
        }
        other => Err(SandboxError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `df.loc[rows, cols] = value`
pub fn loc_set(ds: &mut Dataset, key: &Value, value: Value, budget: &mut Budget) -> Result<()> {
    let (rows, cols) = split_loc_key(key);
    let mask = row_selector(ds, rows)?;
    let names = match cols {
        None => ds.column_names().iter().map(|n| n.to_string()).collect(),
        Some(Value::Str(name)) => vec![name.clone()],
        Some(Value::List(items)) => column_list(items)?,
        Some(other) => return Err(key_error(other)),
    };
    for name in names {
        if ds.column(&name).is_none() {
            let rows = ds.row_count();
            budget.check_cells(ds.cell_count() + rows)?;
            ds.set_column(&name, vec![Cell::Missing; rows])?;
        }
        masked_assign(ds, &mask, &name, &value, budget)?;
    }
    Ok(())
}

fn masked_assign(
    ds: &mut Dataset,
    mask: &[bool],
    name: &str,
    value: &Value,
    budget: &mut Budget,
) -> Result<()> {
    let rows = ds.row_count();
    let selected = mask.iter().filter(|m| **m).count();
    let mut cells = ds
        .column(name)
        .map(|c| c.cells().to_vec())
        .unwrap_or_else(|| vec![Cell::Missing; rows]);
    budget.tick(rows)?;
    if !value.is_scalar() {
        budget.charge_text(value.text_len())?;
    }
    match value {
        Value::Series(s) if s.len() == rows => {
            for (i, keep) in mask.iter().enumerate() {
                if *keep {
                    cells[i] = s.cells[i].clone();
                }
            }
        }
        Value::Series(s) if s.len() == selected => {
            let mut source = s.cells.iter();
            for (i, keep) in mask.iter().enumerate() {
                if *keep {
                    if let Some(c) = source.next() {
                        cells[i] = c.clone();
                    }
                }
            }
        }
        Value::List(items) if items.len() == selected => {
            let mut source = items.iter();
            for (i, keep) in mask.iter().enumerate() {
                if *keep {
                    if let Some(v) = source.next() {
                        cells[i] = v.to_cell()?;
                    }
                }
            }
        }
        Value::Series(s) => {
            return Err(SandboxError::value_error(format!(
                "shape mismatch: value array of shape ({},) could not be broadcast to indexing result of shape ({},)",
                s.len(),
                selected
            )))
        }
        Value::List(items) => {
            return Err(SandboxError::value_error(format!(
                "shape mismatch: value array of shape ({},) could not be broadcast to indexing result of shape ({},)",
                items.len(),
                selected
            )))
        }
        scalar => {
            let fill = scalar.to_cell()?;
            budget.charge_cell_copies(&fill, selected)?;
            for (i, keep) in mask.iter().enumerate() {
                if *keep {
                    cells[i] = fill.clone();
                }
            }
        }
    }
    ds.set_column(name, cells)
}

pub fn del_item(target: &mut Value, key: &Value) -> Result<()> {
    match target {
        Value::Frame(ds) => match key {
            Value::Str(name) => ds
                .remove_column(name)
                .map(|_| ())
                .ok_or_else(|| key_error(key)),
            other => Err(key_error(other)),
        },
        Value::List(items) => match key {
            Value::Int(i) => {
                let len = items.len();
                let idx = normalize_index(*i, len).map_err(|_| {
                    SandboxError::script(
                        ScriptErrorKind::IndexError,
                        "list assignment index out of range",
                    )
                })?;
                items.remove(idx);
                Ok(())
            }
            other => Err(SandboxError::type_error(format!(
                "list indices must be integers, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(items) => {
            let pos = items
                .iter()
                .position(|(k, _)| values_equal(k, key))
                .ok_or_else(|| key_error(key))?;
            items.remove(pos);
            Ok(())
        }
        other => Err(SandboxError::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::dataset::Column;

    fn frame() -> Dataset {
        Dataset::new(vec![
            Column::new("a", vec![Cell::Int(1), Cell::Int(5), Cell::Int(9)]),
            Column::new("b", vec![Cell::Missing, Cell::Int(2), Cell::Int(3)]),
        ])
        .unwrap()
    }

    fn budget() -> Budget {
        Budget::new(&ResourceLimits::default())
    }

    fn mask(bits: &[bool]) -> Value {
        Value::Series(Series::new(None, bits.iter().map(|b| Cell::Bool(*b)).collect()))
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let err = get_item(&Value::Frame(frame()), &Value::Str("agee".into()), &mut budget())
            .unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'agee'");
    }

    #[test]
    fn test_mask_filters_rows() {
        let out = get_item(
            &Value::Frame(frame()),
            &mask(&[true, false, true]),
            &mut budget(),
        )
        .unwrap();
        let Value::Frame(ds) = out else {
            panic!("expected a frame");
        };
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn test_short_series_assignment_fails() {
        let mut target = Value::Frame(frame());
        let short = Value::Series(Series::new(None, vec![Cell::Int(1)]));
        let err = set_item(&mut target, &Value::Str("c".into()), short, &mut budget()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: Length of values (1) does not match length of index (3)"
        );
    }

    #[test]
    fn test_loc_assign_with_mask() {
        let mut ds = frame();
        let key = Value::Tuple(vec![mask(&[false, true, true]), Value::Str("a".into())]);
        loc_set(&mut ds, &key, Value::Int(0), &mut budget()).unwrap();
        assert_eq!(
            ds.column("a").unwrap().cells(),
            &[Cell::Int(1), Cell::Int(0), Cell::Int(0)]
        );
    }

    #[test]
    fn test_loc_creates_missing_column() {
        let mut ds = frame();
        let key = Value::Tuple(vec![mask(&[true, false, false]), Value::Str("flag".into())]);
        loc_set(&mut ds, &key, Value::Bool(true), &mut budget()).unwrap();
        assert_eq!(
            ds.column("flag").unwrap().cells(),
            &[Cell::Bool(true), Cell::Missing, Cell::Missing]
        );
    }

    #[test]
    fn test_del_column() {
        let mut target = Value::Frame(frame());
        del_item(&mut target, &Value::Str("b".into())).unwrap();
        assert!(del_item(&mut target, &Value::Str("b".into())).is_err());
    }

    #[test]
    fn test_series_positional_index() {
        let s = Value::Series(Series::new(None, vec![Cell::Int(4), Cell::Int(6)]));
        assert!(matches!(
            get_item(&s, &Value::Int(-1), &mut budget()).unwrap(),
            Value::Int(6)
        ));
        let err = get_item(&s, &Value::Int(7), &mut budget()).unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::IndexError));
    }
}
