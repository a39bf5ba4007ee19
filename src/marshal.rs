//! Dataset wire codec.
//!
//! Two layouts are understood:
//! `split` is `{"columns": [...], "data": [[...], ...]}` and `records` is
//! `[{"col": value, ...}, ...]`. Decoding detects the layout; encoding uses
//! the configured one.

use crate::dataset::{Cell, Column, Dataset};
use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Split,
    Records,
}

fn bad(message: impl Into<String>) -> SandboxError {
    SandboxError::Deserialization(message.into())
}

fn cell_to_json(cell: &Cell) -> Json {
    match cell {
        Cell::Missing => Json::Null,
        Cell::Bool(b) => Json::Bool(*b),
        Cell::Int(v) => Json::Number((*v).into()),
        Cell::Float(v) => Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
        Cell::Text(s) => Json::String(s.clone()),
    }
}

fn json_to_cell(value: &Json, column: &str, row: usize) -> Result<Cell> {
    match value {
        Json::Null => Ok(Cell::Missing),
        Json::Bool(b) => Ok(Cell::Bool(*b)),
        Json::Number(n) => Ok(match n.as_i64() {
            Some(v) => Cell::Int(v),
            None => Cell::float(n.as_f64().unwrap_or(f64::NAN)),
        }),
        Json::String(s) => Ok(Cell::Text(s.clone())),
        Json::Array(_) | Json::Object(_) => Err(bad(format!(
            "nested value in column '{}' at row {}",
            column, row
        ))),
    }
}

pub fn to_wire_value(dataset: &Dataset, format: WireFormat) -> Json {
    match format {
        WireFormat::Split => {
            let columns = dataset
                .column_names()
                .into_iter()
                .map(|n| Json::String(n.to_string()))
                .collect();
            let data = (0..dataset.row_count())
                .map(|row| Json::Array(dataset.row(row).into_iter().map(cell_to_json).collect()))
                .collect();
            let mut out = Map::new();
            out.insert("columns".to_string(), Json::Array(columns));
            out.insert("data".to_string(), Json::Array(data));
            Json::Object(out)
        }
        WireFormat::Records => Json::Array(
            (0..dataset.row_count())
                .map(|row| {
                    let record: Map<String, Json> = dataset
                        .columns()
                        .iter()
                        .map(|c| (c.name().to_string(), cell_to_json(&c.cells()[row])))
                        .collect();
                    Json::Object(record)
                })
                .collect(),
        ),
    }
}

pub fn to_wire(dataset: &Dataset, format: WireFormat) -> String {
    to_wire_value(dataset, format).to_string()
}

pub fn from_wire(text: &str) -> Result<Dataset> {
    let value: Json =
        serde_json::from_str(text).map_err(|e| bad(format!("invalid JSON: {}", e)))?;
    from_wire_value(&value)
}

pub fn from_wire_value(value: &Json) -> Result<Dataset> {
    match value {
        Json::Object(obj) if obj.contains_key("columns") && obj.contains_key("data") => {
            decode_split(obj)
        }
        Json::Array(rows) => decode_records(rows),
        Json::String(inner) => from_wire(inner),
        _ => Err(bad(
            "expected a split object {\"columns\", \"data\"} or an array of records",
        )),
    }
}

fn finish(columns: Vec<Column>, rows: usize) -> Result<Dataset> {
    if columns.is_empty() {
        return Ok(Dataset::with_rows(rows));
    }
    Dataset::new(columns).map_err(|e| match e {
        SandboxError::InvalidDataset(msg) => bad(msg),
        other => other,
    })
}

fn decode_split(obj: &Map<String, Json>) -> Result<Dataset> {
    let names: Vec<String> = match obj.get("columns") {
        Some(Json::Array(items)) => items
            .iter()
            .map(|v| match v {
                Json::String(s) => Ok(s.clone()),
                other => Err(bad(format!("column names must be strings, found {}", other))),
            })
            .collect::<Result<_>>()?,
        _ => return Err(bad("'columns' must be an array")),
    };
    let Some(Json::Array(data)) = obj.get("data") else {
        return Err(bad("'data' must be an array of rows"));
    };

    let mut cells: Vec<Vec<Cell>> = vec![Vec::with_capacity(data.len()); names.len()];
    for (r, row) in data.iter().enumerate() {
        let Json::Array(values) = row else {
            return Err(bad(format!("row {} is not an array", r)));
        };
        if values.len() != names.len() {
            return Err(bad(format!(
                "row {} has {} values, expected {}",
                r,
                values.len(),
                names.len()
            )));
        }
        for (c, v) in values.iter().enumerate() {
            cells[c].push(json_to_cell(v, &names[c], r)?);
        }
    }
    let columns = names
        .into_iter()
        .zip(cells)
        .map(|(n, c)| Column::new(n, c))
        .collect();
    finish(columns, data.len())
}

fn decode_records(rows: &[Json]) -> Result<Dataset> {
    let mut names: Vec<String> = Vec::new();
    let mut cells: Vec<Vec<Cell>> = Vec::new();
    for (r, row) in rows.iter().enumerate() {
        let Json::Object(record) = row else {
            return Err(bad(format!("record {} is not an object", r)));
        };
        for (key, value) in record {
            let c = match names.iter().position(|n| n == key) {
                Some(c) => c,
                None => {
                    names.push(key.clone());
                    cells.push(vec![Cell::Missing; r]);
                    names.len() - 1
                }
            };
            cells[c].push(json_to_cell(value, key, r)?);
        }
        for column in cells.iter_mut().filter(|c| c.len() == r) {
            column.push(Cell::Missing);
        }
    }
    let columns = names
        .into_iter()
        .zip(cells)
        .map(|(n, c)| Column::new(n, c))
        .collect();
    finish(columns, rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::new(vec![
            Column::new("name", vec![Cell::Text("ada".into()), Cell::Missing]),
            Column::new("age", vec![Cell::Int(36), Cell::Float(41.5)]),
            Column::new("active", vec![Cell::Bool(true), Cell::Bool(false)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_split_layout() {
        let text = to_wire(&sample(), WireFormat::Split);
        assert_eq!(
            text,
            r#"{"columns":["name","age","active"],"data":[["ada",36,true],[null,41.5,false]]}"#
        );
        assert_eq!(from_wire(&text).unwrap(), sample());
    }

    #[test]
    fn test_records_keep_column_order() {
        let text = to_wire(&sample(), WireFormat::Records);
        assert!(text.starts_with(r#"[{"name":"ada","age":36,"active":true}"#));
        let back = from_wire(&text).unwrap();
        assert_eq!(back.column_names(), vec!["name", "age", "active"]);
        assert_eq!(back, sample());
    }

    #[test]
    fn test_records_fill_absent_keys() {
        let ds = from_wire(r#"[{"a": 1}, {"b": "x"}, {"a": 3, "b": null}]"#).unwrap();
        assert_eq!(ds.column_names(), vec!["a", "b"]);
        assert_eq!(
            ds.column("a").unwrap().cells(),
            &[Cell::Int(1), Cell::Missing, Cell::Int(3)]
        );
        assert_eq!(
            ds.column("b").unwrap().cells(),
            &[Cell::Missing, Cell::Text("x".into()), Cell::Missing]
        );
    }

    #[test]
    fn test_non_finite_floats_serialize_as_null() {
        let ds = Dataset::new(vec![Column::new(
            "x",
            vec![Cell::Float(f64::INFINITY), Cell::Float(1.0)],
        )])
        .unwrap();
        assert_eq!(
            to_wire(&ds, WireFormat::Split),
            r#"{"columns":["x"],"data":[[null],[1.0]]}"#
        );
    }

    #[test]
    fn test_malformed_payloads() {
        for text in [
            "not json",
            r#"{"columns":["a","a"],"data":[[1,2]]}"#,
            r#"{"columns":["a","b"],"data":[[1]]}"#,
            r#"[{"a": [1, 2]}]"#,
            r#"[1, 2]"#,
            "42",
        ] {
            assert!(
                matches!(from_wire(text), Err(SandboxError::Deserialization(_))),
                "accepted {}",
                text
            );
        }
    }

    #[test]
    fn test_wire_string_inside_json() {
        let inner = to_wire(&sample(), WireFormat::Records);
        let wrapped = Json::String(inner);
        assert_eq!(from_wire_value(&wrapped).unwrap(), sample());
    }

    #[test]
    fn test_empty_payloads() {
        let ds = from_wire("[]").unwrap();
        assert_eq!(ds.column_count(), 0);
        let ds = from_wire(r#"{"columns":["a"],"data":[]}"#).unwrap();
        assert_eq!(ds.column_names(), vec!["a"]);
        assert_eq!(ds.row_count(), 0);
    }
}
