//! Untyped rows × named columns, the shape every pipeline stage passes along.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Number cells as-is, text cells parsed after trimming.
    pub fn to_f64_lenient(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(s) => write!(f, "{}", s),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map(Cell::Number).unwrap_or(Cell::Null)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<Option<String>> for Cell {
    fn from(v: Option<String>) -> Self {
        v.map(Cell::Text).unwrap_or(Cell::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_columns(columns: &[&str]) -> Self {
        Self::new(columns.iter().map(|c| c.to_string()).collect())
    }

    /// Pads short rows with nulls and truncates long ones to the column count.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// First column with this exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Numeric view of a column; non-number cells are `None`.
    pub fn numbers(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name).map(|it| it.map(Cell::as_f64).collect())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<impl Iterator<Item = &mut Cell> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter_mut().map(move |r| &mut r[idx]))
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> + '_ {
        self.rows.iter_mut().flat_map(|r| r.iter_mut())
    }

    /// Applies `f` to every cell of every column named in `names`, duplicates included.
    pub fn map_columns(&mut self, names: &[&str], mut f: impl FnMut(&mut Cell)) {
        let idxs: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| names.contains(&c.as_str()))
            .map(|(i, _)| i)
            .collect();
        for row in self.rows.iter_mut() {
            for &i in &idxs {
                f(&mut row[i]);
            }
        }
    }

    /// Appends a column, or overwrites it when the name already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
    }

    /// Removes every column whose name is in `names`; returns the names removed.
    pub fn drop_columns(&mut self, names: &[&str]) -> Vec<String> {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        if keep.iter().all(|k| *k) {
            return Vec::new();
        }
        let mut dropped = Vec::new();
        let mut columns = Vec::new();
        for (c, k) in self.columns.drain(..).zip(&keep) {
            if *k {
                columns.push(c);
            } else {
                dropped.push(c);
            }
        }
        self.columns = columns;
        for row in self.rows.iter_mut() {
            let mut i = 0;
            row.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
        dropped
    }

    pub fn rename_columns(&mut self, rename: impl Fn(&str) -> String) {
        for c in self.columns.iter_mut() {
            *c = rename(c);
        }
    }

    pub fn reverse_rows(&mut self) {
        self.rows.reverse();
    }

    /// Last `n` rows as a new table.
    pub fn tail(&self, n: usize) -> Table {
        let start = self.rows.len().saturating_sub(n);
        Table {
            columns: self.columns.clone(),
            rows: self.rows[start..].to_vec(),
        }
    }

    /// Row-oriented JSON (`[{column: value}]`), the shape the dashboard consumes.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut m = Map::new();
                for (c, v) in self.columns.iter().zip(row) {
                    m.insert(
                        c.clone(),
                        serde_json::to_value(v).unwrap_or(Value::Null),
                    );
                }
                Value::Object(m)
            })
            .collect()
    }
}
