//! Columnar containers for raw flow records and aggregated flow tables.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("column {column} has {found} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of one cell. Text cells go through [`numeric_form`].
    pub fn numeric_at(&self, row: usize) -> Option<f64> {
        match self {
            Self::Numeric(values) => values.get(row).copied().flatten(),
            Self::Text(values) => values
                .get(row)
                .and_then(|cell| cell.as_deref())
                .and_then(numeric_form),
        }
    }

    pub fn text_at(&self, row: usize) -> Option<&str> {
        match self {
            Self::Text(values) => values.get(row).and_then(|cell| cell.as_deref()),
            Self::Numeric(_) => None,
        }
    }

    fn take_rows(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&idx| values[idx]).collect()),
            Self::Text(values) => {
                Self::Text(rows.iter().map(|&idx| values[idx].clone()).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Numeric(values.into_iter().map(Some).collect()),
        }
    }

    pub fn text<S: AsRef<str>>(name: &str, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Text(
                values
                    .into_iter()
                    .map(|value| Some(value.as_ref().to_string()))
                    .collect(),
            ),
        }
    }
}

/// Raw per-record observations, one [`Column`] per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    columns: Vec<Column>,
    len: usize,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self, TableError> {
        let mut batch = Self::new();
        for column in columns {
            batch.set_column(column)?;
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| &column.data)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Inserts a column, replacing any existing column of the same name in place.
    pub fn set_column(&mut self, column: Column) -> Result<(), TableError> {
        if !self.columns.is_empty() && column.data.len() != self.len {
            return Err(TableError::LengthMismatch {
                column: column.name,
                expected: self.len,
                found: column.data.len(),
            });
        }
        self.len = column.data.len();
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => existing.data = column.data,
            None => self.columns.push(column),
        }
        Ok(())
    }

    // Callers build `column` from this batch's own rows, so lengths agree.
    pub(crate) fn put_column(&mut self, column: Column) {
        if self.columns.is_empty() {
            self.len = column.data.len();
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => existing.data = column.data,
            None => self.columns.push(column),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<ColumnData> {
        let position = self.columns.iter().position(|c| c.name == name)?;
        let removed = self.columns.remove(position).data;
        if self.columns.is_empty() {
            self.len = 0;
        }
        Some(removed)
    }

    /// New batch holding `rows` in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|column| Column {
                    name: column.name.clone(),
                    data: column.data.take_rows(rows),
                })
                .collect(),
            len: rows.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowColumn {
    pub name: String,
    pub values: Vec<f64>,
}

/// Fully numeric, time-indexed table. `index` holds bucket starts in UTC epoch millis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowTable {
    index: Vec<i64>,
    columns: Vec<FlowColumn>,
}

impl FlowTable {
    pub fn new(index: Vec<i64>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn columns(&self) -> &[FlowColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn insert_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), TableError> {
        if values.len() != self.index.len() {
            return Err(TableError::LengthMismatch {
                column: name.to_string(),
                expected: self.index.len(),
                found: values.len(),
            });
        }
        self.put_column(name, values);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<f64>> {
        let position = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(position).values)
    }

    /// Stable ascending sort of all rows by index.
    pub fn sort_by_index(&mut self) {
        if self.index.windows(2).all(|pair| pair[0] <= pair[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by_key(|&row| self.index[row]);
        self.index = order.iter().map(|&row| self.index[row]).collect();
        for column in &mut self.columns {
            column.values = order.iter().map(|&row| column.values[row]).collect();
        }
    }

    /// SHA-256 over the ordered column names.
    pub fn schema_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update("columns:");
        for column in &self.columns {
            hasher.update(column.name.as_bytes());
            hasher.update(":f64;");
        }
        hex::encode(hasher.finalize())
    }

    // Callers derive `values` from this table's own columns, so lengths agree.
    pub(crate) fn put_column(&mut self, name: &str, values: Vec<f64>) {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(FlowColumn {
                name: name.to_string(),
                values,
            }),
        }
    }

    pub(crate) fn from_parts(index: Vec<i64>, columns: Vec<FlowColumn>) -> Self {
        Self { index, columns }
    }
}

/// Numeric reading of a text cell: a plain number, else a dotted IPv4 address as its u32 value.
pub fn numeric_form(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return value.is_finite().then_some(value);
    }
    trimmed
        .parse::<Ipv4Addr>()
        .ok()
        .map(|addr| f64::from(u32::from(addr)))
}
