// 📊 Dataset Model - Named, typed columns for tabular data
// Numeric + categorical columns, CSV I/O, content fingerprinting

use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// COLUMN
// ============================================================================

/// A single typed column. Numeric columns carry f64 values; everything
/// else is treated as categorical strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Column::Numeric(v) => Some(v),
            Column::Categorical(_) => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[String]> {
        match self {
            Column::Categorical(v) => Some(v),
            Column::Numeric(_) => None,
        }
    }

    /// Render a single cell as a string. Used for row keys and
    /// equivalence-class grouping, so the rendering must be stable.
    pub fn value_string(&self, row: usize) -> String {
        match self {
            Column::Numeric(v) => format!("{}", v[row]),
            Column::Categorical(v) => v[row].clone(),
        }
    }

    /// Number of distinct values in the column.
    pub fn distinct_count(&self) -> usize {
        match self {
            Column::Numeric(v) => {
                let set: HashSet<u64> = v.iter().map(|x| x.to_bits()).collect();
                set.len()
            }
            Column::Categorical(v) => {
                let set: HashSet<&String> = v.iter().collect();
                set.len()
            }
        }
    }
}

// ============================================================================
// DATASET
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedColumn {
    pub name: String,
    pub values: Column,
}

/// An in-memory table of named, typed columns. Column order is preserved
/// (it matters for row keys and CSV round-trips). All columns have the
/// same length, enforced on insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<NamedColumn>,
}

impl Dataset {
    pub fn new() -> Self {
        Dataset { columns: Vec::new() }
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.n_rows() == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.values)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Names of all numeric columns, in dataset order.
    pub fn numeric_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.values.is_numeric())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Append a column. The length must match existing columns and the
    /// name must be unused.
    pub fn add_column(&mut self, name: &str, values: Column) -> Result<()> {
        if self.has_column(name) {
            bail!("Column '{}' already exists", name);
        }
        if !self.columns.is_empty() && values.len() != self.n_rows() {
            bail!(
                "Column '{}' has {} rows, dataset has {}",
                name,
                values.len(),
                self.n_rows()
            );
        }
        self.columns.push(NamedColumn {
            name: name.to_string(),
            values,
        });
        Ok(())
    }

    /// Replace an existing column in place, keeping its position.
    pub fn replace_column(&mut self, name: &str, values: Column) -> Result<()> {
        if values.len() != self.n_rows() {
            bail!(
                "Replacement for '{}' has {} rows, dataset has {}",
                name,
                values.len(),
                self.n_rows()
            );
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => {
                col.values = values;
                Ok(())
            }
            None => bail!("Column '{}' not found", name),
        }
    }

    /// One row rendered as a single string key over all columns.
    /// Two rows with identical values produce identical keys, which is
    /// what exact-match leakage counting needs.
    pub fn row_key(&self, row: usize) -> String {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.values.value_string(row))
            .collect();
        parts.join("\u{1f}")
    }

    /// SHA-256 over column names and cell values, as a hex string.
    /// Reports embed this so a compliance document can be tied back to
    /// the exact table it was computed from.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for col in &self.columns {
            hasher.update(col.name.as_bytes());
            hasher.update([0x1f]);
            for row in 0..col.values.len() {
                hasher.update(col.values.value_string(row).as_bytes());
                hasher.update([0x1e]);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    // ========================================================================
    // CSV I/O
    // ========================================================================

    /// Load a dataset from CSV. A column where every cell parses as f64
    /// becomes numeric; anything else stays categorical.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path.as_ref())
            .with_context(|| format!("Failed to open CSV file: {:?}", path.as_ref()))?;

        let headers: Vec<String> = rdr
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record.context("Failed to read CSV record")?;
            if record.len() != headers.len() {
                bail!(
                    "CSV record has {} fields, expected {}",
                    record.len(),
                    headers.len()
                );
            }
            for (i, field) in record.iter().enumerate() {
                cells[i].push(field.to_string());
            }
        }

        let mut dataset = Dataset::new();
        for (name, raw) in headers.iter().zip(cells.into_iter()) {
            let parsed: Option<Vec<f64>> =
                raw.iter().map(|v| v.trim().parse::<f64>().ok()).collect();
            let column = match parsed {
                Some(numeric) if !raw.is_empty() => Column::Numeric(numeric),
                _ => Column::Categorical(raw),
            };
            dataset.add_column(name, column)?;
        }
        Ok(dataset)
    }

    /// Write the dataset to CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path.as_ref())
            .with_context(|| format!("Failed to create CSV file: {:?}", path.as_ref()))?;

        wtr.write_record(self.column_names())
            .context("Failed to write CSV headers")?;

        for row in 0..self.n_rows() {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|c| c.values.value_string(row))
                .collect();
            wtr.write_record(&record).context("Failed to write CSV record")?;
        }
        wtr.flush().context("Failed to flush CSV writer")?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_column("Age", Column::Numeric(vec![25.0, 30.0, 45.0]))
            .unwrap();
        ds.add_column(
            "Gender",
            Column::Categorical(vec!["M".into(), "F".into(), "M".into()]),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_add_column_length_mismatch() {
        let mut ds = sample_dataset();
        let result = ds.add_column("BMI", Column::Numeric(vec![22.0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_add_duplicate_column() {
        let mut ds = sample_dataset();
        let result = ds.add_column("Age", Column::Numeric(vec![1.0, 2.0, 3.0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_numeric_column_names() {
        let ds = sample_dataset();
        assert_eq!(ds.numeric_column_names(), vec!["Age"]);
    }

    #[test]
    fn test_replace_column_keeps_position() {
        let mut ds = sample_dataset();
        ds.replace_column("Age", Column::Numeric(vec![26.0, 31.0, 46.0]))
            .unwrap();
        assert_eq!(ds.column_names(), vec!["Age", "Gender"]);
        assert_eq!(
            ds.column("Age").unwrap().as_numeric().unwrap(),
            &[26.0, 31.0, 46.0]
        );
    }

    #[test]
    fn test_row_key_equality() {
        let ds = sample_dataset();
        let other = sample_dataset();
        assert_eq!(ds.row_key(0), other.row_key(0));
        assert_ne!(ds.row_key(0), ds.row_key(1));
    }

    #[test]
    fn test_distinct_count() {
        let ds = sample_dataset();
        assert_eq!(ds.column("Age").unwrap().distinct_count(), 3);
        assert_eq!(ds.column("Gender").unwrap().distinct_count(), 2);
    }

    #[test]
    fn test_fingerprint_changes_with_data() {
        let ds = sample_dataset();
        let mut other = sample_dataset();
        other
            .replace_column("Age", Column::Numeric(vec![25.0, 30.0, 46.0]))
            .unwrap();
        assert_ne!(ds.fingerprint(), other.fingerprint());
        assert_eq!(ds.fingerprint(), sample_dataset().fingerprint());
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");

        let ds = sample_dataset();
        ds.to_csv(&path).unwrap();

        let loaded = Dataset::from_csv(&path).unwrap();
        assert_eq!(loaded.column_names(), vec!["Age", "Gender"]);
        assert!(loaded.column("Age").unwrap().is_numeric());
        assert!(!loaded.column("Gender").unwrap().is_numeric());
        assert_eq!(
            loaded.column("Age").unwrap().as_numeric().unwrap(),
            &[25.0, 30.0, 45.0]
        );
    }
}
