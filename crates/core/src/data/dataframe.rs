use indexmap::IndexMap;

use super::factor::FactorColumn;
use crate::error::{PowerError, Result};

/// A single column in a [`DataFrame`], which can hold floating-point numbers,
/// integers, or categorical (factor) data.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// A column of 64-bit floating-point values.
    Float(Vec<f64>),
    /// A column of 64-bit signed integers.
    Integer(Vec<i64>),
    /// A categorical column with string levels mapped to integer codes.
    Factor(FactorColumn),
}

impl Column {
    /// Returns the number of elements in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Integer(v) => v.len(),
            Column::Factor(f) => f.len(),
        }
    }

    /// Returns `true` if the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new column holding only the given rows, in the given order.
    pub fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(rows.iter().map(|&r| v[r]).collect()),
            Column::Integer(v) => Column::Integer(rows.iter().map(|&r| v[r]).collect()),
            Column::Factor(f) => Column::Factor(f.take(rows)),
        }
    }

    /// Text rendering of one cell. Missing floats render as `NA`.
    pub fn cell_string(&self, row: usize) -> String {
        match self {
            Column::Float(v) if v[row].is_nan() => "NA".to_string(),
            Column::Float(v) => v[row].to_string(),
            Column::Integer(v) => v[row].to_string(),
            Column::Factor(f) => f.label(row).to_string(),
        }
    }
}

/// A lightweight columnar DataFrame for simulated and pilot data.
///
/// Columns are stored in insertion order using an [`IndexMap`]. All columns
/// must have the same number of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Ordered map of column name -> column data.
    pub(crate) columns: IndexMap<String, Column>,
    /// Number of rows (observations). Zero when the DataFrame is empty.
    pub(crate) nrows: usize,
}

impl DataFrame {
    /// Create an empty DataFrame with no columns and no rows.
    pub fn new() -> Self {
        DataFrame {
            columns: IndexMap::new(),
            nrows: 0,
        }
    }

    /// Add a floating-point column.
    ///
    /// # Errors
    /// Returns an error if the column length does not match existing rows,
    /// or if a column with the same name already exists.
    pub fn add_float_column(&mut self, name: &str, data: Vec<f64>) -> Result<()> {
        self.add_column(name, Column::Float(data))
    }

    /// Add an integer column.
    ///
    /// # Errors
    /// Returns an error if the column length does not match existing rows,
    /// or if a column with the same name already exists.
    pub fn add_integer_column(&mut self, name: &str, data: Vec<i64>) -> Result<()> {
        self.add_column(name, Column::Integer(data))
    }

    /// Add a factor (categorical) column from a slice of string values.
    ///
    /// Levels are auto-discovered in order of first appearance.
    pub fn add_factor_column(&mut self, name: &str, data: &[&str]) -> Result<()> {
        self.add_column(name, Column::Factor(FactorColumn::new(data)))
    }

    /// Add a pre-built column.
    ///
    /// # Errors
    /// Returns an error if the column length does not match existing rows,
    /// or if a column with the same name already exists.
    pub fn add_column(&mut self, name: &str, column: Column) -> Result<()> {
        if self.columns.contains_key(name) {
            return Err(PowerError::Data(format!(
                "Column '{}' already exists in DataFrame",
                name
            )));
        }
        self.check_len(name, &column)?;
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Insert or replace a float column, keeping its position if it existed.
    pub fn set_float_column(&mut self, name: &str, data: Vec<f64>) -> Result<()> {
        let column = Column::Float(data);
        self.check_len(name, &column)?;
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Rename a column in place, keeping its position.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return self.get_column(from).map(|_| ());
        }
        if self.columns.contains_key(to) {
            return Err(PowerError::Data(format!(
                "Column '{}' already exists in DataFrame",
                to
            )));
        }
        let index = self
            .columns
            .get_index_of(from)
            .ok_or_else(|| PowerError::MissingColumn(from.to_string()))?;
        self.columns = std::mem::take(&mut self.columns)
            .into_iter()
            .enumerate()
            .map(|(i, (name, col))| if i == index { (to.to_string(), col) } else { (name, col) })
            .collect();
        Ok(())
    }

    /// Retrieve a column by name.
    ///
    /// # Errors
    /// Returns [`PowerError::MissingColumn`] if no column with the given name exists.
    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| PowerError::MissingColumn(name.to_string()))
    }

    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Retrieve a float column's data as a slice.
    ///
    /// # Errors
    /// Returns an error if the column does not exist or is not a `Float` column.
    pub fn get_float(&self, name: &str) -> Result<&[f64]> {
        match self.get_column(name)? {
            Column::Float(v) => Ok(v.as_slice()),
            _ => Err(PowerError::Data(format!(
                "Column '{}' is not a Float column",
                name
            ))),
        }
    }

    /// Retrieve a factor column reference.
    ///
    /// # Errors
    /// Returns an error if the column does not exist or is not a `Factor` column.
    pub fn get_factor(&self, name: &str) -> Result<&FactorColumn> {
        match self.get_column(name)? {
            Column::Factor(f) => Ok(f),
            _ => Err(PowerError::Data(format!(
                "Column '{}' is not a Factor column",
                name
            ))),
        }
    }

    /// View any non-float column as a factor. Integer columns are converted on
    /// the fly (levels in first-appearance order).
    pub fn grouping(&self, name: &str) -> Result<FactorColumn> {
        match self.get_column(name)? {
            Column::Factor(f) => Ok(f.clone()),
            Column::Integer(v) => Ok(FactorColumn::from_labels(v.iter().map(|x| x.to_string()))),
            Column::Float(_) => Err(PowerError::Data(format!(
                "Column '{}' is continuous and cannot be used for grouping",
                name
            ))),
        }
    }

    /// Returns the number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Returns the number of columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Returns a vector of column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|s| s.as_str()).collect()
    }

    /// Iterate over `(name, column)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A new DataFrame holding only the given rows (duplicates allowed).
    pub fn take_rows(&self, rows: &[usize]) -> DataFrame {
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), col.take(rows)))
            .collect();
        DataFrame {
            columns,
            nrows: rows.len(),
        }
    }

    /// Append the rows of `other`, which must have the same column names and
    /// kinds. Factor levels are matched by label.
    pub fn append_rows(&mut self, other: &DataFrame) -> Result<()> {
        if self.column_names() != other.column_names() {
            return Err(PowerError::Data(format!(
                "Cannot append rows: columns {:?} vs {:?}",
                self.column_names(),
                other.column_names()
            )));
        }
        for (name, col) in self.columns.iter_mut() {
            match (col, other.get_column(name)?) {
                (Column::Float(a), Column::Float(b)) => a.extend_from_slice(b),
                (Column::Integer(a), Column::Integer(b)) => a.extend_from_slice(b),
                (Column::Factor(a), Column::Factor(b)) => {
                    for i in 0..b.len() {
                        a.push(b.label(i));
                    }
                }
                _ => {
                    return Err(PowerError::Data(format!(
                        "Cannot append rows: column '{}' differs in type",
                        name
                    )))
                }
            }
        }
        self.nrows += other.nrows;
        Ok(())
    }

    // ---- internal helpers ----

    fn check_len(&mut self, name: &str, column: &Column) -> Result<()> {
        let col_len = column.len();
        let only_self = self.columns.len() == 1 && self.columns.contains_key(name);
        if self.columns.is_empty() || only_self {
            self.nrows = col_len;
        } else if col_len != self.nrows {
            return Err(PowerError::ShapeMismatch {
                expected: self.nrows,
                got: col_len,
                context: format!("adding column '{}'", name),
            });
        }
        Ok(())
    }
}

impl Default for DataFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_float_column("y", vec![5.2, 3.1, 4.7]).unwrap();
        df.add_integer_column("trial", vec![1, 2, 1]).unwrap();
        df.add_factor_column("subject", &["S1", "S2", "S1"]).unwrap();
        df
    }

    #[test]
    fn test_new_is_empty() {
        let df = DataFrame::new();
        assert_eq!(df.nrows(), 0);
        assert_eq!(df.ncols(), 0);
        assert!(df.column_names().is_empty());
    }

    #[test]
    fn test_add_columns_and_dimensions() {
        let df = sample_df();
        assert_eq!(df.nrows(), 3);
        assert_eq!(df.ncols(), 3);
        assert_eq!(df.column_names(), vec!["y", "trial", "subject"]);
    }

    #[test]
    fn test_get_column_not_found() {
        let df = sample_df();
        let err = df.get_column("missing").unwrap_err();
        assert!(matches!(err, PowerError::MissingColumn(_)));
    }

    #[test]
    fn test_get_float_wrong_type() {
        let df = sample_df();
        assert!(matches!(df.get_float("subject"), Err(PowerError::Data(_))));
        assert!(matches!(df.get_factor("y"), Err(PowerError::Data(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut df = DataFrame::new();
        df.add_float_column("a", vec![1.0, 2.0]).unwrap();
        let err = df.add_float_column("b", vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, PowerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_duplicate_column_name() {
        let mut df = DataFrame::new();
        df.add_float_column("x", vec![1.0]).unwrap();
        assert!(df.add_float_column("x", vec![2.0]).is_err());
    }

    #[test]
    fn test_grouping_from_integer() {
        let df = sample_df();
        let g = df.grouping("trial").unwrap();
        assert_eq!(g.levels(), vec!["1", "2"]);
        assert!(df.grouping("y").is_err());
    }

    #[test]
    fn test_set_float_column_replaces_in_place() {
        let mut df = sample_df();
        df.set_float_column("y", vec![0.0, 0.0, 0.0]).unwrap();
        assert_eq!(df.column_names(), vec!["y", "trial", "subject"]);
        assert_eq!(df.get_float("y").unwrap(), &[0.0, 0.0, 0.0]);
        assert!(df.set_float_column("z", vec![1.0]).is_err());
    }

    #[test]
    fn test_take_and_append_rows() {
        let df = sample_df();
        let sub = df.take_rows(&[2, 0]);
        assert_eq!(sub.nrows(), 2);
        assert_eq!(sub.get_float("y").unwrap(), &[4.7, 5.2]);

        let mut grown = df.clone();
        grown.append_rows(&sub).unwrap();
        assert_eq!(grown.nrows(), 5);
        let subj = grown.get_factor("subject").unwrap();
        assert_eq!(subj.n_levels(), 2);
        assert_eq!(subj.label(3), "S1");
    }

    #[test]
    fn test_rename_column_keeps_position() {
        let mut df = sample_df();
        df.rename_column("trial", "Trial number").unwrap();
        assert_eq!(df.column_names(), vec!["y", "Trial number", "subject"]);
        assert!(matches!(df.rename_column("trial", "t"), Err(PowerError::MissingColumn(_))));
        assert!(df.rename_column("y", "subject").is_err());
    }

    #[test]
    fn test_cell_string_renders_missing() {
        let col = Column::Float(vec![1.5, f64::NAN]);
        assert_eq!(col.cell_string(0), "1.5");
        assert_eq!(col.cell_string(1), "NA");
    }
}
