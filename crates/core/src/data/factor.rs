use indexmap::IndexSet;

/// A categorical (factor) column that maps string levels to integer codes.
///
/// Levels are discovered in order of first appearance and assigned 0-based codes.
/// Grouping factors (subjects, items) and categorical predictors both use this
/// representation.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorColumn {
    /// Ordered level set; a level's index is its code.
    levels: IndexSet<String>,
    /// The integer codes for each observation.
    codes: Vec<usize>,
}

impl FactorColumn {
    /// Create a new `FactorColumn` from a slice of string values.
    ///
    /// Levels are auto-discovered in order of first appearance and assigned
    /// consecutive 0-based integer codes.
    ///
    /// # Examples
    /// ```
    /// use mixedpower_core::data::FactorColumn;
    ///
    /// let col = FactorColumn::new(&["A", "B", "A", "C", "B"]);
    /// assert_eq!(col.n_levels(), 3);
    /// assert_eq!(col.codes(), &[0, 1, 0, 2, 1]);
    /// ```
    pub fn new(values: &[&str]) -> Self {
        Self::from_labels(values.iter().copied())
    }

    /// Create a `FactorColumn` from any iterator of labels.
    pub fn from_labels<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut col = FactorColumn {
            levels: IndexSet::new(),
            codes: Vec::new(),
        };
        for val in values {
            col.push(val.as_ref());
        }
        col
    }

    /// Create a factor with a fixed level order. Every value must be one of
    /// `levels`; unknown values are appended as new levels.
    pub fn with_levels<I, S>(levels: &[String], values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut col = FactorColumn {
            levels: levels.iter().cloned().collect(),
            codes: Vec::new(),
        };
        for val in values {
            col.push(val.as_ref());
        }
        col
    }

    /// Append one observation, registering a new level if needed.
    pub fn push(&mut self, value: &str) {
        let code = match self.levels.get_index_of(value) {
            Some(code) => code,
            None => self.levels.insert_full(value.to_string()).0,
        };
        self.codes.push(code);
    }

    /// Returns the number of distinct levels.
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Returns a slice of the integer codes for each observation.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    /// Level names in code order.
    pub fn levels(&self) -> Vec<&str> {
        self.levels.iter().map(|s| s.as_str()).collect()
    }

    /// Returns the code of a level, if present.
    pub fn code_of(&self, level: &str) -> Option<usize> {
        self.levels.get_index_of(level)
    }

    /// Returns the level name for a given integer code, or `None` if the code
    /// is out of range.
    pub fn level_name(&self, code: usize) -> Option<&str> {
        self.levels.get_index(code).map(|s| s.as_str())
    }

    /// The label of observation `row`.
    pub fn label(&self, row: usize) -> &str {
        self.levels[self.codes[row]].as_str()
    }

    /// Returns the number of observations (rows).
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns `true` if the column has no observations.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// A new factor holding the given rows, keeping this factor's level order.
    pub fn take(&self, rows: &[usize]) -> Self {
        FactorColumn {
            levels: self.levels.clone(),
            codes: rows.iter().map(|&r| self.codes[r]).collect(),
        }
    }

    /// Drop levels that no observation uses, re-coding in first-appearance order
    /// of the surviving levels.
    pub fn droplevels(&self) -> Self {
        Self::from_labels((0..self.len()).map(|i| self.label(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_basic() {
        let col = FactorColumn::new(&["A", "B", "A", "C", "B"]);
        assert_eq!(col.n_levels(), 3);
        assert_eq!(col.len(), 5);
        assert_eq!(col.codes(), &[0, 1, 0, 2, 1]);
    }

    #[test]
    fn test_level_order_is_first_appearance() {
        let col = FactorColumn::new(&["C", "A", "B", "A"]);
        assert_eq!(col.levels(), vec!["C", "A", "B"]);
        assert_eq!(col.codes(), &[0, 1, 2, 1]);
    }

    #[test]
    fn test_level_name_lookup() {
        let col = FactorColumn::new(&["X", "Y", "Z"]);
        assert_eq!(col.level_name(0), Some("X"));
        assert_eq!(col.level_name(2), Some("Z"));
        assert_eq!(col.level_name(3), None);
        assert_eq!(col.code_of("Y"), Some(1));
        assert_eq!(col.label(1), "Y");
    }

    #[test]
    fn test_empty() {
        let col = FactorColumn::new(&[]);
        assert_eq!(col.n_levels(), 0);
        assert!(col.is_empty());
    }

    #[test]
    fn test_with_levels_keeps_declared_order() {
        let levels = vec!["low".to_string(), "high".to_string()];
        let col = FactorColumn::with_levels(&levels, ["high", "high", "low"]);
        assert_eq!(col.levels(), vec!["low", "high"]);
        assert_eq!(col.codes(), &[1, 1, 0]);
    }

    #[test]
    fn test_take_and_droplevels() {
        let col = FactorColumn::new(&["a", "b", "c", "b"]);
        let sub = col.take(&[1, 3]);
        assert_eq!(sub.n_levels(), 3);
        assert_eq!(sub.codes(), &[1, 1]);
        let dropped = sub.droplevels();
        assert_eq!(dropped.levels(), vec!["b"]);
        assert_eq!(dropped.codes(), &[0, 0]);
    }
}
