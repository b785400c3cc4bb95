//! Wide <-> long conversion for repeated-measures data.
//!
//! Wide form has one row per unit and one outcome column per within-unit
//! cell; long form has one row per unit x cell.

use indexmap::IndexMap;

use crate::error::{PowerError, Result};

use super::dataframe::{Column, DataFrame};
use super::factor::FactorColumn;

/// How the within-unit cell columns of a wide table map onto factor levels.
#[derive(Debug, Clone)]
pub struct WithinLayout {
    /// Within-unit factor names, slowest-varying first.
    pub factors: Vec<String>,
    /// One entry per wide outcome column: (column name, level of each factor).
    pub cells: Vec<(String, Vec<String>)>,
}

/// Convert a wide table to long form.
///
/// Every column that is not a cell column is carried over as a unit-level
/// attribute (repeated on each of the unit's rows). The outcome is written to
/// `dv`. Rows are ordered unit-major, then cell order.
pub fn wide_to_long(wide: &DataFrame, layout: &WithinLayout, dv: &str) -> Result<DataFrame> {
    let n_units = wide.nrows();
    let n_cells = layout.cells.len();
    for (_, levels) in &layout.cells {
        if levels.len() != layout.factors.len() {
            return Err(PowerError::ShapeMismatch {
                expected: layout.factors.len(),
                got: levels.len(),
                context: "within-cell level labels".into(),
            });
        }
    }

    let cell_values: Vec<&[f64]> = layout
        .cells
        .iter()
        .map(|(name, _)| wide.get_float(name))
        .collect::<Result<_>>()?;

    let unit_rows: Vec<usize> = (0..n_units)
        .flat_map(|u| std::iter::repeat(u).take(n_cells))
        .collect();

    let mut long = DataFrame::new();
    for (name, col) in wide.iter() {
        if layout.cells.iter().any(|(c, _)| c == name) {
            continue;
        }
        long.add_column(name, col.take(&unit_rows))?;
    }

    for (k, factor) in layout.factors.iter().enumerate() {
        let declared: Vec<String> = unique_in_order(layout.cells.iter().map(|(_, l)| l[k].as_str()));
        let labels = (0..n_units)
            .flat_map(move |_| layout.cells.iter().map(move |(_, l)| l[k].as_str()));
        long.add_column(factor, Column::Factor(FactorColumn::with_levels(&declared, labels)))?;
    }

    let y: Vec<f64> = (0..n_units)
        .flat_map(|u| cell_values.iter().map(move |col| col[u]))
        .collect();
    long.add_float_column(dv, y)?;
    Ok(long)
}

/// Convert a long table back to wide form, keyed by `id`.
///
/// Unit-level columns (everything except `within` factors and `dv`) are taken
/// from each unit's first row. Fails if a unit is missing a cell or has a
/// cell twice, so the conversion never loses or duplicates units.
pub fn long_to_wide(long: &DataFrame, id: &str, within: &[&str], dv: &str) -> Result<DataFrame> {
    let ids = long.grouping(id)?;
    let y = long.get_float(dv)?;
    let within_cols: Vec<FactorColumn> = within
        .iter()
        .map(|w| long.grouping(w))
        .collect::<Result<_>>()?;

    let cell_key = |row: usize| -> String {
        within_cols
            .iter()
            .map(|f| f.label(row))
            .collect::<Vec<_>>()
            .join("_")
    };

    let mut cells: IndexMap<String, ()> = IndexMap::new();
    let mut units: IndexMap<String, (usize, IndexMap<String, f64>)> = IndexMap::new();
    for row in 0..long.nrows() {
        let key = cell_key(row);
        cells.entry(key.clone()).or_insert(());
        let entry = units
            .entry(ids.label(row).to_string())
            .or_insert_with(|| (row, IndexMap::new()));
        if entry.1.insert(key.clone(), y[row]).is_some() {
            return Err(PowerError::Data(format!(
                "Unit '{}' has more than one row for cell '{}'",
                ids.label(row),
                key
            )));
        }
    }

    let first_rows: Vec<usize> = units.values().map(|(r, _)| *r).collect();
    let mut wide = DataFrame::new();
    for (name, col) in long.iter() {
        if name == dv || within.contains(&name) {
            continue;
        }
        wide.add_column(name, col.take(&first_rows))?;
    }
    for cell in cells.keys() {
        let values = units
            .iter()
            .map(|(unit, (_, vals))| {
                vals.get(cell).copied().ok_or_else(|| {
                    PowerError::Data(format!("Unit '{}' has no row for cell '{}'", unit, cell))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        wide.add_float_column(cell, values)?;
    }
    Ok(wide)
}

fn unique_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !out.iter().any(|o| o == v) {
            out.push(v.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_sample() -> (DataFrame, WithinLayout) {
        let mut df = DataFrame::new();
        df.add_factor_column("id", &["S1", "S2"]).unwrap();
        df.add_factor_column("group", &["A", "B"]).unwrap();
        df.add_float_column("pre", vec![1.0, 3.0]).unwrap();
        df.add_float_column("post", vec![2.0, 4.0]).unwrap();
        let layout = WithinLayout {
            factors: vec!["time".into()],
            cells: vec![
                ("pre".into(), vec!["pre".into()]),
                ("post".into(), vec!["post".into()]),
            ],
        };
        (df, layout)
    }

    #[test]
    fn test_wide_to_long_one_row_per_unit_cell() {
        let (wide, layout) = wide_sample();
        let long = wide_to_long(&wide, &layout, "y").unwrap();
        assert_eq!(long.nrows(), 4);
        assert_eq!(long.column_names(), vec!["id", "group", "time", "y"]);
        assert_eq!(long.get_float("y").unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        let time = long.get_factor("time").unwrap();
        assert_eq!(time.levels(), vec!["pre", "post"]);
        assert_eq!(time.codes(), &[0, 1, 0, 1]);
    }

    #[test]
    fn test_long_to_wide_inverts() {
        let (wide, layout) = wide_sample();
        let long = wide_to_long(&wide, &layout, "y").unwrap();
        let back = long_to_wide(&long, "id", &["time"], "y").unwrap();
        assert_eq!(back.nrows(), 2);
        assert_eq!(back.get_float("pre").unwrap(), &[1.0, 3.0]);
        assert_eq!(back.get_float("post").unwrap(), &[2.0, 4.0]);
        assert_eq!(back.get_factor("group").unwrap().label(1), "B");
    }

    #[test]
    fn test_long_to_wide_rejects_duplicate_cells() {
        let mut long = DataFrame::new();
        long.add_factor_column("id", &["S1", "S1"]).unwrap();
        long.add_factor_column("time", &["pre", "pre"]).unwrap();
        long.add_float_column("y", vec![1.0, 2.0]).unwrap();
        assert!(long_to_wide(&long, "id", &["time"], "y").is_err());
    }

    #[test]
    fn test_long_to_wide_rejects_missing_cells() {
        let mut long = DataFrame::new();
        long.add_factor_column("id", &["S1", "S1", "S2"]).unwrap();
        long.add_factor_column("time", &["pre", "post", "pre"]).unwrap();
        long.add_float_column("y", vec![1.0, 2.0, 3.0]).unwrap();
        assert!(long_to_wide(&long, "id", &["time"], "y").is_err());
    }
}
