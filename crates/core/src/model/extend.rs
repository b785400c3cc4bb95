//! Enlarging a dataset by cloning whole units.
//!
//! Clones copy every covariate row of a donor unit and receive a fresh unit
//! ID. Their outcome is set to missing; it is filled in again by the next
//! simulation from the model parameters.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data::{Column, DataFrame, FactorColumn};
use crate::error::{PowerError, Result};

/// How to enlarge a model's dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionDirective {
    /// Grow the number of distinct `along` units to `n` in total.
    Between { along: String, n: usize },
    /// Grow every level of the between-unit factor `by` to `n` units of
    /// `unit`, keeping each donor's within-unit rows.
    Within { unit: String, by: String, n: usize },
}

impl ExtensionDirective {
    pub fn between(along: &str, n: usize) -> Self {
        ExtensionDirective::Between {
            along: along.to_string(),
            n,
        }
    }

    pub fn within(unit: &str, by: &str, n: usize) -> Self {
        ExtensionDirective::Within {
            unit: unit.to_string(),
            by: by.to_string(),
            n,
        }
    }

    /// The directive with its target replaced; used when sweeping sizes.
    pub fn with_target(&self, target: usize) -> Self {
        match self {
            ExtensionDirective::Between { along, .. } => Self::between(along, target),
            ExtensionDirective::Within { unit, by, .. } => Self::within(unit, by, target),
        }
    }

    pub fn target(&self) -> usize {
        match self {
            ExtensionDirective::Between { n, .. } | ExtensionDirective::Within { n, .. } => *n,
        }
    }
}

/// Grouping factor lookup where an absent column is an unknown factor.
fn unit_factor(df: &DataFrame, name: &str) -> Result<FactorColumn> {
    match df.grouping(name) {
        Ok(f) => Ok(f.droplevels()),
        Err(PowerError::MissingColumn(_)) => Err(PowerError::UnknownFactor(name.to_string())),
        Err(e) => Err(e),
    }
}

/// Row indices of every unit, in unit code order.
fn rows_by_unit(units: &FactorColumn) -> Vec<Vec<usize>> {
    let mut rows = vec![Vec::new(); units.n_levels()];
    for (i, &code) in units.codes().iter().enumerate() {
        rows[code].push(i);
    }
    rows
}

/// Number of distinct units in `unit`.
pub fn n_units(df: &DataFrame, unit: &str) -> Result<usize> {
    Ok(unit_factor(df, unit)?.n_levels())
}

/// Units per level of the between-unit factor `by`, in level order.
///
/// # Errors
/// [`PowerError::InvalidConfiguration`] if a unit appears under more than
/// one level of `by`.
pub fn units_per_level(df: &DataFrame, unit: &str, by: &str) -> Result<IndexMap<String, usize>> {
    Ok(unit_levels(df, unit, by)?
        .into_iter()
        .map(|(level, units)| (level, units.len()))
        .collect())
}

/// Unit codes grouped by level of `by`.
fn unit_levels(df: &DataFrame, unit: &str, by: &str) -> Result<IndexMap<String, Vec<usize>>> {
    let units = unit_factor(df, unit)?;
    let levels = unit_factor(df, by)?;
    let mut level_of_unit: Vec<Option<usize>> = vec![None; units.n_levels()];
    for (&u, &l) in units.codes().iter().zip(levels.codes()) {
        match level_of_unit[u] {
            Some(existing) if existing != l => {
                return Err(PowerError::invalid(
                    "by",
                    format!(
                        "unit '{}' appears under several levels of '{}'",
                        units.level_name(u).unwrap_or_default(),
                        by
                    ),
                ))
            }
            _ => level_of_unit[u] = Some(l),
        }
    }
    let mut grouped: IndexMap<String, Vec<usize>> = levels
        .levels()
        .iter()
        .map(|l| (l.to_string(), Vec::new()))
        .collect();
    for (u, level) in level_of_unit.iter().enumerate() {
        if let Some(l) = level {
            if let Some((_, members)) = grouped.get_index_mut(*l) {
                members.push(u);
            }
        }
    }
    Ok(grouped)
}

/// Hands out unit IDs that do not collide with existing ones.
enum IdAllocator {
    /// IDs are whole numbers; continue counting from the maximum.
    Numeric { next: i64 },
    /// Free-form labels; clones are named `<donor>_<copy>`.
    Labels { taken: HashSet<String> },
}

impl IdAllocator {
    fn for_column(units: &FactorColumn) -> Self {
        let numbers: Option<Vec<i64>> = units.levels().iter().map(|l| l.parse::<i64>().ok()).collect();
        match numbers {
            Some(nums) => IdAllocator::Numeric {
                next: nums.into_iter().max().unwrap_or(0) + 1,
            },
            None => IdAllocator::Labels {
                taken: units.levels().iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn fresh(&mut self, donor: &str, copy: usize) -> String {
        match self {
            IdAllocator::Numeric { next } => {
                let id = next.to_string();
                *next += 1;
                id
            }
            IdAllocator::Labels { taken } => {
                let mut id = format!("{}_{}", donor, copy);
                let mut bump = 1;
                while taken.contains(&id) {
                    id = format!("{}_{}_{}", donor, copy, bump);
                    bump += 1;
                }
                taken.insert(id.clone());
                id
            }
        }
    }
}

/// One planned clone: the donor unit code and the clone's new ID.
struct PlannedClone {
    donor: usize,
    id: String,
}

/// Append the planned clones to a copy of `df`.
fn append_clones(
    df: &DataFrame,
    unit: &str,
    units: &FactorColumn,
    clones: &[PlannedClone],
    response: Option<&str>,
) -> Result<DataFrame> {
    let mut out = df.clone();
    if clones.is_empty() {
        return Ok(out);
    }
    let unit_rows = rows_by_unit(units);
    let mut rows = Vec::new();
    let mut ids = Vec::new();
    for clone in clones {
        for &r in &unit_rows[clone.donor] {
            rows.push(r);
            ids.push(clone.id.as_str());
        }
    }

    let mut added = df.take_rows(&rows);
    let id_column = match df.get_column(unit)? {
        Column::Integer(_) => Column::Integer(
            ids.iter()
                .map(|id| {
                    id.parse::<i64>()
                        .map_err(|_| PowerError::Data(format!("unit ID '{}' is not an integer", id)))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => Column::Factor(FactorColumn::from_labels(ids.iter())),
    };
    added.columns.insert(unit.to_string(), id_column);
    if let Some(y) = response {
        if added.has_column(y) {
            added.set_float_column(y, vec![f64::NAN; rows.len()])?;
        }
    }

    out.append_rows(&added)?;
    Ok(out)
}

/// Grow the number of distinct `along` units to `n`.
///
/// New unit k (0-based) clones existing unit `k mod current` in first-appearance
/// order. With `n` equal to the current count the data is returned unchanged.
///
/// # Errors
/// - [`PowerError::UnknownFactor`] if `along` is not a column.
/// - [`PowerError::InvalidConfiguration`] if `n` is below the current count.
pub fn extend_between(df: &DataFrame, along: &str, n: usize, response: Option<&str>) -> Result<DataFrame> {
    let units = unit_factor(df, along)?;
    let current = units.n_levels();
    if n < current {
        return Err(PowerError::invalid(
            "n",
            format!(
                "target of {} units for '{}' is below the current {} units",
                n, along, current
            ),
        ));
    }
    if current == 0 {
        return Err(PowerError::Data(format!("no units of '{}' to clone", along)));
    }

    let mut ids = IdAllocator::for_column(&units);
    let clones: Vec<PlannedClone> = (0..n - current)
        .map(|k| {
            let donor = k % current;
            let label = units.level_name(donor).unwrap_or_default();
            PlannedClone {
                donor,
                id: ids.fresh(label, k / current + 1),
            }
        })
        .collect();

    log::debug!("extending '{}' from {} to {} units", along, current, n);
    append_clones(df, along, &units, &clones, response)
}

/// Grow every level of the between-unit factor `by` to `n` units.
///
/// Levels with fewer than `n` units clone their own units cyclically, each
/// clone carrying all of its donor's rows. Levels already at or above `n`
/// are left alone.
///
/// # Errors
/// - [`PowerError::UnknownFactor`] if `unit` or `by` is not a column.
/// - [`PowerError::InvalidConfiguration`] if `n` is zero or below the unit
///   count of every level, or if `by` varies within a unit.
pub fn extend_within(
    df: &DataFrame,
    unit: &str,
    by: &str,
    n: usize,
    response: Option<&str>,
) -> Result<DataFrame> {
    let units = unit_factor(df, unit)?;
    let groups = unit_levels(df, unit, by)?;
    let smallest = groups.values().map(Vec::len).min().unwrap_or(0);
    if n == 0 || n < smallest {
        return Err(PowerError::invalid(
            "n",
            format!(
                "target of {} '{}' units per level of '{}' is below the current {}",
                n, unit, by, smallest
            ),
        ));
    }

    let mut ids = IdAllocator::for_column(&units);
    let mut clones = Vec::new();
    for (level, members) in &groups {
        if members.is_empty() || members.len() >= n {
            continue;
        }
        log::debug!(
            "extending level '{}' of '{}' from {} to {} units",
            level,
            by,
            members.len(),
            n
        );
        for k in 0..n - members.len() {
            let donor = members[k % members.len()];
            let label = units.level_name(donor).unwrap_or_default();
            clones.push(PlannedClone {
                donor,
                id: ids.fresh(label, k / members.len() + 1),
            });
        }
    }

    append_clones(df, unit, &units, &clones, response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pilot() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_factor_column("subject", &["S1", "S1", "S2", "S2", "S3", "S3"])
            .unwrap();
        df.add_factor_column("group", &["ctl", "ctl", "trt", "trt", "trt", "trt"])
            .unwrap();
        df.add_integer_column("trial", vec![1, 2, 1, 2, 1, 2]).unwrap();
        df.add_float_column("y", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        df
    }

    #[test]
    fn test_between_reaches_target() {
        let df = pilot();
        let out = extend_between(&df, "subject", 7, Some("y")).unwrap();
        assert_eq!(n_units(&out, "subject").unwrap(), 7);
        assert_eq!(out.nrows(), 14);
        // original rows untouched
        for (name, col) in df.iter() {
            let extended = out.get_column(name).unwrap();
            for row in 0..df.nrows() {
                assert_eq!(extended.cell_string(row), col.cell_string(row));
            }
        }
        // first clone copies S1 and has no outcome
        let subject = out.get_factor("subject").unwrap();
        assert_eq!(subject.label(6), "S1_1");
        assert_eq!(out.get_factor("group").unwrap().label(6), "ctl");
        assert!(out.get_float("y").unwrap()[6].is_nan());
        // the fourth clone cycles back to S1
        assert_eq!(subject.label(12), "S1_2");
    }

    #[test]
    fn test_between_numeric_ids_continue() {
        let mut df = DataFrame::new();
        df.add_integer_column("id", vec![3, 3, 8]).unwrap();
        df.add_float_column("x", vec![0.1, 0.2, 0.3]).unwrap();
        let out = extend_between(&df, "id", 4, None).unwrap();
        match out.get_column("id").unwrap() {
            Column::Integer(v) => assert_eq!(v, &vec![3, 3, 8, 9, 9, 10]),
            other => panic!("unexpected column {:?}", other),
        }
        assert_eq!(out.get_float("x").unwrap(), &[0.1, 0.2, 0.3, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_between_same_target_is_identity() {
        let df = pilot();
        assert_eq!(extend_between(&df, "subject", 3, Some("y")).unwrap(), df);
    }

    #[test]
    fn test_between_shrinking_fails() {
        let df = pilot();
        assert!(matches!(
            extend_between(&df, "subject", 2, Some("y")),
            Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "n"
        ));
        assert!(matches!(
            extend_between(&df, "school", 5, Some("y")),
            Err(PowerError::UnknownFactor(name)) if name == "school"
        ));
    }

    #[test]
    fn test_within_fills_each_level() {
        let df = pilot();
        let out = extend_within(&df, "subject", "group", 3, Some("y")).unwrap();
        let counts = units_per_level(&out, "subject", "group").unwrap();
        assert_eq!(counts["ctl"], 3);
        assert_eq!(counts["trt"], 3);
        // 1 clone in trt, 2 in ctl, 2 rows each
        assert_eq!(out.nrows(), 6 + 3 * 2);
    }

    #[test]
    fn test_within_clones_mirror_donor_rows() {
        let df = pilot();
        let out = extend_within(&df, "subject", "group", 4, None).unwrap();
        let subjects = out.get_factor("subject").unwrap();
        let trials = match out.get_column("trial").unwrap() {
            Column::Integer(v) => v.clone(),
            other => panic!("unexpected column {:?}", other),
        };
        for level in subjects.levels() {
            let mut seen: Vec<i64> = (0..out.nrows())
                .filter(|&i| subjects.label(i) == level)
                .map(|i| trials[i])
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![1, 2], "unit {}", level);
        }
    }

    #[test]
    fn test_within_levels_at_target_untouched() {
        let df = pilot();
        let out = extend_within(&df, "subject", "group", 2, Some("y")).unwrap();
        let counts = units_per_level(&out, "subject", "group").unwrap();
        assert_eq!(counts["ctl"], 2);
        assert_eq!(counts["trt"], 2);
        assert_eq!(out.nrows(), 8);
    }

    #[test]
    fn test_within_errors() {
        let df = pilot();
        assert!(matches!(
            extend_within(&df, "subject", "group", 0, None),
            Err(PowerError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            extend_within(&df, "subject", "arm", 3, None),
            Err(PowerError::UnknownFactor(name)) if name == "arm"
        ));
        // trial varies within subject, so it is not a between-unit factor
        assert!(matches!(
            extend_within(&df, "subject", "trial", 3, None),
            Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "by"
        ));
    }
}
