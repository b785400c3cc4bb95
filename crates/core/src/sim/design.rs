//! Factorial designs with between- and within-unit factors.
//!
//! Each unit belongs to one between cell and is measured once in every
//! within cell. The within-cell outcomes of a unit are multivariate normal
//! with the cell means of its between cell and a covariance built from the
//! standard deviations and the correlation specification.

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::{wide_to_long, Column, DataFrame, FactorColumn, WithinLayout};
use crate::error::{PowerError, Result};
use crate::matrix::dense::{center_columns, cholesky_lower, sample_covariance};

use super::rng::{covariance_factor, standard_normal_matrix};

/// Standard deviation of the outcome: one value for every cell, or a table
/// shaped like the mean table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SdSpec {
    Common(f64),
    PerCell(Vec<Vec<f64>>),
}

/// Correlation among the within cells of a unit: one value for every pair,
/// or a full matrix (within cells x within cells).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationSpec {
    Uniform(f64),
    Matrix(Vec<Vec<f64>>),
}

impl Default for CorrelationSpec {
    fn default() -> Self {
        CorrelationSpec::Uniform(0.0)
    }
}

/// A factorial design to simulate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    /// Between-unit factors and their levels.
    #[serde(default)]
    pub between: IndexMap<String, Vec<String>>,
    /// Within-unit factors and their levels.
    #[serde(default)]
    pub within: IndexMap<String, Vec<String>>,
    /// Cell means: one row per within cell, one column per between cell.
    pub means: Vec<Vec<f64>>,
    pub sd: SdSpec,
    #[serde(default)]
    pub r: CorrelationSpec,
    /// Units per between cell.
    pub n: usize,
    /// Force the sample means and covariances to equal the targets.
    #[serde(default)]
    pub empirical: bool,
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default = "default_dv")]
    pub dv: String,
    /// Optional descriptions of factors and the outcome, for labelling output.
    #[serde(default)]
    pub labels: IndexMap<String, String>,
}

fn default_id() -> String {
    "id".to_string()
}

fn default_dv() -> String {
    "y".to_string()
}

/// One cell of a factor crossing: its column label and the level of each factor.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub label: String,
    pub levels: Vec<String>,
}

/// Cartesian product of the factor levels, first factor varying slowest.
fn crossing(factors: &IndexMap<String, Vec<String>>) -> Vec<Cell> {
    let mut cells = vec![Cell {
        label: String::new(),
        levels: Vec::new(),
    }];
    for levels in factors.values() {
        cells = cells
            .iter()
            .flat_map(|cell| {
                levels.iter().map(move |level| {
                    let mut next = cell.levels.clone();
                    next.push(level.clone());
                    Cell {
                        label: next.join("_"),
                        levels: next,
                    }
                })
            })
            .collect();
    }
    cells
}

impl DesignSpec {
    /// A design with only a within-unit factor, e.g. pre/post measurements.
    pub fn within_only(factor: &str, levels: &[&str], means: &[f64], sd: f64, r: f64, n: usize) -> Self {
        let mut within = IndexMap::new();
        within.insert(factor.to_string(), levels.iter().map(|s| s.to_string()).collect());
        Self {
            between: IndexMap::new(),
            within,
            means: means.iter().map(|&m| vec![m]).collect(),
            sd: SdSpec::Common(sd),
            r: CorrelationSpec::Uniform(r),
            n,
            empirical: false,
            id: default_id(),
            dv: default_dv(),
            labels: IndexMap::new(),
        }
    }

    pub fn empirical(mut self, empirical: bool) -> Self {
        self.empirical = empirical;
        self
    }

    pub fn with_between(mut self, factor: &str, levels: &[&str]) -> Self {
        self.between
            .insert(factor.to_string(), levels.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_means(mut self, means: Vec<Vec<f64>>) -> Self {
        self.means = means;
        self
    }

    /// Between cells in column order of the mean table.
    pub fn between_cells(&self) -> Vec<Cell> {
        crossing(&self.between)
    }

    /// Within cells in row order of the mean table. Without within factors
    /// there is a single cell named after the outcome.
    pub fn within_cells(&self) -> Vec<Cell> {
        if self.within.is_empty() {
            return vec![Cell {
                label: self.dv.clone(),
                levels: Vec::new(),
            }];
        }
        crossing(&self.within)
    }

    /// Total number of units.
    pub fn total_units(&self) -> usize {
        self.n * self.between_cells().len()
    }

    /// Description of a factor or the outcome, falling back to its name.
    pub fn label_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.labels.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Rename the columns of simulated data that have a description.
    /// Columns without one keep their name.
    pub fn apply_labels(&self, data: &mut DataFrame) -> Result<()> {
        for (name, label) in &self.labels {
            if data.has_column(name) {
                data.rename_column(name, label)?;
            }
        }
        Ok(())
    }

    /// Check the design before any data is drawn.
    ///
    /// # Errors
    /// - [`PowerError::InvalidConfiguration`] for empty factors, bad sizes,
    ///   SDs or correlations, or clashing column names.
    /// - [`PowerError::ShapeMismatch`] if the mean, SD or correlation tables
    ///   do not match the cells.
    /// - [`PowerError::NotPositiveDefinite`] for a correlation matrix that is
    ///   not positive definite.
    pub fn validate(&self) -> Result<()> {
        let mut names: Vec<&str> = vec![self.id.as_str(), self.dv.as_str()];
        for (kind, factors) in [("between", &self.between), ("within", &self.within)] {
            for (name, levels) in factors {
                if levels.is_empty() {
                    return Err(PowerError::invalid(format!("{}.{}", kind, name), "factor has no levels"));
                }
                if levels.iter().enumerate().any(|(i, l)| levels[..i].contains(l)) {
                    return Err(PowerError::invalid(format!("{}.{}", kind, name), "duplicate level"));
                }
                if names.contains(&name.as_str()) {
                    return Err(PowerError::invalid(format!("{}.{}", kind, name), "name is already in use"));
                }
                names.push(name);
            }
        }
        if self.id == self.dv {
            return Err(PowerError::invalid("dv", "must differ from the id column"));
        }

        let n_within = self.within_cells().len();
        let n_between = self.between_cells().len();
        if self.n == 0 {
            return Err(PowerError::invalid("n", "units per cell must be positive"));
        }
        if self.empirical && self.n <= n_within {
            return Err(PowerError::invalid(
                "n",
                format!(
                    "empirical mode needs more than {} units per cell (one per within cell)",
                    n_within
                ),
            ));
        }

        check_table(&self.means, n_within, n_between, "mean table")?;
        if self.means.iter().flatten().any(|m| !m.is_finite()) {
            return Err(PowerError::invalid("means", "means must be finite"));
        }
        match &self.sd {
            SdSpec::Common(sd) => check_sd(*sd)?,
            SdSpec::PerCell(table) => {
                check_table(table, n_within, n_between, "sd table")?;
                for sd in table.iter().flatten() {
                    check_sd(*sd)?;
                }
            }
        }

        self.correlation_matrix().map(|_| ())
    }

    /// The within-cell correlation matrix.
    pub fn correlation_matrix(&self) -> Result<DMatrix<f64>> {
        let k = self.within_cells().len();
        let r = match &self.r {
            CorrelationSpec::Uniform(r) => {
                if !(r.is_finite() && r.abs() <= 1.0) {
                    return Err(PowerError::invalid("r", "correlation must lie in [-1, 1]"));
                }
                DMatrix::from_fn(k, k, |i, j| if i == j { 1.0 } else { *r })
            }
            CorrelationSpec::Matrix(rows) => {
                check_table(rows, k, k, "correlation matrix")?;
                let m = DMatrix::from_fn(k, k, |i, j| rows[i][j]);
                for i in 0..k {
                    if (m[(i, i)] - 1.0).abs() > 1e-12 {
                        return Err(PowerError::invalid("r", "correlation matrix needs a unit diagonal"));
                    }
                    for j in 0..i {
                        if (m[(i, j)] - m[(j, i)]).abs() > 1e-12 || m[(i, j)].abs() > 1.0 {
                            return Err(PowerError::invalid(
                                "r",
                                "correlation matrix must be symmetric with entries in [-1, 1]",
                            ));
                        }
                    }
                }
                m
            }
        };
        if k > 1 && cholesky_lower(&r).is_none() {
            return Err(PowerError::NotPositiveDefinite(
                "within-unit correlation matrix".into(),
            ));
        }
        Ok(r)
    }

    /// Target mean vector and covariance of the within cells of between cell `b`.
    fn cell_moments(&self, b: usize, r: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
        let k = r.nrows();
        let mean = DVector::from_fn(k, |i, _| self.means[i][b]);
        let sd = DVector::from_fn(k, |i, _| match &self.sd {
            SdSpec::Common(sd) => *sd,
            SdSpec::PerCell(table) => table[i][b],
        });
        let cov = DMatrix::from_fn(k, k, |i, j| sd[i] * sd[j] * r[(i, j)]);
        (mean, cov)
    }
}

fn check_table(table: &[Vec<f64>], rows: usize, cols: usize, context: &str) -> Result<()> {
    if table.len() != rows {
        return Err(PowerError::ShapeMismatch {
            expected: rows,
            got: table.len(),
            context: format!("rows of the {} (within cells)", context),
        });
    }
    for row in table {
        if row.len() != cols {
            return Err(PowerError::ShapeMismatch {
                expected: cols,
                got: row.len(),
                context: format!("columns of the {} (between cells)", context),
            });
        }
    }
    Ok(())
}

fn check_sd(sd: f64) -> Result<()> {
    if sd.is_finite() && sd >= 0.0 {
        Ok(())
    } else {
        Err(PowerError::invalid("sd", "standard deviation must be finite and non-negative"))
    }
}

/// One simulated dataset in wide form.
#[derive(Debug, Clone)]
pub struct SimulatedDesign {
    /// `id`, one column per between factor, one float column per within cell.
    pub data: DataFrame,
    pub spec: DesignSpec,
}

impl SimulatedDesign {
    /// How the wide outcome columns map onto within-factor levels.
    pub fn layout(&self) -> WithinLayout {
        WithinLayout {
            factors: self.spec.within.keys().cloned().collect(),
            cells: self
                .spec
                .within_cells()
                .into_iter()
                .map(|c| (c.label, c.levels))
                .collect(),
        }
    }

    /// Long form: `id`, between factors, within factors, outcome.
    pub fn to_long(&self) -> Result<DataFrame> {
        wide_to_long(&self.data, &self.layout(), &self.spec.dv)
    }
}

/// Draw `n` units for every between cell.
///
/// In empirical mode each cell's draw is centred, whitened against the
/// Cholesky factor of its own sample covariance (divisor n - 1), recoloured
/// with the target covariance factor and shifted to the target means, so the
/// sample moments equal the targets up to rounding.
pub fn simulate_design<R: Rng + ?Sized>(spec: &DesignSpec, rng: &mut R) -> Result<SimulatedDesign> {
    spec.validate()?;
    let r = spec.correlation_matrix()?;
    let between = spec.between_cells();
    let within = spec.within_cells();
    let k = within.len();
    let total = spec.total_units();

    let mut outcomes: Vec<Vec<f64>> = vec![Vec::with_capacity(total); k];
    for b in 0..between.len() {
        let (mean, cov) = spec.cell_moments(b, &r);
        let factor = covariance_factor(&cov)?;
        let z = standard_normal_matrix(rng, spec.n, k);
        let coloured = if spec.empirical {
            let l_s = cholesky_lower(&sample_covariance(&z)).ok_or_else(|| {
                PowerError::NotPositiveDefinite("sample covariance of the raw draw".into())
            })?;
            let whiten = l_s
                .transpose()
                .solve_upper_triangular(&factor.transpose())
                .ok_or_else(|| PowerError::NotPositiveDefinite("sample covariance factor".into()))?;
            center_columns(&z) * whiten
        } else {
            z * factor.transpose()
        };
        for (i, column) in outcomes.iter_mut().enumerate() {
            column.extend(coloured.column(i).iter().map(|v| v + mean[i]));
        }
    }

    let width = total.to_string().len().max(2);
    let mut data = DataFrame::new();
    data.add_column(
        &spec.id,
        Column::Factor(FactorColumn::from_labels(
            (1..=total).map(|i| format!("S{:0width$}", i, width = width)),
        )),
    )?;
    for (f, (name, levels)) in spec.between.iter().enumerate() {
        let labels = between
            .iter()
            .flat_map(|cell| std::iter::repeat(cell.levels[f].as_str()).take(spec.n));
        data.add_column(name, Column::Factor(FactorColumn::with_levels(levels, labels)))?;
    }
    for (cell, values) in within.iter().zip(outcomes) {
        data.add_float_column(&cell.label, values)?;
    }
    log::trace!("simulated {} units in {} between cells", total, between.len());

    Ok(SimulatedDesign {
        data,
        spec: spec.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::dense::sample_covariance;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mixed_design() -> DesignSpec {
        DesignSpec::within_only("time", &["pre", "mid", "post"], &[0.0; 3], 1.0, 0.5, 12)
            .with_between("group", &["ctl", "trt"])
            .with_means(vec![vec![10.0, 10.0], vec![10.0, 12.0], vec![10.0, 15.0]])
    }

    fn cell_matrix(design: &SimulatedDesign, rows: std::ops::Range<usize>) -> DMatrix<f64> {
        let cells = design.spec.within_cells();
        let cols: Vec<&[f64]> = cells
            .iter()
            .map(|c| design.data.get_float(&c.label).unwrap())
            .collect();
        DMatrix::from_fn(rows.len(), cols.len(), |i, j| cols[j][rows.start + i])
    }

    #[test]
    fn test_wide_layout() {
        let design = simulate_design(&mixed_design(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(design.data.nrows(), 24);
        assert_eq!(design.data.column_names(), vec!["id", "group", "pre", "mid", "post"]);
        let id = design.data.get_factor("id").unwrap();
        assert_eq!(id.label(0), "S01");
        assert_eq!(id.label(23), "S24");
        assert_eq!(design.data.get_factor("group").unwrap().label(12), "trt");
    }

    #[test]
    fn test_empirical_moments_exact() {
        let mut spec = mixed_design().empirical(true);
        spec.r = CorrelationSpec::Matrix(vec![
            vec![1.0, 0.3, 0.1],
            vec![0.3, 1.0, 0.6],
            vec![0.1, 0.6, 1.0],
        ]);
        spec.sd = SdSpec::PerCell(vec![vec![1.0, 2.0], vec![1.5, 2.5], vec![3.0, 0.5]]);
        let design = simulate_design(&spec, &mut StdRng::seed_from_u64(99)).unwrap();
        let r = spec.correlation_matrix().unwrap();
        for b in 0..2 {
            let x = cell_matrix(&design, b * 12..(b + 1) * 12);
            let (mean, cov) = spec.cell_moments(b, &r);
            for j in 0..3 {
                assert_relative_eq!(x.column(j).mean(), mean[j], epsilon = 1e-9);
            }
            assert_relative_eq!(sample_covariance(&x), cov, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_empirical_single_cell_two_units() {
        let spec = DesignSpec::within_only("t", &["a"], &[5.0], 2.0, 0.0, 2).empirical(true);
        let design = simulate_design(&spec, &mut StdRng::seed_from_u64(3)).unwrap();
        let y = design.data.get_float("a").unwrap();
        assert_relative_eq!((y[0] + y[1]) / 2.0, 5.0, epsilon = 1e-9);
        assert_relative_eq!((y[0] - y[1]).powi(2) / 2.0, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_population_moments_vary() {
        let spec = mixed_design();
        let a = simulate_design(&spec, &mut StdRng::seed_from_u64(1)).unwrap();
        let x = cell_matrix(&a, 0..12);
        assert!((x.column(0).mean() - 10.0).abs() > 1e-9);
    }

    #[test]
    fn test_to_long() {
        let design = simulate_design(&mixed_design(), &mut StdRng::seed_from_u64(4)).unwrap();
        let long = design.to_long().unwrap();
        assert_eq!(long.nrows(), 24 * 3);
        assert_eq!(long.column_names(), vec!["id", "group", "time", "y"]);
        assert_eq!(long.get_factor("time").unwrap().levels(), vec!["pre", "mid", "post"]);
        assert_eq!(
            long.get_float("y").unwrap()[..3],
            [
                design.data.get_float("pre").unwrap()[0],
                design.data.get_float("mid").unwrap()[0],
                design.data.get_float("post").unwrap()[0],
            ]
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let spec = mixed_design().with_means(vec![vec![1.0, 2.0], vec![1.0, 2.0]]);
        assert!(matches!(
            simulate_design(&spec, &mut StdRng::seed_from_u64(0)),
            Err(PowerError::ShapeMismatch { expected: 3, got: 2, .. })
        ));
        let spec = mixed_design().with_means(vec![vec![1.0]; 3]);
        assert!(matches!(spec.validate(), Err(PowerError::ShapeMismatch { expected: 2, got: 1, .. })));
    }

    #[test]
    fn test_bad_correlation() {
        let mut spec = mixed_design();
        spec.r = CorrelationSpec::Matrix(vec![
            vec![1.0, 0.9, -0.9],
            vec![0.9, 1.0, 0.9],
            vec![-0.9, 0.9, 1.0],
        ]);
        assert!(matches!(spec.validate(), Err(PowerError::NotPositiveDefinite(_))));
        spec.r = CorrelationSpec::Uniform(1.5);
        assert!(matches!(
            spec.validate(),
            Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "r"
        ));
    }

    #[test]
    fn test_empirical_needs_enough_units() {
        let mut spec = mixed_design().empirical(true);
        spec.n = 3;
        assert!(matches!(
            spec.validate(),
            Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "n"
        ));
    }

    #[test]
    fn test_spec_from_json() {
        let json = r#"{
            "between": {"group": ["ctl", "trt"]},
            "within": {"time": ["pre", "post"]},
            "means": [[10, 10], [10, 12]],
            "sd": 2.0,
            "r": 0.5,
            "n": 20,
            "labels": {"y": "Score"}
        }"#;
        let spec: DesignSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.r, CorrelationSpec::Uniform(0.5));
        assert_eq!(spec.sd, SdSpec::Common(2.0));
        assert_eq!(spec.label_of("y"), "Score");
        assert_eq!(spec.label_of("time"), "time");
        spec.validate().unwrap();
    }

    #[test]
    fn test_labels_rename_output_columns() {
        let mut spec = DesignSpec::within_only("time", &["pre", "post"], &[10.0, 12.0], 2.0, 0.5, 5);
        spec.labels.insert("y".into(), "Score".into());
        spec.labels.insert("pre".into(), "Baseline".into());
        spec.labels.insert("unused".into(), "Nothing".into());
        let design = simulate_design(&spec, &mut StdRng::seed_from_u64(2)).unwrap();

        let mut long = design.to_long().unwrap();
        spec.apply_labels(&mut long).unwrap();
        assert!(long.has_column("Score"));
        assert!(!long.has_column("y"));

        let mut wide = design.data;
        spec.apply_labels(&mut wide).unwrap();
        assert!(wide.has_column("Baseline"));
        assert!(wide.has_column("post"));
        assert!(!wide.has_column("Nothing"));
    }
}
