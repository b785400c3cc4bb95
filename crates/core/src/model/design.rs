use crate::data::{Column, DataFrame, FactorColumn};
use crate::error::{PowerError, Result};
use crate::matrix::TripletBuilder;
use crate::types::SparseMat;

use super::formula::{Formula, RandomTerm, INTERCEPT};

/// Fixed-effects design matrix (X) with one label per column.
#[derive(Debug, Clone)]
pub struct FixedDesign {
    pub x: SparseMat,
    /// Coefficient names, R style: `(Intercept)`, `x`, `conditionB`, `x:conditionB`.
    pub names: Vec<String>,
}

impl FixedDesign {
    pub fn ncols(&self) -> usize {
        self.names.len()
    }
}

/// Random-effects design matrix (Z) for one `( ... | group)` term.
///
/// Columns are level-major: column `level * n_components + component`.
#[derive(Debug, Clone)]
pub struct RandomDesign {
    pub group: String,
    pub levels: Vec<String>,
    pub components: Vec<String>,
    pub z: SparseMat,
}

impl RandomDesign {
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }
}

/// How one variable enters the design.
enum Coding {
    Covariate(Vec<f64>),
    Factor(FactorColumn),
}

impl Coding {
    fn lookup(df: &DataFrame, name: &str) -> Result<Self> {
        match df.get_column(name)? {
            Column::Float(v) => Ok(Coding::Covariate(v.clone())),
            // Integers are treated as categorical, as in the fixed formula parser.
            Column::Integer(_) => Ok(Coding::Factor(df.grouping(name)?.droplevels())),
            Column::Factor(f) => Ok(Coding::Factor(f.droplevels())),
        }
    }

    /// (label suffix, values) for each column this variable contributes.
    fn columns(&self, name: &str, full_rank: bool) -> Vec<(String, Vec<f64>)> {
        match self {
            Coding::Covariate(v) => vec![(name.to_string(), v.clone())],
            Coding::Factor(f) => {
                let skip = if full_rank { 0 } else { 1 };
                f.levels()
                    .iter()
                    .enumerate()
                    .skip(skip)
                    .map(|(code, level)| {
                        let values = f
                            .codes()
                            .iter()
                            .map(|&c| if c == code { 1.0 } else { 0.0 })
                            .collect();
                        (format!("{}{}", name, level), values)
                    })
                    .collect()
            }
        }
    }
}

/// Build the fixed-effects design matrix X for `formula` from the DataFrame.
///
/// Factors use treatment contrasts (first level is the reference). In a
/// formula without intercept the first factor main effect is coded with one
/// column per level instead. Interactions are products of the component
/// columns.
pub fn build_fixed_design(df: &DataFrame, formula: &Formula) -> Result<FixedDesign> {
    let n = df.nrows();
    if n == 0 {
        return Err(PowerError::Data("DataFrame has no observations".into()));
    }

    let mut columns: Vec<(String, Vec<f64>)> = Vec::new();
    if formula.intercept {
        columns.push((INTERCEPT.to_string(), vec![1.0; n]));
    }

    let mut full_rank_available = !formula.intercept;
    for term in &formula.fixed {
        let mut term_columns: Vec<(String, Vec<f64>)> = vec![(String::new(), vec![1.0; n])];
        for var in &term.variables {
            let coding = Coding::lookup(df, var)?;
            let full_rank = term.variables.len() == 1
                && full_rank_available
                && matches!(coding, Coding::Factor(_));
            if full_rank {
                full_rank_available = false;
            }
            let var_columns = coding.columns(var, full_rank);
            let mut next = Vec::with_capacity(term_columns.len() * var_columns.len());
            for (left_name, left) in &term_columns {
                for (right_name, right) in &var_columns {
                    let name = if left_name.is_empty() {
                        right_name.clone()
                    } else {
                        format!("{}:{}", left_name, right_name)
                    };
                    let values = left.iter().zip(right).map(|(a, b)| a * b).collect();
                    next.push((name, values));
                }
            }
            term_columns = next;
        }
        columns.extend(term_columns);
    }

    let mut tri = TripletBuilder::new(n, columns.len());
    for (j, (_, values)) in columns.iter().enumerate() {
        for (i, &val) in values.iter().enumerate() {
            if val != 0.0 {
                tri.add(i, j, val);
            }
        }
    }

    Ok(FixedDesign {
        x: tri.to_csc(),
        names: columns.into_iter().map(|(name, _)| name).collect(),
    })
}

/// Build a random-effects design matrix (Z) for a single random term.
///
/// For observation i in level k, Z[i, k * nc + c] is 1 for the intercept
/// component and the slope variable's value for slope components.
pub fn build_random_design(df: &DataFrame, term: &RandomTerm) -> Result<RandomDesign> {
    let n = df.nrows();
    let factor = df.grouping(&term.group)?.droplevels();

    let mut component_values: Vec<Vec<f64>> = Vec::new();
    if term.intercept {
        component_values.push(vec![1.0; n]);
    }
    for slope in &term.slopes {
        match df.get_column(slope)? {
            Column::Float(v) => component_values.push(v.clone()),
            _ => {
                return Err(PowerError::Formula(format!(
                    "random slope '{}' must be a continuous column",
                    slope
                )))
            }
        }
    }

    let nc = component_values.len();
    let mut tri = TripletBuilder::new(n, factor.n_levels() * nc);
    for (i, &code) in factor.codes().iter().enumerate() {
        for (c, values) in component_values.iter().enumerate() {
            if values[i] != 0.0 {
                tri.add(i, code * nc + c, values[i]);
            }
        }
    }

    Ok(RandomDesign {
        group: term.group.clone(),
        levels: factor.levels().iter().map(|s| s.to_string()).collect(),
        components: term.components(),
        z: tri.to_csc(),
    })
}

/// Build one [`RandomDesign`] per random term of the formula.
pub fn build_random_designs(df: &DataFrame, formula: &Formula) -> Result<Vec<RandomDesign>> {
    formula
        .random
        .iter()
        .map(|rt| build_random_design(df, rt))
        .collect()
}
