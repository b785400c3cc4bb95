use std::fmt;

use crate::error::{PowerError, Result};

/// A fixed-effect term: one variable (main effect) or several joined by `:`
/// (interaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedTerm {
    pub variables: Vec<String>,
}

impl FixedTerm {
    fn single(name: &str) -> Self {
        Self {
            variables: vec![name.to_string()],
        }
    }

    /// Term label as written in a formula, e.g. `x:condition`.
    pub fn name(&self) -> String {
        self.variables.join(":")
    }
}

/// A random-effect term `(1 + x | group)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomTerm {
    pub group: String,
    pub intercept: bool,
    pub slopes: Vec<String>,
}

impl RandomTerm {
    /// Component labels in design order, e.g. `["(Intercept)", "x"]`.
    pub fn components(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.slopes.len() + 1);
        if self.intercept {
            out.push(INTERCEPT.to_string());
        }
        out.extend(self.slopes.iter().cloned());
        out
    }
}

/// Name of the intercept coefficient.
pub const INTERCEPT: &str = "(Intercept)";

/// A model formula: `response ~ fixed terms + (random | group)`.
///
/// Supported syntax: `+` separated terms, `a:b` interactions, `a*b`
/// (expands to `a + b + a:b`), `0`/`-1` to drop the intercept, and
/// random terms `(1 | g)`, `(1 + x | g)`, `(0 + x | g)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub response: String,
    pub intercept: bool,
    pub fixed: Vec<FixedTerm>,
    pub random: Vec<RandomTerm>,
}

impl Formula {
    /// Parse a formula string such as `"y ~ x + condition + (1 | subject)"`.
    pub fn parse(text: &str) -> Result<Self> {
        let (lhs, rhs) = text
            .split_once('~')
            .ok_or_else(|| PowerError::Formula(format!("missing '~' in '{}'", text)))?;
        let response = lhs.trim();
        if response.is_empty() || !is_identifier(response) {
            return Err(PowerError::Formula(format!(
                "invalid response '{}' in '{}'",
                response, text
            )));
        }

        let mut formula = Formula {
            response: response.to_string(),
            intercept: true,
            fixed: Vec::new(),
            random: Vec::new(),
        };

        for (sign, part) in split_terms(rhs)? {
            if part.starts_with('(') {
                if sign < 0 {
                    return Err(PowerError::Formula(format!("cannot subtract '{}'", part)));
                }
                formula.random.push(parse_random(&part)?);
                continue;
            }
            match part.as_str() {
                "1" if sign > 0 => formula.intercept = true,
                "1" | "0" => formula.intercept = false,
                _ if sign < 0 => {
                    return Err(PowerError::Formula(format!("cannot subtract '{}'", part)))
                }
                _ if part.contains('*') => {
                    let vars: Vec<&str> = part.split('*').map(str::trim).collect();
                    for expanded in expand_star(&vars) {
                        formula.push_fixed(expanded)?;
                    }
                }
                _ => {
                    let vars: Vec<String> = part.split(':').map(|v| v.trim().to_string()).collect();
                    formula.push_fixed(FixedTerm { variables: vars })?;
                }
            }
        }

        Ok(formula)
    }

    fn push_fixed(&mut self, term: FixedTerm) -> Result<()> {
        if let Some(bad) = term.variables.iter().find(|v| !is_identifier(v)) {
            return Err(PowerError::Formula(format!("invalid variable name '{}'", bad)));
        }
        if !self.fixed.contains(&term) {
            self.fixed.push(term);
        }
        Ok(())
    }

    /// The same formula with the fixed term `name` removed; used to build the
    /// nested comparison model. Interactions containing the term are kept.
    pub fn without_term(&self, name: &str) -> Result<Formula> {
        let mut reduced = self.clone();
        if name == INTERCEPT {
            if !reduced.intercept {
                return Err(PowerError::invalid("term", "formula has no intercept to drop"));
            }
            reduced.intercept = false;
            return Ok(reduced);
        }
        let before = reduced.fixed.len();
        reduced.fixed.retain(|t| t.name() != name);
        if reduced.fixed.len() == before {
            return Err(PowerError::invalid(
                "term",
                format!("'{}' is not a fixed term of '{}'", name, self),
            ));
        }
        Ok(reduced)
    }

    /// Names of the fixed terms, in order.
    pub fn fixed_term_names(&self) -> Vec<String> {
        self.fixed.iter().map(FixedTerm::name).collect()
    }

    /// Every column the right-hand side refers to (predictors and grouping
    /// factors), without duplicates.
    pub fn predictors(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut add = |v: &String| {
            if !out.contains(v) {
                out.push(v.clone());
            }
        };
        self.fixed.iter().flat_map(|t| t.variables.iter()).for_each(&mut add);
        for rt in &self.random {
            rt.slopes.iter().for_each(&mut add);
            add(&rt.group);
        }
        out
    }

    /// Whether the formula has random-effect terms.
    pub fn is_mixed(&self) -> bool {
        !self.random.is_empty()
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".to_string());
        }
        parts.extend(self.fixed_term_names());
        for rt in &self.random {
            let mut lhs: Vec<String> = vec![if rt.intercept { "1" } else { "0" }.to_string()];
            lhs.extend(rt.slopes.iter().cloned());
            parts.push(format!("({} | {})", lhs.join(" + "), rt.group));
        }
        if parts.is_empty() {
            parts.push("1".to_string());
        }
        write!(f, "{} ~ {}", self.response, parts.join(" + "))
    }
}

impl std::str::FromStr for Formula {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self> {
        Formula::parse(s)
    }
}

/// Split the right-hand side on top-level `+`/`-`, keeping parenthesised
/// random terms intact. Returns (sign, term) pairs.
fn split_terms(rhs: &str) -> Result<Vec<(i8, String)>> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut sign = 1i8;

    for ch in rhs.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(PowerError::Formula(format!("unbalanced ')' in '{}'", rhs)));
                }
                current.push(ch);
            }
            '+' | '-' if depth == 0 => {
                let term = current.trim().to_string();
                if !term.is_empty() {
                    out.push((sign, term));
                }
                current.clear();
                sign = if ch == '-' { -1 } else { 1 };
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(PowerError::Formula(format!("unbalanced '(' in '{}'", rhs)));
    }
    let term = current.trim().to_string();
    if !term.is_empty() {
        out.push((sign, term));
    }
    if out.is_empty() {
        return Err(PowerError::Formula("empty right-hand side".into()));
    }
    Ok(out)
}

fn parse_random(part: &str) -> Result<RandomTerm> {
    let inner = part
        .strip_prefix('(')
        .and_then(|p| p.strip_suffix(')'))
        .ok_or_else(|| PowerError::Formula(format!("malformed random term '{}'", part)))?;
    let (lhs, group) = inner
        .split_once('|')
        .ok_or_else(|| PowerError::Formula(format!("random term '{}' has no '|'", part)))?;
    let group = group.trim();
    if !is_identifier(group) {
        return Err(PowerError::Formula(format!("invalid grouping factor '{}'", group)));
    }

    let mut term = RandomTerm {
        group: group.to_string(),
        intercept: true,
        slopes: Vec::new(),
    };
    for (sign, piece) in split_terms(lhs)? {
        match piece.as_str() {
            "1" if sign > 0 => term.intercept = true,
            "1" | "0" => term.intercept = false,
            v if sign > 0 && is_identifier(v) => term.slopes.push(v.to_string()),
            v => return Err(PowerError::Formula(format!("invalid random component '{}'", v))),
        }
    }
    if !term.intercept && term.slopes.is_empty() {
        return Err(PowerError::Formula(format!("random term '{}' is empty", part)));
    }
    Ok(term)
}

/// `a*b*c` -> all non-empty interactions in the usual order.
fn expand_star(vars: &[&str]) -> Vec<FixedTerm> {
    let mut terms: Vec<FixedTerm> = Vec::new();
    for order in 1..=vars.len() {
        for mask in 0u32..(1 << vars.len()) {
            if mask.count_ones() as usize != order {
                continue;
            }
            let chosen: Vec<String> = vars
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, v)| v.to_string())
                .collect();
            terms.push(FixedTerm { variables: chosen });
        }
    }
    if terms.is_empty() {
        terms.push(FixedTerm::single(vars.first().copied().unwrap_or_default()));
    }
    terms
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !s.chars().next().map_or(false, |c| c.is_ascii_digit())
}
