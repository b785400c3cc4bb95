use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// Column order of the power CSV.
pub const CSV_HEADER: [&str; 6] = [
    "sample_size",
    "total_sample_size",
    "effect_size",
    "n_trials",
    "power",
    "n_failed",
];

/// Power of one (sample size, effect size) cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerRow {
    pub sample_size: usize,
    pub total_sample_size: usize,
    pub effect_size: f64,
    pub n_trials: usize,
    /// `None` when no trial of the cell produced a p-value.
    pub power: Option<f64>,
    pub n_failed: usize,
}

/// Power by cell, in run order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerTable {
    rows: Vec<PowerRow>,
    alpha: f64,
}

impl PowerTable {
    pub fn new(rows: Vec<PowerRow>, alpha: f64) -> Self {
        Self { rows, alpha }
    }

    pub fn rows(&self) -> &[PowerRow] {
        &self.rows
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, sample_size: usize, effect_size: f64) -> Option<&PowerRow> {
        self.rows
            .iter()
            .find(|r| r.sample_size == sample_size && r.effect_size.to_bits() == effect_size.to_bits())
    }

    /// Smallest swept sample size reaching `target` power at `effect_size`.
    pub fn min_size_for(&self, effect_size: f64, target: f64) -> Option<usize> {
        self.rows
            .iter()
            .filter(|r| r.effect_size.to_bits() == effect_size.to_bits())
            .filter(|r| r.power.map_or(false, |p| p >= target))
            .map(|r| r.sample_size)
            .min()
    }

    /// Write the table as CSV; undefined power is written as `NA`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(CSV_HEADER)?;
        for row in &self.rows {
            wtr.write_record([
                row.sample_size.to_string(),
                row.total_sample_size.to_string(),
                row.effect_size.to_string(),
                row.n_trials.to_string(),
                row.power.map_or_else(|| "NA".to_string(), |p| p.to_string()),
                row.n_failed.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write the table to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }

    /// Human-readable table.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("=== Power (alpha = {}) ===\n", self.alpha));
        s.push_str(&format!(
            "{:>8} {:>8} {:>10} {:>8} {:>8} {:>8}\n",
            "n", "total", "effect", "trials", "power", "failed"
        ));
        for row in &self.rows {
            let power = row.power.map_or_else(|| "NA".to_string(), |p| format!("{:.3}", p));
            s.push_str(&format!(
                "{:>8} {:>8} {:>10} {:>8} {:>8} {:>8}\n",
                row.sample_size, row.total_sample_size, row.effect_size, row.n_trials, power, row.n_failed
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PowerTable {
        let row = |n: usize, e: f64, power: Option<f64>| PowerRow {
            sample_size: n,
            total_sample_size: 2 * n,
            effect_size: e,
            n_trials: 100,
            power,
            n_failed: if power.is_some() { 0 } else { 100 },
        };
        PowerTable::new(
            vec![
                row(20, 0.5, Some(0.34)),
                row(40, 0.5, Some(0.6)),
                row(60, 0.5, Some(0.81)),
                row(20, 0.8, None),
            ],
            0.05,
        )
    }

    #[test]
    fn test_csv_layout() {
        let csv = table().to_csv_string().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "sample_size,total_sample_size,effect_size,n_trials,power,n_failed");
        assert_eq!(lines[1], "20,40,0.5,100,0.34,0");
        assert_eq!(lines[4], "20,40,0.8,100,NA,100");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_min_size_for() {
        let t = table();
        assert_eq!(t.min_size_for(0.5, 0.8), Some(60));
        assert_eq!(t.min_size_for(0.5, 0.9), None);
        assert_eq!(t.min_size_for(0.8, 0.1), None);
        assert_eq!(t.get(40, 0.5).and_then(|r| r.power), Some(0.6));
    }

    #[test]
    fn test_summary_marks_missing_power() {
        let s = table().summary();
        assert!(s.contains("0.810"));
        assert!(s.contains("NA"));
    }
}
