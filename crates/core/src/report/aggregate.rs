use indexmap::IndexMap;

use crate::power::TrialResult;

use super::table::{PowerRow, PowerTable};

/// Collapse trial results into one row per (sample size, effect size), in
/// order of first appearance.
///
/// Power is the share of valid trials with p < `alpha`; a cell whose
/// trials all failed has no power.
pub fn aggregate(results: &[TrialResult], alpha: f64) -> PowerTable {
    let mut cells: IndexMap<(usize, u64), (PowerRow, usize)> = IndexMap::new();
    for r in results {
        let (row, hits) = cells
            .entry((r.sample_size, r.effect_size.to_bits()))
            .or_insert_with(|| {
                (
                    PowerRow {
                        sample_size: r.sample_size,
                        total_sample_size: r.total_sample_size,
                        effect_size: r.effect_size,
                        n_trials: 0,
                        power: None,
                        n_failed: 0,
                    },
                    0,
                )
            });
        row.n_trials += 1;
        if r.is_valid() {
            if r.rejects(alpha) {
                *hits += 1;
            }
        } else {
            row.n_failed += 1;
        }
    }

    let rows = cells
        .into_values()
        .map(|(mut row, hits)| {
            let valid = row.n_trials - row.n_failed;
            row.power = (valid > 0).then(|| hits as f64 / valid as f64);
            row
        })
        .collect();
    PowerTable::new(rows, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: usize, effect: f64, trial: usize, p: Option<f64>) -> TrialResult {
        TrialResult {
            sample_size: n,
            total_sample_size: 2 * n,
            effect_size: effect,
            trial,
            p_value: p,
            failure: None,
        }
    }

    #[test]
    fn test_power_excludes_failed_trials() {
        let results = vec![
            result(10, 0.5, 0, Some(0.01)),
            result(10, 0.5, 1, Some(0.20)),
            result(10, 0.5, 2, None),
            result(10, 0.5, 3, Some(0.049)),
            result(20, 0.5, 0, None),
        ];
        let table = aggregate(&results, 0.05);
        assert_eq!(table.len(), 2);
        let first = &table.rows()[0];
        assert_eq!(first.n_trials, 4);
        assert_eq!(first.n_failed, 1);
        assert_eq!(first.power, Some(2.0 / 3.0));
        assert_eq!(first.total_sample_size, 20);
        let second = &table.rows()[1];
        assert_eq!(second.power, None);
        assert_eq!(second.n_failed, 1);
    }

    #[test]
    fn test_order_of_first_appearance() {
        let results = vec![
            result(40, 0.2, 0, Some(0.5)),
            result(20, 0.2, 0, Some(0.5)),
            result(40, 0.2, 1, Some(0.5)),
        ];
        let sizes: Vec<usize> = aggregate(&results, 0.05).rows().iter().map(|r| r.sample_size).collect();
        assert_eq!(sizes, vec![40, 20]);
    }
}
