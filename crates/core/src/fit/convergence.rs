/// Monitors convergence of an iterative fit.
///
/// A fit has converged once either the relative parameter change or the
/// relative log-likelihood change drops below the tolerance.
#[derive(Debug)]
pub struct ConvergenceMonitor {
    tol: f64,
    max_iter: usize,
    history: Vec<ConvergenceRecord>,
}

#[derive(Debug, Clone)]
struct ConvergenceRecord {
    log_likelihood: f64,
    param_change: f64,
    logl_change: f64,
}

impl ConvergenceMonitor {
    pub fn new(tol: f64, max_iter: usize) -> Self {
        Self {
            tol,
            max_iter,
            history: Vec::new(),
        }
    }

    /// Record a new iteration.
    pub fn record(&mut self, log_likelihood: f64, param_change: f64) {
        let logl_change = if let Some(prev) = self.history.last() {
            (log_likelihood - prev.log_likelihood).abs() / (1.0 + log_likelihood.abs())
        } else {
            f64::INFINITY
        };

        self.history.push(ConvergenceRecord {
            log_likelihood,
            param_change,
            logl_change,
        });
    }

    /// Check if convergence criterion is met.
    pub fn is_converged(&self) -> bool {
        match self.history.last() {
            Some(last) => last.param_change < self.tol || last.logl_change < self.tol,
            None => false,
        }
    }

    /// Check if maximum iterations reached.
    pub fn max_reached(&self) -> bool {
        self.history.len() >= self.max_iter
    }

    /// The most recent parameter change, for error reporting.
    pub fn last_change(&self) -> f64 {
        self.history.last().map_or(f64::INFINITY, |r| r.param_change)
    }

    /// Number of iterations recorded.
    pub fn n_iterations(&self) -> usize {
        self.history.len()
    }
}

/// Largest change between two parameter vectors, relative to the old value
/// plus `floor`. The floor keeps parameters shrinking towards zero from
/// dominating the criterion.
pub fn relative_change(old: &[f64], new: &[f64], floor: f64) -> f64 {
    old.iter()
        .zip(new)
        .map(|(o, n)| (n - o).abs() / (o.abs() + floor))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_on_flat_likelihood() {
        let mut monitor = ConvergenceMonitor::new(1e-6, 10);
        monitor.record(-100.0, 0.5);
        assert!(!monitor.is_converged());
        monitor.record(-100.0, 0.4);
        assert!(monitor.is_converged());
        assert_eq!(monitor.n_iterations(), 2);
    }

    #[test]
    fn test_max_reached() {
        let mut monitor = ConvergenceMonitor::new(1e-6, 2);
        monitor.record(-10.0, 1.0);
        monitor.record(-5.0, 1.0);
        assert!(monitor.max_reached());
        assert!(!monitor.is_converged());
    }

    #[test]
    fn test_relative_change_floor() {
        assert!((relative_change(&[2.0], &[3.0], 0.0) - 0.5).abs() < 1e-12);
        assert!(relative_change(&[0.0], &[1e-9], 1e-3) < 1e-5);
    }
}
