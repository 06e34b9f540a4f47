//! Formatted run reports.
//!
//! We keep formatting code in one place so:
//! - the physics/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)
//!
//! Two reports are produced per run: the fit log (solver diagnostics and
//! per-line error statistics) and the parameter log (the numbers a later
//! run needs to reproduce or resume this one).

use crate::domain::{CorrectionTable, ErrorStats, FitResult, Group};

/// Format the fit log: solver outcome, solution, and per-line errors.
pub fn format_fit_log(fit: &FitResult, stats: &ErrorStats, elapsed_secs: f64) -> String {
    let mut out = String::new();

    out.push_str("=== bhc - carousel beam hardening fit ===\n");
    out.push_str(&format!("Elapsed: {elapsed_secs:.3}s\n"));
    out.push_str(&format!(
        "Lines fitted: {} | parameters: {}\n",
        fit.nlines,
        fit.params.len()
    ));
    out.push_str(&format!(
        "Vary orders: target={} detector={} filter={} energy={}\n",
        fit.vary.target, fit.vary.detector, fit.vary.filter, fit.vary.energy
    ));

    out.push_str("\nSolver:\n");
    out.push_str(&format!(
        "- outcome: code {} ({}) after {} iterations\n",
        fit.outcome.code,
        if fit.outcome.is_success() { "converged" } else { "failed" },
        fit.iterations
    ));
    out.push_str(&format!("- message: {}\n", fit.outcome.message));
    out.push_str(&format!("- sse: {:.6e}\n", fit.sse));
    out.push_str(&format!("- solution: {}\n", fmt_vec(&fit.params)));

    match &fit.covariance {
        Some(cov) => {
            out.push_str("- covariance diagonal (1-sigma):\n");
            for (j, row) in cov.iter().enumerate() {
                let sigma = row[j].max(0.0).sqrt();
                out.push_str(&format!("    p[{j}] = {:.6} +/- {sigma:.6}\n", fit.params[j]));
            }
        }
        None => out.push_str("- covariance: unavailable (singular normal equations)\n"),
    }

    out.push_str("\nPer-line squared error (unmasked samples):\n");
    for (line, err) in stats.per_line.iter().enumerate() {
        out.push_str(&format!("  line {line:>4}: {err:.6e}\n"));
    }
    out.push_str(&format!(
        "average = {:.6e} | max = {:.6e}\n",
        stats.average, stats.max
    ));

    out
}

/// Format the parameter log: everything needed to reproduce the run,
/// plus the fitted correction polynomial per line.
pub fn format_param_log(fit: &FitResult, guess: &[f64], table: &CorrectionTable) -> String {
    let mut out = String::new();

    out.push_str(&format!("nlines {}\n", fit.nlines));
    out.push_str(&format!(
        "vary {} {} {} {}\n",
        fit.vary.target, fit.vary.detector, fit.vary.filter, fit.vary.energy
    ));
    out.push_str(&format!("guess    {}\n", fmt_vec(guess)));
    out.push_str(&format!("solution {}\n", fmt_vec(&fit.params)));

    out.push_str("\nFitted widths (per group, polynomial in line number):\n");
    for group in Group::ALL {
        let order = fit.vary.order(group);
        if order < 0 {
            out.push_str(&format!("- {}: disabled\n", group.display_name()));
        } else {
            out.push_str(&format!(
                "- {}: order {order}\n",
                group.display_name()
            ));
        }
    }

    out.push_str("\nCorrection polynomial per line (lowest order first):\n");
    for (line, coeffs) in table.polyfit.iter().enumerate() {
        out.push_str(&format!("  line {line:>4}: {}\n", fmt_vec(coeffs)));
    }

    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrectionTable, FitOutcome, VaryOrders};

    fn sample_fit() -> FitResult {
        FitResult {
            vary: VaryOrders::default(),
            params: vec![0.35, -1.2, 0.05, 0.1],
            covariance: Some(vec![
                vec![1e-4, 0.0, 0.0, 0.0],
                vec![0.0, 4e-4, 0.0, 0.0],
                vec![0.0, 0.0, 9e-4, 0.0],
                vec![0.0, 0.0, 0.0, 1e-6],
            ]),
            predicted: vec![vec![0.0; 4]; 2],
            nlines: 2,
            outcome: FitOutcome::new(1, "gradient below tolerance"),
            iterations: 17,
            sse: 3.2e-9,
        }
    }

    #[test]
    fn fit_log_reports_outcome_and_per_line_errors() {
        let stats = ErrorStats {
            per_line: vec![1.0e-9, 2.2e-9],
            average: 1.6e-9,
            max: 2.2e-9,
        };
        let log = format_fit_log(&sample_fit(), &stats, 0.42);
        assert!(log.contains("code 1 (converged) after 17 iterations"));
        assert!(log.contains("line    1: 2.200000e-9"));
        assert!(log.contains("p[0] = 0.350000 +/- 0.010000"));
    }

    #[test]
    fn param_log_lists_polynomials_per_line() {
        let table = CorrectionTable {
            xtab: vec![vec![0.0, 1.0]; 2],
            ytab: vec![0.0, 0.9],
            polyfit: vec![vec![0.0, 0.9], vec![0.0, 0.88]],
        };
        let log = format_param_log(&sample_fit(), &[0.0; 4], &table);
        assert!(log.contains("nlines 2"));
        assert!(log.contains("vary 0 0 0 -1"));
        assert!(log.contains("line    1: [0.000000, 0.880000]"));
        assert!(log.contains("energy: disabled"));
    }
}
