//! Plateau search over the modulus-vs-indentation curve.
//!
//! When the fitting interval is varied, the fitted Young's modulus typically
//! stabilizes once enough of the indentation is included. The plateau search
//! slides a window over the modulus array and reports the center of the most
//! stable (lowest variance) window; ties break toward the earlier window.

use log::warn;

/// Window width for a scan of `n` samples.
fn window_width(n: usize) -> usize {
    (n / 10).max(5).min(n)
}

/// Determine the optimal indentation depth from a modulus scan.
///
/// Returns the indentation at the center of the lowest-variance window of
/// `emoduli`. Windows containing non-finite moduli are skipped; when every
/// window is skipped, the middle of the scan is returned as a last resort.
pub fn optimal_mindelta(emoduli: &[f64], indentations: &[f64]) -> f64 {
    let n = emoduli.len().min(indentations.len());
    if n == 0 {
        return f64::NAN;
    }
    let w = window_width(n);

    let mut best: Option<(usize, f64)> = None;
    for start in 0..=(n - w) {
        let window = &emoduli[start..start + w];
        if window.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / w as f64;
        let var = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / w as f64;
        let better = match best {
            None => true,
            Some((_, best_var)) => var < best_var,
        };
        if better {
            best = Some((start, var));
        }
    }

    match best {
        Some((start, _)) => indentations[start + w / 2],
        None => {
            warn!("could not find a modulus plateau; using the scan center");
            indentations[n / 2]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_flat_region() {
        // Noisy rise, flat plateau at 3000, then drift away.
        let mut emoduli = Vec::new();
        let mut indentations = Vec::new();
        for i in 0..100 {
            let e = if i < 30 {
                5000.0 - 60.0 * i as f64
            } else if i < 70 {
                3000.0 + ((i * 7919) % 13) as f64 * 0.1
            } else {
                3000.0 + 40.0 * (i - 70) as f64
            };
            emoduli.push(e);
            indentations.push(-1.0e-6 + i as f64 * 1e-8);
        }
        let dopt = optimal_mindelta(&emoduli, &indentations);
        // The plateau spans indices 30..70; the reported center must be there.
        let idx = indentations.iter().position(|&v| v == dopt).unwrap();
        assert!((30..70).contains(&idx), "center index {idx}");
    }

    #[test]
    fn skips_windows_with_nan() {
        let mut emoduli = vec![1000.0; 40];
        for e in emoduli.iter_mut().take(20) {
            *e = f64::NAN;
        }
        let indentations: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let dopt = optimal_mindelta(&emoduli, &indentations);
        assert!(dopt >= 20.0);
    }

    #[test]
    fn all_nan_falls_back_to_scan_center() {
        let emoduli = vec![f64::NAN; 20];
        let indentations: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let dopt = optimal_mindelta(&emoduli, &indentations);
        assert_eq!(dopt, 10.0);
    }

    #[test]
    fn ties_break_toward_earlier_window() {
        let emoduli = vec![2.0; 30];
        let indentations: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let dopt = optimal_mindelta(&emoduli, &indentations);
        // All windows have zero variance; the first one wins.
        let w = 5.max(30 / 10);
        assert_eq!(dopt, (w / 2) as f64);
    }
}
