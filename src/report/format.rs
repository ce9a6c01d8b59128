//! Formatting for the batch statistics table and run summaries.
//!
//! Formatting code lives in one place so the fitting/rating code stays
//! clean and output changes are localized. The statistics table is
//! tab-separated so spreadsheets and downstream scripts can consume it
//! directly.

use crate::rate::RATING_INVALID;

/// Per-curve statistics emitted by the batch fit command.
#[derive(Debug, Clone)]
pub struct CurveStats {
    pub path: String,
    pub enumeration: usize,
    pub success: bool,
    /// Fitted Young's modulus [Pa]; NaN when unavailable.
    pub e_modulus: f64,
    pub chi_sqr: f64,
    /// Rating in [0, 10], or -1 for invalid.
    pub rating: f64,
    /// Per-curve failure annotation (metadata/parse problems).
    pub error: Option<String>,
}

/// Header line of the statistics table.
pub fn format_statistics_header() -> String {
    "path\tenum\tsuccess\tE [Pa]\tchi_sqr\trating\terror".to_string()
}

/// One row of the statistics table.
pub fn format_statistics_row(stats: &CurveStats) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        stats.path,
        stats.enumeration,
        stats.success,
        fmt_float(stats.e_modulus),
        fmt_float(stats.chi_sqr),
        fmt_rating(stats.rating),
        stats.error.as_deref().unwrap_or(""),
    )
}

/// Human-readable summary printed after a batch run.
pub fn format_run_summary(stats: &[CurveStats]) -> String {
    let total = stats.len();
    let fitted = stats.iter().filter(|s| s.success).count();
    let errors = stats.iter().filter(|s| s.error.is_some()).count();
    let rated = stats
        .iter()
        .filter(|s| s.rating != RATING_INVALID && s.error.is_none())
        .count();

    let mut out = String::new();
    out.push_str(&format!("Processed {total} curves\n"));
    out.push_str(&format!("- fits converged : {fitted}\n"));
    out.push_str(&format!("- rated          : {rated}\n"));
    out.push_str(&format!("- curve errors   : {errors}\n"));
    out
}

fn fmt_float(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.6e}")
    } else {
        "nan".to_string()
    }
}

fn fmt_rating(v: f64) -> String {
    if v == RATING_INVALID {
        "-1".to_string()
    } else {
        format!("{v:.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(success: bool, rating: f64, error: Option<&str>) -> CurveStats {
        CurveStats {
            path: "curve.json".to_string(),
            enumeration: 0,
            success,
            e_modulus: if success { 2987.5 } else { f64::NAN },
            chi_sqr: if success { 1.2e-20 } else { f64::NAN },
            rating,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn row_is_tab_separated_with_constant_columns() {
        let header_cols = format_statistics_header().split('\t').count();
        for s in [
            stats(true, 8.3, None),
            stats(false, RATING_INVALID, None),
            stats(false, RATING_INVALID, Some("missing spring constant")),
        ] {
            let row = format_statistics_row(&s);
            assert_eq!(row.split('\t').count(), header_cols, "{row}");
        }
    }

    #[test]
    fn failed_fit_is_annotated_not_omitted() {
        let row = format_statistics_row(&stats(false, RATING_INVALID, None));
        assert!(row.contains("false"));
        assert!(row.contains("nan"));
        assert!(row.contains("-1"));
    }

    #[test]
    fn summary_counts() {
        let all = vec![
            stats(true, 8.0, None),
            stats(false, RATING_INVALID, None),
            stats(false, RATING_INVALID, Some("bad file")),
        ];
        let summary = format_run_summary(&all);
        assert!(summary.contains("Processed 3 curves"));
        assert!(summary.contains("fits converged : 1"));
        assert!(summary.contains("curve errors   : 1"));
    }
}
