//! 1-d smoothing filters and a central-difference gradient.
//!
//! The contact-point estimators and the rating features smooth noisy force
//! data before thresholding. Edges are handled by clamping the window to the
//! array ("nearest" boundary mode), which keeps output length equal to input
//! length so downstream index arithmetic stays valid.

/// Moving-average filter with a clamped window.
///
/// `size` is clamped to at least 1; even sizes are accepted and behave like
/// the equivalent centered window with one extra trailing sample.
pub fn uniform_filter1d(data: &[f64], size: usize) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let size = size.max(1);
    let half = size / 2;

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + size - half).min(n);
        let window = &data[lo..hi];
        out.push(window.iter().sum::<f64>() / window.len() as f64);
    }
    out
}

/// Gaussian smoothing with a truncated kernel (4 sigma on each side).
pub fn gaussian_filter1d(data: &[f64], sigma: f64) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let sigma = sigma.max(1e-9);
    let radius = (4.0 * sigma).ceil() as usize;

    // Precompute the kernel once; it is renormalized at the edges below.
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for k in 0..=(2 * radius) {
        let d = k as f64 - radius as f64;
        kernel.push((-0.5 * (d / sigma) * (d / sigma)).exp());
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut acc = 0.0;
        let mut norm = 0.0;
        for (k, &w) in kernel.iter().enumerate() {
            let j = i as isize + k as isize - radius as isize;
            if j < 0 || j >= n as isize {
                continue;
            }
            acc += w * data[j as usize];
            norm += w;
        }
        out.push(acc / norm);
    }
    out
}

/// Central-difference gradient (one-sided at the boundaries).
pub fn gradient(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let mut out = Vec::with_capacity(n);
            out.push(data[1] - data[0]);
            for i in 1..n - 1 {
                out.push((data[i + 1] - data[i - 1]) / 2.0);
            }
            out.push(data[n - 1] - data[n - 2]);
            out
        }
    }
}

/// Median filter with a clamped window, used for monotone height smoothing.
pub fn median_filter1d(data: &[f64], size: usize) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let size = size.max(1);
    let half = size / 2;

    let mut out = Vec::with_capacity(n);
    let mut buf: Vec<f64> = Vec::with_capacity(size);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + size - half).min(n);
        buf.clear();
        buf.extend_from_slice(&data[lo..hi]);
        buf.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = buf.len() / 2;
        let med = if buf.len() % 2 == 1 {
            buf[mid]
        } else {
            (buf[mid - 1] + buf[mid]) / 2.0
        };
        out.push(med);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_filter_preserves_constant() {
        let data = vec![3.0; 20];
        let out = uniform_filter1d(&data, 5);
        assert_eq!(out.len(), 20);
        for v in out {
            assert!((v - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn gaussian_filter_preserves_length_and_mean_level() {
        let data: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let out = gaussian_filter1d(&data, 3.0);
        assert_eq!(out.len(), 50);
        // A linear ramp stays (approximately) a linear ramp away from edges.
        assert!((out[25] - 25.0).abs() < 0.5);
    }

    #[test]
    fn gradient_of_linear_ramp() {
        let data: Vec<f64> = (0..10).map(|i| 2.0 * i as f64).collect();
        let g = gradient(&data);
        for v in g {
            assert!((v - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn median_filter_removes_single_spike() {
        let mut data = vec![1.0; 11];
        data[5] = 100.0;
        let out = median_filter1d(&data, 5);
        assert!((out[5] - 1.0).abs() < 1e-12);
    }
}
