//! Synthetic force-distance curve generation.
//!
//! Used by tests, the `fd sample` command, and documentation examples. The
//! generator produces a Hertz (paraboloidal indenter) approach curve with an
//! optional mirrored retract segment and optional Gaussian force noise.
//!
//! Everything is seeded; identical configurations produce identical curves.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::data::{Curve, CurveMeta};

/// Configuration for a synthetic Hertz approach curve.
#[derive(Debug, Clone)]
pub struct SyntheticCurve {
    pub n_points: usize,
    /// Young's modulus [Pa].
    pub e_modulus: f64,
    /// Tip radius [m].
    pub radius: f64,
    /// Poisson's ratio.
    pub poisson: f64,
    /// Contact point on the tip-position axis [m].
    pub contact_point: f64,
    /// Force offset [N].
    pub baseline: f64,
    /// Cantilever spring constant [N/m].
    pub spring_constant: f64,
    /// First tip position of the approach (above the surface) [m].
    pub x_start: f64,
    /// Last tip position of the approach (maximum indentation) [m].
    pub x_end: f64,
    /// Standard deviation of additive Gaussian force noise [N]; 0 disables.
    pub noise_std: f64,
    pub seed: u64,
    /// Append a mirrored retract segment.
    pub with_retract: bool,
}

impl Default for SyntheticCurve {
    fn default() -> Self {
        SyntheticCurve {
            n_points: 100,
            e_modulus: 3000.0,
            radius: 10e-6,
            poisson: 0.5,
            contact_point: 0.0,
            baseline: 0.0,
            spring_constant: 0.05,
            x_start: 2e-6,
            x_end: -1.5e-6,
            noise_std: 0.0,
            seed: 42,
            with_retract: false,
        }
    }
}

/// Hertz force for a paraboloidal indenter at one tip position.
pub fn hertz_force(cfg: &SyntheticCurve, x: f64) -> f64 {
    let aa = 4.0 / 3.0 * cfg.e_modulus / (1.0 - cfg.poisson * cfg.poisson) * cfg.radius.sqrt();
    let root = cfg.contact_point - x;
    if root > 0.0 {
        aa * root.powf(1.5) + cfg.baseline
    } else {
        cfg.baseline
    }
}

/// Generate a synthetic approach curve (descending tip position).
///
/// The `tip_position` column is populated directly and the `height` column is
/// back-computed as `tip - force/k`, so running `compute_tip_position` on the
/// result reproduces the tip position exactly.
pub fn hertz_approach_curve(cfg: &SyntheticCurve) -> Curve {
    assert!(cfg.n_points >= 2, "need at least two samples");
    assert!(
        cfg.x_start > cfg.x_end,
        "approach must run from high to low tip position"
    );

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let noise = Normal::new(0.0, cfg.noise_std.max(0.0)).expect("valid noise sigma");

    let n = cfg.n_points;
    let step = (cfg.x_end - cfg.x_start) / (n as f64 - 1.0);

    let mut tip = Vec::with_capacity(n);
    let mut force = Vec::with_capacity(n);
    for i in 0..n {
        let x = cfg.x_start + step * i as f64;
        let mut f = hertz_force(cfg, x);
        if cfg.noise_std > 0.0 {
            f += noise.sample(&mut rng);
        }
        tip.push(x);
        force.push(f);
    }

    let mut segment = vec![0u8; n];
    if cfg.with_retract {
        let mut tip_r: Vec<f64> = tip.iter().rev().copied().collect();
        let mut force_r: Vec<f64> = force.iter().rev().copied().collect();
        tip.append(&mut tip_r);
        force.append(&mut force_r);
        segment.extend(std::iter::repeat(1u8).take(n));
    }

    let height: Vec<f64> = tip
        .iter()
        .zip(force.iter())
        .map(|(&x, &f)| x - f / cfg.spring_constant)
        .collect();

    let meta = CurveMeta {
        spring_constant: Some(cfg.spring_constant),
        source: None,
        enumeration: 0,
    };

    let mut curve = Curve::new(height, force, segment, meta).expect("consistent columns");
    curve.tip_position = Some(tip);
    curve
}
