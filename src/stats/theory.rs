//! Kinetic-theory predictions for registered statistics.
//!
//! Canonical results are Maxwell-Boltzmann in `d` dimensions. The finite-size
//! correction replaces them with the microcanonical marginals of an isolated
//! `N`-body system, where a single particle's share of the kinetic energy is
//! Beta(d/2, (N-1)d/2) distributed. The real-gas correction applies the
//! hard-body contact value `g(eta)` to collision rates and the compressibility
//! factor `Z(eta)` to the pressure.

use crate::core::frame::FrameInfo;
use crate::core::particle::{body_volume, ParticleType};
use crate::stats::kind::{StatisticKind, TypeSet};
use crate::units::BOLTZMANN;
use std::f64::consts::PI;

/// Which corrections predictions include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Corrections {
    pub finite_size: bool,
    pub real_gas: bool,
}

/// Macroscopic state the predictions are computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct TheoryContext {
    pub dim: usize,
    pub volume: f64,
    pub temperature: f64,
    /// Total kinetic energy of the whole system.
    pub total_energy: f64,
    pub masses: Vec<f64>,
    pub radii: Vec<f64>,
    pub counts: Vec<usize>,
}

impl TheoryContext {
    pub fn from_frame(frame: &FrameInfo, types: &[ParticleType]) -> Self {
        Self {
            dim: frame.dim,
            volume: frame.volume,
            temperature: frame.temperature,
            total_energy: frame.kinetic_energy,
            masses: types.iter().map(|t| t.mass).collect(),
            radii: types.iter().map(|t| t.radius).collect(),
            counts: frame.counts.clone(),
        }
    }

    #[inline]
    pub fn kt(&self) -> f64 {
        BOLTZMANN * self.temperature
    }

    pub fn total_count(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Fraction of the arena occupied by bodies.
    pub fn packing_fraction(&self) -> f64 {
        if self.volume <= 0.0 {
            return 0.0;
        }
        self.counts
            .iter()
            .zip(&self.radii)
            .map(|(&n, &r)| n as f64 * body_volume(r, self.dim))
            .sum::<f64>()
            / self.volume
    }

    /// Whether two contexts would draw the same curves.
    pub fn approx_eq(&self, other: &Self) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1e-12);
        self.dim == other.dim
            && self.counts == other.counts
            && close(self.volume, other.volume)
            && close(self.temperature, other.temperature)
            && close(self.total_energy, other.total_energy)
    }

    fn kinds_in<'a>(&'a self, set: &'a TypeSet) -> impl Iterator<Item = usize> + 'a {
        set.iter().filter(move |&k| k < self.masses.len())
    }

    /// `(E, N)` when the finite-size correction applies.
    fn micro(&self, corr: Corrections) -> Option<(f64, f64)> {
        let n = self.total_count();
        (corr.finite_size && n >= 2 && self.total_energy > 0.0)
            .then(|| (self.total_energy, n as f64))
    }
}

/// Natural log of the gamma function (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + G + 0.5;
    let mut a = COEF[0];
    for (k, c) in COEF.iter().enumerate().skip(1) {
        a += c / (x + k as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

fn beta_pdf(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return 0.0;
    }
    ((a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - ln_beta(a, b)).exp()
}

/// Radial distribution at contact for hard rods, discs and spheres.
pub fn contact_value(dim: usize, eta: f64) -> f64 {
    let eta = eta.clamp(0.0, 0.99);
    match dim {
        1 => 1.0 / (1.0 - eta),
        2 => (1.0 - 7.0 * eta / 16.0) / (1.0 - eta).powi(2),
        _ => (1.0 - 0.5 * eta) / (1.0 - eta).powi(3),
    }
}

/// Compressibility factor `PV / NkT` (Tonks, Henderson, Carnahan-Starling).
pub fn compressibility(dim: usize, eta: f64) -> f64 {
    let eta = eta.clamp(0.0, 0.99);
    match dim {
        1 => 1.0 / (1.0 - eta),
        2 => (1.0 + eta * eta / 8.0) / (1.0 - eta).powi(2),
        _ => (1.0 + eta + eta * eta - eta.powi(3)) / (1.0 - eta).powi(3),
    }
}

/// Mean speed of a Maxwell distribution in `dim` dimensions.
pub fn mean_speed(dim: usize, kt: f64, mass: f64) -> f64 {
    let d = dim as f64;
    (2.0 * kt / mass).sqrt() * (ln_gamma(0.5 * (d + 1.0)) - ln_gamma(0.5 * d)).exp()
}

/// Collisions per unit time of one particle of type `k` with everything else.
pub fn collision_frequency(ctx: &TheoryContext, corr: Corrections, k: usize) -> f64 {
    if ctx.volume <= 0.0 {
        return 0.0;
    }
    let kt = ctx.kt();
    let mut z = 0.0;
    for b in 0..ctx.counts.len() {
        let others = if b == k {
            ctx.counts[b].saturating_sub(1)
        } else {
            ctx.counts[b]
        };
        if others == 0 {
            continue;
        }
        let sigma = ctx.radii[k] + ctx.radii[b];
        let mu = ctx.masses[k] * ctx.masses[b] / (ctx.masses[k] + ctx.masses[b]);
        let cross = match ctx.dim {
            1 => 1.0,
            2 => 2.0 * sigma,
            _ => PI * sigma * sigma,
        };
        z += others as f64 / ctx.volume * cross * mean_speed(ctx.dim, kt, mu);
    }
    if corr.real_gas {
        z *= contact_value(ctx.dim, ctx.packing_fraction());
    }
    z
}

/// Per-type mean and second moment.
fn moments(kind: StatisticKind, ctx: &TheoryContext, corr: Corrections, k: usize) -> Option<(f64, f64)> {
    let d = ctx.dim as f64;
    let m = ctx.masses[k];
    let kt = ctx.kt();
    let micro = ctx.micro(corr);
    match kind {
        StatisticKind::Speed => Some(match micro {
            Some((e, n)) => {
                let (a, b) = (0.5 * d, 0.5 * (n - 1.0) * d);
                let mean = (2.0 * e / m).sqrt()
                    * (ln_gamma(a + 0.5) + ln_gamma(a + b) - ln_gamma(a) - ln_gamma(a + b + 0.5)).exp();
                (mean, 2.0 * e / m * a / (a + b))
            }
            None => (mean_speed(ctx.dim, kt, m), d * kt / m),
        }),
        StatisticKind::VelocityComponent(_) => Some(match micro {
            Some((e, n)) => (0.0, 2.0 * e / (m * n * d)),
            None => (0.0, kt / m),
        }),
        StatisticKind::KineticEnergy => Some(match micro {
            Some((e, n)) => {
                let (a, b) = (0.5 * d, 0.5 * (n - 1.0) * d);
                let mean = e * a / (a + b);
                let var = e * e * a * b / ((a + b).powi(2) * (a + b + 1.0));
                (mean, var + mean * mean)
            }
            None => {
                let a = 0.5 * d;
                (a * kt, (a + a * a) * kt * kt)
            }
        }),
        StatisticKind::FreePath => {
            let z = collision_frequency(ctx, corr, k);
            let v = moments(StatisticKind::Speed, ctx, corr, k)?.0;
            (z > 0.0).then(|| {
                let l = v / z;
                (l, 2.0 * l * l)
            })
        }
        StatisticKind::TimePerCollision => {
            let z = collision_frequency(ctx, corr, k);
            (z > 0.0).then(|| (1.0 / z, 2.0 / (z * z)))
        }
        StatisticKind::CollisionRate => {
            let z = collision_frequency(ctx, corr, k);
            Some((z, z * z))
        }
        StatisticKind::Pressure => None,
    }
}

fn pdf_of_type(kind: StatisticKind, ctx: &TheoryContext, corr: Corrections, k: usize, x: f64) -> f64 {
    let d = ctx.dim as f64;
    let m = ctx.masses[k];
    let kt = ctx.kt();
    let micro = ctx.micro(corr);
    match kind {
        StatisticKind::Speed => {
            if x < 0.0 {
                return 0.0;
            }
            match micro {
                Some((e, n)) => {
                    let y = m * x * x / (2.0 * e);
                    beta_pdf(y, 0.5 * d, 0.5 * (n - 1.0) * d) * m * x / e
                }
                None => {
                    let lead = 2.0_f64.ln() - ln_gamma(0.5 * d) + 0.5 * d * (m / (2.0 * kt)).ln();
                    let power = if ctx.dim == 1 { 0.0 } else { (d - 1.0) * x.ln() };
                    (lead + power - m * x * x / (2.0 * kt)).exp()
                }
            }
        }
        StatisticKind::VelocityComponent(_) => match micro {
            Some((e, n)) => {
                let b = 0.5 * (n * d - 1.0);
                let y = m * x * x / (2.0 * e);
                if y >= 1.0 {
                    return 0.0;
                }
                (m / (2.0 * e)).sqrt() * ((b - 1.0) * (1.0 - y).ln() - ln_beta(0.5, b)).exp()
            }
            None => (m / (2.0 * PI * kt)).sqrt() * (-m * x * x / (2.0 * kt)).exp(),
        },
        StatisticKind::KineticEnergy => {
            if x <= 0.0 {
                return 0.0;
            }
            let a = 0.5 * d;
            match micro {
                Some((e, n)) => beta_pdf(x / e, a, 0.5 * (n - 1.0) * d) / e,
                None => ((a - 1.0) * x.ln() - x / kt - ln_gamma(a) - a * kt.ln()).exp(),
            }
        }
        StatisticKind::FreePath | StatisticKind::TimePerCollision => {
            match moments(kind, ctx, corr, k) {
                Some((mean, _)) if x >= 0.0 => (-x / mean).exp() / mean,
                _ => 0.0,
            }
        }
        StatisticKind::CollisionRate | StatisticKind::Pressure => 0.0,
    }
}

/// How much each type of the subset contributes to the samples of `kind`.
fn weights(kind: StatisticKind, set: &TypeSet, ctx: &TheoryContext, corr: Corrections) -> Vec<(usize, f64)> {
    ctx.kinds_in(set)
        .map(|k| {
            let n = ctx.counts[k] as f64;
            let w = match kind {
                StatisticKind::FreePath | StatisticKind::TimePerCollision => {
                    n * collision_frequency(ctx, corr, k)
                }
                _ => n,
            };
            (k, w)
        })
        .filter(|&(_, w)| w > 0.0)
        .collect()
}

/// Predicted average of `kind` over the particles of `set`.
pub fn prediction(kind: StatisticKind, set: &TypeSet, ctx: &TheoryContext, corr: Corrections) -> Option<f64> {
    if kind == StatisticKind::Pressure {
        if ctx.volume <= 0.0 {
            return None;
        }
        let n: usize = ctx.kinds_in(set).map(|k| ctx.counts[k]).sum();
        let z = if corr.real_gas {
            compressibility(ctx.dim, ctx.packing_fraction())
        } else {
            1.0
        };
        return Some(n as f64 / ctx.volume * ctx.kt() * z);
    }
    let w = weights(kind, set, ctx, corr);
    let total: f64 = w.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let mut mean = 0.0;
    for &(k, wk) in &w {
        mean += wk * moments(kind, ctx, corr, k)?.0;
    }
    Some(mean / total)
}

/// Predicted standard deviation of the samples.
pub fn predicted_width(kind: StatisticKind, set: &TypeSet, ctx: &TheoryContext, corr: Corrections) -> Option<f64> {
    if !kind.has_distribution() {
        return None;
    }
    let w = weights(kind, set, ctx, corr);
    let total: f64 = w.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let (mut mean, mut second) = (0.0, 0.0);
    for &(k, wk) in &w {
        let (m1, m2) = moments(kind, ctx, corr, k)?;
        mean += wk * m1;
        second += wk * m2;
    }
    mean /= total;
    second /= total;
    Some((second - mean * mean).max(0.0).sqrt())
}

/// Predicted probability density of the samples at `x`.
pub fn pdf(kind: StatisticKind, set: &TypeSet, ctx: &TheoryContext, corr: Corrections, x: f64) -> Option<f64> {
    if !kind.has_distribution() {
        return None;
    }
    let w = weights(kind, set, ctx, corr);
    let total: f64 = w.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    Some(
        w.iter()
            .map(|&(k, wk)| wk * pdf_of_type(kind, ctx, corr, k, x))
            .sum::<f64>()
            / total,
    )
}

/// Histogram range that shows essentially the whole predicted distribution.
pub fn default_range(kind: StatisticKind, set: &TypeSet, ctx: &TheoryContext) -> (f64, f64) {
    let kt = ctx.kt();
    let m_min = ctx
        .kinds_in(set)
        .map(|k| ctx.masses[k])
        .fold(f64::INFINITY, f64::min);
    let fallback = (0.0, 1.0);
    if !m_min.is_finite() || kt <= 0.0 {
        return fallback;
    }
    let range = match kind {
        StatisticKind::Speed => (0.0, 3.5 * (2.0 * kt / m_min).sqrt()),
        StatisticKind::VelocityComponent(_) => {
            let s = 4.0 * (kt / m_min).sqrt();
            (-s, s)
        }
        StatisticKind::KineticEnergy => {
            let a = 0.5 * ctx.dim as f64;
            (0.0, (a + 5.0 * a.sqrt() + 2.0) * kt)
        }
        StatisticKind::FreePath | StatisticKind::TimePerCollision => {
            let longest = ctx
                .kinds_in(set)
                .filter_map(|k| moments(kind, ctx, Corrections::default(), k).map(|(m, _)| m))
                .fold(0.0, f64::max);
            (0.0, 5.0 * longest)
        }
        StatisticKind::CollisionRate | StatisticKind::Pressure => fallback,
    };
    if range.1 > range.0 && range.1.is_finite() {
        range
    } else {
        fallback
    }
}
