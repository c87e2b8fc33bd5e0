use crate::error::{Error, Result};

/// Running sum, sum of squares, sample count and elapsed simulated time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    sum: f64,
    sum_sq: f64,
    count: u64,
    span: f64,
}

impl Accumulator {
    pub fn push(&mut self, x: f64) {
        self.sum += x;
        self.sum_sq += x * x;
        self.count += 1;
    }

    /// Extend the time window rates are averaged over.
    pub fn add_span(&mut self, dt: f64) {
        if dt > 0.0 {
            self.span += dt;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn span(&self) -> f64 {
        self.span
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        Some((self.sum_sq / n - mean * mean).max(0.0).sqrt())
    }

    /// `sum / span`, once any time has elapsed.
    pub fn rate(&self) -> Option<f64> {
        (self.span > 0.0).then(|| self.sum / self.span)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Fixed-range histogram; out-of-range samples land in the edge bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    lo: f64,
    hi: f64,
    bins: Vec<u64>,
    samples: u64,
}

impl Histogram {
    pub fn new(lo: f64, hi: f64, bins: usize) -> Result<Self> {
        if !lo.is_finite() || !hi.is_finite() || hi <= lo {
            return Err(Error::InvalidParam(format!(
                "histogram range [{lo}, {hi}] is empty or not finite"
            )));
        }
        if bins == 0 {
            return Err(Error::InvalidParam("histogram needs at least one bin".into()));
        }
        Ok(Self {
            lo,
            hi,
            bins: vec![0; bins],
            samples: 0,
        })
    }

    pub fn add(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        let n = self.bins.len();
        let pos = ((x - self.lo) / self.bin_width()).floor();
        let bin = if pos <= 0.0 {
            0
        } else {
            (pos as usize).min(n - 1)
        };
        self.bins[bin] += 1;
        self.samples += 1;
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Samples added since the last clear.
    pub fn total(&self) -> u64 {
        self.samples
    }

    pub fn range(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    pub fn bin_width(&self) -> f64 {
        (self.hi - self.lo) / self.bins.len() as f64
    }

    pub fn bin_center(&self, k: usize) -> f64 {
        self.lo + (k as f64 + 0.5) * self.bin_width()
    }

    /// Counts normalized to a probability density.
    pub fn density(&self) -> Vec<f64> {
        if self.samples == 0 {
            return vec![0.0; self.bins.len()];
        }
        let norm = 1.0 / (self.samples as f64 * self.bin_width());
        self.bins.iter().map(|&c| c as f64 * norm).collect()
    }

    pub fn clear(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_and_spread() {
        let mut a = Accumulator::default();
        assert_eq!(a.mean(), None);
        for x in [1.0, 2.0, 3.0, 4.0] {
            a.push(x);
        }
        assert_relative_eq!(a.mean().unwrap_or(0.0), 2.5);
        assert_relative_eq!(a.std_dev().unwrap_or(0.0), 1.25_f64.sqrt());
        assert_eq!(a.rate(), None);
        a.add_span(2.0);
        assert_relative_eq!(a.rate().unwrap_or(0.0), 5.0);
        a.clear();
        assert_eq!(a.count(), 0);
    }

    #[test]
    fn out_of_range_clamps_to_edges() -> Result<()> {
        let mut h = Histogram::new(0.0, 10.0, 5)?;
        h.add(-3.0);
        h.add(0.0);
        h.add(9.99);
        h.add(10.0);
        h.add(1e9);
        h.add(f64::NAN);
        assert_eq!(h.bins(), &[2, 0, 0, 0, 3]);
        assert_eq!(h.total(), 5);
        assert_eq!(h.bins().iter().sum::<u64>(), h.total());
        Ok(())
    }

    #[test]
    fn density_integrates_to_one() -> Result<()> {
        let mut h = Histogram::new(0.0, 1.0, 4)?;
        for k in 0..100 {
            h.add(k as f64 / 100.0);
        }
        let area: f64 = h.density().iter().map(|d| d * h.bin_width()).sum();
        assert_relative_eq!(area, 1.0, epsilon = 1e-12);
        assert_relative_eq!(h.bin_center(0), 0.125);
        Ok(())
    }

    #[test]
    fn empty_range_rejected() {
        assert!(Histogram::new(1.0, 1.0, 10).is_err());
        assert!(Histogram::new(0.0, 1.0, 0).is_err());
    }
}
