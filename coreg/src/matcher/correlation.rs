use super::MatchAlgorithm;
use crate::chip::Chip;

/// Absolute Pearson correlation over pixels valid in both chips. Higher is
/// better; any positive or negative linear radiometric relation scores 1.
#[derive(Debug, Clone)]
pub struct MaximumCorrelation {
    stride: usize,
}

impl MaximumCorrelation {
    pub const NAME: &'static str = "MaximumCorrelation";

    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }
}

impl Default for MaximumCorrelation {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MatchAlgorithm for MaximumCorrelation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn ideal_fit(&self) -> f64 {
        1.0
    }

    fn match_chips(&mut self, pattern: &Chip, subsearch: &Chip) -> Option<f64> {
        // Sums are taken about the first valid pair to keep the variances
        // accurate for large DN offsets.
        let mut origin: Option<(f64, f64)> = None;
        let (mut n, mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        for line in (1..=pattern.lines()).step_by(self.stride) {
            for samp in (1..=pattern.samples()).step_by(self.stride) {
                if !pattern.is_valid(samp, line) || !subsearch.is_valid(samp, line) {
                    continue;
                }
                let (px, py) = (pattern.get_value(samp, line), subsearch.get_value(samp, line));
                let (x0, y0) = *origin.get_or_insert((px, py));
                let (x, y) = (px - x0, py - y0);
                n += 1.0;
                sx += x;
                sy += y;
                sxx += x * x;
                syy += y * y;
                sxy += x * y;
            }
        }
        if n < 2.0 {
            return None;
        }
        let cov = sxy - sx * sy / n;
        let var_x = sxx - sx * sx / n;
        let var_y = syy - sy * sy / n;
        if !(var_x > 0.0 && var_y > 0.0) {
            return None;
        }
        let r = cov / (var_x * var_y).sqrt();
        Some(r.abs().min(1.0))
    }

    fn compare_fits(&self, fit1: f64, fit2: f64) -> bool {
        fit1 >= fit2
    }

    fn box_clone(&self) -> Box<dyn MatchAlgorithm> {
        Box::new(self.clone())
    }
}
