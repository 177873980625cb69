use super::MatchAlgorithm;
use crate::chip::Chip;

/// Mean absolute difference over pixels valid in both chips. Lower is
/// better; a perfect match scores 0.
#[derive(Debug, Clone)]
pub struct MinimumDifference {
    stride: usize,
}

impl MinimumDifference {
    pub const NAME: &'static str = "MinimumDifference";

    /// `stride` visits every n-th pixel along both axes.
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }
}

impl Default for MinimumDifference {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MatchAlgorithm for MinimumDifference {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn ideal_fit(&self) -> f64 {
        0.0
    }

    fn match_chips(&mut self, pattern: &Chip, subsearch: &Chip) -> Option<f64> {
        let mut diff = 0.0;
        let mut count = 0usize;
        for line in (1..=pattern.lines()).step_by(self.stride) {
            for samp in (1..=pattern.samples()).step_by(self.stride) {
                if !pattern.is_valid(samp, line) || !subsearch.is_valid(samp, line) {
                    continue;
                }
                diff += (pattern.get_value(samp, line) - subsearch.get_value(samp, line)).abs();
                count += 1;
            }
        }
        (count > 0).then(|| diff / count as f64)
    }

    fn compare_fits(&self, fit1: f64, fit2: f64) -> bool {
        fit1 <= fit2
    }

    fn box_clone(&self) -> Box<dyn MatchAlgorithm> {
        Box::new(self.clone())
    }
}
