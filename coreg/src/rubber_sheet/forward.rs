use serde::{Deserialize, Serialize};

use super::{inside_input, ForwardMap, RubberSheet};
use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::raster::{interpolate_direct, Raster, RasterPatch, RasterWrite, Window};
use crate::special::{is_special, is_valid, NULL};

/// Patches narrower than this, in input pixels, are dropped instead of split.
const MIN_PATCH_SIZE: f64 = 0.1;

/// Largest corner residual, in input pixels, of the per-patch affine.
const MAX_RESIDUAL: f64 = 0.5;

/// A patch whose mapped corners span more than this fraction of the output
/// in either axis is treated as crossing a seam and split.
const MAX_OUTPUT_SPAN: f64 = 0.5;

/// Layout of the overlapping input patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PatchConfig {
    pub start_sample: i64,
    pub start_line: i64,
    pub samples: usize,
    pub lines: usize,
    pub sample_increment: usize,
    pub line_increment: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            start_sample: 1,
            start_line: 1,
            samples: 5,
            lines: 5,
            sample_increment: 4,
            line_increment: 4,
        }
    }
}

impl PatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_sample < 1 || self.start_line < 1 {
            return Err(Error::config("Patch start sample and line must be >= 1"));
        }
        if self.samples < 2 || self.lines < 2 {
            return Err(Error::config(format!(
                "Patch size must be at least 2x2, got {}x{}",
                self.samples, self.lines
            )));
        }
        if self.sample_increment == 0 || self.line_increment == 0 {
            return Err(Error::config("Patch increments must be positive"));
        }
        if self.sample_increment > self.samples || self.line_increment > self.lines {
            tracing::warn!(
                "Patch increment {}x{} exceeds patch size {}x{}; output will have gaps",
                self.sample_increment,
                self.line_increment,
                self.samples,
                self.lines
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
    /// Patches laid over the input before any splitting.
    pub patches: usize,
    pub splits: usize,
    /// Patches, split or not, that produced an affine.
    pub pieces: usize,
    /// Patches abandoned below the minimum size.
    pub dropped: usize,
    /// Output pixels that received valid data, summed over bands.
    pub pixels_written: usize,
}

/// Input rectangle with corners on pixel centres.
#[derive(Debug, Clone, Copy)]
struct Patch {
    s0: f64,
    l0: f64,
    s1: f64,
    l1: f64,
}

impl Patch {
    fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.s0, self.l0),
            (self.s1, self.l0),
            (self.s0, self.l1),
            (self.s1, self.l1),
        ]
    }

    fn split(&self) -> [Patch; 4] {
        let ms = (self.s0 + self.s1) / 2.0;
        let ml = (self.l0 + self.l1) / 2.0;
        [
            Patch { s1: ms, l1: ml, ..*self },
            Patch { s0: ms, l1: ml, ..*self },
            Patch { s1: ms, l0: ml, ..*self },
            Patch { s0: ms, l0: ml, ..*self },
        ]
    }

    /// Input area the patch is responsible for.
    fn contains(&self, sample: f64, line: f64) -> bool {
        sample >= self.s0 - 0.5
            && sample <= self.s1 + 0.5
            && line >= self.l0 - 0.5
            && line <= self.l1 + 0.5
    }
}

/// A patch reduced to an output-to-input affine over an output box.
struct Piece {
    patch: Patch,
    to_input: Affine,
    out_min: (i64, i64),
    out_max: (i64, i64),
}

struct PieceBuilder<'a> {
    map: &'a dyn ForwardMap,
    output_samples: usize,
    output_lines: usize,
    pieces: Vec<Piece>,
    stats: PatchStats,
}

impl PieceBuilder<'_> {
    fn process(&mut self, root: Patch) {
        let mut stack = vec![root];
        while let Some(patch) = stack.pop() {
            if patch.s1 - patch.s0 < MIN_PATCH_SIZE || patch.l1 - patch.l0 < MIN_PATCH_SIZE {
                self.stats.dropped += 1;
                continue;
            }
            match self.fit(&patch) {
                Fit::Piece(piece) => {
                    self.stats.pieces += 1;
                    self.pieces.push(piece);
                }
                Fit::Outside => {}
                Fit::Split => {
                    self.stats.splits += 1;
                    stack.extend(patch.split());
                }
            }
        }
    }

    fn fit(&self, patch: &Patch) -> Fit {
        let input = patch.corners();
        let mut output = [(0.0, 0.0); 4];
        for (out, &(s, l)) in output.iter_mut().zip(&input) {
            match self.map.input_to_output(s, l) {
                Some(p) => *out = p,
                None => return Fit::Split,
            }
        }

        let (min, max) = bounds(&output);
        if max.0 - min.0 > MAX_OUTPUT_SPAN * self.output_samples as f64
            || max.1 - min.1 > MAX_OUTPUT_SPAN * self.output_lines as f64
        {
            return Fit::Split;
        }

        let (os, ol): (Vec<f64>, Vec<f64>) = output.iter().copied().unzip();
        let (is, il): (Vec<f64>, Vec<f64>) = input.iter().copied().unzip();
        let Ok(to_input) = Affine::solve(&os, &ol, &is, &il) else {
            return Fit::Split;
        };
        let residual = output.iter().zip(&input).any(|(&(s, l), &(xs, xl))| {
            let (fs, fl) = to_input.compute(s, l);
            (fs - xs).abs() > MAX_RESIDUAL || (fl - xl).abs() > MAX_RESIDUAL
        });
        if residual {
            return Fit::Split;
        }

        // Output box of the patch's whole responsibility area.
        let area = Patch {
            s0: patch.s0 - 0.5,
            l0: patch.l0 - 0.5,
            s1: patch.s1 + 0.5,
            l1: patch.l1 + 0.5,
        }
        .corners()
        .map(|(s, l)| to_input.compute_inverse(s, l));
        let (min, max) = bounds(&area);
        let out_min = (min.0.ceil().max(1.0) as i64, min.1.ceil().max(1.0) as i64);
        let out_max = (
            max.0.floor().min(self.output_samples as f64) as i64,
            max.1.floor().min(self.output_lines as f64) as i64,
        );
        if out_min.0 > out_max.0 || out_min.1 > out_max.1 {
            return Fit::Outside;
        }
        Fit::Piece(Piece {
            patch: *patch,
            to_input,
            out_min,
            out_max,
        })
    }
}

enum Fit {
    Piece(Piece),
    /// Maps entirely off the output.
    Outside,
    Split,
}

fn bounds(points: &[(f64, f64)]) -> ((f64, f64), (f64, f64)) {
    points.iter().fold(
        ((f64::MAX, f64::MAX), (f64::MIN, f64::MIN)),
        |(min, max), &(s, l)| ((min.0.min(s), min.1.min(l)), (max.0.max(s), max.1.max(l))),
    )
}

impl RubberSheet {
    /// Fills every band of `output` from `input` through an input-to-output
    /// map, patch by patch. The output is NULL wherever no patch lands.
    pub fn warp_forward(
        &self,
        input: &dyn Raster,
        output: &mut dyn RasterWrite,
        map: &dyn ForwardMap,
    ) -> Result<PatchStats> {
        let config = &self.patches;
        config.validate()?;
        if output.bands() > input.bands() {
            return Err(Error::config(format!(
                "Output has {} bands but input only {}",
                output.bands(),
                input.bands()
            )));
        }

        let (ns, nl) = (input.samples() as i64, input.lines() as i64);
        let mut builder = PieceBuilder {
            map,
            output_samples: output.samples(),
            output_lines: output.lines(),
            pieces: Vec::new(),
            stats: PatchStats::default(),
        };
        let mut sl = config.start_line;
        while sl < nl || (sl == 1 && nl == 1) {
            let el = (sl + config.lines as i64 - 1).min(nl);
            let mut ss = config.start_sample;
            while ss < ns || (ss == 1 && ns == 1) {
                let es = (ss + config.samples as i64 - 1).min(ns);
                builder.stats.patches += 1;
                builder.process(Patch {
                    s0: ss as f64,
                    l0: sl as f64,
                    s1: es as f64,
                    l1: el as f64,
                });
                ss += config.sample_increment as i64;
            }
            sl += config.line_increment as i64;
        }
        let PieceBuilder {
            pieces, mut stats, ..
        } = builder;

        for band in 1..=output.bands() {
            self.clear_band(output, band)?;
            let whole = RasterPatch::for_region(
                input,
                band,
                self.interpolator,
                (1.0, 1.0),
                (ns as f64, nl as f64),
            )?;
            for piece in &pieces {
                stats.pixels_written += self.write_piece(input, output, band, piece, whole.as_ref())?;
            }
        }

        tracing::info!(
            "Forward warp: {} patches, {} splits, {} pieces, {} dropped, {} pixels written",
            stats.patches,
            stats.splits,
            stats.pieces,
            stats.dropped,
            stats.pixels_written,
        );
        Ok(stats)
    }

    fn clear_band(&self, output: &mut dyn RasterWrite, band: usize) -> Result<()> {
        let row = vec![NULL; output.samples()];
        for line in 1..=output.lines() as i64 {
            output.write(&Window::new(1, line, output.samples(), 1, band), &row)?;
        }
        Ok(())
    }

    /// Writes one piece into `band`, keeping existing valid pixels wherever
    /// the piece would only contribute a special value.
    fn write_piece(
        &self,
        input: &dyn Raster,
        output: &mut dyn RasterWrite,
        band: usize,
        piece: &Piece,
        whole: Option<&RasterPatch>,
    ) -> Result<usize> {
        let (ns, nl) = (input.samples(), input.lines());
        let local = match whole {
            Some(_) => None,
            None => RasterPatch::for_region(
                input,
                band,
                self.interpolator,
                (piece.patch.s0 - 0.5, piece.patch.l0 - 0.5),
                (piece.patch.s1 + 0.5, piece.patch.l1 + 0.5),
            )?,
        };
        let source = whole.or(local.as_ref());

        let window = Window::new(
            piece.out_min.0,
            piece.out_min.1,
            (piece.out_max.0 - piece.out_min.0 + 1) as usize,
            (piece.out_max.1 - piece.out_min.1 + 1) as usize,
            band,
        );
        let mut values = vec![NULL; window.len()];
        output.read(&window, &mut values)?;

        let mut written = 0;
        for (i, slot) in values.iter_mut().enumerate() {
            let os = window.sample + (i % window.samples) as i64;
            let ol = window.line + (i / window.samples) as i64;
            let (is, il) = piece.to_input.compute(os as f64, ol as f64);
            if !piece.patch.contains(is, il) || !inside_input(is, il, ns, nl) {
                continue;
            }
            let value = match source {
                Some(patch) => patch.interpolate(self.interpolator, is, il),
                None => interpolate_direct(input, band, self.interpolator, is, il)?,
            };
            if is_special(value) && is_valid(*slot) {
                continue;
            }
            if is_valid(value) && !is_valid(*slot) {
                written += 1;
            }
            *slot = value;
        }
        output.write(&window, &values)?;
        Ok(written)
    }
}
