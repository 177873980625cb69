use std::cell::Cell;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::{inside_input, InverseMap, RubberSheet};
use crate::error::{Error, Result};
use crate::raster::{interpolate_direct, Raster, RasterPatch, RasterWrite, Window};
use crate::special::{is_null, NULL};

/// Step between probes when walking the edges of a quad whose corners all
/// fail to map.
const EDGE_PROBE_STEP: usize = 4;

/// Largest disagreement, in input pixels, between the bilinear corner fit and
/// the map at a quad centre.
const CENTRE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QuadTreeConfig {
    /// Output tile side; the root quad of every tile. Power of two.
    pub start_quad_size: usize,
    /// Quads with fewer lines than this are mapped pixel by pixel instead of
    /// being split.
    pub end_quad_size: usize,
    /// Output pixel that must never be hidden inside an empty quad, e.g. a
    /// pole that maps while the surrounding corners do not.
    pub force_point: Option<(f64, f64)>,
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self {
            start_quad_size: 128,
            end_quad_size: 8,
            force_point: None,
        }
    }
}

impl QuadTreeConfig {
    pub fn new(start_quad_size: usize, end_quad_size: usize) -> Self {
        Self {
            start_quad_size,
            end_quad_size,
            force_point: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_quad_size < 2 || !self.start_quad_size.is_power_of_two() {
            return Err(Error::config(format!(
                "StartQuadSize must be a power of two >= 2, got {}",
                self.start_quad_size
            )));
        }
        if self.end_quad_size == 0 || self.end_quad_size > self.start_quad_size {
            return Err(Error::config(format!(
                "EndQuadSize must be in [1, {}], got {}",
                self.start_quad_size, self.end_quad_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadTreeStats {
    pub tiles: usize,
    /// Quads taken off the queue.
    pub quads: usize,
    pub splits: usize,
    /// Quads mapped pixel by pixel.
    pub slow_quads: usize,
    /// Quads with no mappable pixel, filled with NULL without per-pixel work.
    pub empty_quads: usize,
    /// Calls into the inverse map.
    pub map_evaluations: usize,
}

/// Inclusive output rectangle.
#[derive(Debug, Clone, Copy)]
struct Quad {
    ssamp: i64,
    sline: i64,
    esamp: i64,
    eline: i64,
}

impl Quad {
    fn contains(&self, sample: f64, line: f64) -> bool {
        sample >= self.ssamp as f64
            && sample <= self.esamp as f64
            && line >= self.sline as f64
            && line <= self.eline as f64
    }

    fn split(&self) -> [Quad; 4] {
        let n = (self.eline - self.sline + 1) / 2;
        let (ms, ml) = (self.ssamp + n, self.sline + n);
        [
            Quad { esamp: ms - 1, eline: ml - 1, ..*self },
            Quad { ssamp: ms, eline: ml - 1, ..*self },
            Quad { esamp: ms - 1, sline: ml, ..*self },
            Quad { ssamp: ms, sline: ml, ..*self },
        ]
    }
}

/// Input coordinates for every output pixel of one tile. NULL line means
/// the pixel has no source.
struct TileMap {
    sample: i64,
    line: i64,
    size: usize,
    samples: Vec<f64>,
    lines: Vec<f64>,
}

impl TileMap {
    fn new(size: usize) -> Self {
        Self {
            sample: 1,
            line: 1,
            size,
            samples: vec![NULL; size * size],
            lines: vec![NULL; size * size],
        }
    }

    fn reset(&mut self, sample: i64, line: i64) {
        self.sample = sample;
        self.line = line;
        self.lines.fill(NULL);
        self.samples.fill(NULL);
    }

    #[inline]
    fn index(&self, sample: i64, line: i64) -> usize {
        (line - self.line) as usize * self.size + (sample - self.sample) as usize
    }

    #[inline]
    fn set(&mut self, sample: i64, line: i64, value: Option<(f64, f64)>) {
        let i = self.index(sample, line);
        let (s, l) = value.unwrap_or((NULL, NULL));
        self.samples[i] = s;
        self.lines[i] = l;
    }

    #[inline]
    fn get(&self, sample: i64, line: i64) -> Option<(f64, f64)> {
        let i = self.index(sample, line);
        (!is_null(self.lines[i])).then(|| (self.samples[i], self.lines[i]))
    }
}

/// Counts evaluations of the wrapped map.
struct CountingMap<'a> {
    map: &'a dyn InverseMap,
    calls: Cell<usize>,
}

impl CountingMap<'_> {
    #[inline]
    fn eval(&self, sample: f64, line: f64) -> Option<(f64, f64)> {
        self.calls.set(self.calls.get() + 1);
        self.map.output_to_input(sample, line)
    }
}

struct QuadBuilder<'a> {
    config: &'a QuadTreeConfig,
    map: CountingMap<'a>,
    input_samples: usize,
    input_lines: usize,
    queue: VecDeque<Quad>,
    stats: QuadTreeStats,
}

impl QuadBuilder<'_> {
    fn fill_tile(&mut self, tile: &mut TileMap) {
        let size = tile.size as i64;
        let root = Quad {
            ssamp: tile.sample,
            sline: tile.line,
            esamp: tile.sample + size - 1,
            eline: tile.line + size - 1,
        };
        if self.config.start_quad_size == 2 {
            self.stats.quads += 1;
            self.slow_quad(&root, tile);
            return;
        }
        self.queue.push_back(root);
        while let Some(quad) = self.queue.pop_front() {
            self.stats.quads += 1;
            self.process_quad(&quad, tile);
        }
    }

    fn is_small(&self, quad: &Quad) -> bool {
        quad.eline - quad.sline < self.config.end_quad_size as i64
    }

    fn split(&mut self, quad: &Quad) {
        self.stats.splits += 1;
        self.queue.extend(quad.split());
    }

    fn slow_or_split(&mut self, quad: &Quad, tile: &mut TileMap) {
        if self.is_small(quad) {
            self.slow_quad(quad, tile);
        } else {
            self.split(quad);
        }
    }

    fn process_quad(&mut self, quad: &Quad, tile: &mut TileMap) {
        let out = [
            (quad.ssamp as f64, quad.sline as f64),
            (quad.esamp as f64, quad.sline as f64),
            (quad.ssamp as f64, quad.eline as f64),
            (quad.esamp as f64, quad.eline as f64),
        ];
        let mapped = out.map(|(s, l)| self.map.eval(s, l));
        let bad = mapped.iter().filter(|m| m.is_none()).count();

        if bad == 4 {
            if self.is_small(quad) {
                self.slow_quad(quad, tile);
            } else if self.forced(quad) || self.edges_map(quad) {
                self.split(quad);
            } else {
                // Tile map is NULL-initialised.
                self.stats.empty_quads += 1;
            }
            return;
        }
        if bad > 0 {
            self.slow_or_split(quad, tile);
            return;
        }

        let input = mapped.map(|m| m.unwrap_or_default());
        let Some((line_coef, samp_coef)) = fit_bilinear(&out, &input) else {
            self.slow_or_split(quad, tile);
            return;
        };

        let mid_samp = (quad.ssamp + quad.esamp) as f64 / 2.0;
        let mid_line = (quad.sline + quad.eline) as f64 / 2.0;
        let Some((true_samp, true_line)) = self.map.eval(mid_samp, mid_line) else {
            self.slow_or_split(quad, tile);
            return;
        };
        let fit_line = bilinear(&line_coef, mid_samp, mid_line);
        let fit_samp = bilinear(&samp_coef, mid_samp, mid_line);
        if (fit_line - true_line).abs() > CENTRE_TOLERANCE
            || (fit_samp - true_samp).abs() > CENTRE_TOLERANCE
        {
            self.slow_or_split(quad, tile);
            return;
        }

        fill_bilinear(quad, &line_coef, &samp_coef, tile);
    }

    fn forced(&self, quad: &Quad) -> bool {
        self.config
            .force_point
            .is_some_and(|(s, l)| quad.contains(s, l))
    }

    /// Probes the border and the centre cross-hair of a quad whose corners
    /// all failed. Any mappable probe means the quad is not empty.
    fn edges_map(&self, quad: &Quad) -> bool {
        let cs = (quad.ssamp + quad.esamp) / 2;
        let cl = (quad.sline + quad.eline) / 2;
        let walks = [
            (quad.ssamp + 1, quad.esamp - 1, quad.sline, quad.sline),
            (quad.ssamp + 1, quad.esamp - 1, quad.eline, quad.eline),
            (quad.ssamp, quad.ssamp, quad.sline + 1, quad.eline - 1),
            (quad.esamp, quad.esamp, quad.sline + 1, quad.eline - 1),
            (cs, cs, quad.sline + 1, quad.eline - 1),
            (quad.ssamp + 1, quad.esamp - 1, cl, cl),
        ];
        walks.iter().any(|&(s0, s1, l0, l1)| {
            (l0..=l1).step_by(EDGE_PROBE_STEP).any(|line| {
                (s0..=s1)
                    .step_by(EDGE_PROBE_STEP)
                    .any(|samp| self.map.eval(samp as f64, line as f64).is_some())
            })
        })
    }

    fn slow_quad(&mut self, quad: &Quad, tile: &mut TileMap) {
        self.stats.slow_quads += 1;
        for line in quad.sline..=quad.eline {
            for samp in quad.ssamp..=quad.esamp {
                let value = self
                    .map
                    .eval(samp as f64, line as f64)
                    .filter(|&(s, l)| inside_input(s, l, self.input_samples, self.input_lines));
                tile.set(samp, line, value);
            }
        }
    }
}

/// `[a, b, c, d]` of `v = a*line + b*samp + c*line*samp + d`.
type Bilinear = [f64; 4];

#[inline]
fn bilinear(coef: &Bilinear, samp: f64, line: f64) -> f64 {
    coef[0] * line + coef[1] * samp + coef[2] * line * samp + coef[3]
}

/// Exact bilinear through the four corner correspondences, by Cramer's rule.
fn fit_bilinear(out: &[(f64, f64); 4], input: &[(f64, f64); 4]) -> Option<(Bilinear, Bilinear)> {
    let a: [[f64; 4]; 4] = out.map(|(s, l)| [l, s, l * s, 1.0]);
    let det = det4(&a);
    if det == 0.0 {
        return None;
    }
    let solve = |rhs: [f64; 4]| -> Bilinear {
        std::array::from_fn(|col| {
            let mut m = a;
            for (row, value) in rhs.iter().enumerate() {
                m[row][col] = *value;
            }
            det4(&m) / det
        })
    };
    Some((solve(input.map(|(_, l)| l)), solve(input.map(|(s, _)| s))))
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn det4(m: &[[f64; 4]; 4]) -> f64 {
    (0..4)
        .map(|col| {
            let minor: [[f64; 3]; 3] = std::array::from_fn(|r| {
                std::array::from_fn(|c| m[r + 1][if c < col { c } else { c + 1 }])
            });
            let sign = if col % 2 == 0 { 1.0 } else { -1.0 };
            sign * m[0][col] * det3(minor)
        })
        .sum()
}

/// Evaluates the bilinear over the quad by stepping partial derivatives.
fn fill_bilinear(quad: &Quad, line_coef: &Bilinear, samp_coef: &Bilinear, tile: &mut TileMap) {
    let (ss, sl) = (quad.ssamp as f64, quad.sline as f64);
    let mut row_line = bilinear(line_coef, ss, sl);
    let mut row_samp = bilinear(samp_coef, ss, sl);
    let dline_dl = line_coef[0] + line_coef[2] * ss;
    let dsamp_dl = samp_coef[0] + samp_coef[2] * ss;

    for ol in quad.sline..=quad.eline {
        let dline_ds = line_coef[1] + line_coef[2] * ol as f64;
        let dsamp_ds = samp_coef[1] + samp_coef[2] * ol as f64;
        let (mut l, mut s) = (row_line, row_samp);
        for os in quad.ssamp..=quad.esamp {
            tile.set(os, ol, Some((s, l)));
            l += dline_ds;
            s += dsamp_ds;
        }
        row_line += dline_dl;
        row_samp += dsamp_dl;
    }
}

impl RubberSheet {
    /// Fills every band of `output` from `input` through an output-to-input
    /// map. Output band `b` reads input band `b`.
    pub fn warp_reverse(
        &self,
        input: &dyn Raster,
        output: &mut dyn RasterWrite,
        map: &dyn InverseMap,
    ) -> Result<QuadTreeStats> {
        self.quad_tree.validate()?;
        if output.bands() > input.bands() {
            return Err(Error::config(format!(
                "Output has {} bands but input only {}",
                output.bands(),
                input.bands()
            )));
        }

        let size = self.quad_tree.start_quad_size;
        let (width, height) = (output.samples(), output.lines());
        let mut builder = QuadBuilder {
            config: &self.quad_tree,
            map: CountingMap {
                map,
                calls: Cell::new(0),
            },
            input_samples: input.samples(),
            input_lines: input.lines(),
            queue: VecDeque::new(),
            stats: QuadTreeStats::default(),
        };
        let mut tile = TileMap::new(size);
        let mut values = Vec::with_capacity(size * size);

        for tile_line in (1..=height as i64).step_by(size) {
            for tile_samp in (1..=width as i64).step_by(size) {
                tile.reset(tile_samp, tile_line);
                let before = builder.stats;
                builder.fill_tile(&mut tile);
                builder.stats.tiles += 1;
                tracing::debug!(
                    "Tile ({}, {}): {} quads, {} splits, {} slow, {} empty",
                    tile_samp,
                    tile_line,
                    builder.stats.quads - before.quads,
                    builder.stats.splits - before.splits,
                    builder.stats.slow_quads - before.slow_quads,
                    builder.stats.empty_quads - before.empty_quads,
                );

                let window_samples = size.min(width - (tile_samp as usize - 1));
                let window_lines = size.min(height - (tile_line as usize - 1));
                for band in 1..=output.bands() {
                    let window =
                        Window::new(tile_samp, tile_line, window_samples, window_lines, band);
                    values.clear();
                    self.apply_tile_map(input, band, &tile, &window, &mut values)?;
                    output.write(&window, &values)?;
                }
            }
        }

        let mut stats = builder.stats;
        stats.map_evaluations = builder.map.calls.get();
        tracing::info!(
            "Reverse warp {}x{}: {} tiles, {} quads, {} splits, {} slow, {} empty, {} map evaluations",
            width,
            height,
            stats.tiles,
            stats.quads,
            stats.splits,
            stats.slow_quads,
            stats.empty_quads,
            stats.map_evaluations,
        );
        Ok(stats)
    }

    fn apply_tile_map(
        &self,
        input: &dyn Raster,
        band: usize,
        tile: &TileMap,
        window: &Window,
        values: &mut Vec<f64>,
    ) -> Result<()> {
        let (ns, nl) = (input.samples(), input.lines());
        let source = |s: i64, l: i64| {
            tile.get(s, l).filter(|&(is, il)| inside_input(is, il, ns, nl))
        };

        let mut min = (f64::MAX, f64::MAX);
        let mut max = (f64::MIN, f64::MIN);
        let mut any = false;
        for line in window.line..=window.end_line() {
            for samp in window.sample..=window.end_sample() {
                if let Some((is, il)) = source(samp, line) {
                    any = true;
                    min = (min.0.min(is), min.1.min(il));
                    max = (max.0.max(is), max.1.max(il));
                }
            }
        }
        if !any {
            values.resize(window.len(), NULL);
            return Ok(());
        }

        let patch = RasterPatch::for_region(input, band, self.interpolator, min, max)?;
        for line in window.line..=window.end_line() {
            for samp in window.sample..=window.end_sample() {
                let value = match source(samp, line) {
                    None => NULL,
                    Some((is, il)) => match &patch {
                        Some(patch) => patch.interpolate(self.interpolator, is, il),
                        None => interpolate_direct(input, band, self.interpolator, is, il)?,
                    },
                };
                values.push(value);
            }
        }
        Ok(())
    }
}
