//! Lays a grid of tie points over the pattern raster and registers each one
//! against the search raster.
//!
//! Rows are independent: each gets its own clone of the matcher, so rows can
//! run on the rayon pool while every matcher stays single-threaded. Output
//! stays in row-major order.

mod control_net;

#[cfg(test)]
mod tests;

pub use control_net::{
    ControlMeasure, ControlNet, ControlPoint, GruenLog, MeasureLog, MeasureType, FLAT_CSV_HEADER,
};

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::matcher::{AlgorithmStatistics, AutoReg, RegistrationStatistics};
use crate::math::Statistics;
use crate::raster::{Raster, RasterCache};
use crate::rubber_sheet::ForwardMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GridConfig {
    /// Grid rows; `None` spaces rows roughly one search chip apart.
    pub rows: Option<usize>,
    pub columns: Option<usize>,
    pub band: usize,
    pub point_id_prefix: String,
    pub network_id: String,
    /// Run rows on the rayon pool.
    pub parallel: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: None,
            columns: None,
            band: 1,
            point_id_prefix: "coreg".to_string(),
            network_id: "Coreg".to_string(),
            parallel: true,
        }
    }
}

impl GridConfig {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows: Some(rows),
            columns: Some(columns),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows == Some(0) || self.columns == Some(0) {
            return Err(Error::config("Grid rows and columns must be positive"));
        }
        if self.band == 0 {
            return Err(Error::config("Grid band must be >= 1"));
        }
        Ok(())
    }
}

/// `count` positions spread evenly over `1..=extent`, centred.
fn grid_axis(extent: usize, count: usize) -> Vec<f64> {
    let count = count.clamp(1, extent.max(1));
    let spacing = extent / count;
    let first = 1 + (extent - (count - 1) * spacing) / 2;
    (0..count).map(|i| (first + i * spacing) as f64).collect()
}

/// Pattern position and registered search position of one tie point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TiePoint {
    pub pattern: (f64, f64),
    pub search: (f64, f64),
}

#[derive(Debug, Clone, Default)]
pub struct CoregSummary {
    /// Grid nodes laid down, including skipped ones.
    pub grid_points: usize,
    /// Nodes whose nominal position fell off the search raster.
    pub skipped: usize,
    pub sample_difference: Statistics,
    pub line_difference: Statistics,
    pub registration: RegistrationStatistics,
    pub algorithm: AlgorithmStatistics,
    ties: Vec<TiePoint>,
}

impl CoregSummary {
    pub fn ties(&self) -> &[TiePoint] {
        &self.ties
    }

    /// Mean `(search - pattern)` over registered points.
    pub fn mean_translation(&self) -> Option<(f64, f64)> {
        Some((self.sample_difference.average()?, self.line_difference.average()?))
    }

    /// Least-squares affine from pattern to search coordinates over the
    /// registered points.
    pub fn fit_affine(&self) -> Result<Affine> {
        let (x, y): (Vec<f64>, Vec<f64>) = self.ties.iter().map(|t| t.pattern).unzip();
        let (xp, yp): (Vec<f64>, Vec<f64>) = self.ties.iter().map(|t| t.search).unzip();
        Affine::solve(&x, &y, &xp, &yp)
    }

    fn merge(&mut self, other: RowResult) {
        self.skipped += other.skipped;
        self.registration.merge(&other.registration);
        self.algorithm.merge(&other.algorithm);
        for tie in other.ties {
            self.sample_difference.add(tie.search.0 - tie.pattern.0);
            self.line_difference.add(tie.search.1 - tie.pattern.1);
            self.ties.push(tie);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoregRun {
    pub net: ControlNet,
    pub summary: CoregSummary,
}

#[derive(Default)]
struct RowResult {
    points: Vec<ControlPoint>,
    ties: Vec<TiePoint>,
    skipped: usize,
    registration: RegistrationStatistics,
    algorithm: AlgorithmStatistics,
}

enum RasterHandle<'a> {
    Borrowed(&'a dyn Raster),
    Shared(Arc<dyn Raster>),
}

impl<'a> Deref for RasterHandle<'a> {
    type Target = dyn Raster + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            RasterHandle::Borrowed(r) => *r,
            RasterHandle::Shared(r) => r.as_ref(),
        }
    }
}

enum RasterSource<'a> {
    Open {
        pattern: &'a dyn Raster,
        search: &'a dyn Raster,
    },
    Cached {
        cache: &'a RasterCache,
        pattern: &'a Path,
        search: &'a Path,
    },
}

impl<'a> RasterSource<'a> {
    fn resolve(&self) -> Result<(RasterHandle<'a>, RasterHandle<'a>)> {
        Ok(match *self {
            RasterSource::Open { pattern, search } => {
                (RasterHandle::Borrowed(pattern), RasterHandle::Borrowed(search))
            }
            RasterSource::Cached {
                cache,
                pattern,
                search,
            } => (
                RasterHandle::Shared(cache.get(pattern)?),
                RasterHandle::Shared(cache.get(search)?),
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CoregDriver {
    grid: GridConfig,
    pattern_name: String,
    search_name: String,
}

impl CoregDriver {
    pub fn new(grid: GridConfig) -> Result<Self> {
        grid.validate()?;
        Ok(Self {
            grid,
            pattern_name: "pattern".to_string(),
            search_name: "search".to_string(),
        })
    }

    /// Serial numbers written into the measures.
    pub fn with_names(mut self, pattern: &str, search: &str) -> Self {
        self.pattern_name = pattern.to_string();
        self.search_name = search.to_string();
        self
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    /// Grid sample positions (columns) and line positions (rows) over a
    /// pattern raster of the given size.
    pub fn grid_points(&self, matcher: &AutoReg, samples: usize, lines: usize) -> (Vec<f64>, Vec<f64>) {
        let chip = matcher.search_chip();
        let columns = self
            .grid
            .columns
            .unwrap_or_else(|| samples.saturating_sub(1) / chip.samples() + 1);
        let rows = self
            .grid
            .rows
            .unwrap_or_else(|| lines.saturating_sub(1) / chip.lines() + 1);
        (grid_axis(samples, columns), grid_axis(lines, rows))
    }

    /// Registers every grid node of `pattern` against `search`. `nominal`
    /// maps pattern coordinates to the expected search coordinates.
    pub fn run(
        &self,
        matcher: &AutoReg,
        pattern: &dyn Raster,
        search: &dyn Raster,
        nominal: &dyn ForwardMap,
    ) -> Result<CoregRun> {
        self.run_source(matcher, RasterSource::Open { pattern, search }, nominal)
    }

    /// Like [`CoregDriver::run`] with both rasters resolved through `cache`
    /// at the start of every row, so an evicted handle is reopened.
    pub fn run_cached(
        &self,
        matcher: &AutoReg,
        cache: &RasterCache,
        pattern: &Path,
        search: &Path,
        nominal: &dyn ForwardMap,
    ) -> Result<CoregRun> {
        self.run_source(
            matcher,
            RasterSource::Cached {
                cache,
                pattern,
                search,
            },
            nominal,
        )
    }

    fn run_source(
        &self,
        matcher: &AutoReg,
        source: RasterSource<'_>,
        nominal: &dyn ForwardMap,
    ) -> Result<CoregRun> {
        let (pattern, search) = source.resolve()?;
        if self.grid.band > pattern.bands() || self.grid.band > search.bands() {
            return Err(Error::config(format!(
                "Band {} not present in both rasters",
                self.grid.band
            )));
        }
        let (samples, lines) = self.grid_points(matcher, pattern.samples(), pattern.lines());
        drop((pattern, search));

        // One matcher per row, statistics starting from zero.
        let jobs: Vec<(usize, f64, AutoReg)> = lines
            .iter()
            .enumerate()
            .map(|(row, &line)| {
                let mut m = matcher.clone();
                m.reset_statistics();
                (row, line, m)
            })
            .collect();
        let run_row = |(row, line, matcher): (usize, f64, AutoReg)| {
            self.run_row(matcher, &source, nominal, row, line, &samples)
        };
        let rows: Vec<RowResult> = if self.grid.parallel {
            jobs.into_par_iter().map(run_row).collect::<Result<_>>()?
        } else {
            jobs.into_iter().map(run_row).collect::<Result<_>>()?
        };

        let mut net = ControlNet::new(&self.grid.network_id);
        let mut summary = CoregSummary {
            grid_points: samples.len() * lines.len(),
            ..Default::default()
        };
        for mut row in rows {
            net.points.append(&mut row.points);
            summary.merge(row);
        }

        tracing::info!(
            "Registered {} of {} grid points ({} skipped), mean translation {:?}",
            summary.ties.len(),
            summary.grid_points,
            summary.skipped,
            summary.mean_translation()
        );
        for (status, count) in summary.registration.counts() {
            tracing::info!("  {}: {}", status, count);
        }
        Ok(CoregRun { net, summary })
    }

    fn run_row(
        &self,
        mut matcher: AutoReg,
        source: &RasterSource<'_>,
        nominal: &dyn ForwardMap,
        row: usize,
        line: f64,
        samples: &[f64],
    ) -> Result<RowResult> {
        let (pattern, search) = source.resolve()?;
        let band = self.grid.band;
        let (ns, nl) = (search.samples() as f64, search.lines() as f64);
        let mut out = RowResult::default();

        for (col, &sample) in samples.iter().enumerate() {
            let id = format!("{}_{}_{}", self.grid.point_id_prefix, row + 1, col + 1);
            let Some((ss, sl)) = nominal
                .input_to_output(sample, line)
                .filter(|&(s, l)| s >= 0.5 && l >= 0.5 && s <= ns + 0.5 && l <= nl + 0.5)
            else {
                tracing::debug!("Point {} has no nominal position on the search raster", id);
                out.skipped += 1;
                continue;
            };

            let pattern_chip = matcher.pattern_chip_mut();
            pattern_chip.tack_cube(sample, line);
            pattern_chip.load(&*pattern, 0.0, 1.0, band)?;
            let search_chip = matcher.search_chip_mut();
            search_chip.tack_cube(ss, sl);
            search_chip.load(&*search, 0.0, 1.0, band)?;

            let registration = matcher.register()?;
            let measure = ControlMeasure::registered(&self.search_name, (ss, sl), &registration);
            if measure.is_registered() {
                out.ties.push(TiePoint {
                    pattern: (sample, line),
                    search: (measure.sample, measure.line),
                });
            }
            out.points.push(ControlPoint {
                id,
                ignored: !measure.is_registered(),
                reference: ControlMeasure::reference(&self.pattern_name, sample, line),
                measure,
            });
        }

        out.registration = matcher.statistics().clone();
        out.algorithm = matcher.algorithm_statistics();
        Ok(out)
    }
}
