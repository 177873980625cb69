//! Fixed-size symmetric solvers: Cholesky and cyclic Jacobi.
//!
//! Sizes here are tiny (at most 8x8 for the Gruen normal equations) so
//! everything lives on the stack in const-generic arrays.

use crate::error::{Error, Result};

/// Sweep cap for [`jacobi_eigen`]; enough for the 2x2 and 3x3 inputs it sees.
pub const MAX_JACOBI_SWEEPS: usize = 50;

pub type Matrix<const N: usize> = [[f64; N]; N];

/// Lower-triangular Cholesky factor `L` with `A = L * L^T`.
///
/// Returns `None` if `a` is not positive definite (non-positive pivot).
#[allow(clippy::needless_range_loop)]
pub fn cholesky_decompose<const N: usize>(a: &Matrix<N>) -> Option<Matrix<N>> {
    let mut l = [[0.0; N]; N];
    for i in 0..N {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i][i] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `L * L^T * x = b` given the factor from [`cholesky_decompose`].
#[allow(clippy::needless_range_loop)]
pub fn cholesky_solve<const N: usize>(l: &Matrix<N>, b: &[f64; N]) -> [f64; N] {
    let mut y = [0.0; N];
    for i in 0..N {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }

    let mut x = [0.0; N];
    for i in (0..N).rev() {
        let mut sum = y[i];
        for k in (i + 1)..N {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }
    x
}

/// Inverse of a symmetric positive definite matrix through its Cholesky factor.
pub fn cholesky_inverse<const N: usize>(l: &Matrix<N>) -> Matrix<N> {
    let mut inv = [[0.0; N]; N];
    for col in 0..N {
        let mut e = [0.0; N];
        e[col] = 1.0;
        let x = cholesky_solve(l, &e);
        for (row, value) in x.iter().enumerate() {
            inv[row][col] = *value;
        }
    }
    inv
}

/// Eigenvalues and eigenvectors (columns of the returned matrix) of a
/// symmetric matrix by cyclic Jacobi rotations. Eigenvalues are sorted in
/// descending order.
#[allow(clippy::needless_range_loop)]
pub fn jacobi_eigen<const N: usize>(a: &Matrix<N>) -> Result<([f64; N], Matrix<N>)> {
    let mut m = *a;
    let mut v = [[0.0; N]; N];
    for i in 0..N {
        v[i][i] = 1.0;
    }

    let scale = m.iter().flatten().map(|x| x * x).sum::<f64>().sqrt();

    let mut converged = false;
    for _ in 0..MAX_JACOBI_SWEEPS {
        let off: f64 = (0..N)
            .flat_map(|p| ((p + 1)..N).map(move |q| (p, q)))
            .map(|(p, q)| m[p][q] * m[p][q])
            .sum();
        if off.sqrt() <= f64::EPSILON * scale || off == 0.0 {
            converged = true;
            break;
        }

        for p in 0..N {
            for q in (p + 1)..N {
                if m[p][q] == 0.0 {
                    continue;
                }
                let theta = (m[q][q] - m[p][p]) / (2.0 * m[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..N {
                    let mkp = m[k][p];
                    let mkq = m[k][q];
                    m[k][p] = c * mkp - s * mkq;
                    m[k][q] = s * mkp + c * mkq;
                }
                for k in 0..N {
                    let mpk = m[p][k];
                    let mqk = m[q][k];
                    m[p][k] = c * mpk - s * mqk;
                    m[q][k] = s * mpk + c * mqk;
                }
                for k in 0..N {
                    let vkp = v[k][p];
                    let vkq = v[k][q];
                    v[k][p] = c * vkp - s * vkq;
                    v[k][q] = s * vkp + c * vkq;
                }
            }
        }
    }

    if !converged {
        return Err(Error::EigenNotConverged {
            sweeps: MAX_JACOBI_SWEEPS,
        });
    }

    let mut order: [usize; N] = std::array::from_fn(|i| i);
    order.sort_by(|&i, &j| m[j][j].total_cmp(&m[i][i]));

    let values = std::array::from_fn(|i| m[order[i]][order[i]]);
    let mut vectors = [[0.0; N]; N];
    for (dst, &src) in order.iter().enumerate() {
        for k in 0..N {
            vectors[k][dst] = v[k][src];
        }
    }
    Ok((values, vectors))
}

/// Accumulates `A^T A` and `A^T b` one observation row at a time.
#[derive(Debug, Clone)]
pub struct NormalEquations<const N: usize> {
    pub ata: Matrix<N>,
    pub atb: [f64; N],
    pub rows: usize,
}

impl<const N: usize> Default for NormalEquations<N> {
    fn default() -> Self {
        Self {
            ata: [[0.0; N]; N],
            atb: [0.0; N],
            rows: 0,
        }
    }
}

impl<const N: usize> NormalEquations<N> {
    #[allow(clippy::needless_range_loop)]
    pub fn add_row(&mut self, row: &[f64; N], rhs: f64) {
        for i in 0..N {
            self.atb[i] += row[i] * rhs;
            for j in 0..=i {
                self.ata[i][j] += row[i] * row[j];
            }
        }
        self.rows += 1;
    }

    /// Mirrors the accumulated lower triangle into the upper one.
    pub fn symmetric(&self) -> Matrix<N> {
        let mut a = self.ata;
        for i in 0..N {
            for j in (i + 1)..N {
                a[i][j] = a[j][i];
            }
        }
        a
    }

    /// Least-squares solution, or `None` when the system is rank deficient.
    pub fn solve(&self) -> Option<[f64; N]> {
        if self.rows < N {
            return None;
        }
        let l = cholesky_decompose(&self.symmetric())?;
        let x = cholesky_solve(&l, &self.atb);
        x.iter().all(|v| v.is_finite()).then_some(x)
    }
}
