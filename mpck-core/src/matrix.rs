// mpck-core/src/matrix.rs
//! Square-matrix helpers for the full-matrix (Mahalanobis) metric family.
//!
//! Thin wrappers over `smartcore` dense matrices: outer-product accumulation,
//! trace, signed determinant / inverse through LU, and positive-definiteness
//! plus log-determinant through Cholesky.

use smartcore::linalg::basic::arrays::{Array, Array2, MutArray};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linalg::traits::cholesky::CholeskyDecomposable;
use smartcore::linalg::traits::lu::LUDecomposable;

pub type SquareMatrix = DenseMatrix<f64>;

pub fn zeros(n: usize) -> SquareMatrix {
    DenseMatrix::zeros(n, n)
}

pub fn identity(n: usize) -> SquareMatrix {
    let mut m = zeros(n);
    for i in 0..n {
        m.set((i, i), 1.0);
    }
    m
}

#[inline]
pub fn dim(m: &SquareMatrix) -> usize {
    m.shape().0
}

/// `acc += alpha * d dᵀ`
pub fn add_outer(acc: &mut SquareMatrix, d: &[f64], alpha: f64) {
    let n = d.len();
    debug_assert_eq!(dim(acc), n);
    for i in 0..n {
        if d[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            let v = *acc.get((i, j)) + alpha * d[i] * d[j];
            acc.set((i, j), v);
        }
    }
}

/// `acc += alpha * m`
pub fn add_scaled(acc: &mut SquareMatrix, m: &SquareMatrix, alpha: f64) {
    let n = dim(acc);
    for i in 0..n {
        for j in 0..n {
            let v = *acc.get((i, j)) + alpha * *m.get((i, j));
            acc.set((i, j), v);
        }
    }
}

/// `acc += alpha * I`
pub fn add_identity(acc: &mut SquareMatrix, alpha: f64) {
    for i in 0..dim(acc) {
        let v = *acc.get((i, i)) + alpha;
        acc.set((i, i), v);
    }
}

pub fn scale(m: &mut SquareMatrix, alpha: f64) {
    let n = dim(m);
    for i in 0..n {
        for j in 0..n {
            let v = *m.get((i, j)) * alpha;
            m.set((i, j), v);
        }
    }
}

pub fn trace(m: &SquareMatrix) -> f64 {
    diagonal(m).iter().sum()
}

pub fn diagonal(m: &SquareMatrix) -> Vec<f64> {
    (0..dim(m)).map(|i| *m.get((i, i))).collect()
}

/// `dᵀ m d`
pub fn quadratic_form(m: &SquareMatrix, d: &[f64]) -> f64 {
    let n = d.len();
    let mut acc = 0.0;
    for i in 0..n {
        if d[i] == 0.0 {
            continue;
        }
        let mut row = 0.0;
        for j in 0..n {
            row += *m.get((i, j)) * d[j];
        }
        acc += d[i] * row;
    }
    acc
}

/// Signed determinant: product of the `U` diagonal times the sign of the row
/// permutation. A failed decomposition counts as singular.
pub fn determinant(m: &SquareMatrix) -> f64 {
    let Ok(lu) = m.lu() else {
        return 0.0;
    };
    let u = lu.U();
    let diag: f64 = (0..dim(m)).map(|i| *u.get((i, i))).product();
    permutation_sign(&lu.pivot()) * diag
}

/// Sign of a permutation matrix, from the parity of its cycle decomposition.
fn permutation_sign(p: &SquareMatrix) -> f64 {
    let n = dim(p);
    let target: Vec<usize> = (0..n)
        .map(|i| (0..n).find(|&j| *p.get((i, j)) == 1.0).unwrap_or(i))
        .collect();

    let mut seen = vec![false; n];
    let mut sign = 1.0;
    for start in 0..n {
        if seen[start] {
            continue;
        }
        let mut len = 0;
        let mut i = start;
        while !seen[i] {
            seen[i] = true;
            i = target[i];
            len += 1;
        }
        // a cycle of length k is k - 1 transpositions
        if len % 2 == 0 {
            sign = -sign;
        }
    }
    sign
}

/// Smallest squared Cholesky pivot accepted, relative to the largest diagonal
/// entry of the input.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Diagonal of the Cholesky factor, `None` unless every squared pivot clears
/// `PIVOT_TOLERANCE`.
fn cholesky_diagonal(m: &SquareMatrix) -> Option<Vec<f64>> {
    let n = dim(m);
    let scale = (0..n).map(|i| m.get((i, i)).abs()).fold(0.0, f64::max);
    let l = m.cholesky().ok()?.L();
    let diag: Vec<f64> = (0..n).map(|i| *l.get((i, i))).collect();
    diag.iter()
        .all(|d| d.is_finite() && d * d > PIVOT_TOLERANCE * scale)
        .then_some(diag)
}

/// `ln det m = 2 Σ ln L_ii` for a positive-definite `m`; `None` otherwise.
pub fn log_determinant(m: &SquareMatrix) -> Option<f64> {
    cholesky_diagonal(m).map(|diag| 2.0 * diag.iter().map(|d| d.ln()).sum::<f64>())
}

/// `None` when the matrix is singular.
pub fn inverse(m: &SquareMatrix) -> Option<SquareMatrix> {
    let det = determinant(m);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    m.lu().ok()?.inverse().ok()
}

/// Cholesky succeeds and every pivot clears the tolerance.
pub fn is_positive_definite(m: &SquareMatrix) -> bool {
    cholesky_diagonal(m).is_some()
}

/// Symmetrize in place: `m = (m + mᵀ) / 2`
pub fn symmetrize(m: &mut SquareMatrix) {
    let n = dim(m);
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (*m.get((i, j)) + *m.get((j, i)));
            m.set((i, j), v);
            m.set((j, i), v);
        }
    }
}

pub fn from_rows(rows: &[Vec<f64>]) -> SquareMatrix {
    let n = rows.len();
    let mut m = zeros(n);
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate().take(n) {
            m.set((i, j), v);
        }
    }
    m
}

pub fn to_rows(m: &SquareMatrix) -> Vec<Vec<f64>> {
    let n = dim(m);
    (0..n)
        .map(|i| (0..n).map(|j| *m.get((i, j))).collect())
        .collect()
}
