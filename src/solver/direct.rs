use nalgebra::{DMatrix, DVector, Dyn, LU};
use sprs::CsMat;

use super::linear::{SolverStats, SolverUtils};
use crate::error::FemError;

/// Direct solver with a cached dense LU factorization.
///
/// The factorization is computed once per assembled matrix and reused
/// across solves, which is what makes the adjoint solve cheap: for a
/// symmetric stiffness matrix the transpose solve reuses the same
/// factors. Suited to small and medium systems; large runs should use
/// [`ConjugateGradient`](super::ConjugateGradient).
pub struct DirectSolver {
    lu: Option<LU<f64, Dyn, Dyn>>,
    lu_transpose: Option<LU<f64, Dyn, Dyn>>,
    dense: Option<DMatrix<f64>>,
    symmetric: bool,
}

impl DirectSolver {
    pub fn new() -> Self {
        Self { lu: None, lu_transpose: None, dense: None, symmetric: false }
    }

    /// Factorize the matrix, replacing any cached factorization.
    pub fn factorize(&mut self, a: &CsMat<f64>) -> Result<(), FemError> {
        let n = a.rows();
        let mut dense = DMatrix::zeros(n, n);
        for (row_idx, row) in a.outer_iterator().enumerate() {
            for (col_idx, &val) in row.iter() {
                dense[(row_idx, col_idx)] = val;
            }
        }
        self.symmetric = {
            let mut sym = true;
            'outer: for i in 0..n {
                for j in (i + 1)..n {
                    if (dense[(i, j)] - dense[(j, i)]).abs() > 1e-12 {
                        sym = false;
                        break 'outer;
                    }
                }
            }
            sym
        };
        self.lu = Some(dense.clone().lu());
        self.lu_transpose = None;
        self.dense = Some(dense);
        Ok(())
    }

    pub fn is_factorized(&self) -> bool {
        self.lu.is_some()
    }

    /// Solve `A x = b` with the cached factorization.
    pub fn solve(&self, a: &CsMat<f64>, b: &[f64]) -> Result<(Vec<f64>, SolverStats), FemError> {
        let lu = self.lu.as_ref().ok_or_else(|| {
            FemError::InvalidPhase("direct solve requested before factorization".to_string())
        })?;
        let x_vec = lu.solve(&DVector::from_vec(b.to_vec())).ok_or_else(|| {
            FemError::malformed("singular stiffness matrix; model may be under-constrained")
        })?;
        let x: Vec<f64> = x_vec.iter().copied().collect();
        Ok((x.clone(), Self::stats(a, &x, b)))
    }

    /// Solve `A^T x = b`. Reuses the primal factors when the matrix is
    /// symmetric; otherwise a transpose factorization is computed on
    /// first use and cached.
    pub fn solve_transposed(
        &mut self,
        a: &CsMat<f64>,
        b: &[f64],
    ) -> Result<(Vec<f64>, SolverStats), FemError> {
        if self.symmetric {
            return self.solve(a, b);
        }
        if self.lu_transpose.is_none() {
            let dense = self.dense.as_ref().ok_or_else(|| {
                FemError::InvalidPhase("transpose solve requested before factorization".to_string())
            })?;
            self.lu_transpose = Some(dense.transpose().lu());
        }
        let lu = self.lu_transpose.as_ref().unwrap();
        let x_vec = lu.solve(&DVector::from_vec(b.to_vec())).ok_or_else(|| {
            FemError::malformed("singular stiffness matrix; model may be under-constrained")
        })?;
        let x: Vec<f64> = x_vec.iter().copied().collect();
        let at = a.transpose_view().to_csr();
        Ok((x.clone(), Self::stats(&at, &x, b)))
    }

    fn stats(a: &CsMat<f64>, x: &[f64], b: &[f64]) -> SolverStats {
        let residual_norm = SolverUtils::residual_norm(a, x, b);
        let relative_residual = SolverUtils::relative_residual(a, x, b);
        SolverStats {
            iterations: 0,
            residual_norm,
            relative_residual,
            converged: relative_residual < 1e-8,
        }
    }
}

impl Default for DirectSolver {
    fn default() -> Self {
        Self::new()
    }
}
