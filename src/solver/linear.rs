use sprs::CsMat;

/// Statistics from a linear solve
#[derive(Debug, Clone, Default)]
pub struct SolverStats {
    /// Number of iterations (0 for direct solvers)
    pub iterations: usize,
    /// Final residual norm ||b - Ax||
    pub residual_norm: f64,
    /// Relative residual ||b - Ax|| / ||b||
    pub relative_residual: f64,
    /// Whether the solver converged
    pub converged: bool,
}

/// A linear operator A that can be applied to a vector
pub trait LinearOperator {
    /// out = A * v
    fn apply(&self, v: &[f64]) -> Vec<f64>;

    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
}

impl LinearOperator for CsMat<f64> {
    fn apply(&self, v: &[f64]) -> Vec<f64> {
        let n = self.rows();
        let mut result = vec![0.0; n];
        for (row_idx, row) in self.outer_iterator().enumerate() {
            let mut sum = 0.0;
            for (col_idx, &val) in row.iter() {
                sum += val * v[col_idx];
            }
            result[row_idx] = sum;
        }
        result
    }

    fn rows(&self) -> usize {
        self.rows()
    }

    fn cols(&self) -> usize {
        self.cols()
    }
}

/// Shared residual/norm helpers
pub struct SolverUtils;

impl SolverUtils {
    /// r = b - Ax
    #[allow(non_snake_case)]
    pub fn compute_residual<O: LinearOperator>(A: &O, x: &[f64], b: &[f64]) -> Vec<f64> {
        let ax = A.apply(x);
        b.iter().zip(ax.iter()).map(|(&bi, &axi)| bi - axi).collect()
    }

    pub fn norm(v: &[f64]) -> f64 {
        v.iter().map(|&x| x * x).sum::<f64>().sqrt()
    }

    #[allow(non_snake_case)]
    pub fn residual_norm<O: LinearOperator>(A: &O, x: &[f64], b: &[f64]) -> f64 {
        Self::norm(&Self::compute_residual(A, x, b))
    }

    #[allow(non_snake_case)]
    pub fn relative_residual<O: LinearOperator>(A: &O, x: &[f64], b: &[f64]) -> f64 {
        let r_norm = Self::residual_norm(A, x, b);
        let b_norm = Self::norm(b);
        if b_norm < 1e-14 {
            r_norm
        } else {
            r_norm / b_norm
        }
    }
}
