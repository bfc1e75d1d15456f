//! Preconditioned conjugate gradient for the assembled SPD systems.
//!
//! One code path serves serial and partitioned runs: each rank applies
//! the matrix on the rows it owns, dot products are summed with an
//! allreduce, and the search direction is kept globally consistent with
//! an allgather of owned entries after every update. With `SerialComm`
//! all collectives short-circuit and this is plain Jacobi-preconditioned
//! CG.

use sprs::CsMat;

use super::linear::SolverStats;
use crate::error::FemError;
use crate::parallel::{Communicator, SerialComm};

pub struct ConjugateGradient {
    max_iterations: usize,
    tolerance: f64,
    abs_tolerance: f64,
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self { max_iterations: 1000, tolerance: 1e-10, abs_tolerance: 1e-14 }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_abs_tolerance(mut self, abs_tolerance: f64) -> Self {
        self.abs_tolerance = abs_tolerance;
        self
    }

    /// Serial solve over all rows.
    pub fn solve(&self, a: &CsMat<f64>, b: &[f64]) -> Result<(Vec<f64>, SolverStats), FemError> {
        let owned: Vec<usize> = (0..b.len()).collect();
        self.solve_partitioned(a, b, &owned, &SerialComm::new())
    }

    /// Distributed solve: this rank applies the matrix on `owned` rows
    /// only; the returned solution vector is globally complete on every
    /// rank.
    pub fn solve_partitioned<C: Communicator>(
        &self,
        a: &CsMat<f64>,
        b: &[f64],
        owned: &[usize],
        comm: &C,
    ) -> Result<(Vec<f64>, SolverStats), FemError> {
        let n = b.len();

        // Jacobi preconditioner from the owned diagonal; empty rows get a
        // unit entry so the preconditioner stays invertible.
        let mut diag = vec![1.0; n];
        for &row in owned {
            if let Some(rv) = a.outer_view(row) {
                if let Some(&d) = rv.get(row) {
                    if d.abs() > 0.0 {
                        diag[row] = d;
                    }
                }
            }
        }

        let owned_sum = |v: &[f64], w: &[f64]| -> f64 {
            owned.iter().map(|&d| v[d] * w[d]).sum::<f64>()
        };

        let b_norm = comm.allreduce_sum(owned_sum(b, b))?.sqrt();
        if b_norm < 1e-25 {
            return Ok((
                vec![0.0; n],
                SolverStats { converged: true, ..SolverStats::default() },
            ));
        }

        let mut x = vec![0.0; n];
        let mut r = vec![0.0; n];
        let mut z = vec![0.0; n];
        let mut p = vec![0.0; n];
        let mut ap = vec![0.0; n];

        for &d in owned {
            r[d] = b[d];
            z[d] = r[d] / diag[d];
            p[d] = z[d];
        }
        let p_entries: Vec<(usize, f64)> = owned.iter().map(|&d| (d, p[d])).collect();
        comm.allgather_entries(&p_entries, &mut p)?;

        let mut rz = comm.allreduce_sum(owned_sum(&r, &z))?;

        let mut iteration = 0;
        let mut converged = false;
        let mut final_res = b_norm;

        while iteration < self.max_iterations {
            comm.check_abort()?;

            Self::matvec_rows(a, owned, &p, &mut ap);
            let p_ap = comm.allreduce_sum(owned_sum(&p, &ap))?;
            if p_ap.abs() < 1e-30 {
                break;
            }
            let alpha = rz / p_ap;

            for &d in owned {
                x[d] += alpha * p[d];
                r[d] -= alpha * ap[d];
            }

            let r_norm = comm.allreduce_sum(owned_sum(&r, &r))?.sqrt();
            final_res = r_norm;
            iteration += 1;
            if r_norm < self.tolerance * b_norm || r_norm < self.abs_tolerance {
                converged = true;
                break;
            }

            for &d in owned {
                z[d] = r[d] / diag[d];
            }
            let rz_new = comm.allreduce_sum(owned_sum(&r, &z))?;
            let beta = rz_new / rz;
            rz = rz_new;

            for &d in owned {
                p[d] = z[d] + beta * p[d];
            }
            let p_entries: Vec<(usize, f64)> = owned.iter().map(|&d| (d, p[d])).collect();
            comm.allgather_entries(&p_entries, &mut p)?;
        }

        // Complete the solution on every rank
        let x_entries: Vec<(usize, f64)> = owned.iter().map(|&d| (d, x[d])).collect();
        comm.allgather_entries(&x_entries, &mut x)?;

        Ok((
            x,
            SolverStats {
                iterations: iteration,
                residual_norm: final_res,
                relative_residual: final_res / b_norm,
                converged,
            },
        ))
    }

    fn matvec_rows(a: &CsMat<f64>, rows: &[usize], x: &[f64], out: &mut [f64]) {
        for &row in rows {
            let mut sum = 0.0;
            if let Some(rv) = a.outer_view(row) {
                for (col, &val) in rv.iter() {
                    sum += val * x[col];
                }
            }
            out[row] = sum;
        }
    }
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sprs::TriMat;

    fn spd_2x2() -> CsMat<f64> {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 0, 2.0);
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, 1.0);
        tri.add_triplet(1, 1, 2.0);
        tri.to_csr()
    }

    #[test]
    fn test_cg_solves_small_spd_system() {
        let a = spd_2x2();
        let (x, stats) = ConjugateGradient::new().solve(&a, &[3.0, 3.0]).unwrap();
        assert!(stats.converged);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn test_cg_zero_rhs_converges_immediately() {
        let a = spd_2x2();
        let (x, stats) = ConjugateGradient::new().solve(&a, &[0.0, 0.0]).unwrap();
        assert!(stats.converged);
        assert_eq!(stats.iterations, 0);
        assert_eq!(x, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cg_iteration_cap_reports_unconverged() {
        // Moderately conditioned 3x3 system with a hard cap of 1 iteration
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 0, 4.0);
        tri.add_triplet(1, 1, 1.0);
        tri.add_triplet(2, 2, 100.0);
        tri.add_triplet(0, 1, 0.5);
        tri.add_triplet(1, 0, 0.5);
        let a = tri.to_csr();
        let (_, stats) =
            ConjugateGradient::new().with_max_iterations(1).solve(&a, &[1.0, 2.0, 3.0]).unwrap();
        assert!(!stats.converged);
        assert_eq!(stats.iterations, 1);
    }
}
