//! Newton outer loop driving assemble/solve cycles.
//!
//! Each iteration assembles the tangent system `K Δu = f_ext - f_int(u)`
//! and applies the full increment. Linear kernels close the residual in
//! one iteration; nonlinear kernels iterate until the out-of-balance
//! force drops below tolerance.

use log::{debug, info, warn};

use super::cg::ConjugateGradient;
use super::direct::DirectSolver;
use crate::assembly::{Assembler, DofMap, GlobalSystem};
use crate::design::DesignVector;
use crate::elements::KernelRegistry;
use crate::error::FemError;
use crate::mesh::MeshStore;
use crate::parallel::Communicator;

/// Analysis lifecycle. Assembly and solve operations check the phase and
/// refuse calls that arrive out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    Unassembled,
    Assembled,
    Converged,
    AdjointReady,
    Diverged,
}

/// Which backend solves the inner linear system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverKind {
    /// Dense LU with cached factors. Serial runs only.
    Direct,
    /// Jacobi-preconditioned CG; works for any partition count.
    ConjugateGradient,
}

#[derive(Debug, Clone)]
pub struct NewtonConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub abs_tolerance: f64,
    /// Residual growth past `divergence_factor * initial` aborts the solve.
    pub divergence_factor: f64,
    pub linear_solver: LinearSolverKind,
    pub linear_max_iterations: usize,
    pub linear_tolerance: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
            abs_tolerance: 1e-12,
            divergence_factor: 1e6,
            linear_solver: LinearSolverKind::Direct,
            linear_max_iterations: 2000,
            linear_tolerance: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewtonStats {
    pub iterations: usize,
    /// Out-of-balance force norm per iteration, oldest first
    pub residual_history: Vec<f64>,
    pub converged: bool,
}

/// Converged primal unknowns, stamped with the design revision they were
/// computed for so stale adjoint requests can be rejected.
#[derive(Debug, Clone)]
pub struct SolutionState {
    pub u: Vec<f64>,
    pub design_revision: u64,
}

/// Result of a forward solve: the last assembled system, the converged
/// state, and the factorization when the direct backend produced one.
pub struct Analysis {
    pub system: GlobalSystem,
    pub state: SolutionState,
    pub stats: NewtonStats,
    pub phase: AnalysisPhase,
    pub(crate) factorization: Option<DirectSolver>,
}

impl Analysis {
    pub fn displacement(&self, dof: usize) -> f64 {
        self.state.u[dof]
    }

    pub(crate) fn set_phase(&mut self, phase: AnalysisPhase) {
        self.phase = phase;
    }
}

pub struct NewtonSolver {
    config: NewtonConfig,
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig) -> Self {
        Self { config }
    }

    /// Forward solve on the partition `comm.rank()`.
    ///
    /// # Errors
    /// * `Convergence` if the iteration cap is hit with the residual above
    ///   tolerance
    /// * `Diverged` if the residual grows past the divergence threshold;
    ///   the error carries the residual history
    /// * any assembly or collective error from the inner loop
    pub fn solve<C: Communicator>(
        &self,
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        design: &DesignVector,
        external_load: &[f64],
        comm: &C,
    ) -> Result<Analysis, FemError> {
        let n = dofs.total_dofs();
        let rank = comm.rank();
        let parts = mesh.partitions();
        let owned_dofs = parts.owned_dofs(rank);

        let mut u = vec![0.0; n];
        let mut history = Vec::new();
        let mut system;
        let mut factorization = None;
        let mut initial_residual = 0.0;

        let mut iteration = 0;
        loop {
            comm.check_abort()?;

            system = Assembler::assemble(mesh, registry, dofs, &u, design, external_load, comm)?;

            let local: f64 = owned_dofs.iter().map(|&d| system.rhs[d] * system.rhs[d]).sum();
            let residual = comm.allreduce_sum(local)?.sqrt();
            history.push(residual);
            debug!("rank {}: newton iteration {}, residual {:.6e}", rank, iteration, residual);

            if iteration == 0 {
                initial_residual = residual;
            }

            let converged = residual < self.config.abs_tolerance
                || (initial_residual > 0.0
                    && residual < self.config.tolerance * initial_residual);
            if converged {
                info!(
                    "rank {}: converged in {} iteration(s), residual {:.3e}",
                    rank, iteration, residual
                );
                break;
            }

            if residual > self.config.divergence_factor * initial_residual.max(f64::MIN_POSITIVE) {
                warn!("rank {}: residual diverged at iteration {}", rank, iteration);
                return Err(FemError::Diverged { residual_history: history });
            }

            if iteration >= self.config.max_iterations {
                return Err(FemError::Convergence { iterations: iteration, residual });
            }

            let du = self.linear_solve(&system, mesh, comm, &mut factorization)?;
            for d in 0..n {
                u[d] += du[d];
            }
            iteration += 1;
        }

        Ok(Analysis {
            system,
            state: SolutionState { u, design_revision: design.revision() },
            stats: NewtonStats {
                iterations: iteration,
                residual_history: history,
                converged: true,
            },
            phase: AnalysisPhase::Converged,
            factorization,
        })
    }

    pub(crate) fn linear_solve<C: Communicator>(
        &self,
        system: &GlobalSystem,
        mesh: &MeshStore,
        comm: &C,
        factorization: &mut Option<DirectSolver>,
    ) -> Result<Vec<f64>, FemError> {
        match self.config.linear_solver {
            LinearSolverKind::Direct if comm.size() == 1 => {
                // Re-factorize each iteration; the factors stay cached for
                // the adjoint solve after convergence.
                let mut direct = DirectSolver::new();
                direct.factorize(&system.matrix)?;
                let (du, stats) = direct.solve(&system.matrix, &system.rhs)?;
                if !stats.converged {
                    return Err(FemError::Convergence {
                        iterations: 0,
                        residual: stats.residual_norm,
                    });
                }
                *factorization = Some(direct);
                Ok(du)
            }
            // A rank only holds the rows it touches, so the dense direct
            // backend cannot run partitioned. Fall through to CG.
            _ => {
                let owned = mesh.partitions().owned_dofs(comm.rank());
                let cg = ConjugateGradient::new()
                    .with_max_iterations(self.config.linear_max_iterations)
                    .with_tolerance(self.config.linear_tolerance);
                let (du, stats) =
                    cg.solve_partitioned(&system.matrix, &system.rhs, owned, comm)?;
                if !stats.converged {
                    return Err(FemError::Convergence {
                        iterations: stats.iterations,
                        residual: stats.residual_norm,
                    });
                }
                Ok(du)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshBuilder, MeshStore};
    use crate::parallel::SerialComm;
    use approx::assert_relative_eq;

    fn bar_problem(n_elems: usize) -> (MeshStore, KernelRegistry, DofMap, DesignVector, Vec<f64>) {
        let mesh = MeshStore::from_raw(MeshBuilder::bar_chain(n_elems, n_elems as f64), 1).unwrap();
        let registry = KernelRegistry::with_defaults();
        let mut dofs = DofMap::new(mesh.num_nodes(), 1);
        dofs.set_dirichlet(0, 0.0);
        let design = DesignVector::new(&vec![1.0; n_elems]);
        let mut load = vec![0.0; mesh.total_dofs()];
        load[n_elems] = 1.0;
        (mesh, registry, dofs, design, load)
    }

    #[test]
    fn test_linear_bar_converges_in_one_iteration() {
        let (mesh, registry, dofs, design, load) = bar_problem(2);
        let analysis = NewtonSolver::new(NewtonConfig::default())
            .solve(&mesh, &registry, &dofs, &design, &load, &SerialComm::new())
            .unwrap();

        assert_eq!(analysis.phase, AnalysisPhase::Converged);
        assert_eq!(analysis.stats.iterations, 1);
        // Unit-stiffness chain under unit tip load: u = [0, 1, 2]
        assert_relative_eq!(analysis.state.u[0], 0.0, epsilon = 1e-10);
        assert_relative_eq!(analysis.state.u[1], 1.0, epsilon = 1e-10);
        assert_relative_eq!(analysis.state.u[2], 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_cg_backend_matches_direct() {
        let (mesh, registry, dofs, design, load) = bar_problem(4);
        let config = NewtonConfig {
            linear_solver: LinearSolverKind::ConjugateGradient,
            ..NewtonConfig::default()
        };
        let analysis = NewtonSolver::new(config)
            .solve(&mesh, &registry, &dofs, &design, &load, &SerialComm::new())
            .unwrap();
        for node in 0..5 {
            assert_relative_eq!(analysis.state.u[node], node as f64, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_nonzero_dirichlet_value_is_imposed() {
        let (mesh, registry, _, design, load) = bar_problem(2);
        let mut dofs = DofMap::new(mesh.num_nodes(), 1);
        dofs.set_dirichlet(0, 0.5);
        let analysis = NewtonSolver::new(NewtonConfig::default())
            .solve(&mesh, &registry, &dofs, &design, &load, &SerialComm::new())
            .unwrap();
        assert_relative_eq!(analysis.state.u[0], 0.5, epsilon = 1e-10);
        assert_relative_eq!(analysis.state.u[2], 2.5, epsilon = 1e-10);
    }

    #[test]
    fn test_iteration_cap_surfaces_convergence_error() {
        let (mesh, registry, dofs, design, load) = bar_problem(2);
        let config = NewtonConfig {
            max_iterations: 0,
            tolerance: 1e-300,
            abs_tolerance: 0.0,
            ..NewtonConfig::default()
        };
        let err = NewtonSolver::new(config)
            .solve(&mesh, &registry, &dofs, &design, &load, &SerialComm::new())
            .err()
            .unwrap();
        assert!(matches!(err, FemError::Convergence { .. }));
        assert!(err.is_recoverable());
    }
}
