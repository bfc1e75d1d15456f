//! Backward Euler time marching for first-order transient response.
//!
//! Each step solves the effective system `(M/Δt + K) Δu = f_ext - f_int`
//! where M is the unit-density lumped mass diagonal, then advances
//! `u_{n+1} = u_n + Δu`. Unconditionally stable for any step size; with a
//! constant load the solution relaxes onto the static equilibrium.
//!
//! The adjoint marches the stored states backwards: at each step the
//! transposed effective operator is solved with the mass-propagated
//! right-hand side `(M/Δt) λ_{n+1}`, seeded by `dJ/du` at the final step,
//! and `λ^T ∂R/∂x` is accumulated at that step's state. The mass is
//! design-independent, so only the internal force contributes. The
//! tangent is assembled fresh each step; the adjoint reuses the final
//! step's operator, which is exact for kernels whose tangent does not
//! depend on the state.

use log::{debug, info};

use super::adjoint::Gradient;
use super::cg::ConjugateGradient;
use super::direct::DirectSolver;
use super::functional::Functional;
use super::newton::{NewtonConfig, NewtonSolver};
use crate::assembly::{Assembler, DofMap, GlobalSystem};
use crate::design::DesignVector;
use crate::elements::{KernelInput, KernelRegistry};
use crate::error::FemError;
use crate::mesh::MeshStore;
use crate::parallel::Communicator;

/// Per-step summary of the marching loop
#[derive(Debug, Clone)]
pub struct TimeStepStats {
    /// Simulation time after the step
    pub time: f64,
    /// Step size used
    pub dt: f64,
    /// Out-of-balance force norm at the start of the step
    pub residual: f64,
}

/// Result of a transient integration: the full state history plus the
/// operator data the adjoint march needs.
pub struct TransientAnalysis {
    /// Simulation time per stored state; `times[0]` is 0
    pub times: Vec<f64>,
    /// Nodal states, `states[0]` at rest through `states[n]` at `times[n]`
    pub states: Vec<Vec<f64>>,
    pub step_stats: Vec<TimeStepStats>,
    pub design_revision: u64,
    pub(crate) system: GlobalSystem,
    pub(crate) mass: Vec<f64>,
    pub(crate) factorization: Option<DirectSolver>,
}

impl TransientAnalysis {
    pub fn num_steps(&self) -> usize {
        self.step_stats.len()
    }

    /// State at the end of the march
    pub fn final_state(&self) -> &[f64] {
        &self.states[self.states.len() - 1]
    }
}

/// First-order implicit integrator driving the assemble/solve machinery
/// of the static path, one linearized solve per step.
pub struct BackwardEuler {
    dt: f64,
    config: NewtonConfig,
}

impl BackwardEuler {
    pub fn new(dt: f64) -> Self {
        assert!(dt > 0.0, "Time step must be positive, got {}", dt);
        Self { dt, config: NewtonConfig::default() }
    }

    /// Linear backend settings for the per-step solves
    pub fn with_config(mut self, config: NewtonConfig) -> Self {
        self.config = config;
        self
    }

    /// March `num_steps` steps from rest on the partition `comm.rank()`.
    ///
    /// # Errors
    /// * `Convergence` if a per-step linear solve fails to converge
    /// * any assembly or collective error from the inner loop
    pub fn integrate<C: Communicator>(
        &self,
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        design: &DesignVector,
        external_load: &[f64],
        num_steps: usize,
        comm: &C,
    ) -> Result<TransientAnalysis, FemError> {
        assert!(num_steps > 0, "Number of steps must be positive, got {}", num_steps);

        let n = dofs.total_dofs();
        let rank = comm.rank();
        let owned_dofs = mesh.partitions().owned_dofs(rank);
        let mass = Self::assemble_lumped_mass(mesh, registry, dofs, design, comm)?;
        let solver = NewtonSolver::new(self.config.clone());

        let mut u = vec![0.0; n];
        let mut time = 0.0;
        let mut times = vec![0.0];
        let mut states = vec![u.clone()];
        let mut step_stats = Vec::with_capacity(num_steps);
        let mut factorization = None;
        let mut system;

        let mut step = 0;
        loop {
            comm.check_abort()?;

            system = Assembler::assemble(mesh, registry, dofs, &u, design, external_load, comm)?;
            let local: f64 = owned_dofs.iter().map(|&d| system.rhs[d] * system.rhs[d]).sum();
            let residual = comm.allreduce_sum(local)?.sqrt();

            Self::shift_mass(&mut system, &mass, self.dt, dofs);
            let du = solver.linear_solve(&system, mesh, comm, &mut factorization)?;
            for d in 0..n {
                u[d] += du[d];
            }

            step += 1;
            time += self.dt;
            times.push(time);
            states.push(u.clone());
            step_stats.push(TimeStepStats { time, dt: self.dt, residual });
            debug!("rank {}: step {} to t = {:.6e}, residual {:.6e}", rank, step, time, residual);

            if step == num_steps {
                break;
            }
        }

        info!("rank {}: integrated {} step(s) to t = {:.6e}", rank, num_steps, time);
        Ok(TransientAnalysis {
            times,
            states,
            step_stats,
            design_revision: design.revision(),
            system,
            mass,
            factorization,
        })
    }

    /// Total derivative of a final-time functional, accumulated over the
    /// stored step history by a backward adjoint march.
    ///
    /// # Errors
    /// `InvalidPhase` if the design changed since the integration.
    #[allow(clippy::too_many_arguments)]
    pub fn adjoint_gradient<C: Communicator>(
        &self,
        analysis: &mut TransientAnalysis,
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        design: &DesignVector,
        external_load: &[f64],
        functional: &dyn Functional,
        comm: &C,
    ) -> Result<Gradient, FemError> {
        if analysis.design_revision != design.revision() {
            return Err(FemError::InvalidPhase(
                "design variables changed since the integration; re-integrate first".to_string(),
            ));
        }

        let n = dofs.total_dofs();
        let num_steps = analysis.num_steps();
        let functional_value = functional.value(analysis.final_state(), external_load);
        let mut lambda_next = vec![0.0; n];
        let mut d_design = vec![0.0; design.len()];

        for step in (1..=num_steps).rev() {
            comm.check_abort()?;

            // dJ/du seeds the final step; earlier steps only carry the
            // mass-propagated adjoint of the step after them
            let mut rhs = if step == num_steps {
                functional.state_gradient(analysis.final_state(), external_load)
            } else {
                vec![0.0; n]
            };
            for d in 0..n {
                if dofs.is_dirichlet(d) {
                    rhs[d] = 0.0;
                } else {
                    rhs[d] += analysis.mass[d] / self.dt * lambda_next[d];
                }
            }

            let lambda = self.solve_adjoint_step(analysis, mesh, &rhs, comm)?;

            let u_n = &analysis.states[step];
            for (_, elem) in mesh.owned_elements(comm.rank()) {
                let kernel = registry.get(elem.etype)?;
                let coords = mesh.element_coords(elem);
                let elem_dofs = mesh.element_dofs(elem);
                let local_state: Vec<f64> = elem_dofs.iter().map(|&d| u_n[d]).collect();

                let out = kernel.compute(&KernelInput {
                    coords: &coords,
                    state: &local_state,
                    design: design.value(elem.design_var),
                });

                let mut contribution = 0.0;
                for (i, &gdof) in elem_dofs.iter().enumerate() {
                    contribution += lambda[gdof] * out.design_derivative[i];
                }
                d_design[elem.design_var] -= contribution;
            }

            lambda_next = lambda;
        }
        comm.allreduce_sum_vec(&mut d_design)?;

        let partial = functional.design_partial(design);
        for (g, p) in d_design.iter_mut().zip(partial) {
            *g += p;
        }

        debug!(
            "rank {}: transient adjoint for '{}' over {} step(s), J = {:.6e}",
            comm.rank(),
            functional.name(),
            num_steps,
            functional_value
        );
        Ok(Gradient { functional_value, d_design })
    }

    /// Lumped mass diagonal, summed over owned elements then globally
    fn assemble_lumped_mass<C: Communicator>(
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        design: &DesignVector,
        comm: &C,
    ) -> Result<Vec<f64>, FemError> {
        let mut mass = vec![0.0; dofs.total_dofs()];
        for (_, elem) in mesh.owned_elements(comm.rank()) {
            let kernel = registry.get(elem.etype)?;
            let coords = mesh.element_coords(elem);
            let elem_dofs = mesh.element_dofs(elem);
            let local_state = vec![0.0; elem_dofs.len()];

            let m = kernel.lumped_mass(&KernelInput {
                coords: &coords,
                state: &local_state,
                design: design.value(elem.design_var),
            });
            for (i, &gdof) in elem_dofs.iter().enumerate() {
                mass[gdof] += m[i];
            }
        }
        comm.allreduce_sum_vec(&mut mass)?;
        Ok(mass)
    }

    /// Add M/Δt to the free diagonal of the eliminated tangent.
    ///
    /// Dirichlet rows keep their unit diagonal. A rank only shifts rows
    /// it holds; every owner applies the shift to its own rows, so the
    /// distributed matvec sees the full operator.
    fn shift_mass(system: &mut GlobalSystem, mass: &[f64], dt: f64, dofs: &DofMap) {
        for d in 0..dofs.total_dofs() {
            if dofs.is_dirichlet(d) || mass[d] == 0.0 {
                continue;
            }
            if let Some(entry) = system.matrix.get_mut(d, d) {
                *entry += mass[d] / dt;
            }
        }
    }

    fn solve_adjoint_step<C: Communicator>(
        &self,
        analysis: &mut TransientAnalysis,
        mesh: &MeshStore,
        rhs: &[f64],
        comm: &C,
    ) -> Result<Vec<f64>, FemError> {
        // Reuse the forward factorization when the direct backend left one
        if comm.size() == 1 {
            if let Some(direct) = analysis.factorization.as_mut() {
                let (lambda, _) = direct.solve_transposed(&analysis.system.matrix, rhs)?;
                return Ok(lambda);
            }
        }
        let owned = mesh.partitions().owned_dofs(comm.rank());
        let cg = ConjugateGradient::new()
            .with_max_iterations(self.config.linear_max_iterations)
            .with_tolerance(self.config.linear_tolerance);
        let (lambda, stats) = cg.solve_partitioned(&analysis.system.matrix, rhs, owned, comm)?;
        if !stats.converged {
            return Err(FemError::Convergence {
                iterations: stats.iterations,
                residual: stats.residual_norm,
            });
        }
        Ok(lambda)
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
    fn test_single_step_matches_hand_solution() {
        // One unit element, m = 1/2 at the free node, dt = 1/2:
        // (m/dt + k) u = f with k = f = 1 gives u = 1/2
        let (mesh, registry, dofs, design, load) = bar_problem(1);
        let analysis = BackwardEuler::new(0.5)
            .integrate(&mesh, &registry, &dofs, &design, &load, 1, &SerialComm::new())
            .unwrap();

        assert_eq!(analysis.num_steps(), 1);
        assert_relative_eq!(analysis.final_state()[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(analysis.times[1], 0.5, epsilon = 1e-14);
    }

    #[test]
    fn test_constant_load_relaxes_onto_static_equilibrium() {
        let (mesh, registry, dofs, design, load) = bar_problem(2);
        let analysis = BackwardEuler::new(2.0)
            .integrate(&mesh, &registry, &dofs, &design, &load, 200, &SerialComm::new())
            .unwrap();

        // Static solution of the clamped unit bar chain under a tip load
        let u = analysis.final_state();
        assert_relative_eq!(u[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(u[2], 2.0, epsilon = 1e-6);

        // Out-of-balance force decays monotonically towards equilibrium
        let first = analysis.step_stats[0].residual;
        let last = analysis.step_stats[analysis.num_steps() - 1].residual;
        assert!(last < 1e-6 * first);
    }

    #[test]
    fn test_stale_design_revision_is_rejected() {
        let (mesh, registry, dofs, mut design, load) = bar_problem(2);
        let integrator = BackwardEuler::new(1.0);
        let mut analysis = integrator
            .integrate(&mesh, &registry, &dofs, &design, &load, 3, &SerialComm::new())
            .unwrap();

        design.set(0, 2.0);
        let err = integrator
            .adjoint_gradient(
                &mut analysis,
                &mesh,
                &registry,
                &dofs,
                &design,
                &load,
                &crate::solver::Compliance,
                &SerialComm::new(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, FemError::InvalidPhase(_)));
    }

    #[test]
    #[should_panic(expected = "Time step must be positive")]
    fn test_negative_timestep() {
        BackwardEuler::new(-1.0);
    }
}
