//! Adjoint gradients with respect to the design variables.
//!
//! Solves the adjoint system K^T λ = dJ/du against the converged primal
//! state, then combines dJ/dx = ∂J/∂x - λ^T ∂R/∂x element by element.
//! Element kernels evaluate the residual and its design derivative with
//! the same quadrature, so the combined gradient is consistent with the
//! primal discretization to machine precision.

use log::debug;

use super::cg::ConjugateGradient;
use super::functional::Functional;
use super::newton::{Analysis, AnalysisPhase};
use crate::assembly::DofMap;
use crate::design::DesignVector;
use crate::elements::{KernelInput, KernelRegistry};
use crate::error::FemError;
use crate::mesh::MeshStore;
use crate::parallel::Communicator;

/// Functional value and its total derivative with respect to every
/// design variable.
#[derive(Debug, Clone)]
pub struct Gradient {
    pub functional_value: f64,
    pub d_design: Vec<f64>,
}

pub struct AdjointEngine {
    linear_max_iterations: usize,
    linear_tolerance: f64,
}

impl AdjointEngine {
    pub fn new() -> Self {
        Self { linear_max_iterations: 2000, linear_tolerance: 1e-12 }
    }

    pub fn with_linear_tolerance(mut self, tolerance: f64) -> Self {
        self.linear_tolerance = tolerance;
        self
    }

    /// Compute dJ/dx for several functionals in one pass.
    ///
    /// One adjoint solve per functional; the primal factorization is
    /// reused across all of them, so each extra functional costs a
    /// back-substitution, not a factorization.
    #[allow(clippy::too_many_arguments)]
    pub fn gradients<C: Communicator>(
        &self,
        analysis: &mut Analysis,
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        design: &DesignVector,
        external_load: &[f64],
        functionals: &[&dyn Functional],
        comm: &C,
    ) -> Result<Vec<Gradient>, FemError> {
        let mut out = Vec::with_capacity(functionals.len());
        for f in functionals {
            out.push(
                self.gradient(analysis, mesh, registry, dofs, design, external_load, *f, comm)?,
            );
        }
        Ok(out)
    }

    /// Compute dJ/dx for `functional` on the partition `comm.rank()`.
    ///
    /// Requires a converged analysis whose design revision matches the
    /// current design vector; editing a design variable invalidates the
    /// state and the forward solve must run again first.
    ///
    /// # Errors
    /// * `InvalidPhase` if the analysis has not converged or the design
    ///   changed since the forward solve
    #[allow(clippy::too_many_arguments)]
    pub fn gradient<C: Communicator>(
        &self,
        analysis: &mut Analysis,
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        design: &DesignVector,
        external_load: &[f64],
        functional: &dyn Functional,
        comm: &C,
    ) -> Result<Gradient, FemError> {
        match analysis.phase {
            AnalysisPhase::Converged | AnalysisPhase::AdjointReady => {}
            other => {
                return Err(FemError::InvalidPhase(format!(
                    "adjoint requested in phase {:?}; a converged forward solve is required",
                    other
                )))
            }
        }
        if analysis.state.design_revision != design.revision() {
            return Err(FemError::InvalidPhase(
                "design variables changed since the forward solve; re-solve first".to_string(),
            ));
        }

        let functional_value = functional.value(&analysis.state.u, external_load);

        // Adjoint rhs: dJ/du, zeroed at constrained dofs where λ = 0.
        let mut adjoint_rhs = functional.state_gradient(&analysis.state.u, external_load);
        for d in 0..dofs.total_dofs() {
            if dofs.is_dirichlet(d) {
                adjoint_rhs[d] = 0.0;
            }
        }

        let lambda = self.solve_adjoint(analysis, mesh, &adjoint_rhs, comm)?;
        debug!(
            "rank {}: adjoint solved for '{}', J = {:.6e}",
            comm.rank(),
            functional.name(),
            functional_value
        );

        // λ^T ∂R/∂x, accumulated over owned elements then summed globally.
        let u = &analysis.state.u;
        let mut d_design = vec![0.0; design.len()];
        for (_, elem) in mesh.owned_elements(comm.rank()) {
            let kernel = registry.get(elem.etype)?;
            let coords = mesh.element_coords(elem);
            let elem_dofs = mesh.element_dofs(elem);
            let local_state: Vec<f64> = elem_dofs.iter().map(|&d| u[d]).collect();

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
        comm.allreduce_sum_vec(&mut d_design)?;

        let partial = functional.design_partial(design);
        for (g, p) in d_design.iter_mut().zip(partial) {
            *g += p;
        }

        analysis.set_phase(AnalysisPhase::AdjointReady);
        Ok(Gradient { functional_value, d_design })
    }

    fn solve_adjoint<C: Communicator>(
        &self,
        analysis: &mut Analysis,
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
        // Eliminated stiffness is symmetric, so CG solves the transpose
        // system directly
        let owned = mesh.partitions().owned_dofs(comm.rank());
        let cg = ConjugateGradient::new()
            .with_max_iterations(self.linear_max_iterations)
            .with_tolerance(self.linear_tolerance);
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

impl Default for AdjointEngine {
    fn default() -> Self {
        Self::new()
    }
}
