//! Scalar functionals of the converged state, differentiated for the
//! adjoint solve.

use crate::design::DesignVector;

/// A scalar quantity of interest J(u, x).
///
/// `state_gradient` must use the same discretization as `value`; the
/// adjoint solve consumes it as the right-hand side and any mismatch
/// shows up as a gradient error against finite differences.
pub trait Functional: Send + Sync {
    fn name(&self) -> &str;

    /// J evaluated at the converged state.
    fn value(&self, u: &[f64], external_load: &[f64]) -> f64;

    /// dJ/du, full global length.
    fn state_gradient(&self, u: &[f64], external_load: &[f64]) -> Vec<f64>;

    /// Explicit dJ/dx, zero for functionals that only see the state.
    fn design_partial(&self, design: &DesignVector) -> Vec<f64> {
        vec![0.0; design.len()]
    }
}

/// Compliance J = f^T u. Its state gradient is the load vector itself.
pub struct Compliance;

impl Functional for Compliance {
    fn name(&self) -> &str {
        "compliance"
    }

    fn value(&self, u: &[f64], external_load: &[f64]) -> f64 {
        u.iter().zip(external_load).map(|(&ui, &fi)| ui * fi).sum()
    }

    fn state_gradient(&self, _u: &[f64], external_load: &[f64]) -> Vec<f64> {
        external_load.to_vec()
    }
}

/// A single displacement component, J = u[dof].
pub struct NodalDisplacement {
    dof: usize,
}

impl NodalDisplacement {
    pub fn new(dof: usize) -> Self {
        Self { dof }
    }
}

impl Functional for NodalDisplacement {
    fn name(&self) -> &str {
        "nodal displacement"
    }

    fn value(&self, u: &[f64], _external_load: &[f64]) -> f64 {
        u[self.dof]
    }

    fn state_gradient(&self, u: &[f64], _external_load: &[f64]) -> Vec<f64> {
        let mut g = vec![0.0; u.len()];
        g[self.dof] = 1.0;
        g
    }
}
