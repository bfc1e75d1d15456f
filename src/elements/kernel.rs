//! Element kernel trait and the tag-keyed kernel registry.
//!
//! Kernels are stateless: everything they need arrives through
//! `KernelInput`, and each `compute` call returns the local residual,
//! stiffness, and design derivative together. All three come from the
//! same quadrature loop so that adjoint gradients stay consistent with
//! the primal.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Point3};

use crate::error::FemError;
use crate::mesh::ElementType;

/// Per-element input at the current nodal/design state
pub struct KernelInput<'a> {
    /// Element node coordinates, in connectivity order
    pub coords: &'a [Point3<f64>],
    /// Current local dof values, node-major
    pub state: &'a [f64],
    /// Value of the element's design variable
    pub design: f64,
}

/// Local contributions of one element
pub struct KernelOutput {
    /// Internal force residual r_e(u, x)
    pub residual: DVector<f64>,
    /// Tangent stiffness ∂r_e/∂u
    pub stiffness: DMatrix<f64>,
    /// Derivative ∂r_e/∂x w.r.t. the element's design variable
    pub design_derivative: DVector<f64>,
}

/// A per-element-type computation routine.
///
/// Implementations must be stateless and thread-safe: assembly evaluates
/// kernels concurrently across elements.
pub trait ElementKernel: Send + Sync {
    /// The tag this kernel serves
    fn element_type(&self) -> ElementType;

    /// Degrees of freedom per node this kernel assumes
    fn dofs_per_node(&self) -> usize {
        self.element_type().dofs_per_node()
    }

    /// Compute residual, stiffness, and design derivative for one element
    fn compute(&self, input: &KernelInput) -> KernelOutput;

    /// Unit-density lumped mass per local dof, in connectivity order.
    ///
    /// Transient stepping adds this diagonal, scaled by 1/Δt, to the
    /// tangent. Independent of the design variable, so it contributes
    /// nothing to adjoint design derivatives.
    fn lumped_mass(&self, input: &KernelInput) -> DVector<f64>;
}

/// Tag → kernel registry.
///
/// A plain map lookup outside the hot loop: assembly resolves the kernel
/// once per element type, not per integration point.
pub struct KernelRegistry {
    kernels: HashMap<ElementType, Box<dyn ElementKernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self { kernels: HashMap::new() }
    }

    /// Registry pre-loaded with the built-in bar and tet kernels
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(super::bar::BarKernel::new()));
        reg.register(Box::new(super::tet::TetKernel::new(1.0, 0.3)));
        reg
    }

    /// Register a kernel, replacing any previous kernel for the same tag
    pub fn register(&mut self, kernel: Box<dyn ElementKernel>) {
        self.kernels.insert(kernel.element_type(), kernel);
    }

    /// Look up the kernel for a tag
    ///
    /// # Errors
    /// `FemError::UnsupportedElementType` for unregistered tags.
    pub fn get(&self, etype: ElementType) -> Result<&dyn ElementKernel, FemError> {
        self.kernels
            .get(&etype)
            .map(|k| k.as_ref())
            .ok_or(FemError::UnsupportedElementType(etype))
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
