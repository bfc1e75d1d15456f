//! 2-node axial bar kernel (1 dof per node).
//!
//! The element's design variable is its axial stiffness EA. The residual
//! is the internal force r_e = K_e(EA) u_e, the tangent is K_e, and the
//! design derivative is (∂K_e/∂EA) u_e = K_e u_e / EA — all evaluated in
//! one quadrature loop.

use nalgebra::{DMatrix, DVector};

use super::kernel::{ElementKernel, KernelInput, KernelOutput};
use super::quadrature::GaussQuadrature;
use crate::mesh::ElementType;

pub struct BarKernel;

impl BarKernel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BarKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementKernel for BarKernel {
    fn element_type(&self) -> ElementType {
        ElementType::Bar2
    }

    fn compute(&self, input: &KernelInput) -> KernelOutput {
        debug_assert_eq!(input.coords.len(), 2);
        debug_assert_eq!(input.state.len(), 2);

        let length = (input.coords[1] - input.coords[0]).norm();
        let ea = input.design;

        // B = dN/dx = [-1/L, 1/L]; constant over the element
        let b = [-1.0 / length, 1.0 / length];
        let jac = length / 2.0;

        let quad = GaussQuadrature::bar_1point();

        let mut stiffness = DMatrix::zeros(2, 2);
        let mut d_stiffness: DMatrix<f64> = DMatrix::zeros(2, 2);

        for (_, weight) in quad.points.iter().zip(quad.weights.iter()) {
            let w = weight * jac;
            for i in 0..2 {
                for j in 0..2 {
                    // K_ij = ∫ B_i EA B_j dx; dK/dEA drops the EA factor
                    stiffness[(i, j)] += ea * b[i] * b[j] * w;
                    d_stiffness[(i, j)] += b[i] * b[j] * w;
                }
            }
        }

        let u = DVector::from_column_slice(input.state);
        let residual = &stiffness * &u;
        let design_derivative = d_stiffness * u;

        KernelOutput { residual, stiffness, design_derivative }
    }

    fn lumped_mass(&self, input: &KernelInput) -> DVector<f64> {
        // Half the element length at each end node
        let length = (input.coords[1] - input.coords[0]).norm();
        DVector::from_element(2, length / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn unit_bar() -> (Vec<Point3<f64>>, [f64; 2]) {
        (vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)], [0.0, 0.0])
    }

    #[test]
    fn test_unit_bar_stiffness() {
        let (coords, state) = unit_bar();
        let kernel = BarKernel::new();
        let out = kernel.compute(&KernelInput { coords: &coords, state: &state, design: 1.0 });

        // K = (EA/L) [[1, -1], [-1, 1]] with EA = L = 1
        assert_relative_eq!(out.stiffness[(0, 0)], 1.0, epsilon = 1e-14);
        assert_relative_eq!(out.stiffness[(0, 1)], -1.0, epsilon = 1e-14);
        assert_relative_eq!(out.stiffness[(1, 0)], -1.0, epsilon = 1e-14);
        assert_relative_eq!(out.stiffness[(1, 1)], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_residual_is_internal_force() {
        let (coords, _) = unit_bar();
        let state = [0.0, 0.5];
        let kernel = BarKernel::new();
        let out = kernel.compute(&KernelInput { coords: &coords, state: &state, design: 2.0 });

        // r = K u with K = 2 [[1,-1],[-1,1]]
        assert_relative_eq!(out.residual[0], -1.0, epsilon = 1e-14);
        assert_relative_eq!(out.residual[1], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_design_derivative_matches_stiffness_scaling() {
        let (coords, _) = unit_bar();
        let state = [0.1, 0.7];
        let ea = 3.0;
        let kernel = BarKernel::new();
        let out = kernel.compute(&KernelInput { coords: &coords, state: &state, design: ea });

        // dr/dEA = r / EA for a linear bar
        for i in 0..2 {
            assert_relative_eq!(out.design_derivative[i], out.residual[i] / ea, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_lumped_mass_splits_length_evenly() {
        let coords =
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)];
        let state = [0.0, 0.0];
        let kernel = BarKernel::new();
        let mass = kernel.lumped_mass(&KernelInput { coords: &coords, state: &state, design: 1.0 });
        assert_relative_eq!(mass[0], 1.0, epsilon = 1e-14);
        assert_relative_eq!(mass[1], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_rigid_translation_has_zero_residual() {
        let (coords, _) = unit_bar();
        let state = [0.3, 0.3];
        let kernel = BarKernel::new();
        let out = kernel.compute(&KernelInput { coords: &coords, state: &state, design: 5.0 });
        assert_relative_eq!(out.residual[0], 0.0, epsilon = 1e-14);
        assert_relative_eq!(out.residual[1], 0.0, epsilon = 1e-14);
    }
}
