//! 4-node linear tetrahedron kernel for isotropic elasticity
//! (3 dofs per node, 12x12 local system).
//!
//! The element's design variable scales the Young's modulus: E = x * E0.
//! Strain is constant over a linear tet, so the 1-point centroid rule is
//! exact; residual, stiffness, and design derivative all come out of the
//! same quadrature loop.

use nalgebra::{DMatrix, DVector, Matrix3, Point3, SMatrix};

use super::kernel::{ElementKernel, KernelInput, KernelOutput};
use super::quadrature::GaussQuadrature;
use crate::mesh::ElementType;

pub struct TetKernel {
    /// Base Young's modulus E0 (scaled by the design variable)
    base_modulus: f64,
    /// Poisson's ratio
    poisson: f64,
}

impl TetKernel {
    pub fn new(base_modulus: f64, poisson: f64) -> Self {
        Self { base_modulus, poisson }
    }

    /// Isotropic constitutive matrix in Voigt order (xx, yy, zz, xy, yz, zx)
    fn constitutive(&self, modulus: f64) -> SMatrix<f64, 6, 6> {
        let e = modulus;
        let nu = self.poisson;
        let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let mu = e / (2.0 * (1.0 + nu));

        let mut d = SMatrix::<f64, 6, 6>::zeros();
        for i in 0..3 {
            for j in 0..3 {
                d[(i, j)] = lambda;
            }
            d[(i, i)] += 2.0 * mu;
            d[(i + 3, i + 3)] = mu;
        }
        d
    }

    /// Constant strain-displacement matrix B (6x12) and |det J|
    fn strain_displacement(coords: &[Point3<f64>]) -> (SMatrix<f64, 6, 12>, f64) {
        // J columns are the edge vectors from vertex 0
        let jac = Matrix3::from_columns(&[
            coords[1] - coords[0],
            coords[2] - coords[0],
            coords[3] - coords[0],
        ]);
        let det = jac.determinant();
        let inv = jac.try_inverse().unwrap_or_else(Matrix3::zeros);

        // dN/dxi for N = [1 - xi - eta - zeta, xi, eta, zeta]
        let dn_dxi: [[f64; 3]; 4] =
            [[-1.0, -1.0, -1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

        let mut b = SMatrix::<f64, 6, 12>::zeros();
        for node in 0..4 {
            // grad N = J^{-T} dN/dxi
            let gx = inv[(0, 0)] * dn_dxi[node][0]
                + inv[(1, 0)] * dn_dxi[node][1]
                + inv[(2, 0)] * dn_dxi[node][2];
            let gy = inv[(0, 1)] * dn_dxi[node][0]
                + inv[(1, 1)] * dn_dxi[node][1]
                + inv[(2, 1)] * dn_dxi[node][2];
            let gz = inv[(0, 2)] * dn_dxi[node][0]
                + inv[(1, 2)] * dn_dxi[node][1]
                + inv[(2, 2)] * dn_dxi[node][2];

            let c = 3 * node;
            b[(0, c)] = gx;
            b[(1, c + 1)] = gy;
            b[(2, c + 2)] = gz;
            b[(3, c)] = gy;
            b[(3, c + 1)] = gx;
            b[(4, c + 1)] = gz;
            b[(4, c + 2)] = gy;
            b[(5, c)] = gz;
            b[(5, c + 2)] = gx;
        }

        (b, det.abs())
    }
}

impl ElementKernel for TetKernel {
    fn element_type(&self) -> ElementType {
        ElementType::Tet4
    }

    fn compute(&self, input: &KernelInput) -> KernelOutput {
        debug_assert_eq!(input.coords.len(), 4);
        debug_assert_eq!(input.state.len(), 12);

        let (b, det_j) = Self::strain_displacement(input.coords);
        let d = self.constitutive(input.design * self.base_modulus);
        let d0 = self.constitutive(self.base_modulus);

        let quad = GaussQuadrature::tet_1point();

        let mut k = SMatrix::<f64, 12, 12>::zeros();
        let mut dk = SMatrix::<f64, 12, 12>::zeros();
        for (_, weight) in quad.points.iter().zip(quad.weights.iter()) {
            // Reference weights carry the 1/6 tet volume factor; det J maps
            // to the physical element.
            let w = weight * det_j;
            k += (b.transpose() * d * b) * w;
            dk += (b.transpose() * d0 * b) * w;
        }

        let u = SMatrix::<f64, 12, 1>::from_column_slice(input.state);
        let r = k * u;
        let dr = dk * u;

        KernelOutput {
            residual: DVector::from_column_slice(r.as_slice()),
            stiffness: DMatrix::from_column_slice(12, 12, k.as_slice()),
            design_derivative: DVector::from_column_slice(dr.as_slice()),
        }
    }

    fn lumped_mass(&self, input: &KernelInput) -> DVector<f64> {
        // A quarter of the element volume at each vertex, on every
        // component of that vertex
        let (_, det_j) = Self::strain_displacement(input.coords);
        let volume = det_j / 6.0;
        DVector::from_element(12, volume / 4.0)
    }
}
