/// Gaussian quadrature rules shared by primal and derivative kernels.
///
/// A kernel must evaluate residual, stiffness, and design derivative on
/// the *same* rule; mixing rules between primal and derivative breaks the
/// consistency of adjoint gradients.
pub struct GaussQuadrature {
    /// Integration point coordinates.
    ///
    /// Tetrahedra: barycentric [L0, L1, L2, L3]. Bars: [xi, 0, 0, 0] with
    /// xi on the reference interval [-1, 1].
    pub points: Vec<[f64; 4]>,
    /// Integration weights
    pub weights: Vec<f64>,
}

impl GaussQuadrature {
    /// 1-point centroid rule for tetrahedra (degree 1 exactness)
    ///
    /// Exact for the constant strain of a linear tet.
    pub fn tet_1point() -> Self {
        Self {
            points: vec![[0.25, 0.25, 0.25, 0.25]],
            weights: vec![1.0 / 6.0], // Volume of reference tet
        }
    }

    /// 4-point rule for tetrahedra (degree 2 exactness)
    pub fn tet_4point() -> Self {
        let a = 0.5854101966249685; // (5 + √5) / 20
        let b = 0.1381966011250105; // (5 - √5) / 20
        let w = 1.0 / 24.0;

        Self {
            points: vec![[a, b, b, b], [b, a, b, b], [b, b, a, b], [b, b, b, a]],
            weights: vec![w, w, w, w],
        }
    }

    /// 1-point Gauss-Legendre rule on [-1, 1] (degree 1 exactness)
    ///
    /// Exact for the constant strain of a 2-node bar.
    pub fn bar_1point() -> Self {
        Self { points: vec![[0.0, 0.0, 0.0, 0.0]], weights: vec![2.0] }
    }

    /// 2-point Gauss-Legendre rule on [-1, 1] (degree 3 exactness)
    pub fn bar_2point() -> Self {
        let x = 1.0 / 3.0f64.sqrt();
        Self {
            points: vec![[-x, 0.0, 0.0, 0.0], [x, 0.0, 0.0, 0.0]],
            weights: vec![1.0, 1.0],
        }
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }
}
