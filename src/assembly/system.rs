use sprs::CsMat;

/// The assembled distributed sparse system K Δu = r.
///
/// Built fresh by the assembler for every analysis step. On a partitioned
/// run each rank holds the rows its elements touch, with
/// partition-boundary rows fully summed after halo exchange; the owner
/// rule (lowest sharing rank) decides which copy counts in reductions.
#[derive(Debug, Clone)]
pub struct GlobalSystem {
    /// Tangent matrix in CSR format, global dimension
    pub matrix: CsMat<f64>,
    /// Right-hand side: external load minus internal force at the current
    /// state, global dimension
    pub rhs: Vec<f64>,
}

impl GlobalSystem {
    pub fn n(&self) -> usize {
        self.rhs.len()
    }

    /// True if the matrix is numerically symmetric within `tol`.
    ///
    /// Used to decide whether the primal factorization may be reused for
    /// the adjoint (transposed) solve.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        let transpose = self.matrix.transpose_view().to_csr();
        for (row_idx, row) in self.matrix.outer_iterator().enumerate() {
            let t_row = transpose.outer_view(row_idx);
            for (col_idx, &val) in row.iter() {
                let mirrored = t_row
                    .as_ref()
                    .and_then(|r| r.get(col_idx))
                    .copied()
                    .unwrap_or(0.0);
                let scale = val.abs().max(mirrored.abs()).max(1.0);
                if (val - mirrored).abs() > tol * scale {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    #[test]
    fn test_symmetry_check() {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 0, 2.0);
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, 1.0);
        tri.add_triplet(1, 1, 2.0);
        let sym = GlobalSystem { matrix: tri.to_csr(), rhs: vec![0.0; 2] };
        assert!(sym.is_symmetric(1e-12));

        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, -1.0);
        let asym = GlobalSystem { matrix: tri.to_csr(), rhs: vec![0.0; 2] };
        assert!(!asym.is_symmetric(1e-12));
    }
}
