//! Global system assembly.
//!
//! Each partition walks the elements it owns, evaluates kernels in
//! parallel with rayon (no shared mutable state: every element produces
//! its own triplet block, merged sequentially), scatters the blocks into
//! a triplet list, and then reconciles partition-boundary rows with its
//! neighbors by an explicit exchange-and-sum. Every local contribution is
//! scattered exactly once; shared dofs end up with identical, fully
//! summed rows on every rank that touches them.

use std::collections::HashSet;

use log::debug;
use rayon::prelude::*;
use sprs::{CsMat, TriMat};

use super::dof::DofMap;
use super::system::GlobalSystem;
use crate::design::DesignVector;
use crate::elements::{KernelInput, KernelRegistry};
use crate::error::FemError;
use crate::mesh::MeshStore;
use crate::parallel::{Communicator, HaloPayload};

/// Global matrix/rhs assembler
pub struct Assembler;

struct ElementBlock {
    triplets: Vec<(usize, usize, f64)>,
    rhs: Vec<(usize, f64)>,
}

impl Assembler {
    /// Assemble the tangent system K Δu = f_ext - f_int(u) for the
    /// partition `comm.rank()`.
    ///
    /// # Arguments
    /// * `state` - current primal unknowns, full global length
    /// * `external_load` - nodal external load, full global length; only
    ///   the dof owner contributes each entry, so partitioned sums never
    ///   double-count it
    ///
    /// # Errors
    /// * `UnsupportedElementType` if an element's tag has no kernel
    /// * `MalformedMesh` if an element reads a design variable out of range
    /// * `PartitionMismatch` if a neighbor disagrees on the shared dof set
    /// * `CollectiveTimeout` if a neighbor never answers the halo exchange
    pub fn assemble<C: Communicator>(
        mesh: &MeshStore,
        registry: &KernelRegistry,
        dofs: &DofMap,
        state: &[f64],
        design: &DesignVector,
        external_load: &[f64],
        comm: &C,
    ) -> Result<GlobalSystem, FemError> {
        let n = dofs.total_dofs();
        debug_assert_eq!(state.len(), n);
        debug_assert_eq!(external_load.len(), n);

        let rank = comm.rank();
        let parts = mesh.partitions();
        let owned: Vec<usize> = parts.owned_elements(rank).to_vec();

        // Kernel evaluation is embarrassingly parallel across elements.
        let blocks: Vec<ElementBlock> = owned
            .par_iter()
            .map(|&elem_id| {
                let elem = mesh.element(elem_id);
                let kernel = registry.get(elem.etype)?;
                if elem.design_var >= design.len() {
                    return Err(FemError::malformed(format!(
                        "element {} reads design variable {} but only {} exist",
                        elem_id,
                        elem.design_var,
                        design.len()
                    )));
                }

                let coords = mesh.element_coords(elem);
                let elem_dofs = mesh.element_dofs(elem);
                let local_state: Vec<f64> = elem_dofs.iter().map(|&d| state[d]).collect();

                let out = kernel.compute(&KernelInput {
                    coords: &coords,
                    state: &local_state,
                    design: design.value(elem.design_var),
                });

                let n_local = elem_dofs.len();
                let mut triplets = Vec::with_capacity(n_local * n_local);
                let mut rhs = Vec::with_capacity(n_local);
                for i in 0..n_local {
                    let gi = elem_dofs[i];
                    for j in 0..n_local {
                        triplets.push((gi, elem_dofs[j], out.stiffness[(i, j)]));
                    }
                    // rhs carries the negative internal force
                    rhs.push((gi, -out.residual[i]));
                }
                Ok(ElementBlock { triplets, rhs })
            })
            .collect::<Result<Vec<_>, FemError>>()?;

        // Sequential merge keeps the scatter deterministic.
        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
        let mut rhs = vec![0.0; n];
        for dof in 0..n {
            if parts.dof_owner(dof) == rank {
                rhs[dof] = external_load[dof];
            }
        }
        for block in blocks {
            triplets.extend(block.triplets);
            for (dof, val) in block.rhs {
                rhs[dof] += val;
            }
        }

        debug!(
            "rank {}: assembled {} element(s), {} local triplet(s)",
            rank,
            owned.len(),
            triplets.len()
        );

        Self::exchange_boundary(mesh, comm, &mut triplets, &mut rhs)?;

        let mut tri = TriMat::new((n, n));
        for &(i, j, v) in &triplets {
            tri.add_triplet(i, j, v);
        }

        let (matrix, rhs) = Self::apply_dirichlet(&tri.to_csr(), &rhs, dofs, state);
        Ok(GlobalSystem { matrix, rhs })
    }

    /// Exchange and sum partition-boundary contributions with every
    /// neighbor. Sends snapshot the pre-exchange local values, so each
    /// pairwise sum adds exactly one copy of each rank's contribution.
    fn exchange_boundary<C: Communicator>(
        mesh: &MeshStore,
        comm: &C,
        triplets: &mut Vec<(usize, usize, f64)>,
        rhs: &mut [f64],
    ) -> Result<(), FemError> {
        let rank = comm.rank();
        let parts = mesh.partitions();
        let neighbors = parts.neighbors(rank);
        if neighbors.is_empty() {
            return Ok(());
        }

        let mut sends = Vec::with_capacity(neighbors.len());
        for &neighbor in &neighbors {
            let shared = parts.shared_with(rank, neighbor);
            let shared_set: HashSet<usize> = shared.iter().copied().collect();
            let matrix_triplets: Vec<(usize, usize, f64)> = triplets
                .iter()
                .filter(|(i, _, _)| shared_set.contains(i))
                .copied()
                .collect();
            // Pre-exchange rhs values: the external load appears in
            // exactly one rank's copy (the owner's), so pairwise sums
            // never duplicate it.
            let rhs_entries: Vec<(usize, f64)> = shared.iter().map(|&d| (d, rhs[d])).collect();
            sends.push((
                neighbor,
                HaloPayload { shared_dofs: shared.to_vec(), matrix_triplets, rhs_entries },
            ));
        }

        let received = comm.exchange_halo(sends)?;

        for (neighbor, payload) in received {
            let expected = parts.shared_with(rank, neighbor);
            if payload.shared_dofs != expected {
                return Err(FemError::PartitionMismatch { rank, neighbor });
            }
            triplets.extend(payload.matrix_triplets);
            for (dof, val) in payload.rhs_entries {
                rhs[dof] += val;
            }
        }
        Ok(())
    }

    /// Apply Dirichlet boundary conditions by elimination.
    ///
    /// The system is in increment form, so the prescribed increment for
    /// constrained dof i is d_i = v_i - u_i. Move the coupling K[j,i]*d_i
    /// of every free row j to the rhs, zero row and column i, set
    /// K[i,i] = 1 and rhs[i] = d_i.
    #[allow(non_snake_case)]
    pub fn apply_dirichlet(
        K: &CsMat<f64>,
        rhs: &[f64],
        dofs: &DofMap,
        state: &[f64],
    ) -> (CsMat<f64>, Vec<f64>) {
        let n = dofs.total_dofs();
        let mut rhs_new = rhs.to_vec();

        // First pass: shift coupling to constrained dofs into the rhs
        for (row_idx, row) in K.outer_iterator().enumerate() {
            if !dofs.is_dirichlet(row_idx) {
                for (col_idx, &val) in row.iter() {
                    if dofs.is_dirichlet(col_idx) {
                        let incr = dofs.dirichlet_value(col_idx) - state[col_idx];
                        rhs_new[row_idx] -= val * incr;
                    }
                }
            }
        }

        // Second pass: rebuild with identity rows for constrained dofs
        let mut tri = TriMat::new((n, n));
        for (row_idx, row) in K.outer_iterator().enumerate() {
            if dofs.is_dirichlet(row_idx) {
                tri.add_triplet(row_idx, row_idx, 1.0);
                rhs_new[row_idx] = dofs.dirichlet_value(row_idx) - state[row_idx];
            } else {
                for (col_idx, &val) in row.iter() {
                    if !dofs.is_dirichlet(col_idx) {
                        tri.add_triplet(row_idx, col_idx, val);
                    }
                }
            }
        }

        (tri.to_csr(), rhs_new)
    }
}
