//! Partition metadata: element ownership, dof ownership, and the
//! shared-boundary dof maps that drive halo exchange.
//!
//! Elements are assigned to partitions in contiguous blocks. A dof that
//! appears on several partitions is *shared*; it is owned by the lowest
//! rank touching it. Reductions and gathers count each dof exactly once
//! through the owner rule, while halo exchange keeps shared rows summed
//! consistently on every rank that touches them.

use std::collections::{BTreeMap, BTreeSet};

use super::topology::Connectivity;

/// Per-rank ownership and boundary information, computed once at mesh load.
#[derive(Debug, Clone)]
pub struct PartitionMap {
    num_partitions: usize,
    /// rank -> element ids owned by that rank (contiguous blocks)
    owned_elements: Vec<Vec<usize>>,
    /// dof -> owning rank (lowest rank touching it; rank 0 for untouched dofs)
    dof_owner: Vec<usize>,
    /// rank -> dofs it owns, sorted
    owned_dofs: Vec<Vec<usize>>,
    /// rank -> dofs touched by its elements, sorted
    touched_dofs: Vec<Vec<usize>>,
    /// rank -> (neighbor rank -> sorted shared dofs)
    shared: Vec<BTreeMap<usize, Vec<usize>>>,
}

impl PartitionMap {
    /// Compute the partition map by contiguous block assignment.
    pub fn build(
        connectivity: &Connectivity,
        dofs_per_node: usize,
        total_dofs: usize,
        num_partitions: usize,
    ) -> Self {
        let n_elems = connectivity.num_elements();
        // Callers validate num_partitions >= 1 at mesh load
        let block = (n_elems + num_partitions - 1) / num_partitions;

        let mut owned_elements = vec![Vec::new(); num_partitions];
        for elem_id in 0..n_elems {
            let rank = if block == 0 { 0 } else { (elem_id / block).min(num_partitions - 1) };
            owned_elements[rank].push(elem_id);
        }

        // Dofs touched by each rank's elements
        let mut touched_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); num_partitions];
        for (rank, elems) in owned_elements.iter().enumerate() {
            for &elem_id in elems {
                for &node in &connectivity.elements[elem_id].nodes {
                    for comp in 0..dofs_per_node {
                        touched_sets[rank].insert(node * dofs_per_node + comp);
                    }
                }
            }
        }

        // Lowest touching rank owns a dof; untouched dofs fall to rank 0.
        let mut dof_owner = vec![0usize; total_dofs];
        for dof in 0..total_dofs {
            for (rank, touched) in touched_sets.iter().enumerate() {
                if touched.contains(&dof) {
                    dof_owner[dof] = rank;
                    break;
                }
            }
        }

        let mut owned_dofs = vec![Vec::new(); num_partitions];
        for (dof, &rank) in dof_owner.iter().enumerate() {
            owned_dofs[rank].push(dof);
        }

        // Pairwise intersections of touched dof sets define neighbors.
        let mut shared = vec![BTreeMap::new(); num_partitions];
        for a in 0..num_partitions {
            for b in (a + 1)..num_partitions {
                let common: Vec<usize> = touched_sets[a]
                    .intersection(&touched_sets[b])
                    .copied()
                    .collect();
                if !common.is_empty() {
                    shared[a].insert(b, common.clone());
                    shared[b].insert(a, common);
                }
            }
        }

        let touched_dofs = touched_sets
            .into_iter()
            .map(|s| s.into_iter().collect())
            .collect();

        Self { num_partitions, owned_elements, dof_owner, owned_dofs, touched_dofs, shared }
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Element ids owned by `rank`
    pub fn owned_elements(&self, rank: usize) -> &[usize] {
        &self.owned_elements[rank]
    }

    /// Owning rank of a global dof
    pub fn dof_owner(&self, dof: usize) -> usize {
        self.dof_owner[dof]
    }

    /// Dofs owned by `rank`, sorted
    pub fn owned_dofs(&self, rank: usize) -> &[usize] {
        &self.owned_dofs[rank]
    }

    /// Dofs touched by the elements of `rank`, sorted
    pub fn touched_dofs(&self, rank: usize) -> &[usize] {
        &self.touched_dofs[rank]
    }

    /// Ranks sharing at least one dof with `rank`, ascending
    pub fn neighbors(&self, rank: usize) -> Vec<usize> {
        self.shared[rank].keys().copied().collect()
    }

    /// Sorted dofs shared between `rank` and `neighbor` (empty if none)
    pub fn shared_with(&self, rank: usize, neighbor: usize) -> &[usize] {
        self.shared[rank].get(&neighbor).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::topology::{Element, ElementType};

    fn chain(n_elems: usize) -> Connectivity {
        let mut conn = Connectivity::new();
        for e in 0..n_elems {
            conn.elements.push(Element::new(ElementType::Bar2, vec![e, e + 1], e));
        }
        conn
    }

    #[test]
    fn test_block_partitioning() {
        let conn = chain(4);
        let map = PartitionMap::build(&conn, 1, 5, 2);

        assert_eq!(map.owned_elements(0), &[0, 1]);
        assert_eq!(map.owned_elements(1), &[2, 3]);
    }

    #[test]
    fn test_shared_dof_is_owned_by_lowest_rank() {
        let conn = chain(4);
        let map = PartitionMap::build(&conn, 1, 5, 2);

        // Node 2 sits on the boundary between the two blocks.
        assert_eq!(map.dof_owner(2), 0);
        assert_eq!(map.shared_with(0, 1), &[2]);
        assert_eq!(map.shared_with(1, 0), &[2]);
        assert_eq!(map.neighbors(0), vec![1]);
    }

    #[test]
    fn test_owned_dofs_cover_all_dofs_once() {
        let conn = chain(6);
        let map = PartitionMap::build(&conn, 1, 7, 3);

        let mut all: Vec<usize> = (0..3).flat_map(|r| map.owned_dofs(r).to_vec()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_partition_has_no_neighbors() {
        let conn = chain(3);
        let map = PartitionMap::build(&conn, 1, 4, 1);
        assert!(map.neighbors(0).is_empty());
        assert_eq!(map.owned_dofs(0).len(), 4);
    }
}
