use std::collections::HashSet;

/// Degree-of-freedom map
///
/// Handles global dof numbering and Dirichlet constraint tracking for
/// assembly. One dof family per mesh; numbering is node-major
/// (node * dofs_per_node + component).
#[derive(Debug, Clone)]
pub struct DofMap {
    num_nodes: usize,
    dofs_per_node: usize,
    total_dofs: usize,

    /// Set of dofs with Dirichlet boundary conditions
    dirichlet_dofs: HashSet<usize>,

    /// Prescribed values for Dirichlet dofs
    dirichlet_values: Vec<f64>,
}

impl DofMap {
    pub fn new(num_nodes: usize, dofs_per_node: usize) -> Self {
        let total_dofs = num_nodes * dofs_per_node;
        Self {
            num_nodes,
            dofs_per_node,
            total_dofs,
            dirichlet_dofs: HashSet::new(),
            dirichlet_values: vec![0.0; total_dofs],
        }
    }

    /// Global dof index for a node and component
    pub fn global_dof(&self, node_id: usize, component: usize) -> usize {
        debug_assert!(node_id < self.num_nodes);
        debug_assert!(component < self.dofs_per_node);
        node_id * self.dofs_per_node + component
    }

    /// Prescribe a Dirichlet value on one dof
    pub fn set_dirichlet(&mut self, dof: usize, value: f64) {
        debug_assert!(dof < self.total_dofs, "dof index out of bounds");
        self.dirichlet_dofs.insert(dof);
        self.dirichlet_values[dof] = value;
    }

    /// Prescribe a Dirichlet value on every dof of a node
    pub fn set_dirichlet_node(&mut self, node_id: usize, value: f64) {
        for component in 0..self.dofs_per_node {
            let dof = self.global_dof(node_id, component);
            self.set_dirichlet(dof, value);
        }
    }

    pub fn is_dirichlet(&self, dof: usize) -> bool {
        self.dirichlet_dofs.contains(&dof)
    }

    pub fn dirichlet_value(&self, dof: usize) -> f64 {
        self.dirichlet_values[dof]
    }

    pub fn total_dofs(&self) -> usize {
        self.total_dofs
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_free_dofs(&self) -> usize {
        self.total_dofs - self.dirichlet_dofs.len()
    }

    pub fn num_constrained_dofs(&self) -> usize {
        self.dirichlet_dofs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_dof_numbering() {
        let dofs = DofMap::new(10, 1);
        assert_eq!(dofs.total_dofs(), 10);
        assert_eq!(dofs.global_dof(0, 0), 0);
        assert_eq!(dofs.global_dof(9, 0), 9);
    }

    #[test]
    fn test_vector_dof_numbering() {
        let dofs = DofMap::new(10, 3);
        assert_eq!(dofs.total_dofs(), 30);
        assert_eq!(dofs.global_dof(0, 2), 2);
        assert_eq!(dofs.global_dof(1, 0), 3);
        assert_eq!(dofs.global_dof(1, 1), 4);
    }

    #[test]
    fn test_dirichlet_tracking() {
        let mut dofs = DofMap::new(10, 1);
        assert_eq!(dofs.num_free_dofs(), 10);

        dofs.set_dirichlet(0, 100.0);

        assert!(dofs.is_dirichlet(0));
        assert!(!dofs.is_dirichlet(1));
        assert_eq!(dofs.dirichlet_value(0), 100.0);
        assert_eq!(dofs.num_free_dofs(), 9);
        assert_eq!(dofs.num_constrained_dofs(), 1);
    }

    #[test]
    fn test_dirichlet_node_constrains_all_components() {
        let mut dofs = DofMap::new(10, 3);
        dofs.set_dirichlet_node(0, 0.0);
        assert!(dofs.is_dirichlet(0));
        assert!(dofs.is_dirichlet(1));
        assert!(dofs.is_dirichlet(2));
        assert!(!dofs.is_dirichlet(3));
        assert_eq!(dofs.num_constrained_dofs(), 3);
    }
}
