use nalgebra::Point3;

/// Geometric information for the mesh: node coordinates only.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    /// Node coordinates, indexed by node id
    pub nodes: Vec<Point3<f64>>,
}

impl Geometry {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_node(&self, idx: usize) -> Option<&Point3<f64>> {
        self.nodes.get(idx)
    }
}
