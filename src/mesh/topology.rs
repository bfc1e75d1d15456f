/// Element type tag
///
/// Kernels are looked up by tag in a registry rather than stored per
/// element, which keeps the per-element assembly loop free of wide
/// virtual dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 2-node axial bar (1 dof per node)
    Bar2,
    /// 4-node linear tetrahedron (3 dofs per node)
    Tet4,
}

impl ElementType {
    /// Number of nodes the connectivity list must carry for this type
    pub fn num_nodes(&self) -> usize {
        match self {
            ElementType::Bar2 => 2,
            ElementType::Tet4 => 4,
        }
    }

    /// Degrees of freedom per node for this element family
    pub fn dofs_per_node(&self) -> usize {
        match self {
            ElementType::Bar2 => 1,
            ElementType::Tet4 => 3,
        }
    }
}

/// A single finite element: ordered node references, a type tag, and the
/// index of the design variable its kernel reads.
///
/// Created at mesh load, immutable thereafter.
#[derive(Debug, Clone)]
pub struct Element {
    /// Global node indices, in the ordering the kernel expects
    pub nodes: Vec<usize>,
    /// Element type tag, resolved to a kernel at assembly time
    pub etype: ElementType,
    /// Index into the design vector
    pub design_var: usize,
}

impl Element {
    pub fn new(etype: ElementType, nodes: Vec<usize>, design_var: usize) -> Self {
        Self { nodes, etype, design_var }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// Connectivity information for the mesh
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    pub elements: Vec<Element>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self { elements: Vec::new() }
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_arity() {
        assert_eq!(ElementType::Bar2.num_nodes(), 2);
        assert_eq!(ElementType::Tet4.num_nodes(), 4);
        assert_eq!(ElementType::Bar2.dofs_per_node(), 1);
        assert_eq!(ElementType::Tet4.dofs_per_node(), 3);
    }

    #[test]
    fn test_element_construction() {
        let elem = Element::new(ElementType::Bar2, vec![3, 7], 0);
        assert_eq!(elem.num_nodes(), 2);
        assert_eq!(elem.etype, ElementType::Bar2);
        assert_eq!(elem.design_var, 0);
    }
}
