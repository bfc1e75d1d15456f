//! The mesh/topology store: validated, immutable mesh data plus the
//! partition map computed at load time.
//!
//! `MeshStore::from_raw` is the only way to build a store. Validation
//! failures return `FemError::MalformedMesh` before any store exists, so
//! no partial state is ever observable.

use nalgebra::Point3;

use super::geometry::Geometry;
use super::partition::PartitionMap;
use super::topology::{Connectivity, Element, ElementType};
use crate::error::FemError;

/// Unvalidated mesh input, as produced by an upstream mesh source.
#[derive(Debug, Clone, Default)]
pub struct RawMesh {
    /// Node coordinates
    pub coordinates: Vec<[f64; 3]>,
    /// Element connectivity
    pub elements: Vec<RawElement>,
}

/// One element of a raw mesh
#[derive(Debug, Clone)]
pub struct RawElement {
    pub etype: ElementType,
    pub nodes: Vec<usize>,
    pub design_var: usize,
}

/// Validated, immutable mesh with partition metadata.
///
/// There is no mutation API: once loaded, topology and geometry are fixed
/// for the lifetime of the analysis.
#[derive(Debug, Clone)]
pub struct MeshStore {
    geometry: Geometry,
    connectivity: Connectivity,
    dofs_per_node: usize,
    partitions: PartitionMap,
}

impl MeshStore {
    /// Validate raw mesh data and freeze it into a store.
    ///
    /// # Arguments
    /// * `raw` - node coordinates and element connectivity
    /// * `num_partitions` - number of parallel partitions to pre-compute
    ///
    /// # Errors
    /// `FemError::MalformedMesh` when an element references a node out of
    /// range, repeats a node (degenerate connectivity), or carries the
    /// wrong node count for its type; also when the mesh is empty or
    /// `num_partitions` is zero.
    pub fn from_raw(raw: RawMesh, num_partitions: usize) -> Result<Self, FemError> {
        if num_partitions == 0 {
            return Err(FemError::malformed("num_partitions must be at least 1"));
        }
        if raw.coordinates.is_empty() {
            return Err(FemError::malformed("mesh has no nodes"));
        }
        if raw.elements.is_empty() {
            return Err(FemError::malformed("mesh has no elements"));
        }

        let num_nodes = raw.coordinates.len();
        let mut dofs_per_node = None;

        for (elem_id, elem) in raw.elements.iter().enumerate() {
            if elem.nodes.len() != elem.etype.num_nodes() {
                return Err(FemError::malformed(format!(
                    "element {} has {} nodes, {:?} requires {}",
                    elem_id,
                    elem.nodes.len(),
                    elem.etype,
                    elem.etype.num_nodes()
                )));
            }
            for &node in &elem.nodes {
                if node >= num_nodes {
                    return Err(FemError::malformed(format!(
                        "element {} references node {} but mesh has {} nodes",
                        elem_id, node, num_nodes
                    )));
                }
            }
            for (i, &a) in elem.nodes.iter().enumerate() {
                if elem.nodes[i + 1..].contains(&a) {
                    return Err(FemError::malformed(format!(
                        "element {} has degenerate connectivity (node {} repeated)",
                        elem_id, a
                    )));
                }
            }
            match dofs_per_node {
                None => dofs_per_node = Some(elem.etype.dofs_per_node()),
                Some(d) if d != elem.etype.dofs_per_node() => {
                    return Err(FemError::malformed(format!(
                        "element {} mixes dof families ({} vs {} dofs per node)",
                        elem_id,
                        elem.etype.dofs_per_node(),
                        d
                    )));
                }
                _ => {}
            }
        }

        let dofs_per_node = dofs_per_node.unwrap_or(1);

        let geometry = Geometry {
            nodes: raw
                .coordinates
                .iter()
                .map(|c| Point3::new(c[0], c[1], c[2]))
                .collect(),
        };
        let connectivity = Connectivity {
            elements: raw
                .elements
                .into_iter()
                .map(|e| Element::new(e.etype, e.nodes, e.design_var))
                .collect(),
        };

        let total_dofs = num_nodes * dofs_per_node;
        let partitions =
            PartitionMap::build(&connectivity, dofs_per_node, total_dofs, num_partitions);

        Ok(Self { geometry, connectivity, dofs_per_node, partitions })
    }

    pub fn num_nodes(&self) -> usize {
        self.geometry.num_nodes()
    }

    pub fn num_elements(&self) -> usize {
        self.connectivity.num_elements()
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    pub fn total_dofs(&self) -> usize {
        self.num_nodes() * self.dofs_per_node
    }

    /// Node coordinates by id
    pub fn node(&self, idx: usize) -> Option<&Point3<f64>> {
        self.geometry.get_node(idx)
    }

    pub fn element(&self, idx: usize) -> &Element {
        &self.connectivity.elements[idx]
    }

    /// Read-only iteration over the elements owned by `rank`
    pub fn owned_elements(&self, rank: usize) -> impl Iterator<Item = (usize, &Element)> {
        self.partitions
            .owned_elements(rank)
            .iter()
            .map(move |&id| (id, &self.connectivity.elements[id]))
    }

    pub fn partitions(&self) -> &PartitionMap {
        &self.partitions
    }

    /// Global dof indices for an element, node-major
    pub fn element_dofs(&self, elem: &Element) -> Vec<usize> {
        let mut dofs = Vec::with_capacity(elem.nodes.len() * self.dofs_per_node);
        for &node in &elem.nodes {
            for comp in 0..self.dofs_per_node {
                dofs.push(node * self.dofs_per_node + comp);
            }
        }
        dofs
    }

    /// Coordinates of an element's nodes, in connectivity order
    pub fn element_coords(&self, elem: &Element) -> Vec<Point3<f64>> {
        elem.nodes.iter().map(|&n| self.geometry.nodes[n]).collect()
    }
}

/// Test-scale mesh builders.
///
/// These replace a real mesh source (mesh generation proper is out of
/// scope); they produce `RawMesh` inputs that still go through the full
/// `from_raw` validation path.
pub struct MeshBuilder;

impl MeshBuilder {
    /// A 1D chain of `n_elems` bar elements along the x axis, node spacing
    /// `length / n_elems`. Element `e` reads design variable `e`.
    pub fn bar_chain(n_elems: usize, length: f64) -> RawMesh {
        let dx = length / n_elems as f64;
        let coordinates = (0..=n_elems).map(|i| [i as f64 * dx, 0.0, 0.0]).collect();
        let elements = (0..n_elems)
            .map(|e| RawElement {
                etype: ElementType::Bar2,
                nodes: vec![e, e + 1],
                design_var: e,
            })
            .collect();
        RawMesh { coordinates, elements }
    }

    /// A unit cube split into five tetrahedra, all reading design
    /// variable 0.
    pub fn unit_cube_tets() -> RawMesh {
        let coordinates = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let tets = [
            [0, 1, 2, 5],
            [0, 2, 3, 7],
            [0, 5, 2, 7],
            [0, 5, 7, 4],
            [2, 7, 5, 6],
        ];
        let elements = tets
            .iter()
            .map(|t| RawElement { etype: ElementType::Tet4, nodes: t.to_vec(), design_var: 0 })
            .collect();
        RawMesh { coordinates, elements }
    }
}
