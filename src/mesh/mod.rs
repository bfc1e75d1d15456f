pub mod geometry;
pub mod partition;
pub mod store;
pub mod topology;

pub use geometry::Geometry;
pub use partition::PartitionMap;
pub use store::{MeshBuilder, MeshStore, RawElement, RawMesh};
pub use topology::{Connectivity, Element, ElementType};
