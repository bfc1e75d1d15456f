pub mod assembler;
pub mod dof;
pub mod system;

pub use assembler::Assembler;
pub use dof::DofMap;
pub use system::GlobalSystem;
