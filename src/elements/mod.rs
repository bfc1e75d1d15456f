pub mod bar;
pub mod kernel;
pub mod quadrature;
pub mod tet;

pub use bar::BarKernel;
pub use kernel::{ElementKernel, KernelInput, KernelOutput, KernelRegistry};
pub use quadrature::GaussQuadrature;
pub use tet::TetKernel;
