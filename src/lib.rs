//! Parallel finite-element assembly, solve, and adjoint engine.
//!
//! A mesh is partitioned into contiguous element blocks, each partition
//! assembles the tangent system for its owned elements, and halo
//! exchanges sum the partition-boundary rows so every rank sees the same
//! coupled system. The Newton outer loop drives assemble/solve cycles to
//! convergence, after which the adjoint engine differentiates a scalar
//! functional through the same element kernels.

pub mod assembly;
pub mod config;
pub mod design;
pub mod elements;
pub mod error;
pub mod mesh;
pub mod parallel;
pub mod solver;

pub use assembly::{Assembler, DofMap, GlobalSystem};
pub use config::{EngineConfig, ParallelSection, SolverSection, TransientSection};
pub use design::{DesignVariable, DesignVector};
pub use elements::{
    BarKernel, ElementKernel, GaussQuadrature, KernelInput, KernelOutput, KernelRegistry,
    TetKernel,
};
pub use error::FemError;
pub use mesh::{
    Connectivity, Element, ElementType, Geometry, MeshBuilder, MeshStore, PartitionMap,
    RawElement, RawMesh,
};
pub use parallel::{AbortHandle, ChannelComm, Communicator, PartitionGroup, SerialComm};
pub use solver::{
    AdjointEngine, Analysis, AnalysisPhase, BackwardEuler, Compliance, ConjugateGradient,
    DirectSolver, Functional, Gradient, LinearSolverKind, NewtonConfig, NewtonSolver, NewtonStats,
    NodalDisplacement, SolutionState, SolverStats, TimeStepStats, TransientAnalysis,
};
