pub mod adjoint;
pub mod cg;
pub mod direct;
pub mod functional;
pub mod linear;
pub mod newton;
pub mod transient;

pub use adjoint::{AdjointEngine, Gradient};
pub use cg::ConjugateGradient;
pub use direct::DirectSolver;
pub use functional::{Compliance, Functional, NodalDisplacement};
pub use linear::{LinearOperator, SolverStats, SolverUtils};
pub use newton::{
    Analysis, AnalysisPhase, LinearSolverKind, NewtonConfig, NewtonSolver, NewtonStats,
    SolutionState,
};
pub use transient::{BackwardEuler, TimeStepStats, TransientAnalysis};
