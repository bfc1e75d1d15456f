//! Error types for the assembly/solve/adjoint engine.
//!
//! Local failures (`MalformedMesh`, `UnsupportedElementType`,
//! `PartitionMismatch`) are not recoverable at the point they are raised.
//! `Convergence` and `CollectiveTimeout` are recoverable: the caller may
//! retry with relaxed tolerances, a smaller load step, or a longer
//! timeout. Retrying after a `CollectiveTimeout` requires a fresh
//! `PartitionGroup`; the group that timed out is poisoned and rejects
//! further collectives.
//! `Diverged` is terminal for the current analysis step and carries the
//! residual history for diagnostics.

use thiserror::Error;

use crate::mesh::ElementType;

/// Errors that can occur during mesh loading, assembly, solve, or adjoint.
#[derive(Debug, Error)]
pub enum FemError {
    /// Mesh validation failed; no partial mesh state is left behind.
    #[error("malformed mesh: {reason}")]
    MalformedMesh {
        /// What the validator rejected
        reason: String,
    },

    /// No kernel is registered for this element type tag.
    #[error("unsupported element type: {0:?}")]
    UnsupportedElementType(ElementType),

    /// Halo exchange revealed inconsistent neighbor topology.
    #[error("partition mismatch: rank {rank} and neighbor {neighbor} disagree on shared dofs")]
    PartitionMismatch {
        /// Rank that detected the mismatch
        rank: usize,
        /// Neighbor it disagrees with
        neighbor: usize,
    },

    /// Iteration cap reached before the residual tolerance was met.
    #[error("solver failed to converge after {iterations} iterations (residual {residual:.3e})")]
    Convergence {
        /// Iterations performed
        iterations: usize,
        /// Residual norm at the last iteration
        residual: f64,
    },

    /// A collective operation did not complete within the configured bound.
    /// The communicator group that raised this is poisoned; retry on a
    /// fresh `PartitionGroup`.
    #[error("collective operation timed out on rank {rank} after {timeout_ms} ms")]
    CollectiveTimeout {
        /// Rank reporting the timeout
        rank: usize,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// The residual grew past the divergence threshold.
    #[error("solve diverged after {} iterations (last residual {:.3e})",
            residual_history.len(),
            residual_history.last().copied().unwrap_or(f64::NAN))]
    Diverged {
        /// Residual norm per nonlinear iteration, oldest first
        residual_history: Vec<f64>,
    },

    /// Configuration file could not be read, parsed, or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation called in the wrong analysis phase.
    #[error("invalid analysis phase: {0}")]
    InvalidPhase(String),

    /// Cooperative cancellation was requested.
    #[error("analysis aborted")]
    Aborted,
}

impl FemError {
    /// True for failures the caller can retry with adjusted parameters.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FemError::Convergence { .. } | FemError::CollectiveTimeout { .. })
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FemError::MalformedMesh { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(FemError::Convergence { iterations: 10, residual: 1.0 }.is_recoverable());
        assert!(FemError::CollectiveTimeout { rank: 0, timeout_ms: 100 }.is_recoverable());
        assert!(!FemError::malformed("bad").is_recoverable());
        assert!(!FemError::Diverged { residual_history: vec![1.0, 1e7] }.is_recoverable());
    }

    #[test]
    fn test_diverged_message_uses_last_residual() {
        let err = FemError::Diverged { residual_history: vec![1.0, 10.0, 1e7] };
        let msg = format!("{}", err);
        assert!(msg.contains("3 iterations"));
        assert!(msg.contains("1.000e7"));
    }
}
