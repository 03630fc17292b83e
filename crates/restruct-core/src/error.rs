use thiserror::Error;

use crate::graph::GraphError;
use crate::model::StatId;

/// Fatal outcomes of structurizing one method body.
///
/// A pattern matcher declining a candidate is not an error; only the
/// region-detection driver and the tree invariants raise these.
#[derive(Debug, Error)]
pub enum StructurizeError {
    /// Region detection stopped making progress on a container.
    #[error("structuring failure in {container}: {reason}")]
    StructuringFailure { container: StatId, reason: String },

    /// A tree invariant was violated mid-algorithm.
    #[error("inconsistent structure at {stat}: {invariant}")]
    InconsistentStructure { stat: StatId, invariant: String },

    #[error("invalid input graph: {0}")]
    InvalidGraph(#[from] GraphError),
}

impl StructurizeError {
    pub fn failure(container: StatId, reason: impl Into<String>) -> Self {
        Self::StructuringFailure {
            container,
            reason: reason.into(),
        }
    }

    pub fn inconsistent(stat: StatId, invariant: impl Into<String>) -> Self {
        Self::InconsistentStructure {
            stat,
            invariant: invariant.into(),
        }
    }
}
