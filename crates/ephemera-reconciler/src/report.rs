use ephemera_domain::EnvironmentId;
use serde::{Deserialize, Serialize};

/// One environment-level action a sweep took, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    MarkedFailedStuckProvisioning { environment_id: EnvironmentId },
    MarkedDestroyedStuckDestroying { environment_id: EnvironmentId },
    MarkedFailedDrift { environment_id: EnvironmentId },
    PurgedDestroyed { environment_id: EnvironmentId },
    RetriedFailed { environment_id: EnvironmentId },
}

/// The combined result of one reconciliation pass (all five sweeps).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub changes: Vec<Change>,
    pub errors: Vec<String>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        self.changes.extend(other.changes);
        self.errors.extend(other.errors);
    }
}
