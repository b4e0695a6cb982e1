//! Appliance orchestration error types.

use thiserror::Error;

use crate::dispatch::DispatchError;

/// Errors that can occur while deploying or configuring an appliance.
#[derive(Debug, Error)]
pub enum ElbError {
    /// A precondition does not hold: network not implemented, appliance
    /// missing, or appliance not ready.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Another operation holds the network, or the network record could
    /// not be obtained under the lock.
    #[error("concurrent operation: {0}")]
    ConcurrentOperation(String),

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The host agent did not answer in time or could not be reached.
    #[error("agent unavailable: {0}")]
    AgentUnavailable(#[from] DispatchError),

    #[error("state store error: {0}")]
    State(#[from] lbgrid_state::StateError),
}

impl ElbError {
    /// Whether retrying the whole operation later may succeed.
    ///
    /// Lock contention, capacity, storage and agent failures are transient;
    /// precondition and store failures need someone to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ElbError::ConcurrentOperation(_)
                | ElbError::InsufficientCapacity(_)
                | ElbError::StorageUnavailable(_)
                | ElbError::AgentUnavailable(_)
        )
    }
}

pub type ElbResult<T> = Result<T, ElbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(ElbError::ConcurrentOperation("net 1".into()).is_retryable());
        assert!(ElbError::InsufficientCapacity("no host".into()).is_retryable());
        assert!(ElbError::StorageUnavailable("pool down".into()).is_retryable());
        assert!(
            ElbError::from(DispatchError::Timeout {
                host_id: 3,
                timeout: Duration::from_secs(1),
            })
            .is_retryable()
        );
    }

    #[test]
    fn precondition_failures_are_not_retryable() {
        assert!(!ElbError::ResourceUnavailable("not implemented".into()).is_retryable());
        assert!(
            !ElbError::from(lbgrid_state::StateError::Read("io".into())).is_retryable()
        );
    }

    #[test]
    fn display_carries_context() {
        let err = ElbError::ConcurrentOperation("unable to lock network 7".into());
        assert_eq!(err.to_string(), "concurrent operation: unable to lock network 7");
    }
}
