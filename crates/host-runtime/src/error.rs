// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-level error kinds and the first-error accumulator used by
//! best-effort teardown paths.

/// Errors surfaced by the host manager.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Generic runtime failure: infeasible partition, invalid state,
    /// missing DAG.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A run or removal targeted a name the registry does not hold.
    #[error("network not found: {0}")]
    NetNotFound(String),

    /// Removal blocked by outstanding runs or an in-flight add.
    #[error("network busy: {0}")]
    NetBusy(String),

    /// Admission refused because the queue is at capacity.
    #[error("request refused: {0}")]
    RequestRefused(String),

    /// Graph IR failure.
    #[error(transparent)]
    Graph(#[from] graph_ir::GraphError),

    /// Backend failure.
    #[error(transparent)]
    Backend(#[from] backend_core::BackendError),

    /// Device failure.
    #[error(transparent)]
    Device(#[from] device_manager::DeviceError),

    /// Partitioner failure.
    #[error(transparent)]
    Planner(#[from] partition_planner::PlannerError),
}

/// Collects the first error of a best-effort sequence; later errors are
/// logged and dropped so teardown can complete.
#[derive(Debug, Default)]
pub struct FirstErr {
    first: Option<HostError>,
}

impl FirstErr {
    /// Records the outcome of one step.
    pub fn set<E: Into<HostError>>(&mut self, result: Result<(), E>) {
        if let Err(err) = result {
            let err = err.into();
            if self.first.is_none() {
                self.first = Some(err);
            } else {
                tracing::warn!("suppressing subsequent teardown error: {err}");
            }
        }
    }

    /// Returns `Err` with the first recorded error, if any.
    pub fn into_result(self) -> Result<(), HostError> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_err_keeps_first() {
        let mut acc = FirstErr::default();
        acc.set::<HostError>(Ok(()));
        acc.set(Err(HostError::Runtime("one".into())));
        acc.set(Err(HostError::Runtime("two".into())));
        let err = acc.into_result().unwrap_err();
        assert!(matches!(err, HostError::Runtime(msg) if msg == "one"));
    }

    #[test]
    fn test_first_err_empty_is_ok() {
        let acc = FirstErr::default();
        assert!(acc.into_result().is_ok());
    }
}
