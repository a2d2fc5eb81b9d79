// src/session/governor.rs

//! Admission check for new sessions.

use crate::errors::{OrchestratorError, Result};

/// Rejects new work once the number of live sessions reaches the ceiling.
///
/// Stateless: the caller passes the live count it observed while holding the
/// registry lock, so the check and the insertion that follows it are atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyGovernor {
    max_sessions: usize,
}

impl ConcurrencyGovernor {
    pub fn new(max_sessions: usize) -> Self {
        Self { max_sessions }
    }

    pub fn admit(&self, live_sessions: usize) -> Result<()> {
        if live_sessions < self.max_sessions {
            Ok(())
        } else {
            Err(OrchestratorError::CapacityExceeded {
                max: self.max_sessions,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_below_ceiling_only() {
        let gov = ConcurrencyGovernor::new(2);
        assert!(gov.admit(0).is_ok());
        assert!(gov.admit(1).is_ok());
        assert!(matches!(
            gov.admit(2),
            Err(OrchestratorError::CapacityExceeded { max: 2 })
        ));
        assert!(gov.admit(3).is_err());
    }
}
