//! # Radio Power Constraints
//!
//! The driver keeps the radio powered while at least one internal reason to do
//! so is held. The reasons form a small bit set:
//!
//! - `CMD_Q`: commands are queued or the inactivity timeout has not elapsed
//! - `RAT`: a RAT channel is armed and must keep counting
//! - `DISABLE_PM`: power management was switched off by a client
//!
//! Releasing the last reason asks the power state machine to power down.
//! The system-level power manager is a separate collaborator, see
//! [`crate::rfcore::hal::PowerManager`].

use bitflags::bitflags;

use crate::error::RfError;

bitflags! {
    /// Reasons to keep the radio powered
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PowerConstraint: u8 {
        /// Commands outstanding or inactivity window running
        const CMD_Q = 1 << 0;
        /// RAT channel armed
        const RAT = 1 << 1;
        /// Power management disabled
        const DISABLE_PM = 1 << 2;
    }
}

/// Outcome of releasing a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other constraints are still held
    Held,
    /// The set became empty; the radio may power down
    PowerDown,
}

/// The set of held power constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintSet {
    held: PowerConstraint,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self {
            held: PowerConstraint::empty(),
        }
    }

    pub fn set(&mut self, constraint: PowerConstraint) {
        self.held |= constraint;
    }

    /// Drop a constraint
    ///
    /// Fails with [`RfError::RadioInactive`] when nothing was held, which means
    /// the radio is already on its way down.
    pub fn release(&mut self, constraint: PowerConstraint) -> Result<Release, RfError> {
        if self.held.is_empty() {
            return Err(RfError::RadioInactive);
        }
        self.held.remove(constraint);
        if self.held.is_empty() {
            Ok(Release::PowerDown)
        } else {
            Ok(Release::Held)
        }
    }

    pub fn contains(&self, constraint: PowerConstraint) -> bool {
        self.held.contains(constraint)
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn held(&self) -> PowerConstraint {
        self.held
    }

    /// Forget every constraint without requesting a power-down
    pub fn clear(&mut self) {
        self.held = PowerConstraint::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_last_requests_power_down() {
        let mut set = ConstraintSet::new();
        set.set(PowerConstraint::CMD_Q);
        set.set(PowerConstraint::RAT);
        assert_eq!(set.release(PowerConstraint::CMD_Q), Ok(Release::Held));
        assert_eq!(set.release(PowerConstraint::RAT), Ok(Release::PowerDown));
        assert!(set.is_empty());
    }

    #[test]
    fn test_release_on_empty_set_fails() {
        let mut set = ConstraintSet::new();
        assert_eq!(set.release(PowerConstraint::CMD_Q), Err(RfError::RadioInactive));
    }

    #[test]
    fn test_releasing_unheld_reason_keeps_others() {
        let mut set = ConstraintSet::new();
        set.set(PowerConstraint::DISABLE_PM);
        assert_eq!(set.release(PowerConstraint::CMD_Q), Ok(Release::Held));
        assert!(set.contains(PowerConstraint::DISABLE_PM));
    }
}
