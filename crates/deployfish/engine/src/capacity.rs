//! Capacity group sizing

use crate::error::{EngineError, Result};
use deployfish_types::{CapacityGroupRef, CapacityGroupState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Planned change to a capacity group's desired instance count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalingGroupAdjustment {
    pub group_name: String,
    pub current_desired: u32,
    pub new_desired: u32,
    pub min_size: u32,
    pub max_size: u32,
    /// Issue the adjustment even outside [min, max]
    pub force: bool,
}

impl AutoscalingGroupAdjustment {
    /// Size `group` for `service_count` tasks
    pub fn compute(
        group: &CapacityGroupRef,
        state: &CapacityGroupState,
        service_count: u32,
        force: bool,
    ) -> Self {
        Self {
            group_name: group.name.clone(),
            current_desired: state.desired_capacity,
            new_desired: group.instances_for(service_count),
            min_size: state.min_size,
            max_size: state.max_size,
            force,
        }
    }

    pub fn within_bounds(&self) -> bool {
        self.new_desired >= self.min_size && self.new_desired <= self.max_size
    }

    /// Reject out-of-bounds adjustments unless forced
    pub fn check(&self) -> Result<()> {
        if self.force || self.within_bounds() {
            Ok(())
        } else {
            Err(EngineError::Capacity {
                group: self.group_name.clone(),
                requested: self.new_desired,
                min: self.min_size,
                max: self.max_size,
            })
        }
    }
}

impl fmt::Display for AutoscalingGroupAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} instances",
            self.group_name, self.current_desired, self.new_desired
        )?;
        if self.force {
            write!(f, " (forced)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(tasks_per_instance: u32) -> CapacityGroupRef {
        CapacityGroupRef {
            name: "prod-asg".into(),
            tasks_per_instance,
        }
    }

    fn state() -> CapacityGroupState {
        CapacityGroupState {
            name: "prod-asg".into(),
            min_size: 1,
            max_size: 4,
            desired_capacity: 2,
        }
    }

    #[test]
    fn test_compute_rounds_up() {
        let adjustment = AutoscalingGroupAdjustment::compute(&group(2), &state(), 5, false);
        assert_eq!(adjustment.new_desired, 3);
        assert_eq!(adjustment.current_desired, 2);
        assert!(adjustment.check().is_ok());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let adjustment = AutoscalingGroupAdjustment::compute(&group(1), &state(), 5, false);
        match adjustment.check() {
            Err(EngineError::Capacity {
                requested, max, ..
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(max, 4);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
    }

    #[test]
    fn test_force_skips_bounds() {
        let adjustment = AutoscalingGroupAdjustment::compute(&group(1), &state(), 5, true);
        assert!(!adjustment.within_bounds());
        assert!(adjustment.check().is_ok());
    }
}
