//! Device state derivation
//!
//! A device's state is recomputed on every poll from what the job runner
//! reports and the device's own flags. Nothing here is cached.

use labfleet_api::{DeviceState, QualifierState};

/// Everything besides the runner's answer that decides a device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInputs {
    pub has_power_port: bool,
    pub is_retired: bool,
    pub ready_for_service: bool,
    pub quick_check_queued: bool,
    pub qualifier: QualifierState,
}

/// Combine the runner's state with the device flags
///
/// An idle runner is refined by the device configuration. A busy runner is
/// relabelled when the job belongs to the qualifier.
#[must_use]
pub fn derive_state(runner: DeviceState, inputs: &StateInputs) -> DeviceState {
    if runner == DeviceState::Idle {
        if !inputs.has_power_port {
            DeviceState::WaitForConfig
        } else if inputs.is_retired {
            DeviceState::Retired
        } else if !inputs.ready_for_service {
            DeviceState::Training
        } else if inputs.quick_check_queued {
            DeviceState::QuickCheck
        } else {
            DeviceState::Idle
        }
    } else {
        match inputs.qualifier {
            QualifierState::Enrolling => DeviceState::Training,
            QualifierState::QuickCheck => DeviceState::QuickCheck,
            _ => runner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StateInputs {
        StateInputs {
            has_power_port: true,
            is_retired: false,
            ready_for_service: true,
            quick_check_queued: false,
            qualifier: QualifierState::Idle,
        }
    }

    #[test]
    fn test_idle_runner_is_refined_in_priority_order() {
        let all_flags = StateInputs {
            has_power_port: false,
            is_retired: true,
            ready_for_service: false,
            quick_check_queued: true,
            ..inputs()
        };
        assert_eq!(derive_state(DeviceState::Idle, &all_flags), DeviceState::WaitForConfig);

        let retired = StateInputs {
            has_power_port: true,
            ..all_flags
        };
        assert_eq!(derive_state(DeviceState::Idle, &retired), DeviceState::Retired);

        let untrained = StateInputs {
            is_retired: false,
            ..retired
        };
        assert_eq!(derive_state(DeviceState::Idle, &untrained), DeviceState::Training);

        let queued = StateInputs {
            ready_for_service: true,
            ..untrained
        };
        assert_eq!(derive_state(DeviceState::Idle, &queued), DeviceState::QuickCheck);

        assert_eq!(derive_state(DeviceState::Idle, &inputs()), DeviceState::Idle);
    }

    #[test]
    fn test_qualifier_relabels_busy_runner() {
        let enrolling = StateInputs {
            qualifier: QualifierState::Enrolling,
            ..inputs()
        };
        assert_eq!(derive_state(DeviceState::Running, &enrolling), DeviceState::Training);

        let checking = StateInputs {
            qualifier: QualifierState::QuickCheck,
            ..inputs()
        };
        assert_eq!(derive_state(DeviceState::Queued, &checking), DeviceState::QuickCheck);

        assert_eq!(derive_state(DeviceState::Running, &inputs()), DeviceState::Running);
        assert_eq!(derive_state(DeviceState::Borked, &inputs()), DeviceState::Borked);
    }
}
