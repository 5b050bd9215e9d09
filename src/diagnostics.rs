//! Health checks derived from the current pose and power state.

use std::fmt;

use crate::joint::{Joint, JointState};

/// Angle beyond which a joint counts as loaded.
const LOAD_ANGLE: i32 = 45;
/// More loaded joints than this is a warning.
const MAX_LOADED_JOINTS: usize = 6;
/// Shoulder or elbow angle beyond which the arm is under stress.
const STRESS_ANGLE: i32 = 70;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::Error => "error",
        })
    }
}

/// Result of one check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticStatus {
    pub component: &'static str,
    pub status: Status,
    pub message: String,
}

impl DiagnosticStatus {
    fn new(component: &'static str, status: Status, message: impl Into<String>) -> Self {
        Self {
            component,
            status,
            message: message.into(),
        }
    }
}

/// Run every check. An unpowered arm only reports the power system.
pub fn run_diagnostics(pose: &JointState, powered: bool) -> Vec<DiagnosticStatus> {
    if !powered {
        return vec![DiagnosticStatus::new(
            "Power System",
            Status::Error,
            "System offline",
        )];
    }

    let mut results = vec![DiagnosticStatus::new(
        "Power System",
        Status::Ok,
        "Operating normally",
    )];

    let loaded = Joint::ALL
        .iter()
        .filter(|&&j| pose.get(j).abs() > LOAD_ANGLE)
        .count();
    results.push(if loaded > MAX_LOADED_JOINTS {
        DiagnosticStatus::new(
            "Motor Load",
            Status::Warning,
            format!("High load: {}/8 joints active", loaded),
        )
    } else {
        DiagnosticStatus::new(
            "Motor Load",
            Status::Ok,
            format!("Normal load: {}/8 joints active", loaded),
        )
    });

    let stressed = pose.shoulder.abs() > STRESS_ANGLE || pose.elbow.abs() > STRESS_ANGLE;
    results.push(if stressed {
        DiagnosticStatus::new("Joint Stress", Status::Warning, "High stress on primary joints")
    } else {
        DiagnosticStatus::new("Joint Stress", Status::Ok, "All joints within safe limits")
    });

    results.push(DiagnosticStatus::new("Sensors", Status::Ok, "All sensors responsive"));
    results.push(DiagnosticStatus::new("Communication", Status::Ok, "Real-time sync active"));
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(results: &[DiagnosticStatus], component: &str) -> Status {
        results
            .iter()
            .find(|d| d.component == component)
            .map(|d| d.status)
            .unwrap()
    }

    #[test]
    fn test_offline() {
        let results = run_diagnostics(&JointState::ZERO, false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, Status::Error);
    }

    #[test]
    fn test_idle_arm_is_healthy() {
        let results = run_diagnostics(&JointState::ZERO, true);
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|d| d.status == Status::Ok));
    }

    #[test]
    fn test_high_load_and_stress() {
        let pose = JointState::new(80, -75, 60, 90, 90, 90, 90, 90);
        let results = run_diagnostics(&pose, true);
        assert_eq!(status_of(&results, "Motor Load"), Status::Warning);
        assert_eq!(status_of(&results, "Joint Stress"), Status::Warning);
        assert!(results[1].message.contains("8/8"));
    }
}
