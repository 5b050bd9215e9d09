//! Derived finger force readings.
//!
//! The arm has no force sensors. Forces are computed from finger flexion:
//! a fully flexed finger (90°) reads 100%. Grip is the mean finger angle in
//! degrees, so a closed hand grips at 90.

use std::collections::BTreeMap;

use crate::joint::{Joint, JointState, FINGER_MAX};

/// Grip above which a strong grip is reported.
pub const STRONG_GRIP: u8 = 70;

/// Coarse force bucket used for display and haptic cues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceLevel {
    Low,
    Medium,
    High,
}

impl ForceLevel {
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0..=29 => ForceLevel::Low,
            30..=69 => ForceLevel::Medium,
            _ => ForceLevel::High,
        }
    }
}

/// Per-finger force in percent and overall grip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForceReadings {
    /// Mean finger angle, floored, in degrees (0..=90).
    pub grip: u8,
    pub thumb: u8,
    pub index: u8,
    pub middle: u8,
    pub ring: u8,
    pub pinky: u8,
}

fn percent_of_max(angle: i32) -> u8 {
    let angle = angle.clamp(0, FINGER_MAX);
    (angle * 100 / FINGER_MAX) as u8
}

impl ForceReadings {
    /// Compute readings for a pose. An unpowered arm reads zero everywhere.
    pub fn from_pose(pose: &JointState, powered: bool) -> Self {
        if !powered {
            return Self::default();
        }
        let total: i32 = Joint::FINGERS
            .iter()
            .map(|&j| pose.get(j).clamp(0, FINGER_MAX))
            .sum();
        let mean = total / Joint::FINGERS.len() as i32;
        Self {
            grip: mean as u8,
            thumb: percent_of_max(pose.thumb),
            index: percent_of_max(pose.index),
            middle: percent_of_max(pose.middle),
            ring: percent_of_max(pose.ring),
            pinky: percent_of_max(pose.pinky),
        }
    }

    pub fn grip_level(&self) -> ForceLevel {
        ForceLevel::from_percent(self.grip)
    }

    /// Check if the grip is strong enough to trigger haptic feedback.
    pub fn is_strong_grip(&self) -> bool {
        self.grip > STRONG_GRIP
    }

    /// Readings keyed by name, as carried in telemetry `force_data`.
    pub fn to_map(&self) -> BTreeMap<String, u8> {
        [
            ("grip", self.grip),
            ("thumb", self.thumb),
            ("index", self.index),
            ("middle", self.middle),
            ("ring", self.ring),
            ("pinky", self.pinky),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::presets;

    #[test]
    fn test_full_grip() {
        let f = ForceReadings::from_pose(&presets::grip(), true);
        assert_eq!(f.grip, 90);
        assert_eq!(f.pinky, 100);
        assert!(f.is_strong_grip());
        assert_eq!(f.grip_level(), ForceLevel::High);
    }

    #[test]
    fn test_partial_flexion_floors() {
        // 45/90 = 50%, 1/90 = 1.1% -> 1
        let f = ForceReadings::from_pose(&JointState::hand(45, 1, 0, 0, 0), true);
        assert_eq!(f.thumb, 50);
        assert_eq!(f.index, 1);
        // mean angle 46/5 = 9
        assert_eq!(f.grip, 9);
        assert_eq!(f.grip_level(), ForceLevel::Low);
    }

    #[test]
    fn test_strong_grip_threshold() {
        let at_70 = ForceReadings::from_pose(&JointState::hand(70, 70, 70, 70, 70), true);
        assert_eq!(at_70.grip, 70);
        assert!(!at_70.is_strong_grip());
        assert_eq!(at_70.thumb, 77);

        let at_71 = ForceReadings::from_pose(&JointState::hand(71, 71, 71, 71, 71), true);
        assert_eq!(at_71.grip, 71);
        assert!(at_71.is_strong_grip());
    }

    #[test]
    fn test_unpowered_reads_zero() {
        let f = ForceReadings::from_pose(&presets::grip(), false);
        assert_eq!(f, ForceReadings::default());
    }

    #[test]
    fn test_levels() {
        assert_eq!(ForceLevel::from_percent(29), ForceLevel::Low);
        assert_eq!(ForceLevel::from_percent(30), ForceLevel::Medium);
        assert_eq!(ForceLevel::from_percent(70), ForceLevel::High);
    }

    #[test]
    fn test_map_keys() {
        let map = ForceReadings::default().to_map();
        assert_eq!(map.len(), 6);
        assert!(map.contains_key("grip"));
    }
}
