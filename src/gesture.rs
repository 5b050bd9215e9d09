//! Gestures and the records exchanged with the gesture store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::joint::JointState;
use crate::recorder::Recording;

/// Default pause after each gesture of a newly built sequence, in ms.
pub const DEFAULT_TIMING_MS: u64 = 2000;

/// Something the player can perform.
#[derive(Clone, Debug)]
pub enum Gesture {
    /// Interpolated move to a single target pose.
    Pose(JointState),
    /// Frame-by-frame replay of a recording, honoring its capture timing.
    Recorded(Recording),
}

impl Gesture {
    /// Pose the arm ends in when the gesture completes, if it is known
    /// up front. An empty recording leaves the arm where it is.
    pub fn final_pose(&self) -> Option<JointState> {
        match self {
            Gesture::Pose(pose) => Some(*pose),
            Gesture::Recorded(rec) => rec.last().map(|f| f.pose),
        }
    }
}

impl From<JointState> for Gesture {
    fn from(pose: JointState) -> Self {
        Gesture::Pose(pose)
    }
}

impl From<Recording> for Gesture {
    fn from(rec: Recording) -> Self {
        Gesture::Recorded(rec)
    }
}

/// A gesture as stored by the gesture store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub joint_data: JointState,
    /// Length of the captured motion, in milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub is_preset: bool,
}

impl GestureRecord {
    pub fn gesture(&self) -> Gesture {
        Gesture::Pose(self.joint_data)
    }
}

/// A sequence as stored by the gesture store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub gesture_ids: Vec<String>,
    /// Pause after each gesture, in milliseconds. Same length as `gesture_ids`.
    pub timings: Vec<u64>,
    pub loop_count: u32,
}

impl SequenceRecord {
    /// Build a record with the default timing after every gesture.
    pub fn new(id: &str, name: &str, gesture_ids: Vec<String>, loop_count: u32) -> Self {
        let timings = vec![DEFAULT_TIMING_MS; gesture_ids.len()];
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: format!("Sequence with {} gestures", gesture_ids.len()),
            gesture_ids,
            timings,
            loop_count,
        }
    }
}

/// Built-in quick gestures.
pub mod presets {
    use super::GestureRecord;
    use crate::joint::JointState;

    pub fn open() -> JointState {
        JointState::ZERO
    }

    pub fn grip() -> JointState {
        JointState::hand(90, 90, 90, 90, 90)
    }

    pub fn point() -> JointState {
        JointState::hand(45, 0, 90, 90, 90)
    }

    pub fn peace() -> JointState {
        JointState::hand(45, 0, 0, 90, 90)
    }

    pub fn thumbs_up() -> JointState {
        JointState::new(0, 0, -20, 0, 90, 90, 90, 90)
    }

    pub fn ok() -> JointState {
        JointState::hand(45, 45, 0, 0, 0)
    }

    /// All presets as `(name, pose)`, in display order.
    pub fn all() -> [(&'static str, JointState); 6] {
        [
            ("Open", open()),
            ("Grip", grip()),
            ("Point", point()),
            ("Peace", peace()),
            ("Thumbs Up", thumbs_up()),
            ("OK", ok()),
        ]
    }

    /// Store id of a preset, e.g. `preset-thumbs-up`.
    pub fn id_for(name: &str) -> String {
        format!("preset-{}", name.to_lowercase().replace(' ', "-"))
    }

    /// Presets as gesture records.
    pub fn records() -> Vec<GestureRecord> {
        all()
            .into_iter()
            .map(|(name, pose)| GestureRecord {
                id: id_for(name),
                name: name.to_string(),
                description: format!("{} preset", name),
                joint_data: pose,
                duration: 0,
                is_preset: true,
            })
            .collect()
    }
}

/// In-memory view of the gesture store, used to resolve sequence records.
#[derive(Clone, Debug, Default)]
pub struct GestureCatalog {
    gestures: HashMap<String, GestureRecord>,
}

impl GestureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded with the built-in presets.
    pub fn with_presets() -> Self {
        let mut catalog = Self::new();
        for record in presets::records() {
            catalog.insert(record);
        }
        catalog
    }

    /// Add or replace a record. Returns the record it replaced.
    pub fn insert(&mut self, record: GestureRecord) -> Option<GestureRecord> {
        self.gestures.insert(record.id.clone(), record)
    }

    pub fn get(&self, id: &str) -> Option<&GestureRecord> {
        self.gestures.get(id)
    }

    /// Look up a record by display name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&GestureRecord> {
        self.gestures
            .values()
            .find(|g| g.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.gestures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gestures.is_empty()
    }

    /// Records sorted by name.
    pub fn records(&self) -> Vec<&GestureRecord> {
        let mut all: Vec<_> = self.gestures.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

impl Extend<GestureRecord> for GestureCatalog {
    fn extend<T: IntoIterator<Item = GestureRecord>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for (name, pose) in presets::all() {
            assert!(pose.is_valid(), "{} is out of range", name);
        }
        assert_eq!(presets::thumbs_up().wrist, -20);
    }

    #[test]
    fn test_catalog_presets() {
        let catalog = GestureCatalog::with_presets();
        assert_eq!(catalog.len(), 6);
        let grip = catalog.get("preset-grip").unwrap();
        assert!(grip.is_preset);
        assert_eq!(grip.joint_data, presets::grip());
        assert_eq!(
            catalog.find_by_name("thumbs up").unwrap().id,
            "preset-thumbs-up"
        );
    }

    #[test]
    fn test_gesture_record_wire_shape() {
        let json = r#"{
            "id": "g1",
            "name": "Wave",
            "description": "hello",
            "joint_data": {"shoulder": 30, "elbow": 0, "wrist": 10,
                           "thumb": 0, "index": 0, "middle": 0, "ring": 0, "pinky": 150},
            "duration": 1200,
            "is_preset": false,
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let record: GestureRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.duration, 1200);
        assert_eq!(record.joint_data.pinky, 90);
        assert!(matches!(record.gesture(), Gesture::Pose(p) if p.shoulder == 30));
    }

    #[test]
    fn test_sequence_record_defaults() {
        let seq = SequenceRecord::new("s1", "Demo", vec!["a".into(), "b".into()], 2);
        assert_eq!(seq.timings, vec![2000, 2000]);
        assert_eq!(seq.description, "Sequence with 2 gestures");
        let json = serde_json::to_value(&seq).unwrap();
        assert_eq!(json["loop_count"], 2);
        assert_eq!(json["gesture_ids"][1], "b");
    }
}
