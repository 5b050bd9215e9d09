//! bionic-arm - motion control and gesture playback for an 8-DoF bionic arm.
//!
//! The engine owns the arm's pose and moves it between poses in 20
//! interpolated steps, records live motion into timestamped frames, and
//! replays gestures and looping gesture sequences. A shared power gate
//! blocks new motion and interrupts running motion between steps.
//!
//! # Features
//!
//! - `moq`: publish telemetry events to a MoQ relay ([`moq`] module)

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod force;
pub mod gate;
pub mod gesture;
pub mod interpolate;
pub mod joint;
pub mod player;
pub mod recorder;
pub mod sequence;
pub mod telemetry;

#[cfg(feature = "moq")]
pub mod moq;

pub use config::EngineConfig;
pub use diagnostics::{run_diagnostics, DiagnosticStatus, Status};
pub use engine::{ArmEngine, Calibration, JointUpdate};
pub use error::EngineError;
pub use force::{ForceLevel, ForceReadings};
pub use gate::PowerGate;
pub use gesture::{presets, Gesture, GestureCatalog, GestureRecord, SequenceRecord};
pub use interpolate::Trajectory;
pub use joint::{Joint, JointState, SharedJoints};
pub use player::{Phase, PlayOutcome, Player, SessionStatus};
pub use recorder::{Frame, Recorder, Recording, RecordingHandle};
pub use sequence::{SequenceOutcome, SequenceRunner, SequenceSpec, SequenceStep};
pub use telemetry::{
    EventType, LogSink, NullSink, TelemetryChannel, TelemetryEvent, TelemetrySink,
};

#[cfg(feature = "moq")]
pub use moq::{TelemetryPublisher, TelemetryPublisherBuilder};
