//! Idle-time ambient behaviors
//!
//! [`AmbientEngine`] owns the IDLE / ENGAGED / BEHAVIOR_ACTIVE state machine and the
//! weighted selection; [`AmbientRunner`] drives it on a timer and voices the chosen
//! lines.

mod engine;
mod runner;

pub use engine::{
    AmbientBehavior, AmbientEngine, AmbientSnapshot, AmbientState, ModeStats, ModeSummary,
    WeightedBehavior,
};
pub use runner::{AmbientEvent, AmbientRunner};
