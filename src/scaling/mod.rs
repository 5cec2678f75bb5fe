//! Alarm-driven capacity changes.

pub mod controller;
pub mod policy;

pub use controller::{ScalingController, ScalingError, ScalingOutcome};
pub use policy::{PolicyStatus, ScalingPolicy};
