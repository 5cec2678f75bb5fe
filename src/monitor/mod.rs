//! Metric monitoring and alarms.
//!
//! # Data Flow
//! ```text
//! Periodic timer
//!     → source.rs (one sample per alarm, concurrently)
//!     → alarm.rs (streak state machine)
//!     → AlarmFiring queued on mpsc
//!     → scaling controller
//! ```

pub mod alarm;
pub mod monitor;
pub mod source;

pub use alarm::{Alarm, AlarmState, AlarmStatus, AlarmTransition};
pub use monitor::{AlarmFiring, MetricMonitor};
pub use source::{HttpMetricSource, MetricError, MetricQuery, MetricSource};
