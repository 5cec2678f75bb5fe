//! Threshold alarm with a consecutive-breach streak.
//!
//! ```text
//! Idle ──breach──▶ Accumulating(1) ──breach──▶ ... ──▶ Accumulating(n-1)
//!   ▲                    │                                   │
//!   └──── non-breach ────┘                          breach: fire, back to Idle
//! ```
//! A missing datapoint leaves the streak untouched.

use serde::Serialize;

use crate::config::{AlarmConfig, Comparison, Statistic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "streak", rename_all = "snake_case")]
pub enum AlarmState {
    Idle,
    Accumulating(u32),
}

/// Result of feeding one sample to an alarm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlarmTransition {
    /// Streak reached the evaluation window.
    Fired { value: f64 },
    Accumulating { streak: u32 },
    /// A non-breaching sample broke the streak.
    Reset,
    /// Already idle and still not breaching.
    Quiet,
    /// No datapoint this period.
    NoData,
}

#[derive(Debug, Clone)]
pub struct Alarm {
    name: String,
    comparison: Comparison,
    threshold: f64,
    evaluation_periods: u32,
    statistic: Statistic,
    policy: String,
    state: AlarmState,
    last_value: Option<f64>,
}

impl Alarm {
    pub fn new(config: &AlarmConfig) -> Self {
        Self {
            name: config.name.clone(),
            comparison: config.comparison,
            threshold: config.threshold,
            evaluation_periods: config.evaluation_periods.max(1),
            statistic: config.statistic,
            policy: config.policy.clone(),
            state: AlarmState::Idle,
            last_value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn observe(&mut self, sample: Option<f64>) -> AlarmTransition {
        let Some(value) = sample else {
            return AlarmTransition::NoData;
        };
        self.last_value = Some(value);

        if !self.comparison.breaches(value, self.threshold) {
            return match std::mem::replace(&mut self.state, AlarmState::Idle) {
                AlarmState::Idle => AlarmTransition::Quiet,
                AlarmState::Accumulating(_) => AlarmTransition::Reset,
            };
        }

        let streak = match self.state {
            AlarmState::Idle => 1,
            AlarmState::Accumulating(n) => n + 1,
        };

        if streak >= self.evaluation_periods {
            self.state = AlarmState::Idle;
            AlarmTransition::Fired { value }
        } else {
            self.state = AlarmState::Accumulating(streak);
            AlarmTransition::Accumulating { streak }
        }
    }

    pub fn status(&self) -> AlarmStatus {
        AlarmStatus {
            name: self.name.clone(),
            comparison: self.comparison,
            threshold: self.threshold,
            evaluation_periods: self.evaluation_periods,
            statistic: self.statistic,
            policy: self.policy.clone(),
            state: self.state,
            last_value: self.last_value,
        }
    }
}

/// Reporting view of an alarm.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmStatus {
    pub name: String,
    pub comparison: Comparison,
    pub threshold: f64,
    pub evaluation_periods: u32,
    pub statistic: Statistic,
    pub policy: String,
    pub state: AlarmState,
    pub last_value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_high() -> Alarm {
        Alarm::new(&AlarmConfig {
            name: "cpu-high".into(),
            comparison: Comparison::GreaterThan,
            threshold: 70.0,
            evaluation_periods: 2,
            statistic: Statistic::Average,
            policy: "scale-out".into(),
        })
    }

    fn cpu_low() -> Alarm {
        Alarm::new(&AlarmConfig {
            name: "cpu-low".into(),
            comparison: Comparison::LessThan,
            threshold: 30.0,
            evaluation_periods: 2,
            statistic: Statistic::Average,
            policy: "scale-in".into(),
        })
    }

    #[test]
    fn fires_once_after_two_breaches() {
        let mut alarm = cpu_high();
        let transitions: Vec<_> = [60.0, 75.0, 80.0, 65.0]
            .into_iter()
            .map(|v| alarm.observe(Some(v)))
            .collect();

        assert_eq!(
            transitions,
            vec![
                AlarmTransition::Quiet,
                AlarmTransition::Accumulating { streak: 1 },
                AlarmTransition::Fired { value: 80.0 },
                AlarmTransition::Quiet,
            ]
        );
    }

    #[test]
    fn firing_resets_the_streak() {
        let mut alarm = cpu_high();
        alarm.observe(Some(90.0));
        assert!(matches!(alarm.observe(Some(90.0)), AlarmTransition::Fired { .. }));
        assert_eq!(alarm.state(), AlarmState::Idle);
        assert_eq!(alarm.observe(Some(90.0)), AlarmTransition::Accumulating { streak: 1 });
    }

    #[test]
    fn gaps_leave_streak_untouched() {
        let mut alarm = cpu_high();
        alarm.observe(Some(75.0));
        assert_eq!(alarm.observe(None), AlarmTransition::NoData);
        assert_eq!(alarm.state(), AlarmState::Accumulating(1));
        assert!(matches!(alarm.observe(Some(75.0)), AlarmTransition::Fired { .. }));
    }

    #[test]
    fn non_breach_breaks_streak() {
        let mut alarm = cpu_high();
        alarm.observe(Some(75.0));
        assert_eq!(alarm.observe(Some(70.0)), AlarmTransition::Reset);
        assert_eq!(alarm.state(), AlarmState::Idle);
    }

    #[test]
    fn alarms_keep_independent_streaks() {
        let mut high = cpu_high();
        let mut low = cpu_low();
        for value in [20.0, 80.0, 20.0, 80.0] {
            let h = high.observe(Some(value));
            let l = low.observe(Some(value));
            assert!(!matches!(h, AlarmTransition::Fired { .. }));
            assert!(!matches!(l, AlarmTransition::Fired { .. }));
        }
        assert_eq!(high.state(), AlarmState::Accumulating(1));
        assert_eq!(low.state(), AlarmState::Idle);
    }
}
