//! Resilience helpers.
//!
//! Launch retries back off exponentially; the retry budget itself lives
//! with the pool (`launch_retry_limit`) since exhausting it raises a
//! fleet-level alarm.

pub mod backoff;
