//! Sensor health monitoring

pub mod checker;
pub mod validator;

pub use checker::{DeviceHealthResult, HealthReport, SensorHealthChecker};
pub use validator::{
    check_range, exceeds_change_rate, is_stuck, live_read_command, stuck_run_limit, HealthValidation,
    RangeCheck, SensorHealth, SensorHealthValidator, DEFAULT_HISTORY_LIMIT,
};
