//! Tracing/logging setup and the operator alarm channel.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Operator alarms (conditions a human must look at).
pub mod alarm;

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use alarm::{Alarm, AlarmKind, AlarmSink, MemoryAlarmSink, TracingAlarmSink};
