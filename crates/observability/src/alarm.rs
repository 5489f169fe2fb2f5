//! Operator alarm channel.
//!
//! Alarms are raised for situations that automated recovery will not fix on its own,
//! e.g. a compensating credit that could not be applied. Sinks are injected into the
//! components that raise them; nothing here is process-global.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// A compensation attempt failed; the intent stays pending for the recovery sweep.
    CompensationFailed,
    /// The recovery sweep gave up on an intent; stock must be fixed by hand.
    CompensationAbandoned,
    /// A sale debit ended with an unknown outcome (timeout/transport failure).
    LedgerOutcomeUnknown,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::CompensationFailed => "compensation_failed",
            AlarmKind::CompensationAbandoned => "compensation_abandoned",
            AlarmKind::LedgerOutcomeUnknown => "ledger_outcome_unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub kind: AlarmKind,
    /// Correlation the operator should search for (usually the sale id).
    pub correlation: String,
    pub message: String,
    pub details: JsonValue,
    pub raised_at: DateTime<Utc>,
}

impl Alarm {
    pub fn new(kind: AlarmKind, correlation: impl ToString, message: impl Into<String>) -> Self {
        Self {
            kind,
            correlation: correlation.to_string(),
            message: message.into(),
            details: JsonValue::Null,
            raised_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

/// Destination for operator alarms.
pub trait AlarmSink: Send + Sync {
    fn raise(&self, alarm: Alarm);
}

impl<S> AlarmSink for std::sync::Arc<S>
where
    S: AlarmSink + ?Sized,
{
    fn raise(&self, alarm: Alarm) {
        (**self).raise(alarm)
    }
}

/// Emits alarms as `error` events on the `operator.alarm` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlarmSink;

impl AlarmSink for TracingAlarmSink {
    fn raise(&self, alarm: Alarm) {
        error!(
            target: "operator.alarm",
            kind = alarm.kind.as_str(),
            correlation = %alarm.correlation,
            details = %alarm.details,
            raised_at = %alarm.raised_at,
            "{}",
            alarm.message
        );
    }
}

/// Records alarms in memory (tests, health inspection).
#[derive(Debug, Default)]
pub struct MemoryAlarmSink {
    alarms: Mutex<Vec<Alarm>>,
}

impl MemoryAlarmSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: AlarmKind) -> usize {
        self.alarms
            .lock()
            .map(|a| a.iter().filter(|x| x.kind == kind).count())
            .unwrap_or(0)
    }
}

impl AlarmSink for MemoryAlarmSink {
    fn raise(&self, alarm: Alarm) {
        if let Ok(mut alarms) = self.alarms.lock() {
            alarms.push(alarm);
        }
    }
}
