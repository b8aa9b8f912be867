//! Timelines and the per-recording time context.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VislogError};

/// The unit of a timeline. Fixed for a timeline once it has been set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeType {
    Sequence,
    Duration,
    Timestamp,
}

impl fmt::Display for TimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeType::Sequence => write!(f, "sequence"),
            TimeType::Duration => write!(f, "duration"),
            TimeType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A position on one timeline.
///
/// Durations are nanoseconds, timestamps are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TimeValue {
    Sequence(i64),
    Duration(i64),
    Timestamp(i64),
}

impl TimeValue {
    pub fn time_type(&self) -> TimeType {
        match self {
            TimeValue::Sequence(_) => TimeType::Sequence,
            TimeValue::Duration(_) => TimeType::Duration,
            TimeValue::Timestamp(_) => TimeType::Timestamp,
        }
    }

    /// The raw index value, in the unit of [`TimeValue::time_type`].
    pub fn as_i64(&self) -> i64 {
        match self {
            TimeValue::Sequence(v) | TimeValue::Duration(v) | TimeValue::Timestamp(v) => *v,
        }
    }

    pub fn from_seconds(secs: f64) -> Self {
        TimeValue::Duration((secs * 1e9).round() as i64)
    }
}

impl From<std::time::Duration> for TimeValue {
    fn from(d: std::time::Duration) -> Self {
        TimeValue::Duration(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(t: DateTime<Utc>) -> Self {
        let nanos = t
            .timestamp_nanos_opt()
            .unwrap_or_else(|| t.timestamp_micros().saturating_mul(1_000));
        TimeValue::Timestamp(nanos)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeValue::Sequence(v) => write!(f, "#{v}"),
            TimeValue::Duration(ns) => write!(f, "{:.3}s", *ns as f64 / 1e9),
            TimeValue::Timestamp(ns) => {
                let t = DateTime::<Utc>::from_timestamp_nanos(*ns);
                write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
            }
        }
    }
}

/// A snapshot of all active timelines, ordered by timeline name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimePoint(BTreeMap<String, TimeValue>);

impl TimePoint {
    pub fn get(&self, timeline: &str) -> Option<&TimeValue> {
        self.0.get(timeline)
    }

    pub fn insert(&mut self, timeline: impl Into<String>, value: TimeValue) {
        self.0.insert(timeline.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TimeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, TimeValue)> for TimePoint {
    fn from_iter<I: IntoIterator<Item = (K, TimeValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Mutable time state of one recording.
///
/// The unit of every timeline ever set is remembered, even after the timeline
/// is cleared, so a recording never mixes units on one timeline.
#[derive(Debug, Default)]
pub struct TimeContext {
    active: BTreeMap<String, TimeValue>,
    types: HashMap<String, TimeType>,
}

impl TimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current index of `timeline`. On a unit conflict nothing changes.
    pub fn set_index(&mut self, timeline: &str, value: TimeValue) -> Result<()> {
        let found = value.time_type();
        if let Some(&expected) = self.types.get(timeline) {
            if expected != found {
                return Err(VislogError::TimelineTypeConflict {
                    timeline: timeline.to_string(),
                    expected,
                    found,
                });
            }
        } else {
            self.types.insert(timeline.to_string(), found);
        }
        self.active.insert(timeline.to_string(), value);
        Ok(())
    }

    /// Remove `timeline` from the active set. Idempotent.
    pub fn clear(&mut self, timeline: &str) {
        self.active.remove(timeline);
    }

    /// Remove every active timeline. Recorded units are kept.
    pub fn clear_all(&mut self) {
        self.active.clear();
    }

    pub fn get(&self, timeline: &str) -> Option<TimeValue> {
        self.active.get(timeline).copied()
    }

    pub fn time_type(&self, timeline: &str) -> Option<TimeType> {
        self.types.get(timeline).copied()
    }

    pub fn snapshot(&self) -> TimePoint {
        TimePoint(self.active.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_snapshot() {
        let mut ctx = TimeContext::new();
        ctx.set_index("frame", TimeValue::Sequence(5)).unwrap();
        ctx.set_index("sim", TimeValue::Duration(1_000)).unwrap();

        let snap = ctx.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("frame"), Some(&TimeValue::Sequence(5)));
        assert_eq!(snap.get("sim"), Some(&TimeValue::Duration(1_000)));
    }

    #[test]
    fn test_overwrite_same_type() {
        let mut ctx = TimeContext::new();
        ctx.set_index("frame", TimeValue::Sequence(1)).unwrap();
        ctx.set_index("frame", TimeValue::Sequence(2)).unwrap();
        assert_eq!(ctx.get("frame"), Some(TimeValue::Sequence(2)));
    }

    #[test]
    fn test_type_conflict_leaves_value_intact() {
        let mut ctx = TimeContext::new();
        ctx.set_index("frame", TimeValue::Sequence(7)).unwrap();

        let err = ctx.set_index("frame", TimeValue::Duration(3)).unwrap_err();
        assert!(matches!(
            err,
            VislogError::TimelineTypeConflict {
                expected: TimeType::Sequence,
                found: TimeType::Duration,
                ..
            }
        ));
        assert_eq!(ctx.get("frame"), Some(TimeValue::Sequence(7)));
    }

    #[test]
    fn test_type_survives_clear() {
        let mut ctx = TimeContext::new();
        ctx.set_index("t", TimeValue::Timestamp(10)).unwrap();
        ctx.clear("t");
        ctx.clear("t");
        assert_eq!(ctx.get("t"), None);
        assert!(ctx.set_index("t", TimeValue::Sequence(1)).is_err());
        assert_eq!(ctx.time_type("t"), Some(TimeType::Timestamp));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut ctx = TimeContext::new();
        ctx.set_index("frame", TimeValue::Sequence(1)).unwrap();
        let snap = ctx.snapshot();
        ctx.set_index("frame", TimeValue::Sequence(2)).unwrap();
        assert_eq!(snap.get("frame"), Some(&TimeValue::Sequence(1)));
    }

    #[test]
    fn test_conversions() {
        let d = TimeValue::from(std::time::Duration::from_millis(1500));
        assert_eq!(d, TimeValue::Duration(1_500_000_000));
        assert_eq!(TimeValue::from_seconds(1.5), d);

        let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(
            TimeValue::from(t),
            TimeValue::Timestamp(1_700_000_000_000_000_000)
        );
    }

    #[test]
    fn test_timepoint_serde_is_ordered_map() {
        let tp: TimePoint = [
            ("frame", TimeValue::Sequence(5)),
            ("elapsed", TimeValue::Duration(2)),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&tp).unwrap();
        assert_eq!(
            json,
            r#"{"elapsed":{"type":"duration","value":2},"frame":{"type":"sequence","value":5}}"#
        );
    }
}
