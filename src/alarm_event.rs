use crate::channel::connection::{AlarmNotice, AlarmTransition, ParameterValue};
use crate::severity::Severity;
use std::fmt::{self, Display, Formatter};

/// Identity of one alarm occurrence: generation time of the value that
/// tripped it, qualified parameter name, sequence number. The derived order
/// (time, then name, then sequence) is the iteration order of the active set.
/// Two notices with the same key always refer to the same occurrence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmKey {
    pub trigger_time: String,
    pub parameter: String,
    pub seq_num: u32,
}

impl AlarmKey {
    pub fn new(trigger_time: &str, parameter: &str, seq_num: u32) -> AlarmKey {
        AlarmKey {
            trigger_time: trigger_time.to_string(),
            parameter: parameter.to_string(),
            seq_num,
        }
    }
}

impl Display for AlarmKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.trigger_time, self.parameter, self.seq_num)
    }
}

#[derive(Debug, PartialEq)]
pub enum EventError {
    MissingTriggerValue,
}

impl std::error::Error for EventError {}

impl Display for EventError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use EventError::*;
        f.write_str(match self {
            MissingTriggerValue => "Alarm notice has no trigger value",
        })
    }
}

/// An alarm notice enriched with its key and derived severity ranks. The
/// most-severe and current values fall back to the trigger value when the
/// server omits them.
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    pub key: AlarmKey,
    pub transition: AlarmTransition,
    pub seq_num: u32,
    pub trigger_value: ParameterValue,
    pub most_severe_value: ParameterValue,
    pub current_value: ParameterValue,
    pub trigger_level: Severity,
    pub most_severe_level: Severity,
    pub current_level: Severity,
}

impl AlarmEvent {
    pub fn parameter(&self) -> &str {
        &self.key.parameter
    }
}

fn level_of(value: &ParameterValue) -> Severity {
    match &value.monitoring_result {
        Some(code) => Severity::from_monitoring_result(code),
        None => Severity::Normal,
    }
}

impl TryFrom<AlarmNotice> for AlarmEvent {
    type Error = EventError;

    fn try_from(notice: AlarmNotice) -> Result<AlarmEvent, EventError> {
        let trigger_value = notice
            .trigger_value
            .ok_or(EventError::MissingTriggerValue)?;
        let trigger_level = level_of(&trigger_value);
        let key = AlarmKey::new(
            &trigger_value.generation_time,
            &trigger_value.id.name,
            notice.seq_num,
        );
        let (most_severe_value, most_severe_level) = match notice.most_severe_value {
            Some(value) => {
                let level = level_of(&value);
                (value, level)
            }
            None => (trigger_value.clone(), trigger_level),
        };
        let (current_value, current_level) = match notice.current_value {
            Some(value) => {
                let level = level_of(&value);
                (value, level)
            }
            None => (trigger_value.clone(), trigger_level),
        };
        Ok(AlarmEvent {
            key,
            transition: notice.transition,
            seq_num: notice.seq_num,
            trigger_value,
            most_severe_value,
            current_value,
            trigger_level,
            most_severe_level,
            current_level,
        })
    }
}

#[cfg(test)]
use crate::channel::connection::ParameterId;

#[cfg(test)]
pub(crate) fn test_notice(
    time: &str,
    parameter: &str,
    seq_num: u32,
    monitoring_result: &str,
    transition: AlarmTransition,
) -> AlarmNotice {
    AlarmNotice {
        trigger_value: Some(ParameterValue {
            id: ParameterId {
                name: parameter.to_string(),
                namespace: None,
            },
            generation_time: time.to_string(),
            monitoring_result: Some(monitoring_result.to_string()),
            eng_value: None,
        }),
        most_severe_value: None,
        current_value: None,
        seq_num,
        transition,
    }
}

#[test]
fn test_enrich_fills_missing_values() {
    let notice = test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered);
    let event = AlarmEvent::try_from(notice).unwrap();
    assert_eq!(event.key.to_string(), "T1/P11");
    assert_eq!(event.trigger_level, Severity::Warning);
    assert_eq!(event.most_severe_level, Severity::Warning);
    assert_eq!(event.current_level, Severity::Warning);
    assert_eq!(event.most_severe_value.id.name, "/P1");
    assert_eq!(event.current_value.generation_time, "T1");
}

#[test]
fn test_enrich_keeps_transmitted_values() {
    let mut notice = test_notice("T1", "/P1", 2, "WARNING", AlarmTransition::Updated);
    notice.current_value = Some(ParameterValue {
        id: ParameterId {
            name: "/P1".to_string(),
            namespace: None,
        },
        generation_time: "T2".to_string(),
        monitoring_result: Some("CRITICAL_HIGH".to_string()),
        eng_value: None,
    });
    let event = AlarmEvent::try_from(notice).unwrap();
    assert_eq!(event.trigger_level, Severity::Warning);
    assert_eq!(event.most_severe_level, Severity::Warning);
    assert_eq!(event.current_level, Severity::Critical);
    assert_eq!(event.current_value.generation_time, "T2");
}

#[test]
fn test_enrich_unknown_code_is_rank_zero() {
    let notice = test_notice("T1", "/P1", 1, "HORRIBLE", AlarmTransition::Triggered);
    let event = AlarmEvent::try_from(notice).unwrap();
    assert_eq!(event.trigger_level, Severity::Normal);
    assert_eq!(event.current_level.rank(), 0);
}

#[test]
fn test_enrich_requires_trigger_value() {
    let notice = AlarmNotice {
        trigger_value: None,
        most_severe_value: None,
        current_value: None,
        seq_num: 7,
        transition: AlarmTransition::Triggered,
    };
    assert_eq!(
        AlarmEvent::try_from(notice).unwrap_err(),
        EventError::MissingTriggerValue
    );
}

#[test]
fn test_key_order() {
    let a = AlarmKey::new("2022-01-01T00:00:00Z", "/P1", 1);
    let b = AlarmKey::new("2022-01-01T00:00:00Z", "/P1", 2);
    let c = AlarmKey::new("2022-01-01T00:00:00Z", "/P2", 1);
    let d = AlarmKey::new("2022-01-02T00:00:00Z", "/P1", 1);
    assert!(a < b);
    assert!(b < c);
    assert!(c < d);
    assert_eq!(a, AlarmKey::new("2022-01-01T00:00:00Z", "/P1", 1));
}
