use num_enum::TryFromPrimitive;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Severity rank of a monitoring result, from no alarm (0) to worst (5).
/// Ranks match the numeric levels the server uses for sorting and
/// highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum Severity {
    Normal = 0,
    Watch = 1,
    Warning = 2,
    Distress = 3,
    Critical = 4,
    Severe = 5,
}
use Severity::*;

impl Severity {
    /// Rank for a monitoring-result code as transmitted by the server.
    /// The in-limits and unrecognized codes both count as Normal.
    pub fn from_monitoring_result(code: &str) -> Severity {
        match code {
            "WATCH" | "WATCH_HIGH" | "WATCH_LOW" => Watch,
            "WARNING" | "WARNING_HIGH" | "WARNING_LOW" => Warning,
            "DISTRESS" | "DISTRESS_HIGH" | "DISTRESS_LOW" => Distress,
            "CRITICAL" | "CRITICAL_HIGH" | "CRITICAL_LOW" => Critical,
            "SEVERE" | "SEVERE_HIGH" | "SEVERE_LOW" => Severe,
            _ => Normal,
        }
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Normal => "NORMAL",
            Watch => "WATCH",
            Warning => "WARNING",
            Distress => "DISTRESS",
            Critical => "CRITICAL",
            Severe => "SEVERE",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq)]
pub struct SeverityError(String);

impl std::error::Error for SeverityError {}

impl Display for SeverityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Parses a rank digit or a case-insensitive level name. Unlike
/// `from_monitoring_result` this rejects unknown input, since it is meant
/// for filter expressions typed by an operator.
impl FromStr for Severity {
    type Err = SeverityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(rank) = s.parse::<u8>() {
            return Severity::try_from(rank).map_err(|_| {
                SeverityError(format!("Integer {} is not a valid severity rank", rank))
            });
        }
        match s.to_lowercase().as_str() {
            "normal" => Ok(Normal),
            "watch" => Ok(Watch),
            "warning" => Ok(Warning),
            "distress" => Ok(Distress),
            "critical" => Ok(Critical),
            "severe" => Ok(Severe),
            _ => Err(SeverityError(format!(
                "String \"{}\" is not a valid severity",
                s
            ))),
        }
    }
}

#[test]
fn test_monitoring_result_mapping() {
    assert_eq!(Severity::from_monitoring_result("WATCH"), Watch);
    assert_eq!(Severity::from_monitoring_result("WATCH_HIGH"), Watch);
    assert_eq!(Severity::from_monitoring_result("WATCH_LOW"), Watch);
    assert_eq!(Severity::from_monitoring_result("WARNING"), Warning);
    assert_eq!(Severity::from_monitoring_result("WARNING_LOW"), Warning);
    assert_eq!(Severity::from_monitoring_result("DISTRESS_HIGH"), Distress);
    assert_eq!(Severity::from_monitoring_result("CRITICAL"), Critical);
    assert_eq!(Severity::from_monitoring_result("SEVERE_LOW"), Severe);
    assert_eq!(Severity::from_monitoring_result("IN_LIMITS"), Normal);
    assert_eq!(Severity::from_monitoring_result(""), Normal);
    assert_eq!(Severity::from_monitoring_result("NO_SUCH_LEVEL"), Normal);
}

#[test]
fn test_rank_order() {
    assert!(Normal < Watch);
    assert!(Watch < Warning);
    assert!(Critical < Severe);
    assert_eq!(Warning.rank(), 2);
    assert_eq!(Severe.rank(), 5);
}

#[test]
fn test_from_str() {
    assert_eq!(Severity::from_str("3"), Ok(Distress));
    assert_eq!(Severity::from_str("warning"), Ok(Warning));
    assert_eq!(Severity::from_str("SEVERE"), Ok(Severe));
    assert_eq!(Severity::from_str("0").map(|s| s.as_str()), Ok("NORMAL"));
    assert!(Severity::from_str("6").is_err());
    assert!(Severity::from_str("urgent").is_err());
}
