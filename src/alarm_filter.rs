use crate::alarm_event::AlarmEvent;
use crate::severity::Severity;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::alpha1;
use nom::character::complete::char;
use nom::character::complete::digit1;
use nom::character::complete::multispace0;
use nom::character::complete::none_of;
use nom::combinator::{eof, map};
use nom::multi::fold_many0;
use nom::sequence::{delimited, preceded, terminated, tuple};
use nom::IResult;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub enum StringCriterion {
    Parameter,
    Transition,
}

impl StringCriterion {
    pub fn evaluate<'a>(&self, event: &'a AlarmEvent) -> &'a str {
        match self {
            StringCriterion::Parameter => event.parameter(),
            StringCriterion::Transition => event.transition.as_str(),
        }
    }

    pub fn as_str<'a>(&self) -> &'a str {
        match self {
            StringCriterion::Parameter => &"Parameter",
            StringCriterion::Transition => &"Transition",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SeverityCriterion {
    Current,
    Trigger,
    MostSevere,
}

impl SeverityCriterion {
    pub fn evaluate(&self, event: &AlarmEvent) -> Severity {
        match self {
            SeverityCriterion::Current => event.current_level,
            SeverityCriterion::Trigger => event.trigger_level,
            SeverityCriterion::MostSevere => event.most_severe_level,
        }
    }

    pub fn as_str<'a>(&self) -> &'a str {
        match self {
            SeverityCriterion::Current => &"Severity",
            SeverityCriterion::Trigger => &"TriggerSeverity",
            SeverityCriterion::MostSevere => &"MostSevereSeverity",
        }
    }
}

#[derive(Debug, Clone)]
pub enum IntCriterion {
    SeqNum,
}

impl IntCriterion {
    pub fn evaluate(&self, event: &AlarmEvent) -> u32 {
        match self {
            IntCriterion::SeqNum => event.seq_num,
        }
    }

    pub fn as_str<'a>(&self) -> &'a str {
        match self {
            IntCriterion::SeqNum => &"SeqNum",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BoolOp {
    Not(Box<BoolOp>),
    And(Box<BoolOp>, Box<BoolOp>),
    Or(Box<BoolOp>, Box<BoolOp>),
    StringEqual(StringCriterion, String),
    SeverityEqual(SeverityCriterion, Severity),
    SeverityLess(SeverityCriterion, Severity),
    SeverityLessEqual(SeverityCriterion, Severity),
    IntEqual(IntCriterion, u32),
    IntLess(IntCriterion, u32),
    IntLessEqual(IntCriterion, u32),
}

use BoolOp::*;

impl BoolOp {
    pub fn evaluate(&self, event: &AlarmEvent) -> bool {
        match self {
            Not(arg) => !arg.evaluate(event),
            And(arg1, arg2) => arg1.evaluate(event) && arg2.evaluate(event),
            Or(arg1, arg2) => arg1.evaluate(event) || arg2.evaluate(event),
            StringEqual(criterion, value) => criterion.evaluate(event) == value,
            SeverityEqual(criterion, level) => criterion.evaluate(event) == *level,
            SeverityLess(criterion, level) => criterion.evaluate(event) < *level,
            SeverityLessEqual(criterion, level) => criterion.evaluate(event) <= *level,
            IntEqual(criterion, value) => criterion.evaluate(event) == *value,
            IntLess(criterion, value) => criterion.evaluate(event) < *value,
            IntLessEqual(criterion, value) => criterion.evaluate(event) <= *value,
        }
    }
}

impl ToString for BoolOp {
    fn to_string(&self) -> String {
        match self {
            Not(arg) => "NOT (".to_owned() + &arg.to_string() + ")",
            And(arg1, arg2) => {
                "(".to_owned() + &arg1.to_string() + ") AND (" + &arg2.to_string() + ")"
            }
            Or(arg1, arg2) => {
                "(".to_owned() + &arg1.to_string() + ") OR (" + &arg2.to_string() + ")"
            }
            StringEqual(criterion, value) => criterion.as_str().to_owned() + " = '" + value + "'",
            SeverityEqual(criterion, level) => {
                criterion.as_str().to_owned() + " = '" + level.as_str() + "'"
            }
            SeverityLess(criterion, level) => {
                criterion.as_str().to_owned() + " < '" + level.as_str() + "'"
            }
            SeverityLessEqual(criterion, level) => {
                criterion.as_str().to_owned() + " <= '" + level.as_str() + "'"
            }
            IntEqual(criterion, value) => {
                criterion.as_str().to_owned() + " = " + &value.to_string()
            }
            IntLess(criterion, value) => criterion.as_str().to_owned() + " < " + &value.to_string(),
            IntLessEqual(criterion, value) => {
                criterion.as_str().to_owned() + " <= " + &value.to_string()
            }
        }
    }
}

#[derive(Debug)]
pub enum FilterErrorKind {
    InvalidCriterionName(String),
    IllegalCheckOperation(String),
    Nom(nom::error::ErrorKind),
    Error(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Display for FilterErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            FilterErrorKind::InvalidCriterionName(name) => {
                write!(f, "Name of filter criterion not recognized: {}", name)
            }
            FilterErrorKind::IllegalCheckOperation(op) => {
                write!(f, "Illegal comparison operator: {}", op)
            }
            FilterErrorKind::Nom(err) => {
                write!(f, "{}", err.description())
            }
            FilterErrorKind::Error(err) => {
                write!(f, "{}", err)
            }
        }
    }
}

#[derive(Debug)]
pub struct FilterError<'a> {
    input: &'a str,
    kind: FilterErrorKind,
}

impl std::error::Error for FilterError<'_> {}

impl Display for FilterError<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        Display::fmt(&self.kind, f)
    }
}

impl<'a> nom::error::ParseError<&'a str> for FilterError<'a> {
    fn from_error_kind(input: &'a str, kind: nom::error::ErrorKind) -> Self {
        FilterError {
            input,
            kind: FilterErrorKind::Nom(kind),
        }
    }
    fn append(_input: &'a str, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

macro_rules! build_error {
    ($input:expr, $kind: expr) => {{
        use FilterErrorKind::*;
        Err(nom::Err::Error(FilterError {
            input: $input,
            kind: $kind,
        }))
    }};
}
macro_rules! build_failure {
    ($input:expr, $kind: expr) => {{
        use FilterErrorKind::*;
        Err(nom::Err::Failure(FilterError {
            input: $input,
            kind: $kind,
        }))
    }};
}

fn string_literal(input: &str) -> IResult<&str, String, FilterError> {
    delimited(
        char('\''),
        fold_many0(
            alt((none_of("'"), map(tag("''"), |_| '\''))),
            String::new,
            |mut string, ch| {
                string.push(ch);
                string
            },
        ),
        char('\''),
    )(input)
}

fn string_criterion(input: &str) -> IResult<&str, BoolOp, FilterError> {
    let (input, (field, _, op, _, value)) = tuple((
        alpha1,
        multispace0,
        alt((tag("="), tag("!="))),
        multispace0,
        string_literal,
    ))(input)?;
    let criterion = match field {
        "Parameter" => StringCriterion::Parameter,
        "Transition" => StringCriterion::Transition,
        _ => {
            return build_error!(input, InvalidCriterionName(field.to_string()));
        }
    };
    Ok((
        input,
        match op {
            "=" => BoolOp::StringEqual(criterion, value),
            "!=" => BoolOp::Not(Box::new(BoolOp::StringEqual(criterion, value))),
            _ => {
                return build_error!(input, IllegalCheckOperation(op.to_string()));
            }
        },
    ))
}

fn int_criterion(input: &str) -> IResult<&str, BoolOp, FilterError> {
    let (input, (field, _, op, _, value)) = tuple((
        alpha1,
        multispace0,
        alt((
            tag("!="),
            tag("="),
            tag("<="),
            tag(">="),
            tag("<"),
            tag(">"),
        )),
        multispace0,
        nom::character::complete::u32,
    ))(input)?;
    let criterion = match field {
        "SeqNum" => IntCriterion::SeqNum,
        _ => {
            return build_error!(input, InvalidCriterionName(field.to_string()));
        }
    };
    Ok((
        input,
        match op {
            "=" => IntEqual(criterion, value),
            "!=" => Not(Box::new(BoolOp::IntEqual(criterion, value))),
            "<" => IntLess(criterion, value),
            "<=" => IntLessEqual(criterion, value),
            ">=" => Not(Box::new(BoolOp::IntLess(criterion, value))),
            ">" => Not(Box::new(BoolOp::IntLessEqual(criterion, value))),
            _ => {
                return build_error!(input, IllegalCheckOperation(op.to_string()));
            }
        },
    ))
}

fn severity_criterion(input: &str) -> IResult<&str, BoolOp, FilterError> {
    let (input, (field, _, op, _, value)) = tuple((
        alt((
            tag("TriggerSeverity"),
            tag("MostSevereSeverity"),
            tag("Severity"),
        )),
        multispace0,
        alt((
            tag("!="),
            tag("="),
            tag("<="),
            tag(">="),
            tag("<"),
            tag(">"),
        )),
        multispace0,
        map(
            alt((string_literal, map(digit1, |s: &str| s.to_owned()))),
            |v| Severity::from_str(&v),
        ),
    ))(input)?;
    let criterion = match field {
        "Severity" => SeverityCriterion::Current,
        "TriggerSeverity" => SeverityCriterion::Trigger,
        "MostSevereSeverity" => SeverityCriterion::MostSevere,
        _ => {
            return build_error!(input, InvalidCriterionName(field.to_string()));
        }
    };
    let value = match value {
        Ok(v) => v,
        Err(e) => return build_failure!(input, Error(Box::new(e))),
    };
    Ok((
        input,
        match op {
            "=" => SeverityEqual(criterion, value),
            "!=" => Not(Box::new(BoolOp::SeverityEqual(criterion, value))),
            "<" => SeverityLess(criterion, value),
            "<=" => SeverityLessEqual(criterion, value),
            ">=" => Not(Box::new(BoolOp::SeverityLess(criterion, value))),
            ">" => Not(Box::new(BoolOp::SeverityLessEqual(criterion, value))),
            _ => {
                return build_error!(input, IllegalCheckOperation(op.to_string()));
            }
        },
    ))
}

/*
Right recursive grammar
or := and or'
or' := "OR" or or' | empty

and := not and'
and' := "AND" and and' | empty

not := "NOT" not | arg
arg := "(" or ")" | comp
 */
fn parse_criterion(input: &str) -> IResult<&str, BoolOp, FilterError> {
    alt((severity_criterion, int_criterion, string_criterion))(input)
}

fn parse_parenthesis(input: &str) -> IResult<&str, BoolOp, FilterError> {
    let (input, (_, res, _)) = tuple((tag("("), parse_or, tag(")")))(input)?;
    Ok((input, res))
}

fn parse_arg(input: &str) -> IResult<&str, BoolOp, FilterError> {
    alt((parse_parenthesis, parse_criterion))(input)
}

fn parse_not(input: &str) -> IResult<&str, BoolOp, FilterError> {
    alt((
        map(
            preceded(tuple((tag("NOT"), multispace0)), parse_arg),
            |op| BoolOp::Not(Box::new(op)),
        ),
        parse_arg,
    ))(input)
}

fn parse_or(input: &str) -> IResult<&str, BoolOp, FilterError> {
    let (input, (left, right)) = tuple((
        parse_and,
        fold_many0(
            preceded(tuple((multispace0, tag("OR"), multispace0)), parse_and),
            || None,
            |acc, op| {
                if let Some(acc) = acc {
                    Some(Box::new(BoolOp::Or(acc, Box::new(op))))
                } else {
                    Some(Box::new(op))
                }
            },
        ),
    ))(input)?;
    Ok((
        input,
        if let Some(right) = right {
            BoolOp::Or(Box::new(left), right)
        } else {
            left
        },
    ))
}

fn parse_and(input: &str) -> IResult<&str, BoolOp, FilterError> {
    let (input, (left, right)) = tuple((
        parse_not,
        fold_many0(
            preceded(tuple((multispace0, tag("AND"), multispace0)), parse_not),
            || None,
            |acc, op| {
                if let Some(acc) = acc {
                    Some(Box::new(BoolOp::And(acc, Box::new(op))))
                } else {
                    Some(Box::new(op))
                }
            },
        ),
    ))(input)?;
    Ok((
        input,
        if let Some(right) = right {
            BoolOp::And(Box::new(left), right)
        } else {
            left
        },
    ))
}

pub fn parse_filter<'a>(input: &'a str) -> Result<BoolOp, FilterError<'a>> {
    match terminated(parse_or, eof)(input) {
        Ok((_, op)) => Ok(op),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e),
        Err(_) => unreachable!(),
    }
}

#[test]
fn test_criterion_parser() {
    assert_eq!(
        string_criterion("Parameter!='/P1'").unwrap().1.to_string(),
        "NOT (Parameter = '/P1')"
    );
    assert_eq!(
        string_criterion("Transition = 'CLEARED'")
            .unwrap()
            .1
            .to_string(),
        "Transition = 'CLEARED'"
    );
    assert_eq!(
        int_criterion("SeqNum!=45").unwrap().1.to_string(),
        "NOT (SeqNum = 45)"
    );
    assert_eq!(
        int_criterion("SeqNum< 6").unwrap().1.to_string(),
        "SeqNum < 6"
    );
    assert_eq!(
        int_criterion("SeqNum  > 9").unwrap().1.to_string(),
        "NOT (SeqNum <= 9)"
    );
    assert_eq!(
        severity_criterion("Severity = 2").unwrap().1.to_string(),
        "Severity = 'WARNING'"
    );
    assert_eq!(
        severity_criterion("Severity >= 'distress'")
            .unwrap()
            .1
            .to_string(),
        "NOT (Severity < 'DISTRESS')"
    );
    assert_eq!(
        severity_criterion("TriggerSeverity <= 'WATCH'")
            .unwrap()
            .1
            .to_string(),
        "TriggerSeverity <= 'WATCH'"
    );
    assert_eq!(
        severity_criterion("MostSevereSeverity != 5")
            .unwrap()
            .1
            .to_string(),
        "NOT (MostSevereSeverity = 'SEVERE')"
    );
}

#[test]
fn test_filter_parser() {
    assert_eq!(
        parse_filter("Parameter = '/YSS/SIMULATOR/BatteryVoltage1' AND Severity >= 'WARNING'")
            .unwrap()
            .to_string(),
        "(Parameter = '/YSS/SIMULATOR/BatteryVoltage1') AND (NOT (Severity < 'WARNING'))"
    );
    assert_eq!(
        parse_filter("Parameter = '/P1' AND Severity = 4 OR Severity = 5")
            .unwrap()
            .to_string(),
        "((Parameter = '/P1') AND (Severity = 'CRITICAL')) OR (Severity = 'SEVERE')"
    );
    assert_eq!(
        parse_filter("Parameter = '/P1' AND (Severity = 4 OR Severity = 'norMAL')")
            .unwrap()
            .to_string(),
        "(Parameter = '/P1') AND ((Severity = 'CRITICAL') OR (Severity = 'NORMAL'))"
    );
    assert_eq!(
        parse_filter("Parameter = '/P1' OR NOT Transition = 'CLEARED' AND SeqNum <= 3")
            .unwrap()
            .to_string(),
        "(Parameter = '/P1') OR ((NOT (Transition = 'CLEARED')) AND (SeqNum <= 3))"
    );
}

#[test]
fn test_filter_parser_failure() {
    let res = parse_filter("Parameter = '/P1' OR ");
    if let Err(FilterError {
        input: " OR ",
        kind: FilterErrorKind::Nom(nom::error::ErrorKind::Eof),
    }) = res
    {
        /* Nop */
    } else {
        panic!("Unexpected result: {:?}", res);
    }

    let res = parse_filter("Parameter + 8");
    if let Err(FilterError {
        input: "+ 8",
        kind: FilterErrorKind::Nom(nom::error::ErrorKind::Tag),
    }) = res
    {
        /* Nop */
    } else {
        panic!("Unexpected result: {:?}", res);
    }

    let res = parse_filter("Severity = 'urgent'");
    if let Err(FilterError {
        kind: FilterErrorKind::Error(_),
        ..
    }) = res
    {
        /* Nop */
    } else {
        panic!("Unexpected result: {:?}", res);
    }
}

#[cfg(test)]
use crate::alarm_event::test_notice;
#[cfg(test)]
use crate::channel::connection::AlarmTransition;

#[test]
fn test_filter_evaluate() {
    let event = AlarmEvent::try_from(test_notice(
        "2022-03-23T11:23:11Z",
        "/YSS/SIMULATOR/BatteryVoltage1",
        7,
        "WARNING_LOW",
        AlarmTransition::Triggered,
    ))
    .unwrap();

    let filter_text = concat!(
        "Parameter='/YSS/SIMULATOR/BatteryVoltage1' AND SeqNum=7 ",
        "AND Severity='WARNING' AND TriggerSeverity >= 'WATCH' ",
        "AND Transition='TRIGGERED'"
    );
    let filter = parse_filter(filter_text).unwrap();
    assert_eq!(filter.evaluate(&event), true);

    let filter = parse_filter("Severity >= 'DISTRESS'").unwrap();
    assert_eq!(filter.evaluate(&event), false);
}
