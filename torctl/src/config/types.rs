//! The option-kind registry.
//!
//! Every config option Tor knows about is typed: `GETINFO config/names`
//! hands back `name Kind` pairs, and the kind decides how a string from
//! the wire becomes a value and how a value renders back to a torrc
//! line.

use crate::error::{Result, TorCtlError};

/// The sixteen option kinds Tor's control protocol declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Boolean,
    BooleanAuto,
    Integer,
    SignedInteger,
    Port,
    TimeInterval,
    TimeMsecInterval,
    DataSize,
    Float,
    Time,
    CommaList,
    TimeIntervalCommaList,
    RouterList,
    String,
    Filename,
    LineList,
}

impl OptionKind {
    /// Parse the kind name as it appears in a `GETINFO config/names`
    /// reply line (e.g. `"SocksPort Port"`, `"UseBridges Boolean"`).
    pub fn from_wire_name(name: &str) -> Option<Self> {
        use OptionKind::*;
        Some(match name {
            "Boolean" => Boolean,
            "Boolean_Auto" => BooleanAuto,
            "Integer" => Integer,
            "SignedInteger" => SignedInteger,
            "Port" => Port,
            "TimeInterval" => TimeInterval,
            "TimeMsecInterval" => TimeMsecInterval,
            "DataSize" => DataSize,
            "Float" => Float,
            "Time" => Time,
            "CommaList" => CommaList,
            "TimeIntervalCommaList" => TimeIntervalCommaList,
            "RouterList" => RouterList,
            "String" => String,
            "Filename" => Filename,
            "LineList" => LineList,
            _ => return None,
        })
    }

    /// Kinds whose wire class name marks the option list-valued by
    /// declaration (as opposed to being written as a list just because
    /// the caller happened to pass one — see `ConfigInput::List`).
    pub fn is_declared_list(&self) -> bool {
        matches!(
            self,
            OptionKind::CommaList
                | OptionKind::TimeIntervalCommaList
                | OptionKind::RouterList
                | OptionKind::LineList
        )
    }

    /// Split one wire value into elements, for the declared-list kinds.
    pub fn split_wire_value(&self, raw: &str) -> Vec<String> {
        match self {
            OptionKind::CommaList | OptionKind::TimeIntervalCommaList | OptionKind::RouterList => {
                raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
            }
            OptionKind::LineList => raw
                .split('\n')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => vec![raw.to_string()],
        }
    }

    /// Parse one wire-format scalar into its canonical stored value.
    pub fn parse_wire_scalar(&self, raw: &str) -> Result<Scalar> {
        use OptionKind::*;
        let raw = raw.trim();
        match self {
            Boolean => Ok(Scalar::Bool(raw != "0")),
            BooleanAuto => {
                if raw.eq_ignore_ascii_case("auto") {
                    Ok(Scalar::BoolAuto(-1))
                } else {
                    let v: i64 = raw
                        .parse()
                        .map_err(|_| TorCtlError::ProtocolViolation(format!("not a Boolean_Auto: {raw}")))?;
                    Ok(Scalar::BoolAuto(v.signum() as i8))
                }
            }
            Integer | SignedInteger | Port | TimeInterval | TimeMsecInterval | DataSize => raw
                .parse::<i64>()
                .map(Scalar::Int)
                .map_err(|_| TorCtlError::ProtocolViolation(format!("not an integer: {raw}"))),
            Float | Time => raw
                .parse::<f64>()
                .map(Scalar::Float)
                .map_err(|_| TorCtlError::ProtocolViolation(format!("not a float: {raw}"))),
            String | Filename | CommaList | TimeIntervalCommaList | RouterList | LineList => {
                Ok(Scalar::Str(raw.to_string()))
            }
        }
    }

    /// Validate and coerce a caller-supplied value against this kind
    /// (the `set()` side, as opposed to `parse_wire_scalar`'s GETCONF
    /// side). Both ends agree on the same `Scalar` representation.
    pub fn validate(&self, input: ScalarInput) -> Result<Scalar> {
        use OptionKind::*;
        match (self, input) {
            (Boolean, ScalarInput::Bool(b)) => Ok(Scalar::Bool(b)),
            (Boolean, ScalarInput::Int(i)) => Ok(Scalar::Bool(i != 0)),
            (BooleanAuto, ScalarInput::Int(i)) => Ok(Scalar::BoolAuto(i.signum() as i8)),
            (BooleanAuto, ScalarInput::Str(ref s)) if s.eq_ignore_ascii_case("auto") => {
                Ok(Scalar::BoolAuto(-1))
            }
            (Integer | SignedInteger | Port | TimeInterval | TimeMsecInterval | DataSize, ScalarInput::Int(i)) => {
                Ok(Scalar::Int(i))
            }
            (Float | Time, ScalarInput::Float(f)) => Ok(Scalar::Float(f)),
            (Float | Time, ScalarInput::Int(i)) => Ok(Scalar::Float(i as f64)),
            (String | Filename | CommaList | TimeIntervalCommaList | RouterList | LineList, ScalarInput::Str(s)) => {
                Ok(Scalar::Str(s))
            }
            (kind, input) => Err(TorCtlError::InvalidArgument(format!(
                "value {input:?} is not valid for {kind:?}"
            ))),
        }
    }
}

/// The canonical stored form of one scalar option value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    /// `-1` = auto, `0` = false, `1` = true, per `Boolean_Auto`'s tri-state wire encoding.
    BoolAuto(i8),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Render back to the string form a `SETCONF`/torrc line expects.
    pub fn render(&self) -> String {
        match self {
            Scalar::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Scalar::BoolAuto(v) => match v {
                v if *v < 0 => "auto".to_string(),
                0 => "0".to_string(),
                _ => "1".to_string(),
            },
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Scalar::Bool(b) => Ok(*b),
            other => Err(TorCtlError::InvalidArgument(format!("{other:?} is not a bool"))),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Scalar::Int(i) => Ok(*i),
            other => Err(TorCtlError::InvalidArgument(format!("{other:?} is not an int"))),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Scalar::Float(f) => Ok(*f),
            other => Err(TorCtlError::InvalidArgument(format!("{other:?} is not a float"))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Scalar::Str(s) => Ok(s.as_str()),
            other => Err(TorCtlError::InvalidArgument(format!("{other:?} is not a string"))),
        }
    }
}

/// What a Rust caller can hand `TorConfig::set`/list mutators as one
/// scalar element, before it's validated against the option's kind.
#[derive(Debug, Clone)]
pub enum ScalarInput {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for ScalarInput {
    fn from(v: bool) -> Self {
        ScalarInput::Bool(v)
    }
}
impl From<i64> for ScalarInput {
    fn from(v: i64) -> Self {
        ScalarInput::Int(v)
    }
}
impl From<i32> for ScalarInput {
    fn from(v: i32) -> Self {
        ScalarInput::Int(v as i64)
    }
}
impl From<u16> for ScalarInput {
    fn from(v: u16) -> Self {
        ScalarInput::Int(v as i64)
    }
}
impl From<f64> for ScalarInput {
    fn from(v: f64) -> Self {
        ScalarInput::Float(v)
    }
}
impl From<&str> for ScalarInput {
    fn from(v: &str) -> Self {
        ScalarInput::Str(v.to_string())
    }
}
impl From<String> for ScalarInput {
    fn from(v: String) -> Self {
        ScalarInput::Str(v)
    }
}

/// What a Rust caller can hand `TorConfig::set` as a whole value: one
/// scalar, or (regardless of the option's declared kind) a list of
/// them. A plain Rust `Vec` written to any option is list-valued for
/// that write; whether the *daemon* also declares the option list-valued
/// is a separate, orthogonal fact (`OptionKind::is_declared_list`).
#[derive(Debug, Clone)]
pub enum ConfigInput {
    Scalar(ScalarInput),
    List(Vec<ScalarInput>),
}

// Discrete (non-generic) impls rather than one blanket `From<T> for
// ConfigInput where T: Into<ScalarInput>` plus a blanket `From<Vec<T>>`:
// the two blanket forms would be ambiguous for any `T` the coherence
// checker can't prove `Vec<T>: Into<ScalarInput>` false for. Concrete
// self types sidestep the question entirely.
impl From<ScalarInput> for ConfigInput {
    fn from(v: ScalarInput) -> Self {
        ConfigInput::Scalar(v)
    }
}
impl From<bool> for ConfigInput {
    fn from(v: bool) -> Self {
        ConfigInput::Scalar(v.into())
    }
}
impl From<i64> for ConfigInput {
    fn from(v: i64) -> Self {
        ConfigInput::Scalar(v.into())
    }
}
impl From<i32> for ConfigInput {
    fn from(v: i32) -> Self {
        ConfigInput::Scalar(v.into())
    }
}
impl From<u16> for ConfigInput {
    fn from(v: u16) -> Self {
        ConfigInput::Scalar(v.into())
    }
}
impl From<f64> for ConfigInput {
    fn from(v: f64) -> Self {
        ConfigInput::Scalar(v.into())
    }
}
impl From<&str> for ConfigInput {
    fn from(v: &str) -> Self {
        ConfigInput::Scalar(v.into())
    }
}
impl From<String> for ConfigInput {
    fn from(v: String) -> Self {
        ConfigInput::Scalar(v.into())
    }
}

impl<T: Into<ScalarInput>> From<Vec<T>> for ConfigInput {
    fn from(v: Vec<T>) -> Self {
        ConfigInput::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_auto_round_trips_tri_state() {
        assert_eq!(OptionKind::BooleanAuto.parse_wire_scalar("auto").unwrap(), Scalar::BoolAuto(-1));
        assert_eq!(OptionKind::BooleanAuto.parse_wire_scalar("0").unwrap(), Scalar::BoolAuto(0));
        assert_eq!(OptionKind::BooleanAuto.parse_wire_scalar("1").unwrap(), Scalar::BoolAuto(1));
        assert_eq!(Scalar::BoolAuto(-1).render(), "auto");
        assert_eq!(Scalar::BoolAuto(0).render(), "0");
        assert_eq!(Scalar::BoolAuto(1).render(), "1");
    }

    #[test]
    fn comma_list_splits_and_trims() {
        let got = OptionKind::CommaList.split_wire_value("foo, bar,baz");
        assert_eq!(got, vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn validate_rejects_mismatched_kind() {
        let err = OptionKind::Integer.validate(ScalarInput::Bool(true));
        assert!(matches!(err, Err(TorCtlError::InvalidArgument(_))));
    }

    #[test]
    fn from_wire_name_rejects_unknown() {
        assert!(OptionKind::from_wire_name("NotAKind").is_none());
    }
}
