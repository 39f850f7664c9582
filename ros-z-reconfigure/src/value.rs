//! Typed parameter values.
//!
//! A parameter holds exactly one of four scalar types. The textual tags
//! (`bool`, `int`, `str`, `double`) are the ones used in the description
//! message and on the command line.

use serde::{Deserialize, Serialize};

use crate::error::{ReconfigureError, Result};

/// The type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ParamType {
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "str")]
    Str,
}

impl ParamType {
    /// Whether min/max bounds are meaningful for this type.
    pub fn is_bounded(self) -> bool {
        matches!(self, Self::Int | Self::Double)
    }

    /// Zero value of the type, used when a wire message omits an entry.
    pub fn zero(self) -> ParamValue {
        match self {
            Self::Bool => ParamValue::Bool(false),
            Self::Int => ParamValue::Int(0),
            Self::Double => ParamValue::Double(0.0),
            Self::Str => ParamValue::Str(String::new()),
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    #[serde(with = "non_finite")]
    Double(f64),
    Str(String),
}

/// JSON has no literal for `inf` or `NaN`; those are written as the strings
/// `"inf"`, `"-inf"` and `"nan"`. Finite values stay plain numbers.
mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            serializer.serialize_str("nan")
        } else if *v == f64::INFINITY {
            serializer.serialize_str("inf")
        } else if *v == f64::NEG_INFINITY {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_f64(*v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(text) => match text.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                _ => Err(D::Error::custom(format!("'{text}' is not a double"))),
            },
        }
    }
}

impl ParamValue {
    /// Returns the parameter type of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Bool(_) => ParamType::Bool,
            Self::Int(_) => ParamType::Int,
            Self::Double(_) => ParamType::Double,
            Self::Str(_) => ParamType::Str,
        }
    }

    /// Parse `text` as a value of type `ty`.
    ///
    /// `name` is only used to label the error.
    pub fn parse(name: &str, ty: ParamType, text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || {
            ReconfigureError::Codec(format!("parameter '{name}': '{text}' is not a valid {ty}"))
        };
        match ty {
            ParamType::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => Ok(Self::Bool(true)),
                "false" | "0" | "off" | "no" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            ParamType::Int => text.parse().map(Self::Int).map_err(|_| invalid()),
            ParamType::Double => text.parse().map(Self::Double).map_err(|_| invalid()),
            ParamType::Str => Ok(Self::Str(text.to_string())),
        }
    }

    /// Equality that treats two NaN doubles as the same value.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Double(a), Self::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A parameter with its name and value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn param_type(&self) -> ParamType {
        self.value.param_type()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(ParamType::from_str("int").unwrap(), ParamType::Int);
        assert_eq!(ParamType::from_str("str").unwrap(), ParamType::Str);
        assert_eq!(ParamType::Double.to_string(), "double");
        assert!(ParamType::from_str("float").is_err());
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(
            ParamValue::parse("p", ParamType::Int, " 42 ").unwrap(),
            ParamValue::Int(42)
        );
        assert_eq!(
            ParamValue::parse("p", ParamType::Bool, "True").unwrap(),
            ParamValue::Bool(true)
        );
        assert_eq!(
            ParamValue::parse("p", ParamType::Double, "8.8").unwrap(),
            ParamValue::Double(8.8)
        );
        assert!(ParamValue::parse("p", ParamType::Int, "4.2").is_err());
        assert!(ParamValue::parse("p", ParamType::Bool, "maybe").is_err());
    }

    #[test]
    fn test_accessors_match_variant() {
        let v = ParamValue::from(7);
        assert_eq!(v.as_int(), Some(7));
        assert_eq!(v.as_bool(), None);
        assert_eq!(v.param_type(), ParamType::Int);
        assert_eq!(ParamValue::from("x").as_str(), Some("x"));
    }

    #[test]
    fn test_nan_is_same_as_nan() {
        let nan = ParamValue::Double(f64::NAN);
        assert!(nan.same_as(&ParamValue::Double(f64::NAN)));
        assert!(!nan.same_as(&ParamValue::Double(0.0)));
        assert!(ParamValue::Int(1).same_as(&ParamValue::Int(1)));
        assert!(!ParamValue::Int(1).same_as(&ParamValue::Double(1.0)));
    }

    #[test]
    fn test_non_finite_doubles_in_json() {
        let text = serde_json::to_string(&ParamValue::Double(f64::NEG_INFINITY)).unwrap();
        assert_eq!(text, r#"{"double":"-inf"}"#);
        let back: ParamValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ParamValue::Double(f64::NEG_INFINITY));

        let nan: ParamValue = serde_json::from_str(r#"{"double":"nan"}"#).unwrap();
        assert!(nan.as_double().is_some_and(f64::is_nan));
        let plain: ParamValue = serde_json::from_str(r#"{"double":0.5}"#).unwrap();
        assert_eq!(plain, ParamValue::Double(0.5));
        assert!(serde_json::from_str::<ParamValue>(r#"{"double":"big"}"#).is_err());
    }
}
