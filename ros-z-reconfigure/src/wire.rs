//! Wire messages.
//!
//! These mirror the ROS `dynamic_reconfigure` message layout (one bucket
//! per scalar type) and are encoded as little-endian CDR. The core model
//! converts to/from them only at the transport boundary.

use std::str::FromStr;

use cdr::{CdrLe, Infinite};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::description::{ConfigDescription, GROUP_DEFAULT, GROUP_DEFAULT_ID, Group, ParamDescription};
use crate::error::{ReconfigureError, Result};
use crate::param_set::ParameterSet;
use crate::value::{ParamType, ParamValue};

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct BoolParameter {
    pub name: String,
    pub value: bool,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct IntParameter {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct StrParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct DoubleParameter {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct GroupState {
    pub name: String,
    pub state: bool,
    pub id: i32,
    pub parent: i32,
}

impl GroupState {
    fn active_default() -> Self {
        Self {
            name: GROUP_DEFAULT.to_string(),
            state: true,
            id: GROUP_DEFAULT_ID,
            parent: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    pub bools: Vec<BoolParameter>,
    pub ints: Vec<IntParameter>,
    pub strs: Vec<StrParameter>,
    pub doubles: Vec<DoubleParameter>,
    pub groups: Vec<GroupState>,
}

impl Config {
    pub fn from_set(set: &ParameterSet) -> Self {
        let mut config = Self {
            groups: vec![GroupState::active_default()],
            ..Default::default()
        };
        for param in set {
            config.push(&param.name, param.value.clone());
        }
        config
    }

    fn push(&mut self, name: &str, value: ParamValue) {
        let name = name.to_string();
        match value {
            ParamValue::Bool(value) => self.bools.push(BoolParameter { name, value }),
            ParamValue::Int(value) => self.ints.push(IntParameter { name, value }),
            ParamValue::Str(value) => self.strs.push(StrParameter { name, value }),
            ParamValue::Double(value) => self.doubles.push(DoubleParameter { name, value }),
        }
    }

    pub fn to_set(&self) -> ParameterSet {
        let bools = self.bools.iter().map(|p| (&p.name, ParamValue::Bool(p.value)));
        let ints = self.ints.iter().map(|p| (&p.name, ParamValue::Int(p.value)));
        let strs = self
            .strs
            .iter()
            .map(|p| (&p.name, ParamValue::Str(p.value.clone())));
        let doubles = self
            .doubles
            .iter()
            .map(|p| (&p.name, ParamValue::Double(p.value)));

        bools
            .chain(ints)
            .chain(strs)
            .chain(doubles)
            .fold(ParameterSet::new(), |set, (name, value)| set.with(name, value))
    }

    fn lookup(&self, name: &str, ty: ParamType) -> Option<ParamValue> {
        match ty {
            ParamType::Bool => self
                .bools
                .iter()
                .find(|p| p.name == name)
                .map(|p| ParamValue::Bool(p.value)),
            ParamType::Int => self
                .ints
                .iter()
                .find(|p| p.name == name)
                .map(|p| ParamValue::Int(p.value)),
            ParamType::Str => self
                .strs
                .iter()
                .find(|p| p.name == name)
                .map(|p| ParamValue::Str(p.value.clone())),
            ParamType::Double => self
                .doubles
                .iter()
                .find(|p| p.name == name)
                .map(|p| ParamValue::Double(p.value)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct WireParamDescription {
    pub name: String,
    pub r#type: String,
    pub level: u32,
    pub description: String,
    pub edit_method: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct WireGroup {
    pub name: String,
    pub r#type: String,
    pub parameters: Vec<WireParamDescription>,
    pub parent: i32,
    pub id: i32,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct WireConfigDescription {
    pub groups: Vec<WireGroup>,
    pub max: Config,
    pub min: Config,
    pub dflt: Config,
}

/// Value written into the min/max tables when a parameter has no bound.
fn open_bound(ty: ParamType, upper: bool) -> ParamValue {
    match (ty, upper) {
        (ParamType::Bool, upper) => ParamValue::Bool(upper),
        (ParamType::Int, false) => ParamValue::Int(i32::MIN),
        (ParamType::Int, true) => ParamValue::Int(i32::MAX),
        (ParamType::Double, false) => ParamValue::Double(f64::NEG_INFINITY),
        (ParamType::Double, true) => ParamValue::Double(f64::INFINITY),
        (ParamType::Str, _) => ParamValue::Str(String::new()),
    }
}

impl WireConfigDescription {
    pub fn from_description(desc: &ConfigDescription) -> Self {
        let group = desc.group();
        let mut dflt = Config::default();
        let mut min = Config::default();
        let mut max = Config::default();

        for param in &group.parameters {
            let default = desc
                .defaults()
                .get(&param.name)
                .cloned()
                .unwrap_or_else(|| param.ty.zero());
            let lo = desc
                .min()
                .get(&param.name)
                .cloned()
                .unwrap_or_else(|| open_bound(param.ty, false));
            let hi = desc
                .max()
                .get(&param.name)
                .cloned()
                .unwrap_or_else(|| open_bound(param.ty, true));
            dflt.push(&param.name, default);
            min.push(&param.name, lo);
            max.push(&param.name, hi);
        }

        let wire_group = WireGroup {
            name: group.name.clone(),
            r#type: group.group_type.clone(),
            parameters: group
                .parameters
                .iter()
                .map(|p| WireParamDescription {
                    name: p.name.clone(),
                    r#type: p.ty.to_string(),
                    level: p.level,
                    description: p.description.clone(),
                    edit_method: p.edit_method.clone(),
                })
                .collect(),
            parent: group.parent,
            id: group.id,
        };

        Self {
            groups: vec![wire_group],
            max,
            min,
            dflt,
        }
    }

    /// Rebuild the core description.
    ///
    /// Only the first group is read; bounds are kept for Int and Double
    /// parameters and dropped for the others.
    pub fn to_description(&self) -> Result<ConfigDescription> {
        let Some(wire_group) = self.groups.first() else {
            return Ok(ConfigDescription::new());
        };

        let mut parameters = Vec::with_capacity(wire_group.parameters.len());
        let mut defaults = ParameterSet::new();
        let mut min = ParameterSet::new();
        let mut max = ParameterSet::new();

        for p in &wire_group.parameters {
            let ty = ParamType::from_str(&p.r#type).map_err(|_| {
                ReconfigureError::Codec(format!(
                    "parameter '{}' has unknown type '{}'",
                    p.name, p.r#type
                ))
            })?;

            let default = self.dflt.lookup(&p.name, ty).unwrap_or_else(|| ty.zero());
            defaults.set_field(&p.name, ty, default)?;
            if ty.is_bounded() {
                if let Some(lo) = self.min.lookup(&p.name, ty) {
                    min.set_field(&p.name, ty, lo)?;
                }
                if let Some(hi) = self.max.lookup(&p.name, ty) {
                    max.set_field(&p.name, ty, hi)?;
                }
            }

            parameters.push(ParamDescription {
                name: p.name.clone(),
                ty,
                level: p.level,
                description: p.description.clone(),
                edit_method: p.edit_method.clone(),
            });
        }

        let group = Group {
            id: wire_group.id,
            parent: wire_group.parent,
            name: wire_group.name.clone(),
            group_type: wire_group.r#type.clone(),
            parameters,
        };
        Ok(ConfigDescription::from_parts(group, defaults, min, max))
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ReconfigureRequest {
    pub config: Config,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ReconfigureResponse {
    pub config: Config,
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    cdr::serialize::<_, _, CdrLe>(msg, Infinite).map_err(|e| ReconfigureError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    cdr::deserialize::<T>(bytes).map_err(|e| ReconfigureError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseConfig;

    fn all_types() -> BaseConfig {
        let mut config = BaseConfig::new();
        config
            .add_field(
                "bool_name",
                ParamType::Bool,
                1,
                "Testing bool",
                true,
                Some(ParamValue::Int(0)),
                Some(ParamValue::Int(88)),
            )
            .unwrap();
        config
            .add_field(
                "int_name",
                ParamType::Int,
                2,
                "Testing int",
                8,
                Some(ParamValue::Int(0)),
                Some(ParamValue::Int(88)),
            )
            .unwrap();
        config
            .add_field("double_name", ParamType::Double, 4, "Testing double", 8.8, None, None)
            .unwrap();
        config
            .add_field("str_name", ParamType::Str, 0, "Testing str", "default", None, None)
            .unwrap();
        config
    }

    #[test]
    fn test_config_buckets() {
        let config = Config::from_set(all_types().current_config());
        assert_eq!(config.bools.len(), 1);
        assert_eq!(config.ints[0].value, 8);
        assert_eq!(config.strs[0].value, "default");
        assert_eq!(config.doubles[0].name, "double_name");
        assert_eq!(config.groups, vec![GroupState::active_default()]);
    }

    #[test]
    fn test_config_survives_cdr() {
        let set = all_types().current_config().clone();
        let bytes = encode(&ReconfigureRequest {
            config: Config::from_set(&set),
        })
        .unwrap();
        let decoded: ReconfigureRequest = decode(&bytes).unwrap();

        let back = decoded.config.to_set();
        for param in &set {
            assert_eq!(back.get(&param.name), Some(&param.value));
        }
        assert_eq!(back.len(), set.len());
    }

    #[test]
    fn test_description_bounds_on_wire() {
        let config = all_types();
        let wire = WireConfigDescription::from_description(config.description());

        assert_eq!(wire.groups.len(), 1);
        assert_eq!(wire.groups[0].name, GROUP_DEFAULT);
        assert_eq!(wire.groups[0].parameters[1].r#type, "int");
        // bool bounds are not modelled: the open range is sent
        assert!(!wire.min.bools[0].value);
        assert!(wire.max.bools[0].value);
        assert_eq!(wire.max.ints[0].value, 88);
        assert_eq!(wire.max.doubles[0].value, f64::INFINITY);

        let back = wire.to_description().unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back.param("int_name").unwrap().level, 2);
        assert_eq!(back.max().get_int("int_name"), Some(88));
        assert!(back.max().get("bool_name").is_none());
        assert_eq!(back.defaults(), config.description().defaults());
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let wire = WireConfigDescription {
            groups: vec![WireGroup {
                name: GROUP_DEFAULT.into(),
                parameters: vec![WireParamDescription {
                    name: "p".into(),
                    r#type: "float".into(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            wire.to_description(),
            Err(ReconfigureError::Codec(_))
        ));
    }

    #[test]
    fn test_garbage_payload_is_codec_error() {
        let err = decode::<ReconfigureRequest>(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, ReconfigureError::Codec(_)));
    }
}
