//! Static per-parameter metadata.
//!
//! A `ConfigDescription` is built once while the configuration object is
//! constructed and then broadcast unchanged for the lifetime of the
//! server. It carries, per parameter, the type, help text and change
//! level, plus the default/min/max tables used for clamping.

use tracing::debug;

use crate::error::{ReconfigureError, Result};
use crate::param_set::ParameterSet;
use crate::value::{ParamType, ParamValue};

/// Name of the single parameter group.
pub const GROUP_DEFAULT: &str = "Default";
/// Id of the single parameter group.
pub const GROUP_DEFAULT_ID: i32 = 0;

/// Metadata of one declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescription {
    pub name: String,
    pub ty: ParamType,
    /// Bitmask OR-ed into the change level when this parameter changes.
    pub level: u32,
    pub description: String,
    pub edit_method: String,
}

impl ParamDescription {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            level: 0,
            description: String::new(),
            edit_method: String::new(),
        }
    }
}

/// A flat group of parameters. Only the "Default" group is ever populated.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: i32,
    pub parent: i32,
    pub name: String,
    pub group_type: String,
    pub parameters: Vec<ParamDescription>,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            id: GROUP_DEFAULT_ID,
            parent: 0,
            name: GROUP_DEFAULT.to_string(),
            group_type: String::new(),
            parameters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDescription {
    group: Group,
    defaults: ParameterSet,
    min: ParameterSet,
    max: ParameterSet,
}

impl ConfigDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        group: Group,
        defaults: ParameterSet,
        min: ParameterSet,
        max: ParameterSet,
    ) -> Self {
        Self {
            group,
            defaults,
            min,
            max,
        }
    }

    /// Declare or re-declare a parameter.
    ///
    /// Idempotent per name: the existing entry is updated in place and keeps
    /// its declaration position. Bounds are kept only for Int and Double
    /// parameters and must share the parameter's type.
    #[allow(clippy::too_many_arguments)]
    pub fn declare(
        &mut self,
        name: &str,
        ty: ParamType,
        level: u32,
        description: &str,
        default: ParamValue,
        min: Option<ParamValue>,
        max: Option<ParamValue>,
    ) -> Result<()> {
        if default.param_type() != ty {
            return Err(ReconfigureError::mismatch(name, ty, default.param_type()));
        }

        let (min, max) = if ty.is_bounded() {
            for bound in [&min, &max].into_iter().flatten() {
                if bound.param_type() != ty {
                    return Err(ReconfigureError::mismatch(name, ty, bound.param_type()));
                }
            }
            (min, max)
        } else {
            if min.is_some() || max.is_some() {
                debug!("[DESC] Bounds are not applicable to {} parameter '{}'", ty, name);
            }
            (None, None)
        };

        let idx = match self.group.parameters.iter().position(|p| p.name == name) {
            Some(idx) => idx,
            None => {
                self.group.parameters.push(ParamDescription::new(name, ty));
                self.group.parameters.len() - 1
            }
        };
        let param = &mut self.group.parameters[idx];
        param.ty = ty;
        param.level = level;
        param.description = description.to_string();

        self.defaults.set_field(name, ty, default)?;
        Self::set_bound(&mut self.min, name, ty, min)?;
        Self::set_bound(&mut self.max, name, ty, max)?;
        Ok(())
    }

    fn set_bound(
        table: &mut ParameterSet,
        name: &str,
        ty: ParamType,
        bound: Option<ParamValue>,
    ) -> Result<()> {
        match bound {
            Some(value) => table.set_field(name, ty, value),
            None => {
                table.remove(name);
                Ok(())
            }
        }
    }

    /// Set the edit method (e.g. an enum description) of a declared parameter.
    pub fn set_edit_method(&mut self, name: &str, edit_method: impl Into<String>) -> Result<()> {
        let param = self
            .group
            .parameters
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ReconfigureError::unknown(name))?;
        param.edit_method = edit_method.into();
        Ok(())
    }

    pub fn param(&self, name: &str) -> Option<&ParamDescription> {
        self.group.parameters.iter().find(|p| p.name == name)
    }

    /// Declared parameters, in declaration order.
    pub fn params(&self) -> impl Iterator<Item = &ParamDescription> {
        self.group.parameters.iter()
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn defaults(&self) -> &ParameterSet {
        &self.defaults
    }

    pub fn min(&self) -> &ParameterSet {
        &self.min
    }

    pub fn max(&self) -> &ParameterSet {
        &self.max
    }

    pub fn len(&self) -> usize {
        self.group.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.parameters.is_empty()
    }

    /// OR of the levels of every declared parameter whose value differs
    /// between `before` and `after`.
    pub fn calc_level(&self, before: &ParameterSet, after: &ParameterSet) -> u32 {
        self.params()
            .filter(|p| match (before.get(&p.name), after.get(&p.name)) {
                (Some(a), Some(b)) => !a.same_as(b),
                (a, b) => a.is_some() != b.is_some(),
            })
            .fold(0, |level, p| level | p.level)
    }

    /// Force every bounded value of `config` into its declared `[min, max]`.
    ///
    /// Returns the number of values that were changed.
    pub fn clamp(&self, config: &mut ParameterSet) -> usize {
        let mut clamped = 0;
        for param in config.iter_mut() {
            let min = self.min.get(&param.name);
            let max = self.max.get(&param.name);
            let next = match &param.value {
                ParamValue::Int(v) => {
                    let hi = max.and_then(ParamValue::as_int).unwrap_or(i32::MAX);
                    let lo = min.and_then(ParamValue::as_int).unwrap_or(i32::MIN);
                    // max wins when the bounds are inverted
                    let c = (*v).max(lo).min(hi);
                    (c != *v).then_some(ParamValue::Int(c))
                }
                // NaN is never in range and has no nearest bound
                ParamValue::Double(v) if v.is_nan() => None,
                ParamValue::Double(v) => {
                    let hi = max.and_then(ParamValue::as_double).unwrap_or(f64::INFINITY);
                    let lo = min.and_then(ParamValue::as_double).unwrap_or(f64::NEG_INFINITY);
                    let c = v.max(lo).min(hi);
                    (c != *v).then_some(ParamValue::Double(c))
                }
                ParamValue::Bool(_) | ParamValue::Str(_) => None,
            };

            if let Some(value) = next {
                debug!("[DESC] Clamped '{}': {} -> {}", param.name, param.value, value);
                param.value = value;
                clamped += 1;
            }
        }
        clamped
    }
}
