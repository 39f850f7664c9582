//! Ordered set of named, typed parameter values.
//!
//! `ParameterSet` is the in-memory form of a configuration: the current
//! values on the server, a partial update sent by a client, or the
//! defaults/min/max tables of a description. Names are unique within a
//! set; insertion order is kept so that serialization is deterministic.

use tracing::{trace, warn};

use crate::error::{ReconfigureError, Result};
use crate::value::{ParamType, ParamValue, Parameter};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate-or-create `name` and assign `value` to it.
    ///
    /// `value` must be of type `ty`. An existing entry with the same name is
    /// replaced in place, including its type, so a set never holds two
    /// entries with the same name.
    pub fn set_field(&mut self, name: &str, ty: ParamType, value: ParamValue) -> Result<()> {
        if value.param_type() != ty {
            return Err(ReconfigureError::mismatch(name, ty, value.param_type()));
        }

        match self.params.iter_mut().find(|p| p.name == name) {
            Some(param) => param.value = value,
            None => self.params.push(Parameter::new(name, value)),
        }
        Ok(())
    }

    /// Builder-style insertion, for assembling partial updates.
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(param) => param.value = value,
            None => self.params.push(Parameter::new(name, value)),
        }
        self
    }

    /// Assign a new value to an already declared parameter.
    ///
    /// Never creates entries: fails with `UnknownParameter` when `name` is
    /// absent and with `TypeMismatch` when `value` has a different type.
    pub fn assign(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ReconfigureError::unknown(name))?;

        if param.param_type() != value.param_type() {
            return Err(ReconfigureError::mismatch(
                name,
                param.param_type(),
                value.param_type(),
            ));
        }
        param.value = value;
        Ok(())
    }

    /// Apply `source` on top of this set.
    ///
    /// Only names already present here with the same type are overwritten;
    /// the schema of `self` never grows. Returns the number of values applied.
    pub fn merge(&mut self, source: &ParameterSet) -> usize {
        let mut applied = 0;
        for incoming in &source.params {
            let Some(param) = self.params.iter_mut().find(|p| p.name == incoming.name) else {
                trace!("[MERGE] Ignoring undeclared parameter '{}'", incoming.name);
                continue;
            };

            if param.param_type() != incoming.param_type() {
                warn!(
                    "[MERGE] Ignoring '{}': declared {} but update carries {}",
                    incoming.name,
                    param.param_type(),
                    incoming.param_type()
                );
                continue;
            }

            param.value = incoming.value.clone();
            applied += 1;
        }
        applied
    }

    /// Drop `name` from the set, returning its previous value.
    pub(crate) fn remove(&mut self, name: &str) -> Option<ParamValue> {
        let idx = self.params.iter().position(|p| p.name == name)?;
        Some(self.params.remove(idx).value)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(ParamValue::as_int)
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_double)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.iter_mut()
    }

    /// Parameters of a single type, in insertion order.
    pub fn of_type(&self, ty: ParamType) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(move |p| p.param_type() == ty)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl FromIterator<Parameter> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |set, p| set.with(&p.name, p.value))
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_types() -> ParameterSet {
        ParameterSet::new()
            .with("bool_name", true)
            .with("double_name", 8.8)
            .with("int_name", 8)
            .with("str_name", "default")
    }

    #[test]
    fn test_set_field_creates_then_updates() {
        let mut set = ParameterSet::new();
        set.set_field("rate", ParamType::Int, ParamValue::Int(20))
            .unwrap();
        set.set_field("rate", ParamType::Int, ParamValue::Int(30))
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get_int("rate"), Some(30));
    }

    #[test]
    fn test_set_field_rejects_wrong_type() {
        let mut set = ParameterSet::new();
        let err = set
            .set_field("rate", ParamType::Int, ParamValue::Str("20".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            ReconfigureError::TypeMismatch {
                expected: ParamType::Int,
                found: ParamType::Str,
                ..
            }
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn test_set_field_keeps_insertion_order() {
        let set = all_types();
        let names: Vec<_> = set.names().collect();
        assert_eq!(names, ["bool_name", "double_name", "int_name", "str_name"]);
    }

    #[test]
    fn test_merge_is_partial_update() {
        let mut target = all_types();
        let source = ParameterSet::new()
            .with("int_name", 42)
            .with("str_name", "changed");

        assert_eq!(target.merge(&source), 2);
        assert_eq!(target.get_int("int_name"), Some(42));
        assert_eq!(target.get_str("str_name"), Some("changed"));
        assert_eq!(target.get_bool("bool_name"), Some(true));
        assert_eq!(target.get_double("double_name"), Some(8.8));
    }

    #[test]
    fn test_merge_never_grows_schema() {
        let mut target = all_types();
        let source = ParameterSet::new().with("unknown", 1);
        assert_eq!(target.merge(&source), 0);
        assert!(!target.contains("unknown"));
        assert_eq!(target.len(), 4);
    }

    #[test]
    fn test_merge_skips_type_conflicts() {
        let mut target = all_types();
        let source = ParameterSet::new().with("int_name", "not a number");
        assert_eq!(target.merge(&source), 0);
        assert_eq!(target.get_int("int_name"), Some(8));
    }

    #[test]
    fn test_assign_requires_declared_name() {
        let mut set = all_types();
        assert!(matches!(
            set.assign("missing", ParamValue::Int(1)),
            Err(ReconfigureError::UnknownParameter { .. })
        ));
        assert!(matches!(
            set.assign("int_name", ParamValue::Bool(false)),
            Err(ReconfigureError::TypeMismatch { .. })
        ));
        set.assign("int_name", ParamValue::Int(3)).unwrap();
        assert_eq!(set.get_int("int_name"), Some(3));
    }

    #[test]
    fn test_of_type_filters_bucket() {
        let set = all_types().with("other_int", 1);
        let ints: Vec<_> = set.of_type(ParamType::Int).map(|p| p.name.clone()).collect();
        assert_eq!(ints, ["int_name", "other_int"]);
    }
}
