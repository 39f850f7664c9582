//! User-facing configuration object.
//!
//! A concrete configuration wraps a [`BaseConfig`] and declares its fields
//! once, at construction, with [`BaseConfig::add_field`]:
//!
//! ```
//! use ros_z_reconfigure::{BaseConfig, ParamType, ParamValue, Reconfigurable};
//!
//! #[derive(Clone)]
//! struct DriverConfig(BaseConfig);
//!
//! impl DriverConfig {
//!     fn new() -> ros_z_reconfigure::Result<Self> {
//!         let mut base = BaseConfig::new();
//!         base.add_field("rate", ParamType::Int, 1, "Publish rate", 20,
//!             Some(ParamValue::Int(1)), Some(ParamValue::Int(100)))?;
//!         Ok(Self(base))
//!     }
//! }
//!
//! impl Reconfigurable for DriverConfig {
//!     fn base(&self) -> &BaseConfig { &self.0 }
//!     fn base_mut(&mut self) -> &mut BaseConfig { &mut self.0 }
//! }
//! ```

use crate::description::ConfigDescription;
use crate::error::Result;
use crate::param_set::ParameterSet;
use crate::value::{ParamType, ParamValue};

/// A configuration object the server can own and hand to its callback.
pub trait Reconfigurable: Clone + Send + 'static {
    fn base(&self) -> &BaseConfig;
    fn base_mut(&mut self) -> &mut BaseConfig;
}

/// Current values plus the static description of every declared field.
#[derive(Debug, Clone, Default)]
pub struct BaseConfig {
    current: ParameterSet,
    description: ConfigDescription,
}

impl BaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field, or update the declaration of an existing one.
    ///
    /// Writes the metadata and bounds into the description and resets the
    /// live value to `default`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_field(
        &mut self,
        name: &str,
        ty: ParamType,
        level: u32,
        description: &str,
        default: impl Into<ParamValue>,
        min: Option<ParamValue>,
        max: Option<ParamValue>,
    ) -> Result<()> {
        let default = default.into();
        self.description
            .declare(name, ty, level, description, default.clone(), min, max)?;
        self.current.set_field(name, ty, default)
    }

    /// Locate-or-create `name` in the current values only.
    pub fn update_field(&mut self, name: &str, ty: ParamType, value: impl Into<ParamValue>) -> Result<()> {
        self.current.set_field(name, ty, value.into())
    }

    /// Overwrite declared values with those present in `source`.
    pub fn merge(&mut self, source: &ParameterSet) -> usize {
        self.current.merge(source)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.current.get_bool(name).unwrap_or(default)
    }

    pub fn get_int(&self, name: &str, default: i32) -> i32 {
        self.current.get_int(name).unwrap_or(default)
    }

    pub fn get_double(&self, name: &str, default: f64) -> f64 {
        self.current.get_double(name).unwrap_or(default)
    }

    pub fn get_string(&self, name: &str, default: &str) -> String {
        self.current.get_str(name).unwrap_or(default).to_string()
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.current.assign(name, ParamValue::Bool(value))
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> Result<()> {
        self.current.assign(name, ParamValue::Int(value))
    }

    pub fn set_double(&mut self, name: &str, value: f64) -> Result<()> {
        self.current.assign(name, ParamValue::Double(value))
    }

    pub fn set_string(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.current.assign(name, ParamValue::Str(value.into()))
    }

    pub fn current_config(&self) -> &ParameterSet {
        &self.current
    }

    pub(crate) fn current_config_mut(&mut self) -> &mut ParameterSet {
        &mut self.current
    }

    pub fn description(&self) -> &ConfigDescription {
        &self.description
    }
}

impl Reconfigurable for BaseConfig {
    fn base(&self) -> &BaseConfig {
        self
    }

    fn base_mut(&mut self) -> &mut BaseConfig {
        self
    }
}
