#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use ros_z_reconfigure::{BaseConfig, ParamType, ParamValue, ParameterSet, Reconfigurable};

/// Configuration with one parameter of every type.
#[derive(Debug, Clone)]
pub struct AllTypesConfig(BaseConfig);

impl AllTypesConfig {
    pub fn new() -> Self {
        let bounds = || (Some(ParamValue::Int(0)), Some(ParamValue::Int(88)));
        let mut base = BaseConfig::new();

        let (min, max) = bounds();
        base.add_field("bool_name", ParamType::Bool, 1, "Testing bool", true, min, max)
            .unwrap();
        base.add_field(
            "double_name",
            ParamType::Double,
            2,
            "Testing double",
            8.8,
            Some(ParamValue::Double(0.0)),
            Some(ParamValue::Double(88.0)),
        )
        .unwrap();
        let (min, max) = bounds();
        base.add_field("int_name", ParamType::Int, 4, "Testing int", 8, min, max)
            .unwrap();
        base.add_field("str_name", ParamType::Str, 8, "Testing str", "default", None, None)
            .unwrap();
        Self(base)
    }
}

impl Reconfigurable for AllTypesConfig {
    fn base(&self) -> &BaseConfig {
        &self.0
    }

    fn base_mut(&mut self) -> &mut BaseConfig {
        &mut self.0
    }
}

/// Records every (int_name, level) pair the server callback observes.
#[derive(Clone, Default)]
pub struct CallbackLog(Arc<Mutex<Vec<(i32, u32)>>>);

impl CallbackLog {
    pub fn callback(&self) -> impl Fn(AllTypesConfig, u32) -> Option<AllTypesConfig> + Send + Sync + 'static {
        let log = self.0.clone();
        move |config: AllTypesConfig, level: u32| {
            log.lock().push((config.base().get_int("int_name", -1), level));
            Some(config)
        }
    }

    pub fn entries(&self) -> Vec<(i32, u32)> {
        self.0.lock().clone()
    }
}

/// Name-by-name equality, ignoring order.
pub fn same_values(a: &ParameterSet, b: &ParameterSet) -> bool {
    a.len() == b.len() && a.iter().all(|p| b.get(&p.name) == Some(&p.value))
}
