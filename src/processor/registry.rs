//! Name → constructor registry for transform steps
//!
//! Registration happens during an explicit init phase; once a registry is
//! installed as the process-wide instance it is read-only.

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

use super::TransformStep;
use super::core;

/// Generic key/value parameters of one pipeline step
pub type ParamMap = serde_json::Map<String, Value>;

/// Builds a step from its configured name and raw parameters
pub type StepConstructor =
    fn(&str, &ParamMap) -> Result<Box<dyn TransformStep>, serde_json::Error>;

/// A step with a typed parameter struct that can be decoded from a [`ParamMap`]
pub trait ConfigurableStep: TransformStep + Sized + 'static {
    type Params: DeserializeOwned;

    fn from_params(name: &str, params: Self::Params) -> Self;
}

/// Decode raw parameters into a typed settings struct.
///
/// Unknown or mistyped keys fail with a descriptive error when the settings
/// struct uses `#[serde(deny_unknown_fields)]`.
pub fn decode_params<P: DeserializeOwned>(params: &ParamMap) -> Result<P, serde_json::Error> {
    serde_json::from_value(Value::Object(params.clone()))
}

/// Constructor for any [`ConfigurableStep`]
pub fn construct<S: ConfigurableStep>(
    name: &str,
    params: &ParamMap,
) -> Result<Box<dyn TransformStep>, serde_json::Error> {
    let params = decode_params::<S::Params>(params)?;
    Ok(Box::new(S::from_params(name, params)))
}

#[derive(Default)]
pub struct StepRegistry {
    constructors: HashMap<String, StepConstructor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in steps
    pub fn with_builtin_steps() -> Self {
        let mut registry = Self::new();
        core::register_builtin(&mut registry);
        registry
    }

    /// Register a constructor, replacing any previous one under the same name
    pub fn register(&mut self, name: &str, constructor: StepConstructor) -> &mut Self {
        if self
            .constructors
            .insert(name.to_string(), constructor)
            .is_some()
        {
            log::warn!("Step registry: constructor for {name:?} replaced");
        }
        self
    }

    /// Register a [`ConfigurableStep`] under `name`
    pub fn register_step<S: ConfigurableStep>(&mut self, name: &str) -> &mut Self {
        self.register(name, construct::<S>)
    }

    pub fn get(&self, name: &str) -> Option<StepConstructor> {
        self.constructors.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}

static GLOBAL: OnceCell<StepRegistry> = OnceCell::new();

/// Install the process-wide registry. Fails if one is already installed.
pub fn install(registry: StepRegistry) -> Result<(), StepRegistry> {
    GLOBAL.set(registry)
}

/// The process-wide registry, falling back to the built-in steps
pub fn global() -> &'static StepRegistry {
    GLOBAL.get_or_init(StepRegistry::with_builtin_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_steps_registered() {
        let registry = StepRegistry::with_builtin_steps();
        for name in [
            "passthrough",
            "grayscale",
            "invert",
            "threshold",
            "flip",
            "downscale",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(!registry.contains("sharpen"));
    }

    #[test]
    fn test_construct_decodes_typed_params() {
        let registry = StepRegistry::with_builtin_steps();
        let ctor = registry.get("threshold").unwrap();

        let mut params = ParamMap::new();
        params.insert("value".into(), json!(40));
        let step = ctor("my-threshold", &params).unwrap();
        assert_eq!(step.name(), "my-threshold");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let registry = StepRegistry::with_builtin_steps();
        let ctor = registry.get("threshold").unwrap();

        let mut params = ParamMap::new();
        params.insert("treshold".into(), json!(40));
        let err = ctor("threshold", &params).err().unwrap();
        assert!(err.to_string().contains("treshold"));
    }

    #[test]
    fn test_mistyped_field_rejected() {
        let registry = StepRegistry::with_builtin_steps();
        let ctor = registry.get("downscale").unwrap();

        let mut params = ParamMap::new();
        params.insert("factor".into(), json!("two"));
        assert!(ctor("downscale", &params).is_err());
    }
}
