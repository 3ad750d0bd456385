//! Builds a [`PipelineDefinition`] from configuration by looking up each step
//! in the registry.

use crate::config::PipelineConfig;
use crate::error::ConfigError;

use super::{PipelineDefinition, StepRegistry, TransformStep};

/// Construct and validate every configured step, in order.
///
/// Any failure aborts the whole build: steps constructed so far are released
/// and nothing is returned, so a broken configuration never partially applies.
pub fn build_pipeline(
    config: &PipelineConfig,
    registry: &StepRegistry,
) -> Result<PipelineDefinition, ConfigError> {
    let mut steps: Vec<Box<dyn TransformStep>> = Vec::with_capacity(config.steps.len());

    for (index, step_config) in config.steps.iter().enumerate() {
        match build_step(index, step_config, registry) {
            Ok(step) => steps.push(step),
            Err(err) => {
                for step in &mut steps {
                    step.release();
                }
                return Err(err);
            }
        }
    }

    Ok(PipelineDefinition::new(steps))
}

fn build_step(
    index: usize,
    step_config: &crate::config::StepConfig,
    registry: &StepRegistry,
) -> Result<Box<dyn TransformStep>, ConfigError> {
    let name = step_config
        .name
        .as_deref()
        .ok_or(ConfigError::MissingName { index })?;

    let constructor = registry.get(name).ok_or_else(|| ConfigError::UnknownStep {
        index,
        name: name.to_string(),
    })?;

    let mut step =
        constructor(name, &step_config.params).map_err(|source| ConfigError::InvalidParams {
            index,
            name: name.to_string(),
            source,
        })?;

    if let Err(source) = step.validate() {
        step.release();
        return Err(ConfigError::Validation {
            index,
            name: name.to_string(),
            source,
        });
    }

    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StepConfig;
    use crate::error::StepError;
    use crate::pipeline::types::Frame;
    use crate::processor::registry::{ConfigurableStep, ParamMap};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline(steps: Vec<StepConfig>) -> PipelineConfig {
        PipelineConfig { steps }
    }

    #[test]
    fn test_builds_in_order() {
        let registry = StepRegistry::with_builtin_steps();
        let definition = build_pipeline(
            &pipeline(vec![
                StepConfig::new("grayscale"),
                StepConfig::new("threshold").with_param("value", 100),
                StepConfig::new("invert"),
            ]),
            &registry,
        )
        .unwrap();

        assert_eq!(
            definition.step_names(),
            vec!["grayscale", "threshold", "invert"]
        );
    }

    #[test]
    fn test_unknown_step() {
        let registry = StepRegistry::with_builtin_steps();
        let err = build_pipeline(
            &pipeline(vec![StepConfig::new("invert"), StepConfig::new("sharpen")]),
            &registry,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::UnknownStep { index: 1, ref name } if name == "sharpen"
        ));
    }

    #[test]
    fn test_missing_name() {
        let registry = StepRegistry::with_builtin_steps();
        let err = build_pipeline(&pipeline(vec![StepConfig::default()]), &registry).unwrap_err();
        assert!(matches!(err, ConfigError::MissingName { index: 0 }));
    }

    #[test]
    fn test_validation_failure() {
        let registry = StepRegistry::with_builtin_steps();
        let err = build_pipeline(
            &pipeline(vec![StepConfig::new("downscale").with_param("factor", 0)]),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { index: 0, .. }));
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct CountingParams {}

    struct Counting;

    impl TransformStep for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
            dst.copy_from(src);
            Ok(())
        }

        fn release(&mut self) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ConfigurableStep for Counting {
        type Params = CountingParams;

        fn from_params(_name: &str, _params: CountingParams) -> Self {
            Counting
        }
    }

    #[test]
    fn test_failed_build_releases_built_steps() {
        let mut registry = StepRegistry::with_builtin_steps();
        registry.register_step::<Counting>("counting");

        let mut bad = ParamMap::new();
        bad.insert("factor".into(), serde_json::json!(99));
        let err = build_pipeline(
            &pipeline(vec![
                StepConfig::new("counting"),
                StepConfig::new("counting"),
                StepConfig {
                    name: Some("downscale".into()),
                    params: bad,
                },
            ]),
            &registry,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Validation { index: 2, .. }));
        assert_eq!(RELEASED.load(Ordering::SeqCst), 2);
    }
}
