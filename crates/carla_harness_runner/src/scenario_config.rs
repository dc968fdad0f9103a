use crate::validators::IntoValidator;

/// Configuration for a scenario.
#[derive(derive_builder::Builder)]
#[builder(pattern = "owned")]
pub struct ScenarioConfig {
    #[builder(setter(custom), default)]
    pub validators: Vec<Box<dyn IntoValidator>>,

    /// Keep the artifacts directory even if the scenario passes.
    ///
    /// Captures are large, so only set this while debugging or when the output is meant to be listened to.
    #[builder(default)]
    pub keep_artifacts_on_success: bool,

    /// Whether the scenario needs the rig the run was started with.  Scenarios which do not get a fresh simulated
    /// graph of their own.
    #[builder(default = "true")]
    pub needs_host: bool,
}

impl ScenarioConfigBuilder {
    pub fn add_validator<V: IntoValidator>(mut self, validator: V) -> Self {
        self.validators
            .get_or_insert_with(Vec::new)
            .push(Box::new(validator));
        self
    }

    /// Push the validators every capture should pass:
    ///
    /// - All samples are finite and in range for audio.
    pub fn add_standard_validators(self) -> Self {
        self.add_validator(crate::validators::RangeValidator)
    }
}
