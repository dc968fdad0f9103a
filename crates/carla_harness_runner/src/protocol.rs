//! What gets written to `response.json` for each scenario.
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioResponse {
    pub outcome: ScenarioOutcome,

    /// Frames captured, if the scenario captured anything.
    pub captured_frames: Option<usize>,

    /// Whether the plugin host had to be restarted by the liveness watchdog while the scenario ran.
    pub host_restarted: bool,
}

/// The outcome of a scenario.
#[derive(Clone, Debug, Serialize, Deserialize, derive_more::IsVariant)]
pub enum ScenarioOutcome {
    Passed,

    /// The scenario function returned an error.
    RunnerFailed(RunnerFailedResponse),

    /// The scenario ran, but its capture failed some validator.
    ValidatorsFailed(ValidatorsFailedResponse),

    /// The scenario panicked.  Could be an assert or an actual problem.
    Panicked(PanicOutcome),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedValidatorEntry {
    /// Index of the validator in the scenario's config.  Config functions are deterministic, so this can be matched
    /// back up with the validator when reporting.
    pub index: usize,

    pub payload: crate::validators::ValidatorFailure,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorsFailedResponse {
    pub entries: Vec<FailedValidatorEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PanicOutcome {
    /// Display impl result on the panic info.
    pub panic_info: String,

    pub location: Option<String>,

    pub backtrace: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RunnerFailedResponse {
    pub reason: String,
}
