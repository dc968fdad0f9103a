//! Knows how to run a single scenario, and how to run a filtered set of them and report the outcome.
use std::panic::AssertUnwindSafe;

use anyhow::{Context, Result};

use carla_harness::HarnessConfig;

use crate::context::{Rig, ScenarioContext};
use crate::protocol::*;
use crate::registry::ScenarioRegistryEntry;

/// Run one scenario against `rig`, then its validators.  Panics inside the scenario are caught and become the
/// outcome.
fn run_scenario_body(
    scenario: &ScenarioRegistryEntry,
    context: &mut ScenarioContext,
) -> ScenarioOutcome {
    let name = scenario.name();
    log::info!("Running {name}");

    let res = std::panic::catch_unwind(AssertUnwindSafe(|| (scenario.run_fn)(&mut *context)));
    match res {
        Err(_) => {
            let panic = crate::panic_handler::take_last_panic().unwrap_or_else(|| PanicOutcome {
                panic_info: "unknown panic".to_string(),
                location: None,
                backtrace: String::new(),
            });
            return ScenarioOutcome::Panicked(panic);
        }
        // If the scenario itself returned an error, that's a failure regardless of what validators might say.
        Ok(Err(e)) => {
            return ScenarioOutcome::RunnerFailed(RunnerFailedResponse {
                reason: format!("{e:#}"),
            });
        }
        Ok(Ok(())) => {}
    }

    let config = (scenario.config_fn)();
    let Some(captured) = context.captured.as_ref() else {
        if config.validators.is_empty() {
            return ScenarioOutcome::Passed;
        }
        return ScenarioOutcome::RunnerFailed(RunnerFailedResponse {
            reason: "The scenario has validators but recorded nothing".to_string(),
        });
    };

    let entries = crate::validators::validate(config.validators, captured)
        .into_iter()
        .map(|(index, payload)| FailedValidatorEntry { index, payload })
        .collect::<Vec<_>>();
    if !entries.is_empty() {
        return ScenarioOutcome::ValidatorsFailed(ValidatorsFailedResponse { entries });
    }

    ScenarioOutcome::Passed
}

/// Run one scenario start to finish:
///
/// - Clear any old artifacts directory and send logs to a new one.
/// - Run the scenario and its validators.
/// - Write the response and the capture.
/// - If the scenario passed, remove the artifacts directory again.
pub fn run_single_scenario(
    scenario: &ScenarioRegistryEntry,
    harness_config: &HarnessConfig,
    shared_rig: &mut Option<Rig>,
    rig_args: &crate::cli_args::RigArgs,
) -> Result<ScenarioResponse> {
    let name = scenario.name();
    let config = (scenario.config_fn)();
    let artifacts_directory = crate::environment::get_env().artifacts_dir_for(name);

    match std::fs::remove_dir_all(&artifacts_directory) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).context(format!(
                "While trying to clear the artifacts directory for {name}: {}",
                artifacts_directory.display()
            ));
        }
    }
    std::fs::create_dir_all(&artifacts_directory)?;
    crate::log_handler::redirect_logs(&artifacts_directory)?;

    // Scenarios which do not need the host get a graph of their own, so that they run even without JACK.
    let own_rig;
    let rig = if config.needs_host {
        if shared_rig.is_none() {
            *shared_rig = Some(Rig::from_args(rig_args, harness_config)?);
        }
        shared_rig
            .as_ref()
            .context("The rig was just created")?
    } else {
        own_rig = Rig::simulated();
        &own_rig
    };

    let mut context = ScenarioContext::new(name, artifacts_directory.clone(), harness_config, rig);
    let outcome = run_scenario_body(scenario, &mut context);

    if let Some(captured) = context.captured.as_ref() {
        let path = artifacts_directory.join(crate::environment::CAPTURE_FILE);
        if let Err(e) = captured.export(&path) {
            log::warn!("Could not write {}: {e}", path.display());
        }
    }

    let response = ScenarioResponse {
        outcome,
        captured_frames: context.captured.as_ref().map(|c| c.frames()),
        host_restarted: rig.take_host_error(),
    };
    let out_file = std::fs::File::create(artifacts_directory.join(crate::environment::RESPONSE_FILE))?;
    serde_json::to_writer_pretty(out_file, &response)?;
    crate::log_handler::stop_redirecting();

    if response.outcome.is_passed() && !config.keep_artifacts_on_success {
        std::fs::remove_dir_all(&artifacts_directory).context(format!(
            "While trying to clean up the artifacts directory after {name} passed: {}",
            artifacts_directory.display()
        ))?;
    }

    Ok(response)
}

/// Filter the scenarios and run them all, reporting each outcome to stderr.
///
/// Returns whether every scenario passed.
pub fn run_scenarios(args: &crate::cli_args::RunArgs) -> Result<bool> {
    crate::panic_handler::install_panic_handler();
    let harness_config = crate::context::load_config(args.rig.config.as_deref())?;

    let mut rig = None;
    let mut all_passed = true;

    for scenario in crate::scenario_filtering::get_scenarios_filtered(&args.filter)? {
        let name = scenario.name();
        let res = run_single_scenario(scenario, &harness_config, &mut rig, &args.rig)
            .with_context(|| format!("While running {name}"))?;
        let reported = crate::reporter::report_scenario(name, &(scenario.config_fn)(), &res);
        all_passed &= res.outcome.is_passed();
        eprintln!("{reported}");
    }

    Ok(all_passed)
}
