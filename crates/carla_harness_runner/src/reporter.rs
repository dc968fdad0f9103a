//! Report the outcome of running a scenario.
use std::fmt::{Result, Write};

use indenter::indented;

use crate::environment::get_env;
use crate::protocol::*;
use crate::scenario_config::ScenarioConfig;

// Formatting here is to strings and so cannot fail, so the fallible version is unwrapped once at the top.  The trailing
// newline is stripped there too, which lets everything below use writeln.

/// Report the outcome of a scenario.
///
/// Returns a string without a trailing newline.
pub fn report_scenario(
    scenario_name: &str,
    config: &ScenarioConfig,
    response: &ScenarioResponse,
) -> String {
    let mut dest = String::new();
    report_scenario_fallible(&mut dest, scenario_name, config, response)
        .expect("This is formatting to strings and should never fail");

    let Some(stripped) = dest.strip_suffix('\n') else {
        return dest;
    };
    stripped.to_string()
}

fn report_scenario_fallible(
    mut dest: &mut dyn Write,
    scenario_name: &str,
    config: &ScenarioConfig,
    response: &ScenarioResponse,
) -> Result {
    write!(dest, "{scenario_name} ")?;

    match &response.outcome {
        ScenarioOutcome::Passed => writeln!(dest, "passed")?,
        ScenarioOutcome::Panicked(p) => {
            writeln!(dest, "panicked")?;
            report_panic(&mut indented(&mut dest).with_str("  "), p)?;
        }
        ScenarioOutcome::RunnerFailed(r) => {
            writeln!(dest, "failed")?;
            writeln!(indented(&mut dest).with_str("  "), "Reason: {}", r.reason)?;
        }
        ScenarioOutcome::ValidatorsFailed(v) => {
            writeln!(dest, "validators failed")?;
            report_validators_failed(&mut indented(&mut dest).with_str("  "), config, v)?;
        }
    }

    if let Some(frames) = response.captured_frames {
        writeln!(dest, "  Captured {frames} frames")?;
    }
    if response.host_restarted {
        writeln!(dest, "  The plugin host was restarted while this scenario ran")?;
    }

    if !response.outcome.is_passed() {
        writeln!(
            dest,
            "  More information is in {}. Try cargo run --bin carla_harness_runner -- view-response {scenario_name}",
            get_env().artifacts_dir_for(scenario_name).display()
        )?;
    }

    Ok(())
}

fn report_panic(dest: &mut dyn Write, info: &PanicOutcome) -> Result {
    let loc = info.location.as_deref().unwrap_or("UNAVAILABLE");
    writeln!(dest, "{}", info.panic_info)?;
    writeln!(dest, "Location: {loc}")?;
    Ok(())
}

fn report_validators_failed(
    mut dest: &mut dyn Write,
    config: &ScenarioConfig,
    info: &ValidatorsFailedResponse,
) -> Result {
    writeln!(dest, "{} validators have failed", info.entries.len())?;

    for v in info.entries.iter() {
        let mut ind_fmt = indented(&mut dest);
        let tag = config
            .validators
            .get(v.index)
            .map(|x| x.get_tag())
            .unwrap_or("unknown validator");
        writeln!(&mut ind_fmt, "Validator {} (a {tag}): ", v.index)?;
        writeln!(ind_fmt.with_str("  "), "{}", v.payload)?;
    }
    Ok(())
}
