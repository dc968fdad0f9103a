//! Runs against a simulated graph of its own, so there is always a scenario which works without JACK or Carla.  Checks
//! the runner itself as much as the harness.
use std::time::Duration;

use anyhow::Result;

use carla_harness::midi::NoteSpecBuilder;

use crate::context::{play_and_record, ScenarioContext};
use crate::scenario_config::{ScenarioConfig, ScenarioConfigBuilder};
use crate::validators::NonSilentValidator;

/// Block size of the default simulated graph.  Playback and capture start on the same cycle, so the note is heard in
/// the first block.
const FIRST_BLOCK: u64 = 1024;

fn loopback_self_test_config() -> ScenarioConfig {
    ScenarioConfigBuilder::default()
        .add_standard_validators()
        .add_validator(NonSilentValidator::within(1e-4, FIRST_BLOCK))
        .add_validator(|index: u64, frame: &[f32]| -> Result<(), String> {
            // The phantom host writes the same signal to both outputs.
            if frame.len() == 2 && frame[0] != frame[1] {
                return Err(format!("Channels differ at frame {index}"));
            }
            Ok(())
        })
        .keep_artifacts_on_success(true)
        .needs_host(false)
        .build()
        .unwrap()
}

fn loopback_self_test(context: &mut ScenarioContext) -> Result<()> {
    let note = NoteSpecBuilder::default()
        .duration(Duration::from_millis(250))
        .build()?;

    let mut player = context.player()?;
    let mut recorder = context.recorder()?;
    let audio = play_and_record(&mut player, &mut recorder, &note, Duration::from_millis(750), true)?;

    log::info!("Loopback capture starts at engine cycle {}", audio.first_cycle);
    context.record(audio);
    Ok(())
}

register_scenario!(loopback_self_test);
