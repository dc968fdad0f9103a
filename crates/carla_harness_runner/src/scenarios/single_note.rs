//! Play one note through the host and check that it comes back.
use std::time::Duration;

use anyhow::Result;

use carla_harness::midi::NoteSpecBuilder;

use crate::context::{play_and_record, ScenarioContext};
use crate::scenario_config::{ScenarioConfig, ScenarioConfigBuilder};
use crate::validators::NonSilentValidator;

const DECAY: Duration = Duration::from_secs(4);

fn run_note(context: &mut ScenarioContext, freewheel: bool) -> Result<()> {
    let note = NoteSpecBuilder::default()
        .pitch(64)
        .velocity(64)
        .duration(Duration::from_secs(2))
        .build()?;

    let mut player = context.player()?;
    let mut recorder = context.recorder()?;
    let audio = play_and_record(&mut player, &mut recorder, &note, DECAY, freewheel)?;

    anyhow::ensure!(
        audio.duration() >= note.duration + DECAY,
        "Recorded only {:?}",
        audio.duration()
    );
    context.record(audio);
    Ok(())
}

fn single_note_realtime_config() -> ScenarioConfig {
    ScenarioConfigBuilder::default()
        .add_standard_validators()
        .add_validator(NonSilentValidator::new(1e-4))
        .build()
        .unwrap()
}

fn single_note_realtime(context: &mut ScenarioContext) -> Result<()> {
    run_note(context, false)
}

register_scenario!(single_note_realtime);

fn single_note_freewheel_config() -> ScenarioConfig {
    ScenarioConfigBuilder::default()
        .add_standard_validators()
        .add_validator(NonSilentValidator::new(1e-4))
        .build()
        .unwrap()
}

fn single_note_freewheel(context: &mut ScenarioContext) -> Result<()> {
    run_note(context, true)
}

register_scenario!(single_note_freewheel);
