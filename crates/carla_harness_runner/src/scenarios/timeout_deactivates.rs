//! A capture with no end, waited on with a timeout, must give up on time and leave nothing behind in the graph.
use std::time::{Duration, Instant};

use anyhow::Result;

use carla_harness::{ReadyCondition, WaitOptions};

use crate::context::ScenarioContext;
use crate::scenario_config::{ScenarioConfig, ScenarioConfigBuilder};

const TIMEOUT: Duration = Duration::from_millis(500);

fn timeout_deactivates_config() -> ScenarioConfig {
    ScenarioConfigBuilder::default().build().unwrap()
}

fn timeout_deactivates(context: &mut ScenarioContext) -> Result<()> {
    let mut recorder = context.recorder()?;

    let started = Instant::now();
    let finished = recorder.start_sync(None, ReadyCondition::always(), WaitOptions::timeout(TIMEOUT))?;
    let elapsed = started.elapsed();

    anyhow::ensure!(!finished, "An open-ended capture reported completion");
    anyhow::ensure!(elapsed >= TIMEOUT, "Returned after only {elapsed:?}");
    anyhow::ensure!(!recorder.client().is_active(), "Still active after the timeout");
    anyhow::ensure!(
        recorder.client().registered_ports().is_empty(),
        "Ports left registered: {:?}",
        recorder.client().registered_ports()
    );
    anyhow::ensure!(recorder.frames() > 0, "Nothing was recorded while waiting");
    Ok(())
}

register_scenario!(timeout_deactivates);
