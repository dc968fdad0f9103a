use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use carla_harness as ch;
use carla_harness::graph::simulated::{Driver, SimulatedGraph};
use carla_harness::graph::GraphBackend;

/// The graph scenarios run against.
pub enum Rig {
    /// A simulated graph with a phantom host, driven in realtime by a background thread.
    Simulated {
        graph: SimulatedGraph,
        _driver: Driver,
    },

    /// The real server and host.
    Real { host: Box<ch::PluginHostController> },
}

impl Rig {
    pub fn simulated() -> Rig {
        let graph = SimulatedGraph::with_phantom_host(Default::default());
        let driver = graph.spawn_driver();
        Rig::Simulated {
            graph,
            _driver: driver,
        }
    }

    /// Start or attach to the server, then launch the host and wait until it is ready.
    pub fn real(config: &ch::HarnessConfig) -> Result<Rig> {
        let backend = Arc::new(ch::graph::JackBackend::new());
        let server = ch::AudioServerManager::new(config, backend)?;
        let mut host = ch::PluginHostController::new(config, server)?;
        host.start().context("While bringing up the plugin host")?;
        Ok(Rig::Real {
            host: Box::new(host),
        })
    }

    pub fn from_args(args: &crate::cli_args::RigArgs, config: &ch::HarnessConfig) -> Result<Rig> {
        if args.simulated {
            Ok(Rig::simulated())
        } else {
            Rig::real(config)
        }
    }

    pub fn backend(&self) -> Arc<dyn GraphBackend> {
        match self {
            Rig::Simulated { graph, .. } => Arc::new(graph.clone()),
            Rig::Real { host } => host.backend(),
        }
    }

    /// Whether the watchdog has had to restart the host since the last call.
    pub fn take_host_error(&self) -> bool {
        match self {
            Rig::Simulated { .. } => false,
            Rig::Real { host } => {
                let had_error = host.has_error();
                host.clear_error();
                had_error
            }
        }
    }
}

/// Load the configuration named on the command line, or the defaults.
pub fn load_config(path: Option<&std::path::Path>) -> Result<ch::HarnessConfig> {
    match path {
        Some(p) => ch::HarnessConfig::from_yaml_file(p)
            .with_context(|| format!("Loading configuration from {}", p.display())),
        None => Ok(ch::HarnessConfig::default()),
    }
}

pub struct ScenarioContext<'a> {
    pub scenario_name: String,
    pub artifacts_dir: PathBuf,
    pub config: &'a ch::HarnessConfig,
    rig: &'a Rig,

    /// What the scenario recorded, for the validators.
    pub captured: Option<ch::CapturedAudio>,
}

impl<'a> ScenarioContext<'a> {
    pub fn new(
        scenario_name: &str,
        artifacts_dir: PathBuf,
        config: &'a ch::HarnessConfig,
        rig: &'a Rig,
    ) -> Self {
        Self {
            scenario_name: scenario_name.to_string(),
            artifacts_dir,
            config,
            rig,
            captured: None,
        }
    }

    pub fn backend(&self) -> Arc<dyn GraphBackend> {
        self.rig.backend()
    }

    /// A capture client named after the scenario.
    pub fn recorder(&self) -> Result<ch::AudioCaptureClient> {
        let name = format!("{}-rec", self.scenario_name);
        Ok(ch::AudioCaptureClient::new(&*self.backend(), &name, self.config)?)
    }

    /// A playback client named after the scenario.
    pub fn player(&self) -> Result<ch::EventPlaybackClient> {
        let name = format!("{}-play", self.scenario_name);
        Ok(ch::EventPlaybackClient::new(&*self.backend(), &name, self.config)?)
    }

    /// Hand a capture to the validators.
    pub fn record(&mut self, audio: ch::CapturedAudio) {
        log::info!(
            "{}: recorded {} frames over {} channels",
            self.scenario_name,
            audio.frames(),
            audio.channels
        );
        self.captured = Some(audio);
    }
}

/// Play `note` and record it together with `decay` of release, starting both on the same cycle.
///
/// Shared by the note command and the note scenarios.
pub fn play_and_record(
    player: &mut ch::EventPlaybackClient,
    recorder: &mut ch::AudioCaptureClient,
    note: &ch::midi::NoteSpec,
    decay: Duration,
    freewheel: bool,
) -> Result<ch::CapturedAudio> {
    let total = note.duration + decay;

    recorder.start(
        Some(total),
        ch::ReadyCondition::peer(player.ready_handle()),
    )?;
    player.play_note(note, ch::ReadyCondition::peer(recorder.ready_handle()))?;

    // Generous: freewheel may not be faster if the host is slow, and realtime should take about `total`.
    let mut wait = ch::WaitOptions::timeout(total * 4 + Duration::from_secs(10));
    if freewheel {
        wait = wait.freewheel();
    }

    let finished = recorder.wait(wait)?;
    // The player finished long before the recorder did, so this is only cleanup.
    player.wait(ch::WaitOptions::timeout(Duration::from_secs(1)))?;

    anyhow::ensure!(finished, "Timed out waiting for {total:?} of audio");
    anyhow::ensure!(
        !recorder.has_error() && !player.has_error(),
        "The plugin host left the graph during the recording"
    );
    Ok(recorder.take_recorded()?)
}
