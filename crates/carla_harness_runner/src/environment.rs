//! Where scenarios put their output.
//!
//! Computed the first time it is asked for, then cached.
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Environment<T> {
    pub artifacts_dir: T,
}

fn compute_env() -> Environment<PathBuf> {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    // we're at crates/carla_harness_runner.
    let workspace = manifest.join("../..");
    let artifacts_dir = workspace.join("target/harness_artifacts");

    std::fs::create_dir_all(&artifacts_dir)
        .expect("Should be able to create the artifacts directory");
    log::info!("Artifacts go to {}", artifacts_dir.display());

    Environment { artifacts_dir }
}

pub fn get_env() -> Environment<&'static Path> {
    lazy_static::lazy_static! {
        static ref ENVIRONMENT: Environment<PathBuf> = compute_env();
    };

    Environment {
        artifacts_dir: &ENVIRONMENT.artifacts_dir,
    }
}

/// File to which the outcome of a scenario is written.
pub const RESPONSE_FILE: &str = "response.json";

/// File to which a scenario's capture is written.
pub const CAPTURE_FILE: &str = "capture.wav";

impl Environment<&'static Path> {
    pub fn artifacts_dir_for(&self, scenario_name: &str) -> PathBuf {
        self.artifacts_dir.join(scenario_name)
    }

    pub fn response_file_for(&self, scenario_name: &str) -> PathBuf {
        self.artifacts_dir_for(scenario_name).join(RESPONSE_FILE)
    }
}
