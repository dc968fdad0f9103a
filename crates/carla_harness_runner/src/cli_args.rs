//! Definition of the Clap command line.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run scenarios.
    Run(RunArgs),

    /// List all scenarios.
    List(ListArgs),

    /// Play one note through the host and record it to a WAV file.
    Note(NoteArgs),

    /// Launch the plugin host and wait for it to exit.
    Host(HostArgs),

    /// Print the saved response of a scenario which failed.
    ViewResponse(ViewResponseArgs),
}

#[derive(Debug, Parser)]
pub struct FilterArgs {
    /// If specified, filter scenarios with this glob pattern.
    pub pattern: Option<String>,
}

#[derive(Debug, Parser)]
pub struct RigArgs {
    /// YAML harness configuration.  Defaults are used for anything it leaves out.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the simulated graph instead of JACK and Carla.
    #[arg(long)]
    pub simulated: bool,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub rig: RigArgs,
}

/// List all scenarios, optionally constrained by a filter.
#[derive(Debug, Parser)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Parser)]
pub struct NoteArgs {
    #[command(flatten)]
    pub rig: RigArgs,

    #[arg(long, default_value_t = 64)]
    pub pitch: u8,

    #[arg(long, default_value_t = 64)]
    pub velocity: u8,

    /// Seconds between note on and note off.
    #[arg(long, default_value_t = 2.0)]
    pub duration: f64,

    /// Seconds to keep recording after the note off.
    #[arg(long, default_value_t = 4.0)]
    pub decay: f64,

    /// Render faster than realtime.
    #[arg(long)]
    pub freewheel: bool,

    #[arg(long, default_value = "note.wav")]
    pub output: PathBuf,
}

#[derive(Debug, Parser)]
pub struct HostArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Show the host's window instead of running headless.
    #[arg(long)]
    pub gui: bool,
}

#[derive(Debug, Parser)]
pub struct ViewResponseArgs {
    pub scenario_name: String,
}
