//! End-to-end scenarios for the harness, and a command line for driving the server and host by hand.
//!
//! Unit and integration tests in `carla_harness` run against the simulated graph.  This binary is what exercises the
//! real thing: it brings up the JACK server and Carla once, then runs every registered scenario against them.  With
//! `--simulated` the same scenarios run against the simulated graph instead, which needs neither.
//!
//! A scenario works as follows:
//!
//! - It is a function taking a [context::ScenarioContext], which hands out clients connected to whatever graph the
//!   run is using.
//! - It plays and records, then hands its capture to the context with [context::ScenarioContext::record].
//! - It is registered with `register_scenario!` next to a config function naming the validators its capture must
//!   pass.
//!
//! Scenarios run one after another in this process, since they share the server and host.  Each gets a directory
//! `target/harness_artifacts/scenario.name` holding its logs, its capture as `capture.wav` and a `response.json`
//! saying how it went.  Directories of passing scenarios are removed unless the scenario asks to keep them.
#[macro_use]
mod registration_macro;

mod cli_args;
mod commands;
mod context;
mod environment;
mod log_handler;
mod panic_handler;
mod protocol;
mod registry;
mod reporter;
mod runner;
mod scenario_config;
mod scenario_filtering;
mod scenarios;
mod validators;

fn main() {
    use clap::Parser;

    let args = cli_args::CliArgs::parse();
    log_handler::install_log_handler();

    if let Err(e) = commands::dispatch_command(&args) {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
