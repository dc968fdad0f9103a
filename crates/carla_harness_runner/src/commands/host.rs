use std::sync::Arc;

use anyhow::Result;

use carla_harness as ch;

use crate::cli_args::{CliArgs, HostArgs};

/// Launch the host, by default with its window, and keep the server up until the host is closed.
pub fn host(_top_args: &CliArgs, args: &HostArgs) -> Result<()> {
    let mut config = crate::context::load_config(args.config.as_deref())?;
    config.host.headless = !args.gui;

    let server = ch::AudioServerManager::new(&config, Arc::new(ch::graph::JackBackend::new()))?;
    let mut host = ch::PluginHostController::new(&config, server)?;
    host.run_until_exit()?;
    host.kill_server()?;
    Ok(())
}
