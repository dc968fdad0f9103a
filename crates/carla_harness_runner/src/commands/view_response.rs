use anyhow::{Context, Result};

use crate::cli_args::*;

pub fn view_response(_top_args: &CliArgs, cmd_args: &ViewResponseArgs) -> Result<()> {
    let env = crate::environment::get_env();
    let name = &cmd_args.scenario_name;

    anyhow::ensure!(
        crate::registry::get_scenario_by_name(name).is_some(),
        "{name} is not a registered scenario"
    );

    let path = env.response_file_for(name);
    let response = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "{name}: could not read {}. If the directory is missing, the scenario probably passed",
            path.display()
        )
    })?;

    println!("Response for {name}");
    println!("{response}");
    Ok(())
}
