use anyhow::Result;

use crate::cli_args::{CliArgs, RunArgs};

/// Exits non-zero if any scenario failed.
pub fn run(_top_args: &CliArgs, run_args: &RunArgs) -> Result<()> {
    let all_passed = crate::runner::run_scenarios(run_args)?;
    if !all_passed {
        std::process::exit(1);
    }
    Ok(())
}
