use anyhow::Result;

use crate::cli_args::{CliArgs, ListArgs};

pub fn list(_top_args: &CliArgs, list_args: &ListArgs) -> Result<()> {
    for i in crate::scenario_filtering::get_scenarios_filtered(&list_args.filter)? {
        println!("{i}");
    }
    Ok(())
}
