use anyhow::{Context, Result};

use crate::cli_args::FilterArgs;
use crate::registry::ScenarioRegistryEntry;

/// Get an iterator over scenarios matching the glob pattern from the command line, if any.
pub fn get_scenarios_filtered(
    args: &FilterArgs,
) -> Result<impl Iterator<Item = &'static ScenarioRegistryEntry>> {
    let matcher = args
        .pattern
        .as_deref()
        .map(|p| {
            globset::Glob::new(p)
                .map(|g| g.compile_matcher())
                .with_context(|| format!("Invalid scenario pattern {p}"))
        })
        .transpose()?;

    Ok(crate::registry::get_scenarios().filter(move |x| {
        matcher
            .as_ref()
            .map(|m| m.is_match(x.name()))
            .unwrap_or(true)
    }))
}
