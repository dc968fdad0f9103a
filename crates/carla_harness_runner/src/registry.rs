use crate::context::ScenarioContext;
use crate::scenario_config::ScenarioConfig;

#[derive(Debug, derive_more::Display)]
#[display(fmt = "{} (registered at {file}:{line}:{column})", "self.name()")]
pub struct ScenarioRegistryEntry {
    /// Builds configuration.  Called whenever configuration is needed, so it should be cheap and idempotent.
    pub config_fn: fn() -> ScenarioConfig,

    pub run_fn: fn(&mut ScenarioContext) -> anyhow::Result<()>,

    /// `module_path!()` joined to the function name.
    pub unsanitized_name: &'static str,

    /// The name relative to the scenarios module, with `::` replaced by `.`.
    pub name: &'static once_cell::race::OnceBox<String>,
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

inventory::collect!(ScenarioRegistryEntry);

/// Return all scenarios in alphabetical order by name.
///
/// The list is built and cached on the first call.  Exits the process if two scenarios have the same name.
pub fn get_scenarios() -> impl Iterator<Item = &'static ScenarioRegistryEntry> {
    lazy_static::lazy_static! {
        static ref SCENARIO_CACHE: Vec<&'static ScenarioRegistryEntry> = build_scenario_cache();
    }

    SCENARIO_CACHE.iter().copied()
}

fn build_scenario_cache() -> Vec<&'static ScenarioRegistryEntry> {
    use itertools::Itertools;

    let mut ret = inventory::iter::<ScenarioRegistryEntry>
        .into_iter()
        .collect::<Vec<&'static ScenarioRegistryEntry>>();
    ret.sort_unstable_by_key(|x| (x.name(), x.file, x.line, x.column));

    let duplicates = ret
        .iter()
        .group_by(|x| x.name())
        .into_iter()
        .map(|(_, group)| group.copied().collect::<Vec<_>>())
        .filter(|group| group.len() > 1)
        .flatten()
        .collect::<Vec<&'static ScenarioRegistryEntry>>();

    if !duplicates.is_empty() {
        eprintln!("Found duplicate scenario registrations.  The following are registered more than once:");
        for e in duplicates {
            eprintln!("  {e}");
        }
        eprintln!("Quitting due to the above duplicate scenarios.");
        std::process::exit(1);
    }

    ret
}

pub fn get_scenario_by_name(name: &str) -> Option<&'static ScenarioRegistryEntry> {
    get_scenarios().find(|x| x.name() == name)
}

impl ScenarioRegistryEntry {
    pub fn name(&self) -> &str {
        self.name
            .get_or_init(|| {
                let dotted = self.unsanitized_name.replace("::", ".");
                Box::new(
                    dotted
                        .strip_prefix("carla_harness_runner.scenarios.")
                        .expect("All scenarios belong under the scenarios module")
                        .to_string(),
                )
            })
            .as_str()
    }
}
