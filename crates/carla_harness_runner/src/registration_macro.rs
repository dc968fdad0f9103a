/// Registers a scenario.
///
/// Takes a scenario name, which must correspond to a function in the invoking module with the signature `fn x(&mut
/// ScenarioContext) -> anyhow::Result<()>`.  The module must also define `fn x_config() -> ScenarioConfig`, which may
/// be called more than once.
macro_rules! register_scenario {
    ($scenario_fn:ident) => {
        inventory::submit! {
            crate::registry::ScenarioRegistryEntry {
                config_fn: paste::paste!{ [<$scenario_fn _config>] },
                run_fn: $scenario_fn,
                unsanitized_name: concat!(module_path!(), ".", stringify!($scenario_fn)),
                name: {
                    static NAME_CACHE: once_cell::race::OnceBox::<String> = once_cell::race::OnceBox::new();
                    &NAME_CACHE
                },
                file: file!(),
                line: line!(),
                column: column!(),
            }
        }
    };
}
