mod host;
mod list;
mod note;
mod run;
mod view_response;

use anyhow::Result;

use crate::cli_args;

/// Figure out what command to run, then run it.
pub fn dispatch_command(args: &cli_args::CliArgs) -> Result<()> {
    match &args.command {
        cli_args::Command::List(l) => list::list(args, l),
        cli_args::Command::ViewResponse(r) => view_response::view_response(args, r),
        cli_args::Command::Run(r) => run::run(args, r),
        cli_args::Command::Note(n) => note::note(args, n),
        cli_args::Command::Host(h) => host::host(args, h),
    }
}
