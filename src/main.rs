use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use meshnode_cli::cli::{self, Command};
use meshnode_cli::commands;
use meshnode_cli::logging::{self, Logger};

const fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Status => "status",
        Command::Keys => "keys",
        Command::Hats => "hats",
        Command::Apply(_) => "apply",
        Command::Install(_) => "install",
        Command::Steps(_) => "steps",
        Command::Service(_) => "service",
        Command::Avahi(_) => "avahi",
        Command::Remove(_) => "remove",
        Command::Version => "version",
    }
}

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    let name = command_name(&args.command);
    logging::init_subscriber(args.verbose, name);
    let log = Arc::new(Logger::new(name));

    match &args.command {
        Command::Status => commands::status::run(&args.global, &log),
        Command::Keys => {
            commands::catalog::keys();
            Ok(())
        }
        Command::Hats => {
            commands::catalog::hats();
            Ok(())
        }
        Command::Apply(opts) => commands::apply::run(&args.global, opts, &log),
        Command::Install(opts) => {
            let abort = commands::install::install_interrupt_handler()?;
            commands::install::run(&args.global, opts, &log, &abort)
        }
        Command::Steps(opts) => commands::steps::run(&args.global, opts, &log),
        Command::Service(opts) => commands::service::run(&args.global, opts, &log),
        Command::Avahi(opts) => commands::avahi::run(&args.global, opts, &log),
        Command::Remove(opts) => commands::remove::run(&args.global, opts, &log),
        Command::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
