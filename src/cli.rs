use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Channel;
use crate::steps::daemon::ServiceControl;

/// Top-level CLI entry point.
#[derive(Parser, Debug)]
#[command(
    name = "meshnode",
    about = "Set up a Raspberry Pi as a mesh-radio node and keep its configuration in shape",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Settings file (default /etc/meshnode/settings.toml)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Override the boot options file
    #[arg(long, global = true)]
    pub boot_config: Option<PathBuf>,

    /// Override the daemon YAML configuration
    #[arg(long, global = true)]
    pub service_config: Option<PathBuf>,

    /// Override the persisted step record
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Override the backup directory
    #[arg(long, global = true, conflicts_with = "no_backup")]
    pub backup_dir: Option<PathBuf>,

    /// Replace files without keeping a backup copy
    #[arg(long, global = true)]
    pub no_backup: bool,

    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show hardware, managed values, and setup progress
    Status,
    /// List the configuration keys meshnode manages
    Keys,
    /// List the known HAT profiles
    Hats,
    /// Merge the selection into both configuration files
    Apply(SelectionOpts),
    /// Run the setup steps, resuming where the last run stopped
    Install(InstallOpts),
    /// Inspect or change the persisted step record
    Steps(StepsOpts),
    /// Start, stop, or restart the mesh daemon
    Service(ServiceOpts),
    /// Turn the node's mDNS advertisement on or off
    Avahi(AvahiOpts),
    /// Stop the daemon and remove its package and repository
    Remove(PrivilegeOpts),
    /// Print version information
    Version,
}

/// How the desired option values are chosen.
#[derive(Parser, Debug, Clone, Default)]
pub struct SelectionOpts {
    /// HAT profile (see `meshnode hats`); detected from the HAT EEPROM if omitted
    #[arg(long)]
    pub hat: Option<String>,

    /// LoRa region, shorthand for `--set radio.region=REGION`
    #[arg(long)]
    pub region: Option<String>,

    /// Set a key (see `meshnode keys`); may be repeated
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,
}

/// Options for the `install` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct InstallOpts {
    /// Option selection applied by the config steps.
    #[command(flatten)]
    pub selection: SelectionOpts,

    /// Package repository channel
    #[arg(long, value_enum)]
    pub channel: Option<Channel>,

    /// Also open the daemon config in a desktop editor
    #[arg(long)]
    pub editor: bool,

    /// Run privileged commands directly instead of through sudo
    #[arg(long)]
    pub no_sudo: bool,

    /// Bundled board config to enable, a name under `available.d`
    #[arg(long, value_name = "NAME")]
    pub hat_config: Option<String>,
}

/// How privileged commands are run.
#[derive(Parser, Debug, Clone, Default)]
pub struct PrivilegeOpts {
    /// Run privileged commands directly instead of through sudo
    #[arg(long)]
    pub no_sudo: bool,
}

/// Options for the `service` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ServiceOpts {
    /// What to do with the daemon
    #[arg(value_enum)]
    pub action: ServiceControl,

    /// Privilege options.
    #[command(flatten)]
    pub privilege: PrivilegeOpts,
}

/// Options for the `avahi` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct AvahiOpts {
    /// What to do.
    #[command(subcommand)]
    pub action: AvahiAction,

    /// Privilege options.
    #[command(flatten)]
    pub privilege: PrivilegeOpts,
}

/// Actions of the `avahi` subcommand.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvahiAction {
    /// Install Avahi and advertise the node
    Enable,
    /// Stop Avahi and remove the advertisement
    Disable,
}

/// Options for the `steps` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StepsOpts {
    /// What to do; defaults to `show`.
    #[command(subcommand)]
    pub action: Option<StepsAction>,
}

/// Step record operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StepsAction {
    /// Print every step with its state
    Show,
    /// Return a failed step to pending
    Retry {
        /// Step name, as shown by `meshnode steps`
        name: String,
    },
    /// Return every step to pending and clear the reboot flag
    Reset,
}

/// Parse `KEY=VALUE`, splitting at the first `=`.
fn parse_assignment(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{text}'")),
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_apply_selection() {
        let cli = Cli::parse_from([
            "meshnode",
            "apply",
            "--hat",
            "rak4631",
            "--region",
            "EU_868",
            "--set",
            "Webserver.Port=9443",
            "--set",
            "gpio4_mode=op,dh",
        ]);
        let Command::Apply(opts) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(opts.hat.as_deref(), Some("rak4631"));
        assert_eq!(opts.region.as_deref(), Some("EU_868"));
        assert_eq!(
            opts.set,
            [
                ("Webserver.Port".to_string(), "9443".to_string()),
                ("gpio4_mode".to_string(), "op,dh".to_string()),
            ]
        );
    }

    #[test]
    fn set_without_equals_is_rejected() {
        assert!(Cli::try_parse_from(["meshnode", "apply", "--set", "spi_enable"]).is_err());
        assert!(Cli::try_parse_from(["meshnode", "apply", "--set", "=on"]).is_err());
    }

    #[test]
    fn value_may_contain_equals() {
        assert_eq!(
            parse_assignment("pps_overlay=pps-gpio,gpiopin=18").unwrap(),
            ("pps_overlay".to_string(), "pps-gpio,gpiopin=18".to_string())
        );
    }

    #[test]
    fn parse_global_overrides_after_subcommand() {
        let cli = Cli::parse_from([
            "meshnode",
            "status",
            "--boot-config",
            "/tmp/config.txt",
            "--state-file",
            "/tmp/steps.json",
            "-d",
            "-v",
        ]);
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.global.boot_config, Some(PathBuf::from("/tmp/config.txt")));
        assert_eq!(cli.global.state_file, Some(PathBuf::from("/tmp/steps.json")));
        assert!(cli.global.dry_run);
        assert!(cli.verbose);
    }

    #[test]
    fn backup_dir_conflicts_with_no_backup() {
        assert!(
            Cli::try_parse_from(["meshnode", "--no-backup", "--backup-dir", "/tmp", "keys"])
                .is_err()
        );
    }

    #[test]
    fn parse_install_options() {
        let cli = Cli::parse_from([
            "meshnode",
            "install",
            "--channel",
            "alpha",
            "--editor",
            "--no-sudo",
        ]);
        let Command::Install(opts) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(opts.channel, Some(Channel::Alpha));
        assert_eq!(opts.hat_config, None);
        assert!(opts.editor);
        assert!(opts.no_sudo);
    }

    #[test]
    fn parse_steps_actions() {
        let cli = Cli::parse_from(["meshnode", "steps"]);
        assert!(matches!(cli.command, Command::Steps(StepsOpts { action: None })));

        let cli = Cli::parse_from(["meshnode", "steps", "retry", "Install daemon"]);
        let Command::Steps(opts) = cli.command else {
            panic!("expected steps");
        };
        assert_eq!(
            opts.action,
            Some(StepsAction::Retry {
                name: "Install daemon".to_string()
            })
        );
    }

    #[test]
    fn parse_service_avahi_and_remove() {
        let cli = Cli::parse_from(["meshnode", "service", "restart", "--no-sudo"]);
        let Command::Service(opts) = cli.command else {
            panic!("expected service");
        };
        assert_eq!(opts.action, ServiceControl::Restart);
        assert!(opts.privilege.no_sudo);
        assert!(Cli::try_parse_from(["meshnode", "service", "reload"]).is_err());

        let cli = Cli::parse_from(["meshnode", "avahi", "disable"]);
        let Command::Avahi(opts) = cli.command else {
            panic!("expected avahi");
        };
        assert_eq!(opts.action, AvahiAction::Disable);

        let cli = Cli::parse_from(["meshnode", "--dry-run", "remove"]);
        assert!(matches!(cli.command, Command::Remove(PrivilegeOpts { no_sudo: false })));
        assert!(cli.global.dry_run);
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["meshnode", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }
}
