//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keep per-tenant GIS data packages in a local cache.
///
/// Packsync authenticates each configured tenant, discovers its files and
/// downloads whatever changed, resuming partial transfers and sizing its
/// parallelism to the measured link capacity.
#[derive(Parser, Debug)]
#[command(name = "packsync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/packsync/config.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// What to do with the loaded configuration.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sync every tenant each interval until interrupted
    Run,
    /// Sync every tenant once and exit
    Once,
    /// Validate the config file and print a summary
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_subcommand_parses() {
        let args = Args::try_parse_from(["packsync", "run"]).unwrap();
        assert_eq!(args.command, Command::Run);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["packsync", "-v", "once"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["packsync", "once", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_and_config() {
        let args =
            Args::try_parse_from(["packsync", "--quiet", "check-config", "-c", "/etc/p.toml"])
                .unwrap();
        assert!(args.quiet);
        assert_eq!(args.command, Command::CheckConfig);
        assert_eq!(args.config, Some(PathBuf::from("/etc/p.toml")));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Args::try_parse_from(["packsync"]).is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["packsync", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
