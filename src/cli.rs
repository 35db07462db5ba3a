use clap::Parser;
use std::path::PathBuf;

use crate::config::ControllerConfig;

/// replica-controller - keep a MongoDB replica set in sync with DNS
#[derive(Parser, Debug)]
#[command(name = "replica-controller")]
#[command(version)]
#[command(about = "Setup and maintain replica set membership for MongoDB")]
#[command(long_about = "
Resolves the given host names, compares the addresses behind them with the
replica set configuration and initiates or reconfigures the set to match.

Usage examples:
  replica-controller tasks.mongo                 # reconcile once and exit
  replica-controller --watch tasks.mongo         # keep reconciling every 5s
  replica-controller -c controller.toml --watch  # endpoints from a config file

Exit codes:
  0  success, or clean shutdown of the watch loop
  1  configuration error
  2  usage error
  3  no host name resolved
  4  cluster unreachable, timed out, or no healthy primary
  5  initiate/reconfigure rejected, or split brain
  6  configuration version conflict
  7  refused: change would remove a majority of the current members

Removals must leave a strict majority of the current members in place. A
two-member set cannot drop one member this way; add the replacement first,
or reconfigure it by hand.

Log level comes from LOGLEVEL (or RUST_LOG), default info.
")]
pub struct Cli {
    /// Host names (optionally host:port) whose addresses form the replica set
    #[arg(value_name = "HOSTNAME", required_unless_present = "config")]
    pub hostnames: Vec<String>,

    /// Keep reconciling instead of running a single pass
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between passes in watch mode
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Replica set name used when initiating
    #[arg(long)]
    pub set_name: Option<String>,

    /// Port for host names given without one
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Allow forced reconfiguration when no healthy primary can be found
    #[arg(long)]
    pub force_reconfigure: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Overlay command-line values onto a loaded configuration
    pub fn apply_to(&self, config: &mut ControllerConfig) {
        if !self.hostnames.is_empty() {
            config.endpoints = self.hostnames.clone();
        }
        if self.watch {
            config.watch = true;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if let Some(set_name) = &self.set_name {
            config.set_name = set_name.clone();
        }
        if let Some(port) = self.port {
            config.default_port = port;
        }
        if self.force_reconfigure {
            config.force_reconfigure = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_original_style_arguments() {
        let cli = Cli::try_parse_from(["replica-controller", "--watch", "mongo1", "mongo2"]).unwrap();
        assert!(cli.watch);
        assert_eq!(cli.hostnames, vec!["mongo1".to_string(), "mongo2".to_string()]);
    }

    #[test]
    fn test_apply_overrides_file_values() {
        let cli = Cli::try_parse_from([
            "replica-controller",
            "--interval",
            "30",
            "--set-name",
            "rs0",
            "--port",
            "27018",
            "tasks.mongo",
        ])
        .unwrap();

        let mut config = ControllerConfig {
            endpoints: vec!["from-file".to_string()],
            ..ControllerConfig::default()
        };
        cli.apply_to(&mut config);

        assert_eq!(config.endpoints, vec!["tasks.mongo".to_string()]);
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.set_name, "rs0");
        assert_eq!(config.default_port, 27018);
        assert!(!config.watch);
        assert!(!config.force_reconfigure);
    }

    #[test]
    fn test_file_endpoints_kept_without_hostnames() {
        let cli = Cli::try_parse_from(["replica-controller", "-c", "controller.toml", "--force-reconfigure"]).unwrap();
        let mut config = ControllerConfig {
            endpoints: vec!["from-file".to_string()],
            ..ControllerConfig::default()
        };
        cli.apply_to(&mut config);

        assert_eq!(config.endpoints, vec!["from-file".to_string()]);
        assert!(config.force_reconfigure);
    }

    #[test]
    fn test_missing_hostnames_is_a_usage_error() {
        let err = Cli::try_parse_from(["replica-controller", "--watch"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_help_explains_majority_rule() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("strict majority"));
        assert!(help.contains("two-member set"));
    }
}
