use std::path::PathBuf;

use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "launchpad",
    about = "Runs the attribution-gated launch sequence and reports where it lands",
    version
)]
/// Public struct `Cli` used across launch components.
pub struct Cli {
    #[arg(
        long,
        env = "LAUNCH_CONFIG",
        help = "Path to the JSON services config."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "state-file",
        env = "LAUNCH_STATE_FILE",
        default_value = ".launchpad/state.json",
        help = "JSON file holding persisted launch state (url, open_game, open_first_time)."
    )]
    pub state_file: PathBuf,

    #[arg(
        long,
        env = "LAUNCH_SIMULATION",
        help = "JSON script of subsystem events replayed in place of platform SDKs."
    )]
    pub simulation: Option<PathBuf>,

    #[arg(
        long = "skip-connectivity",
        default_value_t = false,
        help = "Skip the internet reachability check before startup."
    )]
    pub skip_connectivity: bool,

    #[arg(
        long = "startup-timeout-ms",
        value_parser = parse_positive_u64,
        help = "Override startup_timeout_ms from the config."
    )]
    pub startup_timeout_ms: Option<u64>,

    #[arg(
        long = "print-report",
        default_value_t = false,
        help = "Print the diagnostics report after the launch decision."
    )]
    pub print_report: bool,

    #[arg(
        long = "web-view-closed",
        default_value_t = false,
        help = "Treat an opened web view as closed by the user, so later launches open the game."
    )]
    pub web_view_closed: bool,

    #[arg(
        long = "reset-state",
        default_value_t = false,
        help = "Restore first-run launch state and exit."
    )]
    pub reset_state: bool,

    #[arg(
        long = "randomize-query-keys",
        value_name = "SEED",
        help = "Print a randomized query_keys block for the given seed and exit."
    )]
    pub randomize_query_keys: Option<u64>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn unit_cli_defaults_state_file_and_flags() {
        let cli = Cli::try_parse_from(["launchpad", "--config", "services.json"]).expect("parse");
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("services.json"))
        );
        assert_eq!(cli.state_file, std::path::PathBuf::from(".launchpad/state.json"));
        assert!(!cli.skip_connectivity);
        assert!(cli.randomize_query_keys.is_none());
    }

    #[test]
    fn regression_cli_rejects_zero_startup_timeout() {
        let error = Cli::try_parse_from(["launchpad", "--startup-timeout-ms", "0"])
            .expect_err("zero timeout must be rejected");
        assert!(error.to_string().contains("greater than 0"));
    }
}
