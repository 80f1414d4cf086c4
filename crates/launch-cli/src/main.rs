mod bootstrap_helpers;
mod cli_args;
mod simulation;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use launch_core::{FileKeyValueStore, KeyValueStore};
use launch_dispatch::Dispatcher;
use launch_net::{ConnectivityProber, HttpSender, RetryingHttpClient};
use launch_startup::{
    load_services_config, AppStartup, LaunchDecision, LaunchStateStore, QueryKeyScheme,
    StartupOrchestrator,
};

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::simulation::{load_simulation, SimulationScript};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(seed) = cli.randomize_query_keys {
        let scheme = QueryKeyScheme::randomized(seed);
        println!("{}", serde_json::to_string_pretty(&scheme)?);
        return Ok(());
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(&cli.state_file)?);
    if cli.reset_state {
        LaunchStateStore::new(Arc::clone(&store)).reset()?;
        println!("launch state reset: {}", cli.state_file.display());
        return Ok(());
    }

    let config_path = cli
        .config
        .as_deref()
        .context("a services config is required (--config or LAUNCH_CONFIG)")?;
    let mut config = load_services_config(config_path)?;
    if let Some(timeout_ms) = cli.startup_timeout_ms {
        config.startup_timeout_ms = timeout_ms;
    }

    let script = match cli.simulation.as_deref() {
        Some(path) => load_simulation(path)?,
        None => SimulationScript::default(),
    };
    let registry = script.registry(&config.subsystems)?;
    let http: Arc<dyn HttpSender> = Arc::new(RetryingHttpClient::new(config.http.clone())?);
    let prober = if cli.skip_connectivity {
        None
    } else {
        Some(ConnectivityProber::new(config.connectivity.clone())?)
    };

    let dispatcher = Dispatcher::with_tick(config.dispatcher_tick());
    let orchestrator =
        StartupOrchestrator::new(config, &registry, Arc::clone(&store), http, &dispatcher)?;
    let app = AppStartup::new(orchestrator, prober, store);

    let decision = dispatcher.run_until(app.launch()).await?;
    println!("{}", describe_decision(&decision));

    if cli.web_view_closed && matches!(decision, LaunchDecision::OpenWeb { .. }) {
        app.on_web_view_closed()?;
        println!("web view closed: the next launch opens the game");
    }
    if cli.print_report && !matches!(decision, LaunchDecision::ShowDiagnostics { .. }) {
        println!("{}", app.orchestrator().diagnostics_report());
    }

    drop(app);
    dispatcher.shutdown();
    Ok(())
}

fn describe_decision(decision: &LaunchDecision) -> String {
    match decision {
        LaunchDecision::Offline => "offline: no internet connection".to_string(),
        LaunchDecision::OpenWeb { url } => format!("open web: {url}"),
        LaunchDecision::LaunchGame => "launch game".to_string(),
        LaunchDecision::ShowDiagnostics { report, test_url } => {
            format!("diagnostics (test url: {test_url})\n{report}")
        }
    }
}

#[cfg(test)]
mod tests {
    use launch_startup::LaunchDecision;

    use super::describe_decision;

    #[test]
    fn unit_describe_decision_names_destination() {
        assert_eq!(
            describe_decision(&LaunchDecision::OpenWeb {
                url: "https://track.test?push_token=abc".to_string()
            }),
            "open web: https://track.test?push_token=abc"
        );
        assert_eq!(describe_decision(&LaunchDecision::LaunchGame), "launch game");
        assert!(describe_decision(&LaunchDecision::ShowDiagnostics {
            report: "==== [Startup Status] ====".to_string(),
            test_url: "https://qa.test".to_string(),
        })
        .contains("test url: https://qa.test"));
    }
}
