use std::sync::Arc;

use launch_core::KeyValueStore;
use launch_net::ConnectivityProber;

use crate::error::StartupError;
use crate::orchestrator::{FinalizeOutcome, StartupOrchestrator};
use crate::persistence::LaunchStateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where the application goes once startup finished.
pub enum LaunchDecision {
    Offline,
    OpenWeb { url: String },
    LaunchGame,
    ShowDiagnostics { report: String, test_url: String },
}

/// Application entry: connectivity gate, startup orchestration and the
/// final routing decision.
pub struct AppStartup {
    orchestrator: StartupOrchestrator,
    prober: Option<ConnectivityProber>,
    launch_state: LaunchStateStore,
}

impl std::fmt::Debug for AppStartup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStartup")
            .field("orchestrator", &self.orchestrator)
            .field("checks_connectivity", &self.prober.is_some())
            .finish()
    }
}

impl AppStartup {
    /// `prober` is optional; without one the connectivity gate is skipped.
    pub fn new(
        orchestrator: StartupOrchestrator,
        prober: Option<ConnectivityProber>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            orchestrator,
            prober,
            launch_state: LaunchStateStore::new(store),
        }
    }

    pub fn orchestrator(&self) -> &StartupOrchestrator {
        &self.orchestrator
    }

    pub async fn launch(&self) -> Result<LaunchDecision, StartupError> {
        if let Some(prober) = &self.prober {
            let timeout = prober.config().overall_timeout();
            if !prober.check_connectivity(timeout).await {
                tracing::warn!("no internet connection, launch stopped");
                return Ok(LaunchDecision::Offline);
            }
        }

        self.orchestrator.initialize_services();
        let reason = self.orchestrator.wait_ready().await;
        tracing::debug!(reason = ?reason, "startup signalled ready");

        let startup = match self.orchestrator.finalize() {
            FinalizeOutcome::Finalized(startup) => startup,
            FinalizeOutcome::NotReady => return Err(StartupError::NotReady),
            FinalizeOutcome::AlreadyFinalized => return Err(StartupError::AlreadyFinalized),
        };

        if startup.first_run {
            self.launch_state
                .save_url(&startup.url)
                .map_err(StartupError::Persistence)?;
            self.launch_state
                .save_first_run(false)
                .map_err(StartupError::Persistence)?;
        }

        let config = self.orchestrator.config();
        let decision = if config.is_test {
            if config.run_game {
                LaunchDecision::LaunchGame
            } else {
                LaunchDecision::ShowDiagnostics {
                    report: self.orchestrator.show_diagnostics(),
                    test_url: config.test_url.clone(),
                }
            }
        } else if !startup.first_run && startup.open_game {
            LaunchDecision::LaunchGame
        } else {
            LaunchDecision::OpenWeb { url: startup.url }
        };
        self.orchestrator.mark_destination_opened();
        tracing::info!(decision = ?decision, first_run = startup.first_run, "launch decided");
        Ok(decision)
    }

    /// The web view was closed by the user; future launches go to the game.
    pub fn on_web_view_closed(&self) -> Result<LaunchDecision, StartupError> {
        self.launch_state
            .save_open_game(true)
            .map_err(StartupError::Persistence)?;
        Ok(LaunchDecision::LaunchGame)
    }
}
