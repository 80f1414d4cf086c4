use std::fmt;

use launch_core::current_unix_timestamp_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates named startup milestones.
pub enum StartupState {
    NotStarted,
    Initializing,
    LoadFromSave,
    InstallReferrerInitialize,
    InstallReferrerSuccess,
    InstallReferrerFailure,
    FacebookCredentialsRequest,
    FacebookInitialize,
    DeepLinkSuccess,
    DeepLinkFailure,
    AppsFlyerInitialize,
    CampaignSuccess,
    CampaignFailure,
    PushInitialize,
    PushSuccess,
    PushFailure,
    AdIdInitialize,
    AdIdSuccess,
    AdIdFailure,
    PostInitializing,
    ServicesReady,
    TimedOut,
    Ready,
    OpenDestination,
}

impl StartupState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Initializing => "Initializing",
            Self::LoadFromSave => "LoadFromSave",
            Self::InstallReferrerInitialize => "InstallReferrerInitialize",
            Self::InstallReferrerSuccess => "InstallReferrerSuccess",
            Self::InstallReferrerFailure => "InstallReferrerFailure",
            Self::FacebookCredentialsRequest => "FacebookCredentialsRequest",
            Self::FacebookInitialize => "FacebookInitialize",
            Self::DeepLinkSuccess => "DeepLinkSuccess",
            Self::DeepLinkFailure => "DeepLinkFailure",
            Self::AppsFlyerInitialize => "AppsFlyerInitialize",
            Self::CampaignSuccess => "CampaignSuccess",
            Self::CampaignFailure => "CampaignFailure",
            Self::PushInitialize => "PushInitialize",
            Self::PushSuccess => "PushSuccess",
            Self::PushFailure => "PushFailure",
            Self::AdIdInitialize => "AdIdInitialize",
            Self::AdIdSuccess => "AdIdSuccess",
            Self::AdIdFailure => "AdIdFailure",
            Self::PostInitializing => "PostInitializing",
            Self::ServicesReady => "ServicesReady",
            Self::TimedOut => "TimedOut",
            Self::Ready => "Ready",
            Self::OpenDestination => "OpenDestination",
        }
    }
}

impl fmt::Display for StartupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Public struct `StateEntry` used across launch components.
pub struct StateEntry {
    pub state: StartupState,
    pub unix_ms: u64,
}

/// Append-only milestone log. Each state is recorded at most once.
#[derive(Debug, Clone, Default)]
pub struct StartupStateLog {
    entries: Vec<StateEntry>,
}

impl StartupStateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> StartupState {
        self.entries
            .last()
            .map(|entry| entry.state)
            .unwrap_or(StartupState::NotStarted)
    }

    /// Appends `state`; returns false when it was already logged.
    pub fn record(&mut self, state: StartupState) -> bool {
        if state == StartupState::NotStarted || self.contains(state) {
            return false;
        }
        self.entries.push(StateEntry {
            state,
            unix_ms: current_unix_timestamp_ms(),
        });
        true
    }

    pub fn contains(&self, state: StartupState) -> bool {
        self.position(state).is_some()
    }

    pub fn position(&self, state: StartupState) -> Option<usize> {
        self.entries.iter().position(|entry| entry.state == state)
    }

    pub fn entries(&self) -> &[StateEntry] {
        &self.entries
    }

    pub fn states(&self) -> Vec<StartupState> {
        self.entries.iter().map(|entry| entry.state).collect()
    }

    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.state.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
