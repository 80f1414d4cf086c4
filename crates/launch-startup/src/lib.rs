//! Startup orchestration for attribution-gated app launches.
//!
//! Starts the optional attribution subsystems, tracks which capabilities have
//! reported, fires a single ready signal (or times out), builds the tracking
//! URL and decides where the launch goes.

pub mod app_entry;
pub mod attribution;
pub mod capabilities;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod referrer;
pub mod scripted_subsystem;
pub mod startup_state;
pub mod subsystems;
pub mod tracking_url;

pub use app_entry::{AppStartup, LaunchDecision};
pub use attribution::{AttributionField, AttributionRecord};
pub use capabilities::{Capability, CapabilitySet};
pub use config::{load_services_config, ServicesConfig, SubsystemToggles};
pub use diagnostics::{render_diagnostics, DiagnosticsInput};
pub use error::StartupError;
pub use orchestrator::{
    FinalStartup, FinalizeOutcome, ReadyReason, StartupListener, StartupOrchestrator,
};
pub use persistence::{LaunchStateStore, OPEN_FIRST_TIME_KEY, OPEN_GAME_KEY, URL_KEY};
pub use referrer::{
    parse_facebook_credentials, parse_install_referrer, parse_referrer_response,
    strip_deep_link_prefix, FacebookCredentials, ReferrerData, UTM_CONTENT_KEY,
};
pub use scripted_subsystem::{ScriptStep, ScriptedSubsystem};
pub use startup_state::{StartupState, StartupStateLog, StateEntry};
pub use subsystems::{
    Subscription, SubsystemAdapter, SubsystemEvent, SubsystemEventSink, SubsystemKind,
    SubsystemRegistry,
};
pub use tracking_url::{build_tracking_url, QueryKeyScheme, TrackingParam};
