use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use launch_core::KeyValueStore;
use launch_dispatch::{Dispatcher, HandlerRegistration, LocalSpawner};
use launch_net::{HttpClientError, HttpRequestSpec, HttpSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::attribution::{AttributionField, AttributionRecord};
use crate::capabilities::{Capability, CapabilitySet};
use crate::config::ServicesConfig;
use crate::diagnostics::{render_diagnostics, DiagnosticsInput};
use crate::error::StartupError;
use crate::persistence::LaunchStateStore;
use crate::referrer::{
    parse_facebook_credentials, parse_referrer_response, strip_deep_link_prefix, UTM_CONTENT_KEY,
};
use crate::startup_state::{StartupState, StartupStateLog};
use crate::subsystems::{
    Subscription, SubsystemEvent, SubsystemEventSink, SubsystemKind, SubsystemRegistry,
};
use crate::tracking_url::build_tracking_url;

static NEXT_ORCHESTRATOR_ID: AtomicU64 = AtomicU64::new(1);
const EVENT_HANDLER_NAME: &str = "on_subsystem_event";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why the ready signal fired.
pub enum ReadyReason {
    ServicesReady,
    TimedOut,
    LoadedFromSave,
}

/// Main-thread observer of startup progress.
pub trait StartupListener {
    /// Only called when `show_loading_state` is enabled.
    fn on_state_changed(&self, _state: StartupState) {}
    fn on_ready(&self, _reason: ReadyReason) {}
    fn on_diagnostics(&self, _report: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `FinalStartup` used across launch components.
pub struct FinalStartup {
    pub url: String,
    pub reason: ReadyReason,
    pub first_run: bool,
    pub open_game: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `FinalizeOutcome` values.
pub enum FinalizeOutcome {
    Finalized(FinalStartup),
    NotReady,
    AlreadyFinalized,
}

/// Drives the optional subsystems, tracks which capabilities have reported
/// and fires the ready signal exactly once.
///
/// Lives on the dispatcher's thread. Adapters report through a registered
/// handler, so their callbacks may come from any thread.
pub struct StartupOrchestrator {
    shared: Rc<Shared>,
    _event_handler: HandlerRegistration<SubsystemEvent, ()>,
    _subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for StartupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupOrchestrator")
            .field("expected", &self.shared.expected)
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl StartupOrchestrator {
    pub fn new(
        config: ServicesConfig,
        adapters: &SubsystemRegistry,
        store: Arc<dyn KeyValueStore>,
        http: Arc<dyn HttpSender>,
        dispatcher: &Dispatcher,
    ) -> Result<Self, StartupError> {
        let enabled = config.subsystems.enabled_kinds();
        let mut active = SubsystemRegistry::new();
        for kind in &enabled {
            let adapter = adapters
                .get(*kind)
                .ok_or(StartupError::MissingAdapter(*kind))?;
            active.register(adapter);
        }

        let expected = config.subsystems.expected_capabilities();
        let (ready_tx, _) = watch::channel(None);
        let shared = Rc::new(Shared {
            expected,
            adapters: active,
            launch_state: LaunchStateStore::new(store),
            http,
            spawner: dispatcher.spawner(),
            listener: RefCell::new(None),
            ready_tx,
            state: RefCell::new(OrchestratorState::default()),
            config,
        });

        let target = format!(
            "startup_orchestrator#{}",
            NEXT_ORCHESTRATOR_ID.fetch_add(1, Ordering::Relaxed)
        );
        let weak = Rc::downgrade(&shared);
        let registration =
            dispatcher.register_handler(target, EVENT_HANDLER_NAME, move |event: SubsystemEvent| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_event(event);
                }
            })?;
        let sink = SubsystemEventSink::new(registration.invoker());
        let subscriptions = enabled
            .iter()
            .filter_map(|kind| shared.adapters.get(*kind))
            .map(|adapter| adapter.subscribe(sink.clone()))
            .collect();

        tracing::debug!(expected = %expected, "startup orchestrator created");
        Ok(Self {
            shared,
            _event_handler: registration,
            _subscriptions: subscriptions,
        })
    }

    pub fn set_listener(&self, listener: Rc<dyn StartupListener>) {
        *self.shared.listener.borrow_mut() = Some(listener);
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.shared.config
    }

    pub fn expected(&self) -> CapabilitySet {
        self.shared.expected
    }

    pub fn completed(&self) -> CapabilitySet {
        self.shared.state.borrow().completed
    }

    pub fn current_state(&self) -> StartupState {
        self.shared.state.borrow().log.current()
    }

    pub fn state_log(&self) -> StartupStateLog {
        self.shared.state.borrow().log.clone()
    }

    pub fn record(&self) -> AttributionRecord {
        self.shared.state.borrow().record.clone()
    }

    pub fn ready_reason(&self) -> Option<ReadyReason> {
        self.shared.state.borrow().ready
    }

    pub fn is_first_run(&self) -> bool {
        self.shared.state.borrow().first_run
    }

    /// Starts the enabled subsystems and the startup timer. Later calls are
    /// ignored.
    pub fn initialize_services(&self) {
        self.shared.initialize_services();
    }

    /// Timer expiry. Fires ready with [`ReadyReason::TimedOut`] unless ready
    /// already fired or services were never initialized.
    pub fn services_timed_out(&self, elapsed: Duration) {
        self.shared.services_timed_out(elapsed);
    }

    /// Resolves once the ready signal has fired.
    pub async fn wait_ready(&self) -> ReadyReason {
        let mut receiver = self.shared.ready_tx.subscribe();
        let reason = match receiver.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => {
                tracing::warn!("ready channel closed before startup converged");
                None
            }
        };
        reason.unwrap_or(ReadyReason::TimedOut)
    }

    /// Tracking URL for the attribution collected so far. A persisted URL
    /// always wins; after [`Self::finalize`] the frozen URL is returned.
    pub fn build_tracking_url(&self) -> String {
        let state = self.shared.state.borrow();
        match &state.final_url {
            Some(url) => url.clone(),
            None => self.shared.tracking_url(&state),
        }
    }

    /// Cancels the timer, logs `Ready` and freezes the tracking URL. Only the
    /// first call after ready fired produces a result.
    pub fn finalize(&self) -> FinalizeOutcome {
        self.shared.finalize()
    }

    pub fn mark_destination_opened(&self) {
        self.shared.transition(StartupState::OpenDestination);
    }

    pub fn diagnostics_report(&self) -> String {
        self.shared.diagnostics_report()
    }

    /// Renders the report and hands it to the listener.
    pub fn show_diagnostics(&self) -> String {
        let report = self.shared.diagnostics_report();
        self.shared.emit(vec![Signal::Diagnostics(report.clone())]);
        report
    }
}

struct Shared {
    config: ServicesConfig,
    expected: CapabilitySet,
    adapters: SubsystemRegistry,
    launch_state: LaunchStateStore,
    http: Arc<dyn HttpSender>,
    spawner: LocalSpawner,
    listener: RefCell<Option<Rc<dyn StartupListener>>>,
    ready_tx: watch::Sender<Option<ReadyReason>>,
    state: RefCell<OrchestratorState>,
}

#[derive(Default)]
struct OrchestratorState {
    log: StartupStateLog,
    record: AttributionRecord,
    completed: CapabilitySet,
    started: bool,
    first_run: bool,
    open_game: bool,
    post_initialized: bool,
    ready: Option<ReadyReason>,
    timed_out_after: Option<Duration>,
    timeout_task: Option<JoinHandle<()>>,
    final_url: Option<String>,
    finalized: bool,
    // States reported before initialization, logged right after `Initializing`.
    deferred_states: Vec<StartupState>,
}

// Listener calls are collected while the state is borrowed and delivered
// after the borrow ends, so listeners may query the orchestrator.
enum Signal {
    State(StartupState),
    Ready(ReadyReason),
    Diagnostics(String),
}

impl Shared {
    fn initialize_services(self: &Rc<Self>) {
        let mut signals = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            if state.started {
                tracing::debug!("startup services already initialized");
                return;
            }
            state.started = true;
            self.change_state(&mut state, StartupState::Initializing, &mut signals);
            for deferred in std::mem::take(&mut state.deferred_states) {
                self.change_state(&mut state, deferred, &mut signals);
            }
            state.first_run = self.launch_state.is_first_run();

            if !state.first_run {
                state.open_game = self.launch_state.load_open_game();
                tracing::info!(open_game = state.open_game, "returning launch, using saved state");
                self.change_state(&mut state, StartupState::LoadFromSave, &mut signals);
                self.mark_ready(&mut state, ReadyReason::LoadedFromSave, &mut signals);
                drop(state);
                self.emit(signals);
                return;
            }

            state.timeout_task = self.spawn_timeout();
            self.check_convergence(&mut state, &mut signals);
        }
        self.emit(signals);
        self.start_primary_subsystems();
    }

    fn start_primary_subsystems(self: &Rc<Self>) {
        let toggles = &self.config.subsystems;
        let mut any_primary = false;
        if toggles.facebook_deep_link {
            any_primary = true;
            if self.config.facebook_credentials_url.trim().is_empty() {
                self.initialize_adapter(
                    SubsystemKind::FacebookDeepLink,
                    StartupState::FacebookInitialize,
                );
            } else {
                self.fetch_facebook_credentials();
            }
        } else if toggles.appsflyer {
            any_primary = true;
            self.initialize_adapter(SubsystemKind::AppsFlyer, StartupState::AppsFlyerInitialize);
        }
        if toggles.install_referrer {
            any_primary = true;
            self.initialize_adapter(
                SubsystemKind::InstallReferrer,
                StartupState::InstallReferrerInitialize,
            );
        }
        if !any_primary {
            self.post_initialize();
        }
    }

    /// Starts push and advertising id after the first primary subsystem
    /// resolved. Runs at most once.
    fn post_initialize(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.post_initialized || !state.started {
                return;
            }
            state.post_initialized = true;
        }
        if self.config.subsystems.push {
            self.initialize_adapter(SubsystemKind::Push, StartupState::PushInitialize);
        }
        if self.config.subsystems.advertising_id {
            self.initialize_adapter(SubsystemKind::AdvertisingId, StartupState::AdIdInitialize);
        }
        self.transition(StartupState::PostInitializing);
    }

    fn initialize_adapter(&self, kind: SubsystemKind, initializing: StartupState) {
        self.transition(initializing);
        match self.adapters.get(kind) {
            Some(adapter) => {
                tracing::debug!(subsystem = %kind, "initializing subsystem");
                adapter.initialize();
            }
            None => tracing::warn!(subsystem = %kind, "no adapter for enabled subsystem"),
        }
    }

    fn fetch_facebook_credentials(self: &Rc<Self>) {
        self.transition(StartupState::FacebookCredentialsRequest);
        let request = HttpRequestSpec::get(self.config.facebook_credentials_url.clone());
        let http = Arc::clone(&self.http);
        let weak = Rc::downgrade(self);
        let spawned = self.spawner.spawn(async move {
            let response = http.send(request).await;
            if let Some(shared) = weak.upgrade() {
                shared.apply_facebook_credentials(response);
            }
        });
        if let Err(error) = spawned {
            tracing::warn!(error = %error, "could not schedule facebook credentials request");
            self.initialize_adapter(SubsystemKind::FacebookDeepLink, StartupState::FacebookInitialize);
        }
    }

    fn apply_facebook_credentials(&self, response: Result<String, HttpClientError>) {
        match response {
            Ok(body) => {
                let credentials = parse_facebook_credentials(&body);
                self.update_record(|record| {
                    record.set(AttributionField::FacebookCredentialsResponse, body);
                });
                match (credentials, self.adapters.get(SubsystemKind::FacebookDeepLink)) {
                    (Some(credentials), Some(adapter)) => adapter.apply_credentials(&credentials),
                    (None, _) => tracing::warn!("facebook credentials response was not usable"),
                    (Some(_), None) => {}
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "facebook credentials request failed");
                self.update_record(|record| {
                    record.set(AttributionField::FacebookCredentialsError, error.to_string());
                });
            }
        }
        self.initialize_adapter(SubsystemKind::FacebookDeepLink, StartupState::FacebookInitialize);
    }

    fn handle_event(self: &Rc<Self>, event: SubsystemEvent) {
        tracing::debug!(source = %event.source(), "subsystem event received");
        match event {
            SubsystemEvent::ReferrerReceived { raw } => self.update_record(|record| {
                record.set(AttributionField::ReferrerRaw, raw);
            }),
            SubsystemEvent::ReferrerParsed { params } => self.on_referrer_parsed(params),
            SubsystemEvent::ReferrerFailed { code, message } => self.on_referrer_failed(format!(
                "failed to get referrer data (error code: {code}, message: {message})"
            )),
            SubsystemEvent::PushTokenReceived { token } => {
                if token.trim().is_empty() {
                    self.complete(Capability::Push, StartupState::PushFailure, |record| {
                        record.set(AttributionField::PushTokenError, "empty push token");
                    });
                } else {
                    self.complete(Capability::Push, StartupState::PushSuccess, |record| {
                        record.set(AttributionField::PushToken, token);
                    });
                }
            }
            SubsystemEvent::PushTokenFailed { error } => {
                self.complete(Capability::Push, StartupState::PushFailure, |record| {
                    record.set(AttributionField::PushTokenError, error);
                });
            }
            SubsystemEvent::DeepLinkReceived { link } => {
                let link = strip_deep_link_prefix(&link, &self.config.deep_link_prefix);
                self.complete(Capability::DeepLink, StartupState::DeepLinkSuccess, |record| {
                    record.set(AttributionField::DeepLink, link);
                });
                self.post_initialize();
            }
            SubsystemEvent::DeepLinkFailed { error } => self.on_deep_link_failed(error),
            SubsystemEvent::CampaignReceived {
                campaign,
                device_id,
            } => {
                self.complete(Capability::DeepLink, StartupState::CampaignSuccess, |record| {
                    record.set(AttributionField::Campaign, campaign);
                    if let Some(device_id) = device_id {
                        record.set(AttributionField::DeviceId, device_id);
                    }
                });
                self.post_initialize();
            }
            SubsystemEvent::CampaignFailed { raw } => {
                self.complete(Capability::DeepLink, StartupState::CampaignFailure, |record| {
                    record.set(AttributionField::CampaignError, raw);
                });
                self.post_initialize();
            }
            SubsystemEvent::AdvertisingIdReceived { id } => {
                let outcome = if id.trim().is_empty() {
                    StartupState::AdIdFailure
                } else {
                    StartupState::AdIdSuccess
                };
                self.complete(Capability::AdId, outcome, |record| {
                    record.set(AttributionField::AdvertisingId, id);
                });
            }
        }
    }

    fn on_deep_link_failed(self: &Rc<Self>, error: String) {
        let chain_appsflyer = self.config.subsystems.appsflyer;
        let mut signals = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            state.record.set(AttributionField::DeepLinkError, error);
            self.change_state(&mut state, StartupState::DeepLinkFailure, &mut signals);
            if !chain_appsflyer {
                self.set_ready(&mut state, Capability::DeepLink, &mut signals);
            }
        }
        self.emit(signals);
        if chain_appsflyer {
            self.initialize_adapter(SubsystemKind::AppsFlyer, StartupState::AppsFlyerInitialize);
        } else {
            self.post_initialize();
        }
    }

    fn on_referrer_parsed(self: &Rc<Self>, params: BTreeMap<String, String>) {
        let utm_content = params.get(UTM_CONTENT_KEY).cloned().unwrap_or_default();
        if utm_content.trim().is_empty() {
            self.on_referrer_failed("install referrer carried no utm_content".to_string());
            return;
        }
        self.update_record(|record| {
            record.set(AttributionField::UtmContent, utm_content.clone());
        });
        if self.config.decode_install_referrer {
            self.decode_referrer(utm_content);
        } else {
            self.complete(Capability::InstallReferrer, StartupState::InstallReferrerSuccess, |_| {});
            self.post_initialize();
        }
    }

    fn decode_referrer(self: &Rc<Self>, utm_content: String) {
        let request =
            HttpRequestSpec::post_raw(self.config.install_referrer_decode_url.clone(), utm_content);
        let http = Arc::clone(&self.http);
        let weak = Rc::downgrade(self);
        let spawned = self.spawner.spawn(async move {
            let response = http.send(request).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_referrer_decoded(response);
            }
        });
        if let Err(error) = spawned {
            self.on_referrer_failed(format!("could not schedule referrer decode: {error}"));
        }
    }

    fn on_referrer_decoded(self: &Rc<Self>, response: Result<String, HttpClientError>) {
        let body = match response {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(error = %error, "install referrer decode failed");
                self.on_referrer_failed(error.to_string());
                return;
            }
        };
        let decoded = parse_referrer_response(&body);
        self.update_record(|record| {
            record.set(AttributionField::ReferrerResponse, body);
        });
        match decoded {
            Some(data) => {
                self.complete(
                    Capability::InstallReferrer,
                    StartupState::InstallReferrerSuccess,
                    |record| record.apply_referrer_data(&data),
                );
                self.post_initialize();
            }
            None => self.on_referrer_failed("referrer decode response carried no data".to_string()),
        }
    }

    fn on_referrer_failed(self: &Rc<Self>, message: String) {
        tracing::warn!(error = %message, "install referrer failed");
        self.complete(
            Capability::InstallReferrer,
            StartupState::InstallReferrerFailure,
            |record| {
                record.set(AttributionField::ReferrerError, message);
            },
        );
        self.post_initialize();
    }

    fn services_timed_out(&self, elapsed: Duration) {
        let mut signals = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            if !state.started || state.ready.is_some() {
                return;
            }
            tracing::warn!(
                elapsed_ms = launch_core::duration_to_millis(elapsed),
                completed = %state.completed,
                expected = %self.expected,
                "startup services timed out"
            );
            state.timed_out_after = Some(elapsed);
            state.timeout_task = None;
            self.change_state(&mut state, StartupState::TimedOut, &mut signals);
            self.mark_ready(&mut state, ReadyReason::TimedOut, &mut signals);
        }
        self.emit(signals);
    }

    fn spawn_timeout(self: &Rc<Self>) -> Option<JoinHandle<()>> {
        let timeout = self.config.startup_timeout();
        let weak = Rc::downgrade(self);
        match self.spawner.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.services_timed_out(timeout);
            }
        }) {
            Ok(task) => Some(task),
            Err(error) => {
                tracing::warn!(error = %error, "startup timer could not be scheduled");
                None
            }
        }
    }

    fn finalize(&self) -> FinalizeOutcome {
        let mut signals = Vec::new();
        let outcome = {
            let mut state = self.state.borrow_mut();
            if state.finalized {
                return FinalizeOutcome::AlreadyFinalized;
            }
            let Some(reason) = state.ready else {
                return FinalizeOutcome::NotReady;
            };
            state.finalized = true;
            if let Some(task) = state.timeout_task.take() {
                task.abort();
            }
            self.change_state(&mut state, StartupState::Ready, &mut signals);
            let url = self.tracking_url(&state);
            tracing::info!(url = %url, "tracking url resolved");
            state.final_url = Some(url.clone());
            FinalizeOutcome::Finalized(FinalStartup {
                url,
                reason,
                first_run: state.first_run,
                open_game: state.open_game,
            })
        };
        self.emit(signals);
        outcome
    }

    fn tracking_url(&self, state: &OrchestratorState) -> String {
        let saved = self.launch_state.load_url();
        if !saved.trim().is_empty() {
            return saved;
        }
        build_tracking_url(
            &self.config.domain,
            &state.record,
            &self.config.query_keys,
            self.config.decode_install_referrer,
        )
    }

    fn diagnostics_report(&self) -> String {
        let state = self.state.borrow();
        render_diagnostics(&DiagnosticsInput {
            log: &state.log,
            expected: self.expected,
            completed: state.completed,
            first_run: state.first_run,
            open_game: state.open_game,
            timed_out_after: state.timed_out_after,
            domain: &self.config.domain,
            final_url: state.final_url.as_deref(),
            toggles: &self.config.subsystems,
            decode_referrer: self.config.decode_install_referrer,
            record: &state.record,
        })
    }

    fn complete(
        &self,
        capability: Capability,
        outcome: StartupState,
        update: impl FnOnce(&mut AttributionRecord),
    ) {
        let mut signals = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            update(&mut state.record);
            self.change_state(&mut state, outcome, &mut signals);
            self.set_ready(&mut state, capability, &mut signals);
        }
        self.emit(signals);
    }

    fn set_ready(
        &self,
        state: &mut OrchestratorState,
        capability: Capability,
        signals: &mut Vec<Signal>,
    ) {
        if !self.expected.contains(capability) {
            tracing::debug!(capability = capability.as_str(), "ignoring unexpected capability");
            return;
        }
        if state.completed.insert(capability) {
            tracing::debug!(
                capability = capability.as_str(),
                completed = %state.completed,
                expected = %self.expected,
                "capability reported"
            );
        }
        self.check_convergence(state, signals);
    }

    // Convergence is only evaluated once initialization ran; results that
    // arrive earlier are kept and counted at that point.
    fn check_convergence(&self, state: &mut OrchestratorState, signals: &mut Vec<Signal>) {
        if state.started && state.ready.is_none() && state.completed == self.expected {
            self.change_state(state, StartupState::ServicesReady, signals);
            self.mark_ready(state, ReadyReason::ServicesReady, signals);
        }
    }

    fn mark_ready(
        &self,
        state: &mut OrchestratorState,
        reason: ReadyReason,
        signals: &mut Vec<Signal>,
    ) {
        if state.ready.is_some() {
            return;
        }
        state.ready = Some(reason);
        if let Some(task) = state.timeout_task.take() {
            task.abort();
        }
        self.ready_tx.send_replace(Some(reason));
        tracing::info!(reason = ?reason, completed = %state.completed, "startup ready");
        signals.push(Signal::Ready(reason));
    }

    fn change_state(
        &self,
        state: &mut OrchestratorState,
        next: StartupState,
        signals: &mut Vec<Signal>,
    ) {
        if !state.started {
            tracing::debug!(state = next.as_str(), "deferring state reported before initialization");
            if !state.deferred_states.contains(&next) {
                state.deferred_states.push(next);
            }
            return;
        }
        if state.log.record(next) {
            tracing::debug!(state = next.as_str(), "startup state changed");
            if self.config.show_loading_state {
                signals.push(Signal::State(next));
            }
        }
    }

    fn transition(&self, next: StartupState) {
        let mut signals = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            self.change_state(&mut state, next, &mut signals);
        }
        self.emit(signals);
    }

    fn update_record(&self, update: impl FnOnce(&mut AttributionRecord)) {
        update(&mut self.state.borrow_mut().record);
    }

    fn emit(&self, signals: Vec<Signal>) {
        if signals.is_empty() {
            return;
        }
        let Some(listener) = self.listener.borrow().clone() else {
            return;
        };
        for signal in signals {
            match signal {
                Signal::State(state) => listener.on_state_changed(state),
                Signal::Ready(reason) => listener.on_ready(reason),
                Signal::Diagnostics(report) => listener.on_diagnostics(&report),
            }
        }
    }
}
