use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use launch_dispatch::DispatcherHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;

const DEFAULT_PRIMARY_ENDPOINTS: [&str; 3] = [
    "https://1.1.1.1",
    "https://8.8.8.8",
    "https://208.67.222.222",
];
const DEFAULT_FALLBACK_ENDPOINTS: [&str; 3] = [
    "https://www.google.com/generate_204",
    "https://www.cloudflare.com",
    "https://httpbin.org/status/200",
];
const DEFAULT_FAST_PROBE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 2;
const DEFAULT_STAGGER_DELAY_MS: u64 = 3_000;
const DEFAULT_OVERALL_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Public struct `ProbeConfig` used across launch components.
pub struct ProbeConfig {
    pub primary_endpoints: Vec<String>,
    pub fallback_endpoints: Vec<String>,
    pub fast_probe_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_concurrent_probes: usize,
    pub stagger_delay_ms: u64,
    pub overall_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            primary_endpoints: DEFAULT_PRIMARY_ENDPOINTS.map(str::to_string).to_vec(),
            fallback_endpoints: DEFAULT_FALLBACK_ENDPOINTS.map(str::to_string).to_vec(),
            fast_probe_timeout_ms: DEFAULT_FAST_PROBE_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            stagger_delay_ms: DEFAULT_STAGGER_DELAY_MS,
            overall_timeout_ms: DEFAULT_OVERALL_TIMEOUT_MS,
        }
    }
}

impl ProbeConfig {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }

    fn concurrency(&self) -> usize {
        self.max_concurrent_probes.max(1)
    }
}

/// Trait contract for a single reachability check against one endpoint.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool;
}

#[derive(Debug, Clone)]
/// Issues a `HEAD` request; any status below 400 counts as reachable.
pub struct HttpHeadProbe {
    client: reqwest::Client,
}

impl HttpHeadProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpHeadProbe {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool {
        match self.client.head(endpoint).timeout(timeout).send().await {
            Ok(response) => {
                let reachable = response.status().as_u16() < 400;
                tracing::debug!(endpoint, status = response.status().as_u16(), reachable, "probe finished");
                reachable
            }
            Err(error) => {
                tracing::debug!(endpoint, error = %error, "probe failed");
                false
            }
        }
    }
}

/// Two-phase internet reachability check.
///
/// Phase one races a small set of primary endpoints with a short timeout;
/// phase two races every endpoint under a concurrency limit. The first success
/// ends the check and aborts every other probe.
#[derive(Clone)]
pub struct ConnectivityProber {
    probe: Arc<dyn ReachabilityProbe>,
    config: ProbeConfig,
}

impl std::fmt::Debug for ConnectivityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityProber")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectivityProber {
    pub fn new(config: ProbeConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_probe(config, Arc::new(HttpHeadProbe::new()?)))
    }

    pub fn with_probe(config: ProbeConfig, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { probe, config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Runs both phases within `timeout`. Returns false when every probe failed
    /// or the deadline passed; in-flight probes never outlive the call.
    pub async fn check_connectivity(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.run_phases()).await {
            Ok(connected) => {
                tracing::debug!(connected, "connectivity check finished");
                connected
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = launch_core::duration_to_millis(timeout),
                    "connectivity check timed out"
                );
                false
            }
        }
    }

    /// Runs the check on the current Tokio runtime and hands the result to
    /// `on_result` on the dispatcher's main thread.
    pub fn check_connectivity_on_main<F>(
        &self,
        timeout: Duration,
        dispatcher: DispatcherHandle,
        on_result: F,
    ) -> Result<JoinHandle<()>, tokio::runtime::TryCurrentError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()?;
        let prober = self.clone();
        Ok(runtime.spawn(async move {
            let connected = prober.check_connectivity(timeout).await;
            if let Err(error) = dispatcher.enqueue(move || on_result(connected)) {
                tracing::warn!(error = %error, "dropping connectivity result");
            }
        }))
    }

    async fn run_phases(&self) -> bool {
        if self.quick_phase().await {
            return true;
        }
        tracing::debug!("quick connectivity phase failed; probing all endpoints");
        self.comprehensive_phase().await
    }

    async fn quick_phase(&self) -> bool {
        let count = self.config.concurrency().min(self.config.primary_endpoints.len());
        let timeout = Duration::from_millis(self.config.fast_probe_timeout_ms);
        let stagger = self.config.stagger_delay();
        let mut probes = JoinSet::new();
        for (index, endpoint) in self.config.primary_endpoints.iter().take(count).enumerate() {
            let probe = Arc::clone(&self.probe);
            let endpoint = endpoint.clone();
            let start_delay = stagger.saturating_mul(index as u32);
            probes.spawn(async move {
                if !start_delay.is_zero() {
                    sleep(start_delay).await;
                }
                probe.probe(&endpoint, timeout).await
            });
        }
        first_success(probes).await
    }

    async fn comprehensive_phase(&self) -> bool {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let stagger = self.config.stagger_delay();
        let limiter = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut probes = JoinSet::new();
        let endpoints = self
            .config
            .primary_endpoints
            .iter()
            .chain(self.config.fallback_endpoints.iter());
        for (index, endpoint) in endpoints.enumerate() {
            let probe = Arc::clone(&self.probe);
            let limiter = Arc::clone(&limiter);
            let endpoint = endpoint.clone();
            let start_delay = stagger.saturating_mul(index as u32);
            probes.spawn(async move {
                if !start_delay.is_zero() {
                    sleep(start_delay).await;
                }
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return false;
                };
                probe.probe(&endpoint, timeout).await
            });
        }
        first_success(probes).await
    }
}

async fn first_success(mut probes: JoinSet<bool>) -> bool {
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(true) => {
                probes.abort_all();
                return true;
            }
            Ok(false) => {}
            Err(error) => tracing::warn!(error = %error, "connectivity probe task failed"),
        }
    }
    false
}
