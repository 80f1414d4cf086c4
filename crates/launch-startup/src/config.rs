use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use launch_net::{HttpRetryConfig, ProbeConfig};
use serde::{Deserialize, Serialize};

use crate::capabilities::{Capability, CapabilitySet};
use crate::subsystems::SubsystemKind;
use crate::tracking_url::QueryKeyScheme;

const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DISPATCHER_TICK_MS: u64 = 16;
const DEFAULT_DEEP_LINK_PREFIX: &str = "myapp://";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Which optional subsystems take part in startup.
pub struct SubsystemToggles {
    pub install_referrer: bool,
    pub push: bool,
    pub facebook_deep_link: bool,
    pub appsflyer: bool,
    pub advertising_id: bool,
}

impl SubsystemToggles {
    pub fn deep_link_enabled(&self) -> bool {
        self.facebook_deep_link || self.appsflyer
    }

    /// Capabilities that must report before startup is ready.
    pub fn expected_capabilities(&self) -> CapabilitySet {
        let mut expected = CapabilitySet::empty();
        if self.install_referrer {
            expected.insert(Capability::InstallReferrer);
        }
        if self.push {
            expected.insert(Capability::Push);
        }
        if self.deep_link_enabled() {
            expected.insert(Capability::DeepLink);
        }
        if self.advertising_id {
            expected.insert(Capability::AdId);
        }
        expected
    }

    pub fn enabled_kinds(&self) -> Vec<SubsystemKind> {
        [
            (self.install_referrer, SubsystemKind::InstallReferrer),
            (self.push, SubsystemKind::Push),
            (self.facebook_deep_link, SubsystemKind::FacebookDeepLink),
            (self.appsflyer, SubsystemKind::AppsFlyer),
            (self.advertising_id, SubsystemKind::AdvertisingId),
        ]
        .into_iter()
        .filter_map(|(enabled, kind)| enabled.then_some(kind))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Public struct `ServicesConfig` used across launch components.
pub struct ServicesConfig {
    pub subsystems: SubsystemToggles,
    pub domain: String,
    pub query_keys: QueryKeyScheme,
    pub decode_install_referrer: bool,
    pub install_referrer_decode_url: String,
    pub facebook_credentials_url: String,
    pub deep_link_prefix: String,
    pub startup_timeout_ms: u64,
    pub dispatcher_tick_ms: u64,
    pub show_loading_state: bool,
    pub is_test: bool,
    pub run_game: bool,
    pub test_url: String,
    pub http: HttpRetryConfig,
    pub connectivity: ProbeConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            subsystems: SubsystemToggles::default(),
            domain: String::new(),
            query_keys: QueryKeyScheme::default(),
            decode_install_referrer: false,
            install_referrer_decode_url: String::new(),
            facebook_credentials_url: String::new(),
            deep_link_prefix: DEFAULT_DEEP_LINK_PREFIX.to_string(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            dispatcher_tick_ms: DEFAULT_DISPATCHER_TICK_MS,
            show_loading_state: false,
            is_test: false,
            run_game: false,
            test_url: String::new(),
            http: HttpRetryConfig::default(),
            connectivity: ProbeConfig::default(),
        }
    }
}

impl ServicesConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn dispatcher_tick(&self) -> Duration {
        Duration::from_millis(self.dispatcher_tick_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            bail!("domain cannot be empty");
        }
        if self.startup_timeout_ms == 0 {
            bail!("startup_timeout_ms must be greater than 0");
        }
        if self.http.max_attempts == 0 {
            bail!("http.max_attempts must be at least 1");
        }
        if self.connectivity.max_concurrent_probes == 0 {
            bail!("connectivity.max_concurrent_probes must be at least 1");
        }
        if self.connectivity.primary_endpoints.is_empty()
            && self.connectivity.fallback_endpoints.is_empty()
        {
            bail!("connectivity requires at least one probe endpoint");
        }
        if self.subsystems.install_referrer
            && self.decode_install_referrer
            && self.install_referrer_decode_url.trim().is_empty()
        {
            bail!("install_referrer_decode_url is required when decode_install_referrer is set");
        }
        if let Err(message) = self.query_keys.validate() {
            bail!("invalid query_keys: {message}");
        }
        Ok(())
    }
}

/// Loads and validates a JSON services config.
pub fn load_services_config(path: &Path) -> Result<ServicesConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read services config '{}'", path.display()))?;
    let config = serde_json::from_str::<ServicesConfig>(&raw)
        .with_context(|| format!("failed to parse services config '{}'", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid services config '{}'", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{load_services_config, ServicesConfig, SubsystemToggles};
    use crate::capabilities::Capability;
    use crate::subsystems::SubsystemKind;

    #[test]
    fn unit_expected_capabilities_follow_toggles() {
        let toggles = SubsystemToggles {
            push: true,
            appsflyer: true,
            ..SubsystemToggles::default()
        };
        let expected = toggles.expected_capabilities();
        assert!(expected.contains(Capability::Push));
        assert!(expected.contains(Capability::DeepLink));
        assert!(!expected.contains(Capability::InstallReferrer));
        assert!(!expected.contains(Capability::AdId));
        assert_eq!(
            toggles.enabled_kinds(),
            vec![SubsystemKind::Push, SubsystemKind::AppsFlyer]
        );
    }

    #[test]
    fn unit_no_toggles_expects_nothing() {
        assert!(SubsystemToggles::default().expected_capabilities().is_empty());
    }

    #[test]
    fn functional_load_services_config_applies_defaults() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("services.json");
        std::fs::write(
            &path,
            r#"{"domain":"https://track.test","subsystems":{"push":true},"query_keys":{"push_token":"pt"}}"#,
        )
        .expect("write config");

        let config = load_services_config(&path).expect("load config");
        assert_eq!(config.domain, "https://track.test");
        assert!(config.subsystems.push);
        assert_eq!(config.query_keys.push_token, "pt");
        assert_eq!(config.query_keys.sub_id_1, "sub_id_1");
        assert_eq!(config.startup_timeout_ms, 10_000);
        assert_eq!(config.http.max_attempts, 3);
        assert_eq!(config.deep_link_prefix, "myapp://");
    }

    #[test]
    fn regression_validate_rejects_missing_decode_url() {
        let config = ServicesConfig {
            domain: "https://track.test".to_string(),
            decode_install_referrer: true,
            subsystems: SubsystemToggles {
                install_referrer: true,
                ..SubsystemToggles::default()
            },
            ..ServicesConfig::default()
        };
        let error = config.validate().expect_err("decode url required");
        assert!(error.to_string().contains("install_referrer_decode_url"));
    }

    #[test]
    fn regression_load_reports_path_on_parse_error() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("broken.json");
        std::fs::write(&path, "{").expect("write config");
        let error = load_services_config(&path).expect_err("parse must fail");
        assert!(error.to_string().contains("failed to parse services config"));
    }
}
