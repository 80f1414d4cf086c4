use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use launch_dispatch::{DispatchError, TypedInvoker};
use serde::{Deserialize, Serialize};

use crate::referrer::FacebookCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates the optional attribution subsystems.
pub enum SubsystemKind {
    InstallReferrer,
    Push,
    FacebookDeepLink,
    AppsFlyer,
    AdvertisingId,
}

impl SubsystemKind {
    pub const ALL: [SubsystemKind; 5] = [
        SubsystemKind::InstallReferrer,
        SubsystemKind::Push,
        SubsystemKind::FacebookDeepLink,
        SubsystemKind::AppsFlyer,
        SubsystemKind::AdvertisingId,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name.trim())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstallReferrer => "install_referrer",
            Self::Push => "push",
            Self::FacebookDeepLink => "facebook_deep_link",
            Self::AppsFlyer => "appsflyer",
            Self::AdvertisingId => "advertising_id",
        }
    }
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Completion events reported by subsystem adapters, from any thread.
pub enum SubsystemEvent {
    ReferrerReceived {
        raw: String,
    },
    ReferrerParsed {
        params: BTreeMap<String, String>,
    },
    ReferrerFailed {
        code: i32,
        message: String,
    },
    PushTokenReceived {
        token: String,
    },
    PushTokenFailed {
        error: String,
    },
    DeepLinkReceived {
        link: String,
    },
    DeepLinkFailed {
        error: String,
    },
    CampaignReceived {
        campaign: String,
        #[serde(default)]
        device_id: Option<String>,
    },
    CampaignFailed {
        raw: String,
    },
    AdvertisingIdReceived {
        id: String,
    },
}

impl SubsystemEvent {
    pub fn source(&self) -> SubsystemKind {
        match self {
            Self::ReferrerReceived { .. }
            | Self::ReferrerParsed { .. }
            | Self::ReferrerFailed { .. } => SubsystemKind::InstallReferrer,
            Self::PushTokenReceived { .. } | Self::PushTokenFailed { .. } => SubsystemKind::Push,
            Self::DeepLinkReceived { .. } | Self::DeepLinkFailed { .. } => {
                SubsystemKind::FacebookDeepLink
            }
            Self::CampaignReceived { .. } | Self::CampaignFailed { .. } => SubsystemKind::AppsFlyer,
            Self::AdvertisingIdReceived { .. } => SubsystemKind::AdvertisingId,
        }
    }
}

/// Thread-safe channel an adapter reports its events through. Events are
/// marshalled onto the main thread before the orchestrator sees them.
#[derive(Debug, Clone)]
pub struct SubsystemEventSink {
    invoker: TypedInvoker<SubsystemEvent, ()>,
}

impl SubsystemEventSink {
    pub fn new(invoker: TypedInvoker<SubsystemEvent, ()>) -> Self {
        Self { invoker }
    }

    /// Fails once the receiving orchestrator has been dropped.
    pub fn emit(&self, event: SubsystemEvent) -> Result<(), DispatchError> {
        self.invoker.invoke(event)
    }
}

/// Releases an adapter subscription when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// Trait contract for an external attribution subsystem.
pub trait SubsystemAdapter {
    fn kind(&self) -> SubsystemKind;

    /// Starts the subsystem. Results arrive later through the subscribed sink.
    fn initialize(&self);

    fn subscribe(&self, sink: SubsystemEventSink) -> Subscription;

    /// Receives fetched credentials before `initialize` (deep-link adapters).
    fn apply_credentials(&self, _credentials: &FacebookCredentials) {}
}

/// Adapters available to the orchestrator, keyed by kind.
#[derive(Clone, Default)]
pub struct SubsystemRegistry {
    adapters: BTreeMap<SubsystemKind, Rc<dyn SubsystemAdapter>>,
}

impl fmt::Debug for SubsystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemRegistry")
            .field("kinds", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Rc<dyn SubsystemAdapter>) -> Option<Rc<dyn SubsystemAdapter>> {
        self.adapters.insert(adapter.kind(), adapter)
    }

    pub fn with(mut self, adapter: Rc<dyn SubsystemAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: SubsystemKind) -> Option<Rc<dyn SubsystemAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<SubsystemKind> {
        self.adapters.keys().copied().collect()
    }
}
