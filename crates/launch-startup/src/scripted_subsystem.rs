use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::referrer::FacebookCredentials;
use crate::subsystems::{
    Subscription, SubsystemAdapter, SubsystemEvent, SubsystemEventSink, SubsystemKind,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `ScriptStep` used across launch components.
pub struct ScriptStep {
    #[serde(default)]
    pub delay_ms: u64,
    pub event: SubsystemEvent,
}

/// Adapter that replays a fixed script of events from a background thread
/// once initialized. Tests can also push events directly with [`emit_now`].
///
/// [`emit_now`]: ScriptedSubsystem::emit_now
pub struct ScriptedSubsystem {
    kind: SubsystemKind,
    script: Vec<ScriptStep>,
    sink: Rc<RefCell<Option<SubsystemEventSink>>>,
    initialize_calls: Cell<usize>,
    credentials: RefCell<Option<FacebookCredentials>>,
}

impl std::fmt::Debug for ScriptedSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSubsystem")
            .field("kind", &self.kind)
            .field("steps", &self.script.len())
            .field("initialize_calls", &self.initialize_calls.get())
            .finish()
    }
}

impl ScriptedSubsystem {
    pub fn new(kind: SubsystemKind, script: Vec<ScriptStep>) -> Self {
        Self {
            kind,
            script,
            sink: Rc::new(RefCell::new(None)),
            initialize_calls: Cell::new(0),
            credentials: RefCell::new(None),
        }
    }

    /// An adapter that never reports on its own.
    pub fn silent(kind: SubsystemKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.get()
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.borrow().is_some()
    }

    pub fn credentials(&self) -> Option<FacebookCredentials> {
        self.credentials.borrow().clone()
    }

    /// Reports `event` through the current subscription. Returns false when
    /// nobody is subscribed or the receiver is gone.
    pub fn emit_now(&self, event: SubsystemEvent) -> bool {
        let Some(sink) = self.sink.borrow().clone() else {
            tracing::debug!(kind = %self.kind, "scripted subsystem has no subscriber");
            return false;
        };
        match sink.emit(event) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(kind = %self.kind, error = %error, "scripted event was not delivered");
                false
            }
        }
    }
}

impl SubsystemAdapter for ScriptedSubsystem {
    fn kind(&self) -> SubsystemKind {
        self.kind
    }

    fn initialize(&self) {
        self.initialize_calls.set(self.initialize_calls.get() + 1);
        if self.script.is_empty() {
            return;
        }
        let Some(sink) = self.sink.borrow().clone() else {
            tracing::warn!(kind = %self.kind, "scripted subsystem initialized without a subscriber");
            return;
        };
        let script = self.script.clone();
        let kind = self.kind;
        let spawned = thread::Builder::new()
            .name(format!("scripted-{kind}"))
            .spawn(move || {
                for step in script {
                    if step.delay_ms > 0 {
                        thread::sleep(Duration::from_millis(step.delay_ms));
                    }
                    if let Err(error) = sink.emit(step.event) {
                        tracing::debug!(%kind, error = %error, "stopping scripted subsystem");
                        break;
                    }
                }
            });
        if let Err(error) = spawned {
            tracing::warn!(%kind, error = %error, "failed to start scripted subsystem thread");
        }
    }

    fn subscribe(&self, sink: SubsystemEventSink) -> Subscription {
        *self.sink.borrow_mut() = Some(sink);
        let slot = Rc::clone(&self.sink);
        Subscription::new(move || {
            slot.borrow_mut().take();
        })
    }

    fn apply_credentials(&self, credentials: &FacebookCredentials) {
        *self.credentials.borrow_mut() = Some(credentials.clone());
    }
}
