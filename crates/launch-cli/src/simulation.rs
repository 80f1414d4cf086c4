use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use launch_startup::{ScriptStep, ScriptedSubsystem, SubsystemKind, SubsystemRegistry, SubsystemToggles};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Scripted subsystem events keyed by subsystem name.
pub(crate) struct SimulationScript {
    pub(crate) subsystems: BTreeMap<String, Vec<ScriptStep>>,
}

impl SimulationScript {
    /// Builds one adapter per enabled subsystem. Subsystems without a script
    /// stay silent.
    pub(crate) fn registry(&self, toggles: &SubsystemToggles) -> Result<SubsystemRegistry> {
        let mut scripts = BTreeMap::new();
        for (name, steps) in &self.subsystems {
            let Some(kind) = SubsystemKind::parse(name) else {
                bail!("unknown subsystem '{name}' in simulation script");
            };
            if let Some(step) = steps.iter().find(|step| step.event.source() != kind) {
                bail!(
                    "simulation step for '{name}' carries an event from '{}'",
                    step.event.source()
                );
            }
            scripts.insert(kind, steps.clone());
        }

        let mut registry = SubsystemRegistry::new();
        for kind in toggles.enabled_kinds() {
            let steps = scripts.remove(&kind).unwrap_or_default();
            if steps.is_empty() {
                tracing::warn!(subsystem = %kind, "no simulated events, subsystem will stay silent");
            }
            registry.register(Rc::new(ScriptedSubsystem::new(kind, steps)));
        }
        for kind in scripts.keys() {
            tracing::debug!(subsystem = %kind, "ignoring script for disabled subsystem");
        }
        Ok(registry)
    }
}

pub(crate) fn load_simulation(path: &Path) -> Result<SimulationScript> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read simulation script '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse simulation script '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use launch_startup::{SubsystemKind, SubsystemToggles};

    use super::{load_simulation, SimulationScript};

    #[test]
    fn functional_simulation_builds_adapters_for_enabled_subsystems() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("simulation.json");
        std::fs::write(
            &path,
            r#"{"subsystems":{"push":[{"delay_ms":5,"event":{"kind":"push_token_received","token":"abc"}}]}}"#,
        )
        .expect("write script");

        let script = load_simulation(&path).expect("load script");
        let registry = script
            .registry(&SubsystemToggles {
                push: true,
                advertising_id: true,
                ..SubsystemToggles::default()
            })
            .expect("registry");
        assert_eq!(
            registry.kinds(),
            vec![SubsystemKind::Push, SubsystemKind::AdvertisingId]
        );
    }

    #[test]
    fn regression_simulation_rejects_mismatched_event_source() {
        let script: SimulationScript = serde_json::from_str(
            r#"{"subsystems":{"push":[{"event":{"kind":"advertising_id_received","id":"x"}}]}}"#,
        )
        .expect("parse script");
        let error = script
            .registry(&SubsystemToggles::default())
            .expect_err("mismatch must fail");
        assert!(error.to_string().contains("advertising_id"));
    }
}
