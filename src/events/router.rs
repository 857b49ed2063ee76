//! In-process evaluation of the synthesized rules against an event.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::{EventRule, TargetKind};
use crate::error::{Error, Result};

/// One delivery the bus would make for an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatch {
    pub rule: String,
    pub target_id: String,
    pub kind: TargetKind,
    pub arn: String,
    pub input: Value,
}

impl Dispatch {
    /// Environment overrides carried by a build dispatch, by name.
    pub fn environment_variables(&self) -> BTreeMap<String, String> {
        self.input
            .get("environmentVariablesOverride")
            .and_then(Value::as_array)
            .map(|overrides| {
                overrides
                    .iter()
                    .filter_map(|entry| {
                        let name = entry.get("name")?.as_str()?;
                        let value = entry.get("value")?.as_str()?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Evaluates events against a fixed rule set.
#[derive(Debug, Clone, Default)]
pub struct EventRouter {
    rules: Vec<EventRule>,
}

impl EventRouter {
    pub fn new(rules: Vec<EventRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[EventRule] {
        &self.rules
    }

    /// Every dispatch `event` produces. Order follows rule registration and
    /// carries no meaning.
    pub fn route(&self, event: &Value) -> Result<Vec<Dispatch>> {
        if !event.is_object() {
            return Err(Error::Event("event must be a JSON object".to_string()));
        }

        let mut dispatches = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.matches(event)) {
            for target in &rule.targets {
                let input = target.input.render(event).map_err(|e| {
                    Error::Event(format!("rule '{}' target '{}': {}", rule.name, target.id, e))
                })?;
                tracing::debug!(rule = %rule.name, target = %target.id, "event matched");
                dispatches.push(Dispatch {
                    rule: rule.name.clone(),
                    target_id: target.id.clone(),
                    kind: target.kind,
                    arn: target.arn.clone(),
                    input,
                });
            }
        }

        Ok(dispatches)
    }

    /// Dispatches of one kind.
    pub fn route_to(&self, event: &Value, kind: TargetKind) -> Result<Vec<Dispatch>> {
        Ok(self
            .route(event)?
            .into_iter()
            .filter(|dispatch| dispatch.kind == kind)
            .collect())
    }
}
