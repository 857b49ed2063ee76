//! CloudFormation template document.
//!
//! Resources are kept in a `BTreeMap` keyed by logical id so the rendered
//! document is byte-for-byte stable across runs. Creation order follows the
//! `DependsOn` graph; teardown is its exact reverse.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Template format version emitted in every document.
pub const FORMAT_VERSION: &str = "2010-09-09";

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    /// Resource type, e.g. `AWS::CodeBuild::Project`.
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(rename = "Properties")]
    pub properties: Value,
    /// Logical ids that must exist before this resource is created.
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    /// Creates a resource with no dependencies.
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
        }
    }

    /// Adds a dependency on another logical id.
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        if !self.depends_on.contains(&logical_id) {
            self.depends_on.push(logical_id);
        }
        self
    }

    /// Adds a dependency only when `logical_id` is present.
    pub fn depends_on_opt(self, logical_id: Option<&str>) -> Self {
        match logical_id {
            Some(id) => self.depends_on(id),
            None => self,
        }
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

/// A complete template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    description: String,
    resources: BTreeMap<String, Resource>,
    outputs: BTreeMap<String, Output>,
}

impl Template {
    /// Creates an empty template.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Adds a resource; logical ids must be unique.
    pub fn add(&mut self, logical_id: impl Into<String>, resource: Resource) -> Result<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(Error::Synthesis(format!(
                "duplicate logical id '{}'",
                logical_id
            )));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Adds an output.
    pub fn add_output(&mut self, name: impl Into<String>, description: &str, value: Value) {
        self.outputs.insert(
            name.into(),
            Output {
                description: description.to_string(),
                value,
            },
        );
    }

    /// Returns a resource by logical id.
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Iterates over all resources.
    pub fn resources(&self) -> impl Iterator<Item = (&String, &Resource)> {
        self.resources.iter()
    }

    /// Logical ids of every resource of the given type.
    pub fn logical_ids_of_type(&self, resource_type: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the template declares no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Order in which the provisioning engine may create resources.
    ///
    /// Ties are broken by logical id so the order is deterministic.
    pub fn creation_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (id, resource) in &self.resources {
            let mut deps = BTreeSet::new();
            for dep in &resource.depends_on {
                if !self.resources.contains_key(dep) {
                    return Err(Error::Synthesis(format!(
                        "'{}' depends on unknown resource '{}'",
                        id, dep
                    )));
                }
                deps.insert(dep.as_str());
            }
            remaining.insert(id.as_str(), deps);
        }

        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.keys().copied().collect();
                return Err(Error::Synthesis(format!(
                    "dependency cycle among: {}",
                    stuck.join(", ")
                )));
            }

            for id in ready {
                remaining.remove(id);
                for deps in remaining.values_mut() {
                    deps.remove(id);
                }
                order.push(id.to_string());
            }
        }

        Ok(order)
    }

    /// Order in which resources are deleted: the reverse of creation.
    pub fn teardown_order(&self) -> Result<Vec<String>> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Renders the template document.
    pub fn to_json(&self) -> Value {
        let mut doc = json!({
            "AWSTemplateFormatVersion": FORMAT_VERSION,
            "Description": self.description,
            "Resources": self.resources,
        });
        if !self.outputs.is_empty() {
            doc["Outputs"] = json!(self.outputs);
        }
        doc
    }

    /// Renders the template document as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Ref": logical_id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}
