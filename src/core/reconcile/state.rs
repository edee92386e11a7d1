//! Materialized state
//!
//! One entry per logical name: the rendered config that was applied, its
//! fingerprint, the attributes the provisioner reported and the dependencies at the
//! time. Persisted as JSON.

use crate::core::resource::{RenderedResource, ResourceBody, ResourceKind};
use crate::core::template::Reference;
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Attributes reported by the provisioner
pub type Attributes = BTreeMap<String, String>;

/// A resource as it exists after materialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedResource {
    pub name: LogicalName,
    pub kind: ResourceKind,
    pub config: serde_json::Value,
    pub fingerprint: String,
    pub attributes: Attributes,
    #[serde(default)]
    pub dependencies: BTreeSet<LogicalName>,
}

impl MaterializedResource {
    pub fn new(
        rendered: RenderedResource,
        attributes: Attributes,
        dependencies: BTreeSet<LogicalName>,
    ) -> Self {
        MaterializedResource {
            name: rendered.name,
            kind: rendered.kind,
            config: rendered.config,
            fingerprint: rendered.fingerprint,
            attributes,
            dependencies,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The applied config decoded according to its kind
    pub fn body(&self) -> Result<ResourceBody> {
        ResourceBody::from_config(self.kind, self.config.clone())
    }
}

fn state_format() -> Version {
    Version::new(1, 0, 0)
}

/// Everything materialized so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default = "state_format")]
    format_version: Version,
    serial: u64,
    resources: BTreeMap<LogicalName, MaterializedResource>,
}

impl State {
    pub fn new() -> Self {
        State {
            format_version: state_format(),
            serial: 0,
            resources: BTreeMap::new(),
        }
    }

    /// Incremented on every apply that changed something
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn bump_serial(&mut self) {
        self.serial += 1;
    }

    pub fn get(&self, name: &LogicalName) -> Option<&MaterializedResource> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &LogicalName) -> bool {
        self.resources.contains_key(name)
    }

    pub(crate) fn insert(&mut self, resource: MaterializedResource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    pub(crate) fn remove(&mut self, name: &LogicalName) -> Option<MaterializedResource> {
        self.resources.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &LogicalName> {
        self.resources.keys()
    }

    pub fn resources(&self) -> impl Iterator<Item = &MaterializedResource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resolved value of a reference, if its target is materialized
    pub fn attribute(&self, reference: &Reference) -> Option<String> {
        self.resources
            .get(&reference.resource)?
            .attributes
            .get(&reference.attribute)
            .cloned()
    }

    /// Resources in `subset` ordered so that dependents come before dependencies
    pub fn destroy_order(&self, subset: &BTreeSet<LogicalName>) -> Vec<LogicalName> {
        let mut remaining = subset.clone();
        let mut order = Vec::with_capacity(subset.len());

        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .find(|candidate| !self.has_dependent_in(candidate, &remaining))
                // Stored dependencies can only form a cycle if the file was edited by hand
                .or_else(|| remaining.iter().next())
                .cloned();
            match next {
                Some(name) => {
                    remaining.remove(&name);
                    order.push(name);
                }
                None => break,
            }
        }
        order
    }

    /// Does any resource in `among` (other than `name`) depend on `name`?
    pub(crate) fn has_dependent_in(&self, name: &LogicalName, among: &BTreeSet<LogicalName>) -> bool {
        self.dependent_in(name, among).is_some()
    }

    pub(crate) fn dependent_in<'a>(
        &self,
        name: &LogicalName,
        among: &'a BTreeSet<LogicalName>,
    ) -> Option<&'a LogicalName> {
        among.iter().find(|other| {
            *other != name
                && self
                    .resources
                    .get(*other)
                    .is_some_and(|r| r.dependencies.contains(name))
        })
    }

    /// Some other resource in state that still lists `name` as a dependency
    pub(crate) fn dependent_of(&self, name: &LogicalName) -> Option<&LogicalName> {
        self.resources
            .iter()
            .find(|(other, r)| *other != name && r.dependencies.contains(name))
            .map(|(other, _)| other)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let state: State = serde_json::from_str(json)?;
        if state.format_version.major != 1 {
            return Err(PlanError::UnsupportedVersion(state.format_version));
        }
        Ok(state)
    }

    /// Write state to `path`, replacing it atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load state from `path`; a missing file is an empty state
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
