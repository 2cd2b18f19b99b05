//! Domain types for the resource store.
//!
//! `WebUi` is the user-authored desired state. `Workload` and `ContentStore`
//! are narrow projections of the generated children: only the fields the
//! controller writes or compares are modelled. All types serialize to JSON
//! for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::resource::{Kind, Resource};

// ── Identity ──────────────────────────────────────────────────────

/// Namespace-scoped identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the composite key used in every table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(StateError::InvalidKey(s.to_string())),
        }
    }
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Assigned by the store: 1 on create, bumped on every update.
    /// Zero means "never stored".
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Unix timestamp (seconds) when the object was created.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last write.
    #[serde(default)]
    pub updated_at: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

// ── WebUi ────────────────────────────────────────────────────────

/// Desired state of a web UI deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebUi {
    pub metadata: ObjectMeta,
    pub spec: WebUiSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebUiSpec {
    /// Page payload served as `index.html`.
    pub contents: String,
    /// Container image of the web server.
    pub image: String,
    pub replicas: u32,
}

impl WebUi {
    pub fn new(namespace: &str, name: &str, spec: WebUiSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
        }
    }
}

// ── Workload ─────────────────────────────────────────────────────

/// Replicated set of web server instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub replicas: u32,
    /// Labels an instance must carry to be counted by this workload.
    pub selector: BTreeMap<String, String>,
    pub template: InstanceTemplate,
}

/// Shape of every instance the workload runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTemplate {
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: String,
    pub protocol: Protocol,
    pub container_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

/// Where a volume's files come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSource {
    /// A content store in the workload's own namespace.
    ContentStore { name: String },
}

impl Workload {
    /// Image of the first container.
    pub fn image(&self) -> Option<&str> {
        self.spec
            .template
            .containers
            .first()
            .map(|c| c.image.as_str())
    }

    /// Identity of the content store mounted into the instances, if any.
    pub fn content_ref(&self) -> Option<ObjectKey> {
        self.spec.template.volumes.iter().find_map(|v| match &v.source {
            VolumeSource::ContentStore { name } => {
                Some(ObjectKey::new(self.metadata.namespace.clone(), name.clone()))
            }
        })
    }
}

// ── ContentStore ─────────────────────────────────────────────────

/// Named file payloads mounted into a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStore {
    pub metadata: ObjectMeta,
    /// Filename → file content.
    pub data: BTreeMap<String, String>,
}

// ── Resource bindings ───────────────────────────────────────────

impl Resource for WebUi {
    const KIND: Kind = Kind::WebUi;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Workload {
    const KIND: Kind = Kind::Workload;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for ContentStore {
    const KIND: Kind = Kind::ContentStore;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
