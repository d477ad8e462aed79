//! JSON wire types for the compute control plane.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compute shape of an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceShape {
    /// Number of virtual CPUs.
    pub virtual_cpu: i32,
    /// Memory size in megabytes.
    pub memory_megabytes: i32,
    /// Machine architecture label (for example `amd64`).
    pub machine_arch: String,
}

/// Request to create (or reuse, by unique tag) an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    /// Requested compute shape.
    pub shape: InstanceShape,
    /// Human-readable reason for the instance.
    pub documented_purpose: String,
    /// Block until resources are allocated rather than merely accepted.
    pub interactive: bool,
    /// Time after which the control plane reclaims the instance.
    pub deadline: DateTime<Utc>,
    /// Containers to start inside the instance.
    pub containers: Vec<ContainerRequest>,
    /// Experimental request options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<CreateInstanceExperimental>,
}

/// Experimental instance options.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceExperimental {
    /// Tag routing repeated requests to the same live instance.
    pub unique_tag: String,
}

/// Container to run inside the instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRequest {
    /// Container name.
    pub name: String,
    /// Image reference, including tag.
    pub image_ref: String,
    /// Arguments passed to the entrypoint.
    pub args: Vec<String>,
    /// Whether the container runs privileged.
    pub privileged: bool,
    /// Where the host Docker socket is exposed inside the container.
    pub docker_sock_path: String,
    /// Where the instance credential state is exposed inside the container.
    pub nsc_state_path: String,
    /// Volumes attached to the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeRequest>,
    /// Experimental container options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<ContainerExperimental>,
}

/// Experimental container options.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerExperimental {
    /// Socket name to in-container socket path, dialable through the tunnel.
    pub exported_unix_sockets: BTreeMap<String, String>,
}

/// Persistent volume attached to a container.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    /// Tag identifying the volume; equal tags share contents.
    pub tag: String,
    /// Mount point inside the container.
    pub mount_point: String,
    /// Size in megabytes.
    pub size_mb: i64,
    /// How long the volume contents are kept.
    pub persistency_kind: PersistencyKind,
}

/// Volume persistency classes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistencyKind {
    /// Best-effort cache shared across instances with the same tag.
    Cache,
}

/// Metadata describing an instance.
///
/// Only the identifier is interpreted; everything else the control plane
/// returns is kept verbatim for the tunnel.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    /// Unique instance identifier.
    pub instance_id: String,
    /// Remaining fields, kept opaque.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InstanceMetadata {
    /// Creates metadata holding only an identifier.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Response to [`CreateInstanceRequest`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceResponse {
    /// Metadata of the created or reused instance.
    pub metadata: InstanceMetadata,
    /// Dashboard URL for the instance.
    #[serde(default)]
    pub instance_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InstanceIdRequest<'a> {
    pub(crate) instance_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WaitInstanceResponse {
    pub(crate) metadata: InstanceMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmptyResponse {}

/// Error body returned by the control plane on failure.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) message: String,
}
