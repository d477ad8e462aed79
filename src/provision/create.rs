//! Construction of the create-instance request.
//!
//! The engine runs privileged in a single container; the instance itself
//! provides the isolation. A reuse tag adds a cache volume and a unique
//! instance tag, both derived from the tag so repeated requests land on the
//! same instance and volume.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::ConfigError;
use crate::namespace::types::{
    ContainerExperimental, ContainerRequest, CreateInstanceExperimental, CreateInstanceRequest,
    InstanceShape, PersistencyKind, VolumeRequest,
};
use crate::request::ProvisioningRequest;

use super::ProvisionerSettings;

/// Name of the socket the tunnel dials to reach the engine.
pub const ENGINE_SOCKET_NAME: &str = "dagger-buildkit";

const ENGINE_CONTAINER_NAME: &str = "dagger-engine";
const ENGINE_SOCKET_PATH: &str = "/run/buildkit/buildkitd.sock";
const DOCKER_SOCK_PATH: &str = "/var/run/docker.sock";
const NSC_STATE_PATH: &str = "/var/run/nsc";
const CACHE_TAG_PREFIX: &str = "dagger-cache";
const INSTANCE_TAG_PREFIX: &str = "dagger-engine";
const CACHE_MOUNT_POINT: &str = "/var/lib/dagger";
const CACHE_SIZE_MB: i64 = 64 * 1024;

/// Joins `prefix` and `suffix` with a dash, or returns `prefix` alone when
/// `suffix` is empty.
#[must_use]
pub fn maybe_suffix(prefix: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        prefix.to_owned()
    } else {
        format!("{prefix}-{suffix}")
    }
}

/// Builds the create-instance request for `request`, with the deadline
/// measured from `now`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDuration`] when `now + ttl` is not
/// representable.
pub fn create_instance_request(
    request: &ProvisioningRequest,
    settings: &ProvisionerSettings,
    now: DateTime<Utc>,
) -> Result<CreateInstanceRequest, ConfigError> {
    let deadline =
        now.checked_add_signed(request.ttl())
            .ok_or_else(|| ConfigError::InvalidDuration {
                value: request.ttl().to_string(),
                message: String::from("deadline is out of range"),
            })?;

    let mut container = ContainerRequest {
        name: ENGINE_CONTAINER_NAME.to_owned(),
        image_ref: format!(
            "{}:v{}",
            settings.engine_image_repo, settings.engine_version
        ),
        args: Vec::new(),
        privileged: true,
        docker_sock_path: DOCKER_SOCK_PATH.to_owned(),
        nsc_state_path: NSC_STATE_PATH.to_owned(),
        volumes: Vec::new(),
        experimental: Some(ContainerExperimental {
            exported_unix_sockets: BTreeMap::from([(
                ENGINE_SOCKET_NAME.to_owned(),
                ENGINE_SOCKET_PATH.to_owned(),
            )]),
        }),
    };

    let mut experimental = None;
    if let Some(tag) = request.reuse_tag().filter(|tag| !tag.is_empty()) {
        container.volumes.push(VolumeRequest {
            tag: maybe_suffix(CACHE_TAG_PREFIX, tag),
            mount_point: CACHE_MOUNT_POINT.to_owned(),
            size_mb: CACHE_SIZE_MB,
            persistency_kind: PersistencyKind::Cache,
        });
        experimental = Some(CreateInstanceExperimental {
            unique_tag: maybe_suffix(INSTANCE_TAG_PREFIX, tag),
        });
    }

    Ok(CreateInstanceRequest {
        shape: InstanceShape {
            virtual_cpu: request.cpu(),
            memory_megabytes: request.memory_mb(),
            machine_arch: request.arch().as_str().to_owned(),
        },
        documented_purpose: format!("Dagger engine {}", settings.engine_version),
        interactive: true,
        deadline,
        containers: vec![container],
        experimental,
    })
}
