//! Top-level error surfaced to driver callers.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::provision::ProvisionError;
use crate::tunnel::DialError;

/// Errors returned by provisioning and connection operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Raised when the driver URL or configuration is invalid. No remote
    /// call has been made.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when no user token could be loaded.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// Raised when creating or awaiting the instance fails.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Raised when the tunnel cannot be dialed. The connector is unchanged.
    #[error(transparent)]
    Dial(#[from] DialError),
    /// Raised when connecting through a connector whose instance was already
    /// torn down.
    #[error("instance {instance_id} was destroyed after its last connection closed")]
    Retired {
        /// Identifier of the destroyed instance.
        instance_id: String,
    },
    /// Raised when no driver is registered for a URL scheme.
    #[error("no driver registered for scheme '{0}'")]
    UnknownScheme(String),
}
