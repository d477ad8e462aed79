//! Ephemeral remote engine provisioning.
//!
//! A driver URL such as `namespace:///build1?shape=4x8&ttl=30m` resolves to a
//! [`ProvisioningRequest`]. The [`Provisioner`] creates (or reuses, by tag) a
//! compute instance running the engine and waits until it is ready, then
//! hands back a [`Connector`]. Each [`Connection`] opened through the
//! connector holds a reference; when the last one closes on an auto-clean
//! connector, the instance is destroyed (create → wait → connect → destroy).

pub mod auth;
pub mod backend;
pub mod config;
pub mod connector;
pub mod driver;
pub mod error;
pub mod namespace;
pub mod provision;
pub mod request;
pub mod test_support;
pub mod tunnel;

pub use auth::{AuthError, FileTokenSource, Token, TokenSource};
pub use backend::{BackendFuture, ComputeApi, ComputeClient, ComputeError};
pub use config::{ConfigError, DriverConfig, FALLBACK_ENGINE_VERSION};
pub use connector::{Connection, Connector, TEARDOWN_TIMEOUT, TeardownError};
pub use driver::{Driver, DriverRegistry, NAMESPACE_SCHEME, NamespaceDriver};
pub use error::DriverError;
pub use namespace::NamespaceApi;
pub use namespace::types::InstanceMetadata;
pub use provision::{ENGINE_SOCKET_NAME, ProvisionError, Provisioner, ProvisionerSettings};
pub use request::{Arch, ProvisioningRequest};
pub use tunnel::{DialError, Tunnel, TunnelStream, UnavailableTunnel};
