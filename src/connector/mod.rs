//! Shared handle to a ready instance.
//!
//! A [`Connector`] counts the [`Connection`]s opened through it. When the
//! last one is released and the connector was provisioned with auto-clean,
//! the instance is destroyed exactly once on a task detached from the
//! caller, bounded by [`TEARDOWN_TIMEOUT`].

mod connection;
mod refcount;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::auth::TokenSource;
use crate::backend::{ComputeClient, ComputeError};
use crate::error::DriverError;
use crate::namespace::types::InstanceMetadata;
use crate::provision::ENGINE_SOCKET_NAME;
use crate::tunnel::{DialError, Tunnel};

pub use connection::Connection;
use refcount::RefCount;

/// Upper bound on a single destroy-instance call during teardown.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while destroying an instance after its last connection closed.
///
/// These are logged and never returned from [`Connection::close`].
#[derive(Debug, Error)]
pub enum TeardownError {
    /// Raised when the destroy call exceeds [`TEARDOWN_TIMEOUT`].
    #[error("destroying instance {instance_id} timed out after {timeout:?}")]
    Timeout {
        /// Instance being destroyed.
        instance_id: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// Raised when the control plane rejects the destroy call.
    #[error("failed to destroy instance {instance_id}: {source}")]
    Api {
        /// Instance being destroyed.
        instance_id: String,
        /// Underlying control-plane failure.
        #[source]
        source: ComputeError,
    },
}

/// Collaborators and state handed over by the provisioner.
pub(crate) struct ConnectorParts {
    pub(crate) client: Arc<dyn ComputeClient>,
    pub(crate) metadata: InstanceMetadata,
    pub(crate) auto_clean: bool,
    pub(crate) tokens: Arc<dyn TokenSource>,
    pub(crate) tunnel: Arc<dyn Tunnel>,
}

pub(crate) struct Shared {
    client: Arc<dyn ComputeClient>,
    metadata: InstanceMetadata,
    auto_clean: bool,
    tokens: Arc<dyn TokenSource>,
    tunnel: Arc<dyn Tunnel>,
    teardown_timeout: Duration,
    refs: RefCount,
}

impl Shared {
    fn instance_id(&self) -> &str {
        &self.metadata.instance_id
    }

    /// Releases one reference, starting teardown when it was the last one
    /// and auto-clean is set.
    fn release(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.refs.release(self.auto_clean) || !self.auto_clean {
            return None;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(
                instance_id = %self.instance_id(),
                "no async runtime available; instance left for its deadline"
            );
            return None;
        };

        let shared = Arc::clone(self);
        Some(runtime.spawn(async move {
            if let Err(err) = shared.destroy_instance().await {
                error!(instance_id = %shared.instance_id(), error = %err, "destroy failed");
            }
        }))
    }

    async fn destroy_instance(&self) -> Result<(), TeardownError> {
        let instance_id = self.instance_id();
        info!(instance_id = %instance_id, "destroying instance");

        match timeout(
            self.teardown_timeout,
            self.client.destroy_instance(instance_id),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TeardownError::Api {
                instance_id: instance_id.to_owned(),
                source,
            }),
            Err(_) => Err(TeardownError::Timeout {
                instance_id: instance_id.to_owned(),
                timeout: self.teardown_timeout,
            }),
        }
    }
}

/// Cloneable handle to a ready instance.
///
/// Clones share the same reference count; the connector itself holds no
/// reference, only the connections opened through it do.
#[derive(Clone)]
pub struct Connector {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("instance_id", &self.instance_id())
            .field("auto_clean", &self.shared.auto_clean)
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub(crate) fn new(parts: ConnectorParts) -> Self {
        Self::with_teardown_timeout(parts, TEARDOWN_TIMEOUT)
    }

    pub(crate) fn with_teardown_timeout(parts: ConnectorParts, teardown_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                client: parts.client,
                metadata: parts.metadata,
                auto_clean: parts.auto_clean,
                tokens: parts.tokens,
                tunnel: parts.tunnel,
                teardown_timeout,
                refs: RefCount::default(),
            }),
        }
    }

    /// Opens a new tunneled connection to the engine socket.
    ///
    /// A fresh token is loaded for every call. The reference is only counted
    /// once the dial has succeeded, so failures and cancellation leave the
    /// count untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Auth`] when no token is available,
    /// [`DriverError::Dial`] when the tunnel cannot be dialed, and
    /// [`DriverError::Retired`] when the instance was already destroyed.
    pub async fn connect(&self) -> Result<Connection, DriverError> {
        if self.shared.refs.is_retired() {
            return Err(self.retired());
        }

        let token = self.shared.tokens.load_user_token()?;
        let mut stream = self
            .shared
            .tunnel
            .dial_named_socket(&token, &self.shared.metadata, ENGINE_SOCKET_NAME)
            .await
            .map_err(|source| DialError {
                socket_name: ENGINE_SOCKET_NAME.to_owned(),
                instance_id: self.instance_id().to_owned(),
                source,
            })?;

        if !self.shared.refs.acquire() {
            if let Err(err) = stream.shutdown().await {
                debug!(
                    instance_id = %self.instance_id(),
                    error = %err,
                    "failed to shut down stream dialed to a retired instance"
                );
            }
            return Err(self.retired());
        }

        Ok(Connection::new(stream, Arc::clone(&self.shared)))
    }

    fn retired(&self) -> DriverError {
        DriverError::Retired {
            instance_id: self.instance_id().to_owned(),
        }
    }

    /// Identifier of the instance.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        self.shared.instance_id()
    }

    /// Metadata returned when the instance became ready.
    #[must_use]
    pub fn metadata(&self) -> &InstanceMetadata {
        &self.shared.metadata
    }

    /// Whether the instance is destroyed when the last connection closes.
    #[must_use]
    pub fn auto_clean(&self) -> bool {
        self.shared.auto_clean
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.shared.refs.count()
    }

    /// Whether the instance has been torn down.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.shared.refs.is_retired()
    }
}
