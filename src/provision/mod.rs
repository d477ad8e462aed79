//! Instance provisioning: create-or-reuse, wait for readiness, and hand the
//! ready instance to a [`Connector`].
//!
//! Provisioning never retries. Any failure closes the control-plane client
//! and leaves no connector behind; callers decide whether to try again.

mod create;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::auth::TokenSource;
use crate::backend::{ComputeApi, ComputeClient, ComputeError};
use crate::config::FALLBACK_ENGINE_VERSION;
use crate::connector::{Connector, ConnectorParts};
use crate::error::DriverError;
use crate::request::ProvisioningRequest;
use crate::tunnel::Tunnel;

pub use create::{ENGINE_SOCKET_NAME, create_instance_request, maybe_suffix};

const DEFAULT_ENGINE_IMAGE_REPO: &str = "registry.dagger.io/engine";

/// Errors raised while talking to the control plane during provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Raised when a control-plane client cannot be opened.
    #[error("failed to open control-plane client: {0}")]
    Connect(#[source] ComputeError),
    /// Raised when the create-instance call fails.
    #[error("failed to create instance: {0}")]
    Create(#[source] ComputeError),
    /// Raised when the instance does not become ready.
    #[error("instance {instance_id} did not become ready: {source}")]
    Wait {
        /// Identifier returned by the create call.
        instance_id: String,
        /// Underlying control-plane failure.
        #[source]
        source: ComputeError,
    },
}

/// Engine settings applied to every provisioned instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionerSettings {
    /// Engine version used for the image tag and the documented purpose.
    pub engine_version: String,
    /// Repository of the engine image.
    pub engine_image_repo: String,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            engine_version: FALLBACK_ENGINE_VERSION.to_owned(),
            engine_image_repo: DEFAULT_ENGINE_IMAGE_REPO.to_owned(),
        }
    }
}

/// Closes the wrapped client on drop unless it has been kept.
///
/// Covers error returns and cancellation of the provisioning future alike.
struct OpenClient {
    client: Arc<dyn ComputeClient>,
    armed: bool,
}

impl OpenClient {
    const fn new(client: Arc<dyn ComputeClient>) -> Self {
        Self {
            client,
            armed: true,
        }
    }

    fn keep(mut self) -> Arc<dyn ComputeClient> {
        self.armed = false;
        Arc::clone(&self.client)
    }
}

impl Drop for OpenClient {
    fn drop(&mut self) {
        if self.armed {
            self.client.close();
        }
    }
}

/// Provisions instances and returns shared connectors to them.
#[derive(Clone)]
pub struct Provisioner {
    api: Arc<dyn ComputeApi>,
    tokens: Arc<dyn TokenSource>,
    tunnel: Arc<dyn Tunnel>,
    settings: ProvisionerSettings,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Creates a provisioner from its collaborators.
    #[must_use]
    pub fn new(
        api: Arc<dyn ComputeApi>,
        tokens: Arc<dyn TokenSource>,
        tunnel: Arc<dyn Tunnel>,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            api,
            tokens,
            tunnel,
            settings,
        }
    }

    /// Engine settings applied to every instance.
    #[must_use]
    pub const fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Creates or reuses an instance for `request` and waits until it is
    /// ready.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when the deadline cannot be computed,
    /// [`DriverError::Auth`] when no token is available, and
    /// [`DriverError::Provision`] when the control plane rejects or fails
    /// any step.
    pub async fn provision(&self, request: &ProvisioningRequest) -> Result<Connector, DriverError> {
        let create = create_instance_request(request, &self.settings, Utc::now())?;
        let token = self.tokens.load_user_token()?;

        let client = OpenClient::new(
            self.api
                .open(&token)
                .await
                .map_err(ProvisionError::Connect)?,
        );

        let response = client
            .client
            .create_instance(&create)
            .await
            .map_err(ProvisionError::Create)?;
        let instance_id = response.metadata.instance_id;
        info!(
            instance_id = %instance_id,
            url = %response.instance_url,
            reuse_tag = request.reuse_tag().unwrap_or_default(),
            "created instance"
        );

        let metadata = client
            .client
            .wait_instance(&instance_id)
            .await
            .map_err(|source| ProvisionError::Wait {
                instance_id: instance_id.clone(),
                source,
            })?;
        info!(instance_id = %metadata.instance_id, "instance ready");

        Ok(Connector::new(ConnectorParts {
            client: client.keep(),
            metadata,
            auto_clean: request.auto_clean(),
            tokens: Arc::clone(&self.tokens),
            tunnel: Arc::clone(&self.tunnel),
        }))
    }
}

#[cfg(test)]
mod tests;
