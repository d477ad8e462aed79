//! URL-scheme driver registry.
//!
//! Callers hand a driver URL to the [`DriverRegistry`], which dispatches on
//! the scheme. The `namespace` scheme is served by [`NamespaceDriver`].

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Url;

use crate::auth::FileTokenSource;
use crate::backend::BackendFuture;
use crate::config::DriverConfig;
use crate::connector::Connector;
use crate::error::DriverError;
use crate::namespace::NamespaceApi;
use crate::provision::{ProvisionError, Provisioner};
use crate::request::ProvisioningRequest;
use crate::tunnel::Tunnel;

/// URL scheme handled by [`NamespaceDriver`].
pub const NAMESPACE_SCHEME: &str = "namespace";

/// Provisions an engine for a driver URL.
pub trait Driver: Send + Sync {
    /// Resolves `url` and returns a connector to the ready instance.
    fn provision<'a>(&'a self, url: &'a Url) -> BackendFuture<'a, Connector, DriverError>;
}

/// Driver for `namespace://[tag][?options]` URLs.
#[derive(Clone, Debug)]
pub struct NamespaceDriver {
    provisioner: Provisioner,
}

impl NamespaceDriver {
    /// Wraps an existing provisioner.
    #[must_use]
    pub const fn new(provisioner: Provisioner) -> Self {
        Self { provisioner }
    }

    /// Wires the HTTP control plane and file token source from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] when the configuration is invalid and
    /// [`DriverError::Provision`] when the HTTP client cannot be built.
    pub fn from_config(config: &DriverConfig, tunnel: Arc<dyn Tunnel>) -> Result<Self, DriverError> {
        config.validate()?;
        let api = NamespaceApi::from_config(config).map_err(ProvisionError::Connect)?;
        let tokens = FileTokenSource::new(config.resolved_token_path()?);
        Ok(Self::new(Provisioner::new(
            Arc::new(api),
            Arc::new(tokens),
            tunnel,
            config.provisioner_settings(),
        )))
    }

    /// Provisioner backing this driver.
    #[must_use]
    pub const fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }
}

impl Driver for NamespaceDriver {
    fn provision<'a>(&'a self, url: &'a Url) -> BackendFuture<'a, Connector, DriverError> {
        Box::pin(async move {
            let request = ProvisioningRequest::from_url(url)?;
            self.provisioner.provision(&request).await
        })
    }
}

/// Maps URL schemes to drivers.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<_> = self.drivers.keys().collect();
        schemes.sort();
        f.debug_struct("DriverRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `driver` for `scheme`, replacing any previous entry.
    pub fn register(&mut self, scheme: impl Into<String>, driver: Arc<dyn Driver>) {
        self.drivers.insert(scheme.into(), driver);
    }

    /// Driver registered for `scheme`, if any.
    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(scheme).cloned()
    }

    /// Provisions an engine using the driver registered for the URL scheme.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownScheme`] when no driver matches, or the
    /// error reported by the driver.
    pub async fn provision(&self, url: &Url) -> Result<Connector, DriverError> {
        let driver = self
            .get(url.scheme())
            .ok_or_else(|| DriverError::UnknownScheme(url.scheme().to_owned()))?;
        driver.provision(url).await
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::provision::ProvisionerSettings;
    use crate::test_support::{ScriptedCompute, ScriptedTunnel, StaticTokenSource};

    struct Harness {
        compute: ScriptedCompute,
        registry: DriverRegistry,
    }

    #[fixture]
    fn harness() -> Harness {
        let compute = ScriptedCompute::new("inst-7");
        let provisioner = Provisioner::new(
            Arc::new(compute.clone()),
            Arc::new(StaticTokenSource::new()),
            Arc::new(ScriptedTunnel::new()),
            ProvisionerSettings::default(),
        );
        let mut registry = DriverRegistry::new();
        registry.register(NAMESPACE_SCHEME, Arc::new(NamespaceDriver::new(provisioner)));
        Harness { compute, registry }
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("valid url")
    }

    #[rstest]
    #[tokio::test]
    async fn dispatches_on_scheme(harness: Harness) {
        let connector = harness
            .registry
            .provision(&url("namespace:///ci?shape=2x4"))
            .await
            .expect("provision succeeds");

        assert_eq!(connector.instance_id(), "inst-7");
        let [create]: [_; 1] = harness
            .compute
            .create_requests()
            .try_into()
            .expect("one create");
        assert_eq!(create.shape.virtual_cpu, 2);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_scheme_is_rejected(harness: Harness) {
        let err = harness
            .registry
            .provision(&url("docker-container://engine"))
            .await
            .expect_err("no driver");

        assert!(
            matches!(err, DriverError::UnknownScheme(ref scheme) if scheme == "docker-container"),
            "{err}"
        );
        assert_eq!(harness.compute.remote_calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn malformed_options_fail_before_remote_calls(harness: Harness) {
        let err = harness
            .registry
            .provision(&url("namespace://?shape=big"))
            .await
            .expect_err("invalid shape");

        assert!(matches!(err, DriverError::Config(_)), "{err}");
        assert_eq!(harness.compute.remote_calls(), 0);
    }

    #[rstest]
    fn debug_lists_registered_schemes(harness: Harness) {
        assert_eq!(
            format!("{:?}", harness.registry),
            "DriverRegistry { schemes: [\"namespace\"] }"
        );
    }
}
