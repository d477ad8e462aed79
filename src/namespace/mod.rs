//! Namespace compute control-plane client.
//!
//! Calls are unary JSON requests over HTTP, addressed as
//! `{endpoint}/{service}/{method}` and authenticated with the user's bearer
//! token.

pub mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::Token;
use crate::backend::{BackendFuture, ComputeApi, ComputeClient, ComputeError};
use crate::config::DriverConfig;
use types::{
    ApiErrorBody, CreateInstanceRequest, CreateInstanceResponse, EmptyResponse,
    InstanceIdRequest, InstanceMetadata, WaitInstanceResponse,
};

const COMPUTE_SERVICE: &str = "namespace.cloud.compute.v1beta.ComputeService";
const CREATE_INSTANCE: &str = "CreateInstance";
const WAIT_INSTANCE: &str = "WaitInstance";
const DESTROY_INSTANCE: &str = "DestroyInstance";

/// Opens clients against the Namespace compute API.
#[derive(Clone, Debug)]
pub struct NamespaceApi {
    http: reqwest::Client,
    endpoint: String,
}

impl NamespaceApi {
    /// Creates an API handle for `endpoint` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ComputeError::Transport {
                method: String::from("connect"),
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim().trim_end_matches('/').to_owned(),
        })
    }

    /// Creates an API handle from driver configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ComputeError> {
        Self::new(&config.api_endpoint, config.http_timeout())
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ComputeApi for NamespaceApi {
    fn open<'a>(
        &'a self,
        token: &'a Token,
    ) -> BackendFuture<'a, Arc<dyn ComputeClient>, ComputeError> {
        Box::pin(async move {
            let client: Arc<dyn ComputeClient> = Arc::new(NamespaceClient {
                http: self.http.clone(),
                endpoint: self.endpoint.clone(),
                token: token.clone(),
                closed: AtomicBool::new(false),
            });
            Ok(client)
        })
    }
}

/// Authenticated client bound to one token.
#[derive(Debug)]
struct NamespaceClient {
    http: reqwest::Client,
    endpoint: String,
    token: Token,
    closed: AtomicBool,
}

impl NamespaceClient {
    fn method_url(&self, method: &str) -> String {
        format!("{}/{COMPUTE_SERVICE}/{method}", self.endpoint)
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, ComputeError>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(ComputeError::Closed);
        }

        let transport = |err: reqwest::Error| ComputeError::Transport {
            method: method.to_owned(),
            message: err.to_string(),
        };

        let response = self
            .http
            .post(self.method_url(method))
            .bearer_auth(self.token.bearer())
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|err| ComputeError::Decode {
                method: method.to_owned(),
                message: err.to_string(),
            });
        }

        Err(status_error(method, status, &bytes))
    }
}

fn status_error(method: &str, status: reqwest::StatusCode, body: &[u8]) -> ComputeError {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.code.is_empty() || !parsed.message.is_empty() => {
            ComputeError::Status {
                method: method.to_owned(),
                code: if parsed.code.is_empty() {
                    status.as_u16().to_string()
                } else {
                    parsed.code
                },
                message: parsed.message,
            }
        }
        _ => ComputeError::Status {
            method: method.to_owned(),
            code: status.as_u16().to_string(),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

impl ComputeClient for NamespaceClient {
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> BackendFuture<'a, CreateInstanceResponse, ComputeError> {
        Box::pin(async move { self.call(CREATE_INSTANCE, request).await })
    }

    fn wait_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, InstanceMetadata, ComputeError> {
        Box::pin(async move {
            let response: WaitInstanceResponse = self
                .call(WAIT_INSTANCE, &InstanceIdRequest { instance_id })
                .await?;
            Ok(response.metadata)
        })
    }

    fn destroy_instance<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), ComputeError> {
        Box::pin(async move {
            let _: EmptyResponse = self
                .call(DESTROY_INSTANCE, &InstanceIdRequest { instance_id })
                .await?;
            Ok(())
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests;
