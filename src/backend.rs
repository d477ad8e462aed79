//! Control-plane abstraction for creating, awaiting, and destroying instances.
//!
//! The traits are object safe so connectors can hold the client behind an
//! `Arc` and share it with teardown tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::auth::Token;
use crate::namespace::types::{CreateInstanceRequest, CreateInstanceResponse, InstanceMetadata};

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Errors raised by control-plane clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// Raised when the request never reached the control plane or the
    /// response could not be read.
    #[error("transport error calling {method}: {message}")]
    Transport {
        /// RPC method being called.
        method: String,
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when the control plane answers with a non-success status.
    #[error("{method} failed ({code}): {message}")]
    Status {
        /// RPC method being called.
        method: String,
        /// Error code reported by the control plane.
        code: String,
        /// Error message reported by the control plane.
        message: String,
    },
    /// Raised when a success response cannot be decoded.
    #[error("failed to decode {method} response: {message}")]
    Decode {
        /// RPC method being called.
        method: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when a call is issued on a client that was already closed.
    #[error("control-plane client is closed")]
    Closed,
}

/// Opens authenticated control-plane clients.
pub trait ComputeApi: Send + Sync {
    /// Opens a client connection authenticated with `token`.
    fn open<'a>(&'a self, token: &'a Token)
    -> BackendFuture<'a, Arc<dyn ComputeClient>, ComputeError>;
}

/// Client connection to the compute control plane.
pub trait ComputeClient: Send + Sync {
    /// Creates an instance, or resolves to an existing one when the request
    /// carries a unique tag that matches a live instance.
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> BackendFuture<'a, CreateInstanceResponse, ComputeError>;

    /// Blocks server-side until the instance is ready and returns its
    /// metadata.
    fn wait_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, InstanceMetadata, ComputeError>;

    /// Destroys the instance.
    fn destroy_instance<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), ComputeError>;

    /// Releases the client connection. Later calls fail with
    /// [`ComputeError::Closed`].
    fn close(&self);
}
