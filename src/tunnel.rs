//! Tunnel seam for dialing named sockets exported by an instance.
//!
//! The wire protocol lives outside this crate; implementations hand back a
//! bidirectional byte stream.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::Token;
use crate::backend::BackendFuture;
use crate::namespace::types::InstanceMetadata;

/// Bidirectional stream returned by a tunnel dial.
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Dials named Unix sockets exported by a remote instance.
pub trait Tunnel: Send + Sync {
    /// Opens a stream to `socket_name` inside the instance described by
    /// `metadata`.
    fn dial_named_socket<'a>(
        &'a self,
        token: &'a Token,
        metadata: &'a InstanceMetadata,
        socket_name: &'a str,
    ) -> BackendFuture<'a, Box<dyn TunnelStream>, io::Error>;
}

/// Raised when the tunnel cannot reach the named socket.
#[derive(Debug, Error)]
#[error("failed to dial {socket_name} on instance {instance_id}: {source}")]
pub struct DialError {
    /// Socket that was dialed.
    pub socket_name: String,
    /// Instance that exports the socket.
    pub instance_id: String,
    /// Transport failure.
    #[source]
    pub source: io::Error,
}

/// Tunnel for callers that provision without connecting.
///
/// Every dial fails with [`io::ErrorKind::Unsupported`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableTunnel;

impl Tunnel for UnavailableTunnel {
    fn dial_named_socket<'a>(
        &'a self,
        _token: &'a Token,
        metadata: &'a InstanceMetadata,
        socket_name: &'a str,
    ) -> BackendFuture<'a, Box<dyn TunnelStream>, io::Error> {
        Box::pin(async move {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!(
                    "no tunnel transport configured to reach {socket_name} on {}",
                    metadata.instance_id
                ),
            ))
        })
    }
}
