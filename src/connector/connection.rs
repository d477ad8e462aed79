//! Tunneled connection that holds one reference on its connector.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, error};

use crate::tunnel::TunnelStream;

use super::Shared;

/// Connection to the engine socket of a provisioned instance.
///
/// Closing (or dropping) the connection releases its reference. Releasing
/// the last reference of an auto-clean connector destroys the instance.
pub struct Connection {
    stream: Option<Box<dyn TunnelStream>>,
    parent: Option<Arc<Shared>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("instance_id", &self.parent.as_ref().map(|p| p.instance_id()))
            .field("open", &self.stream.is_some())
            .finish()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

impl Connection {
    pub(super) const fn new(stream: Box<dyn TunnelStream>, parent: Arc<Shared>) -> Self {
        Self {
            stream: Some(stream),
            parent: Some(parent),
        }
    }

    /// Identifier of the instance this connection reaches.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.parent.as_deref().map(Shared::instance_id)
    }

    /// Shuts the transport down and releases this connection's reference.
    ///
    /// The transport result is returned as-is. When this was the last
    /// reference of an auto-clean connector, the call also waits for the
    /// instance teardown (bounded by the teardown timeout). Teardown runs on
    /// its own task, so dropping this future does not abort it, and its
    /// failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns the error reported while shutting the transport down.
    pub async fn close(mut self) -> io::Result<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.shutdown().await,
            None => Ok(()),
        };
        self.stream = None;

        if let Some(parent) = self.parent.take()
            && let Some(teardown) = parent.release()
            && let Err(err) = teardown.await
        {
            error!(instance_id = %parent.instance_id(), error = %err, "teardown task failed");
        }

        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            debug!(instance_id = %parent.instance_id(), "connection dropped without close");
            // Teardown, if any, continues detached.
            drop(parent.release());
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
