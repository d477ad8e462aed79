//! Scripted collaborators shared across unit and integration tests.
//!
//! Each double records the calls it receives and can be told to fail a
//! specific step, so lifecycle tests run without network access.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use crate::auth::{AuthError, Token, TokenSource};
use crate::backend::{BackendFuture, ComputeApi, ComputeClient, ComputeError};
use crate::namespace::types::{CreateInstanceRequest, CreateInstanceResponse, InstanceMetadata};
use crate::tunnel::{Tunnel, TunnelStream};

const DUPLEX_CAPACITY: usize = 64 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn scripted_failure(method: &str) -> ComputeError {
    ComputeError::Status {
        method: method.to_owned(),
        code: String::from("internal"),
        message: String::from("scripted failure"),
    }
}

#[derive(Debug, Default)]
struct ComputeState {
    fail_open: bool,
    fail_create: bool,
    fail_wait: bool,
    fail_destroy: bool,
    hang_destroy: bool,
    opened: usize,
    closed: usize,
    create_requests: Vec<CreateInstanceRequest>,
    waited: Vec<String>,
    destroyed: Vec<String>,
}

/// Scripted control plane that hands out clients sharing one record.
#[derive(Clone, Debug)]
pub struct ScriptedCompute {
    instance_id: String,
    state: Arc<Mutex<ComputeState>>,
}

impl Default for ScriptedCompute {
    fn default() -> Self {
        Self::new("scripted-instance")
    }
}

impl ScriptedCompute {
    /// Creates a control plane that reports `instance_id` for every create.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            state: Arc::new(Mutex::new(ComputeState::default())),
        }
    }

    /// Makes opening a client fail.
    pub fn fail_open(&self) {
        lock(&self.state).fail_open = true;
    }

    /// Makes create-instance fail.
    pub fn fail_create(&self) {
        lock(&self.state).fail_create = true;
    }

    /// Makes wait-instance fail.
    pub fn fail_wait(&self) {
        lock(&self.state).fail_wait = true;
    }

    /// Makes destroy-instance fail (the call is still recorded).
    pub fn fail_destroy(&self) {
        lock(&self.state).fail_destroy = true;
    }

    /// Makes destroy-instance never complete (the call is still recorded).
    pub fn hang_destroy(&self) {
        lock(&self.state).hang_destroy = true;
    }

    /// Number of clients opened.
    #[must_use]
    pub fn opened(&self) -> usize {
        lock(&self.state).opened
    }

    /// Number of explicit client closes.
    #[must_use]
    pub fn closed(&self) -> usize {
        lock(&self.state).closed
    }

    /// Create requests received so far.
    #[must_use]
    pub fn create_requests(&self) -> Vec<CreateInstanceRequest> {
        lock(&self.state).create_requests.clone()
    }

    /// Instance ids passed to wait-instance.
    #[must_use]
    pub fn waited(&self) -> Vec<String> {
        lock(&self.state).waited.clone()
    }

    /// Instance ids passed to destroy-instance.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        lock(&self.state).destroyed.clone()
    }

    /// Total number of calls that reached the control plane.
    #[must_use]
    pub fn remote_calls(&self) -> usize {
        let state = lock(&self.state);
        state.opened + state.create_requests.len() + state.waited.len() + state.destroyed.len()
    }
}

impl ComputeApi for ScriptedCompute {
    fn open<'a>(
        &'a self,
        _token: &'a Token,
    ) -> BackendFuture<'a, Arc<dyn ComputeClient>, ComputeError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.fail_open {
                return Err(ComputeError::Transport {
                    method: String::from("connect"),
                    message: String::from("scripted failure"),
                });
            }
            state.opened += 1;
            let client: Arc<dyn ComputeClient> = Arc::new(self.clone());
            Ok(client)
        })
    }
}

impl ComputeClient for ScriptedCompute {
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> BackendFuture<'a, CreateInstanceResponse, ComputeError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.create_requests.push(request.clone());
            if state.fail_create {
                return Err(scripted_failure("CreateInstance"));
            }
            Ok(CreateInstanceResponse {
                metadata: InstanceMetadata::new(self.instance_id.clone()),
                instance_url: format!("https://dashboard.test/{}", self.instance_id),
            })
        })
    }

    fn wait_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, InstanceMetadata, ComputeError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.waited.push(instance_id.to_owned());
            if state.fail_wait {
                return Err(scripted_failure("WaitInstance"));
            }
            let mut metadata = InstanceMetadata::new(instance_id);
            metadata
                .extra
                .insert(String::from("ready"), serde_json::Value::Bool(true));
            Ok(metadata)
        })
    }

    fn destroy_instance<'a>(&'a self, instance_id: &'a str) -> BackendFuture<'a, (), ComputeError> {
        Box::pin(async move {
            let (fail, hang) = {
                let mut state = lock(&self.state);
                state.destroyed.push(instance_id.to_owned());
                (state.fail_destroy, state.hang_destroy)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            if fail {
                return Err(scripted_failure("DestroyInstance"));
            }
            Ok(())
        })
    }

    fn close(&self) {
        lock(&self.state).closed += 1;
    }
}

/// Token source returning a fixed token, or a scripted failure.
#[derive(Debug)]
pub struct StaticTokenSource {
    state: Mutex<TokenState>,
}

#[derive(Debug)]
struct TokenState {
    fail: bool,
    loads: usize,
}

impl Default for StaticTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticTokenSource {
    /// Creates a source that always succeeds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(TokenState {
                fail: false,
                loads: 0,
            }),
        }
    }

    /// Makes subsequent loads fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    /// Number of load attempts.
    #[must_use]
    pub fn loads(&self) -> usize {
        lock(&self.state).loads
    }
}

impl TokenSource for StaticTokenSource {
    fn load_user_token(&self) -> Result<Token, AuthError> {
        let mut state = lock(&self.state);
        state.loads += 1;
        if state.fail {
            return Err(AuthError::Unavailable(String::from("scripted failure")));
        }
        Ok(Token::new("scripted-token"))
    }
}

#[derive(Debug, Default)]
struct TunnelState {
    failures_remaining: usize,
    fail_shutdown: bool,
    dials: Vec<String>,
    peers: Vec<DuplexStream>,
}

/// Tunnel that serves in-memory duplex streams.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTunnel {
    state: Arc<Mutex<TunnelState>>,
}

impl ScriptedTunnel {
    /// Creates a tunnel whose dials succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` dials fail.
    pub fn fail_next_dials(&self, count: usize) {
        lock(&self.state).failures_remaining = count;
    }

    /// Makes streams from later dials report an error on shutdown.
    pub fn fail_shutdown(&self) {
        lock(&self.state).fail_shutdown = true;
    }

    /// Socket names dialed so far, including failed attempts.
    #[must_use]
    pub fn dials(&self) -> Vec<String> {
        lock(&self.state).dials.clone()
    }

    /// Takes the remote end of the most recent successful dial.
    #[must_use]
    pub fn take_peer(&self) -> Option<DuplexStream> {
        lock(&self.state).peers.pop()
    }
}

impl Tunnel for ScriptedTunnel {
    fn dial_named_socket<'a>(
        &'a self,
        _token: &'a Token,
        _metadata: &'a InstanceMetadata,
        socket_name: &'a str,
    ) -> BackendFuture<'a, Box<dyn TunnelStream>, io::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.dials.push(socket_name.to_owned());
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "scripted dial failure",
                ));
            }

            let (local, peer) = tokio::io::duplex(DUPLEX_CAPACITY);
            state.peers.push(peer);
            let stream: Box<dyn TunnelStream> = if state.fail_shutdown {
                Box::new(FailingShutdown(local))
            } else {
                Box::new(local)
            };
            Ok(stream)
        })
    }
}

/// Stream whose shutdown always fails.
#[derive(Debug)]
struct FailingShutdown(DuplexStream);

impl AsyncRead for FailingShutdown {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for FailingShutdown {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "scripted shutdown failure",
        )))
    }
}
