//! Remote execution broker.
//!
//! Opens one remote-execution channel per target host, lazily, and caches
//! it for the remainder of the process. Commands addressed to the local
//! host run in-process with no network hop. Sessions are long-lived
//! resources; the top-level driver releases them through [`SessionBroker::close_all`]
//! on every exit path, whatever the migration outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use vmshift_core::HostName;

use crate::error::EngineError;

/// A fully explicit remote command: program plus arguments. Every value a
/// remote operation needs is a field here, never an implicit capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// A command with no arguments yet.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// What a remote command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns `true` if the command exited cleanly.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One established channel to a host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, EngineError>;

    /// Release channel resources. Called exactly once, at broker teardown.
    async fn close(&self);
}

/// Opens sessions. Implementations decide what a channel is (a spawned
/// transport process, an in-memory double, ...).
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn connect(&self, host: &HostName) -> Result<Arc<dyn RemoteSession>, EngineError>;

    /// The name of the host this process runs on.
    fn local_host(&self) -> &HostName;
}

/// Per-host session cache.
///
/// A failed connect is reported to the caller as
/// [`EngineError::Connectivity`] and is never retried behind the caller's
/// back — a flaky session would mask genuine divergence between two hosts'
/// views of a VM. Failed connects are not cached either; whether to try
/// again is the caller's decision.
pub struct SessionBroker {
    transport: Arc<dyn SessionTransport>,
    sessions: Mutex<BTreeMap<HostName, CachedSession>>,
}

struct CachedSession {
    session: Arc<dyn RemoteSession>,
    opened_at: DateTime<Utc>,
}

impl SessionBroker {
    /// Creates a broker over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self { transport, sessions: Mutex::new(BTreeMap::new()) }
    }

    /// The local host name, for callers that need to skip the network hop.
    #[must_use]
    pub fn local_host(&self) -> &HostName {
        self.transport.local_host()
    }

    /// The cached session for `host`, connecting on first use.
    ///
    /// # Errors
    /// Returns [`EngineError::Connectivity`] if the channel cannot be
    /// established; fatal for that host.
    pub async fn session(&self, host: &HostName) -> Result<Arc<dyn RemoteSession>, EngineError> {
        // The lock is held across connect: migrations sharing a host are
        // single-writer by contract, and this keeps a slow connect from
        // racing a second one to the same host.
        let mut sessions = self.sessions.lock().await;
        if let Some(cached) = sessions.get(host) {
            return Ok(Arc::clone(&cached.session));
        }
        tracing::debug!(%host, "opening session");
        let session = self.transport.connect(host).await?;
        sessions.insert(
            host.clone(),
            CachedSession { session: Arc::clone(&session), opened_at: Utc::now() },
        );
        Ok(session)
    }

    /// Run one command on `host` through its cached session.
    pub async fn execute(
        &self,
        host: &HostName,
        command: &CommandSpec,
    ) -> Result<CommandOutput, EngineError> {
        let session = self.session(host).await?;
        session.run(command).await
    }

    /// Close every open session. Idempotent; the driver calls this on all
    /// exit paths including early aborts.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (host, cached) in std::mem::take(&mut *sessions) {
            tracing::debug!(
                %host,
                open_for_secs = (Utc::now() - cached.opened_at).num_seconds(),
                "closing session"
            );
            cached.session.close().await;
        }
    }
}

/// Process-spawning transport: commands for the local host execute
/// directly, commands for remote hosts are wrapped in `ssh`.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    local: HostName,
}

impl ProcessTransport {
    /// Creates a transport that treats `local` as this process's host.
    #[must_use]
    pub fn new(local: HostName) -> Self {
        Self { local }
    }
}

#[async_trait]
impl SessionTransport for ProcessTransport {
    async fn connect(&self, host: &HostName) -> Result<Arc<dyn RemoteSession>, EngineError> {
        if host == &self.local {
            return Ok(Arc::new(ProcessSession { host: host.clone(), remote: false }));
        }
        // Probe reachability once; a later flaky channel must not be
        // papered over by reconnecting.
        let probe = tokio::process::Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(host.as_str())
            .arg("exit 0")
            .output()
            .await
            .map_err(|e| EngineError::Connectivity {
                host: host.clone(),
                reason: format!("cannot spawn ssh: {e}"),
            })?;
        if !probe.status.success() {
            return Err(EngineError::Connectivity {
                host: host.clone(),
                reason: String::from_utf8_lossy(&probe.stderr).trim().to_owned(),
            });
        }
        Ok(Arc::new(ProcessSession { host: host.clone(), remote: true }))
    }

    fn local_host(&self) -> &HostName {
        &self.local
    }
}

struct ProcessSession {
    host: HostName,
    remote: bool,
}

#[async_trait]
impl RemoteSession for ProcessSession {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, EngineError> {
        let mut process = if self.remote {
            let mut c = tokio::process::Command::new("ssh");
            c.arg("-o").arg("BatchMode=yes").arg(self.host.as_str());
            c.arg(&command.program);
            c.args(&command.args);
            c
        } else {
            let mut c = tokio::process::Command::new(&command.program);
            c.args(&command.args);
            c
        };
        let output = process.output().await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn close(&self) {
        // Process-per-command sessions hold no channel state.
        tracing::debug!(host = %self.host, "session released");
    }
}
