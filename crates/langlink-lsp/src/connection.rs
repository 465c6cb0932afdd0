//! Connection providers: spawning and stopping the server process for one working directory.

use crate::definition::ServerDefinition;
use crate::error::{LspError, LspResult};
use crate::transport::{BoxedReader, BoxedWriter};
use async_trait::async_trait;
use langlink_util::log::SERVER_OUTPUT_TARGET;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Resolves artifact coordinates to a JVM classpath.
pub trait ArtifactResolver: Send + Sync {
    fn resolve_classpath(&self, package: &str) -> LspResult<String>;
}

/// The byte streams of a started server.
pub struct ServerStreams {
    /// Server output (its stdout).
    pub reader: BoxedReader,
    /// Server input (its stdin).
    pub writer: BoxedWriter,
    /// Diagnostic output (its stderr), if any.
    pub stderr: Option<BoxedReader>,
}

/// Starts and stops one server process.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Start a fresh process and hand out its streams.
    async fn start(&self) -> LspResult<ServerStreams>;

    /// Stop the process if it runs.
    async fn stop(&self);
}

/// Hands out one provider per (definition, working directory).
pub trait ConnectionFactory: Send + Sync {
    /// Get the cached provider for the pair, creating it if needed.
    fn acquire(
        &self,
        definition: &ServerDefinition,
        root: &Path,
    ) -> LspResult<Arc<dyn ConnectionProvider>>;

    /// Forget the cached provider for the pair.
    fn release(&self, definition: &ServerDefinition, root: &Path);
}

/// Provider spawning a local process with piped stdio.
pub struct ProcessConnectionProvider {
    command: LaunchCommand,
    env: HashMap<String, String>,
    child: Mutex<Option<Child>>,
}

impl ProcessConnectionProvider {
    pub fn new(command: LaunchCommand, env: HashMap<String, String>) -> Self {
        Self {
            command,
            env,
            child: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &LaunchCommand {
        &self.command
    }
}

#[async_trait]
impl ConnectionProvider for ProcessConnectionProvider {
    async fn start(&self) -> LspResult<ServerStreams> {
        let mut guard = self.child.lock().await;
        if let Some(mut old) = guard.take() {
            let _ = old.kill().await;
        }

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&self.env)
            .current_dir(&self.command.working_dir)
            .kill_on_drop(true);

        info!(
            command = %self.command.program,
            args = ?self.command.args,
            cwd = %self.command.working_dir.display(),
            "Starting server process"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::Launch(format!("Failed to start server: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Launch("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Launch("Failed to get stdout".to_string()))?;
        let stderr = child.stderr.take();

        *guard = Some(child);

        Ok(ServerStreams {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            stderr: stderr.map(|s| Box::new(s) as BoxedReader),
        })
    }

    async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Server process already gone");
            }
            debug!(command = %self.command.program, "Stopped server process");
        }
    }
}

/// Cache key: the full flat encoding of a definition plus the working directory.
type ProviderKey = (Vec<String>, PathBuf);

/// Default factory: local processes, cached per (definition, working directory).
pub struct ProcessConnections {
    resolver: Option<Arc<dyn ArtifactResolver>>,
    env: HashMap<String, String>,
    cache: StdMutex<HashMap<ProviderKey, Arc<ProcessConnectionProvider>>>,
}

fn provider_key(definition: &ServerDefinition, root: &Path) -> ProviderKey {
    (definition.to_array(), root.to_path_buf())
}

impl ProcessConnections {
    pub fn new() -> Self {
        Self {
            resolver: None,
            env: HashMap::new(),
            cache: StdMutex::new(HashMap::new()),
        }
    }

    /// Use a resolver for artifact definitions.
    pub fn with_resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Extra environment for every spawned server.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Number of cached providers.
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for ProcessConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for ProcessConnections {
    fn acquire(
        &self,
        definition: &ServerDefinition,
        root: &Path,
    ) -> LspResult<Arc<dyn ConnectionProvider>> {
        let key = provider_key(definition, root);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = cache.get(&key) {
            return Ok(Arc::clone(provider) as Arc<dyn ConnectionProvider>);
        }

        let command = definition.launch_command(root, self.resolver.as_deref())?;
        let provider = Arc::new(ProcessConnectionProvider::new(command, self.env.clone()));
        cache.insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    fn release(&self, definition: &ServerDefinition, root: &Path) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&provider_key(definition, root));
    }
}

/// Drain a server's stderr into the log, one event per line.
pub fn spawn_error_log(server_id: String, stderr: BoxedReader) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    info!(target: SERVER_OUTPUT_TARGET, server = %server_id, "{}", line)
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(server = %server_id, error = %e, "Error stream closed");
                    break;
                }
            }
        }
    })
}
