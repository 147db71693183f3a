//! Session management.

use crate::config::Config;
use crate::harness::Harness;
use crate::host::CapabilityGroup;
use crate::result::ExecutionResult;
use crate::Result;
use mcp::{Channel, ChannelState, Supervisor, ToolDescriptor, ToolFacade};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tool worker plus script harness for one project.
///
/// The worker starts lazily on the first `execute_code`. After an unexpected
/// worker exit, tool calls fail until `start` is called again.
pub struct Session {
    project_root: PathBuf,
    config: Config,
    channel: Arc<Channel>,
    harness: Harness,
    facade: RwLock<Option<ToolFacade>>,
}

impl Session {
    /// Create a session, reading `toolscript.toml` if the project has one.
    pub fn new(project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let config = Config::discover(&project_root)?;
        Ok(Self::with_config(project_root, config))
    }

    pub fn with_config(project_root: impl Into<PathBuf>, config: Config) -> Self {
        let project_root = project_root.into();

        let mut supervisor = Supervisor::new(&project_root);
        if let Some(worker) = &config.worker {
            supervisor = supervisor.with_worker_name(worker.clone());
        }
        let channel = Channel::new(supervisor).with_timeout(config.request_timeout());
        let harness = Harness::from_config(&project_root, &config);

        Self {
            project_root,
            config,
            channel: Arc::new(channel),
            harness,
            facade: RwLock::new(None),
        }
    }

    /// Register an optional capability group for scripts.
    pub fn with_capability(mut self, group: CapabilityGroup) -> Self {
        self.harness = self.harness.with_capability(group);
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Start the worker, perform the handshake and build the facade.
    ///
    /// No-op while the session is ready.
    pub async fn start(&self) -> Result<()> {
        let mut facade = self.facade.write().await;
        if facade.is_some() && self.channel.state() == ChannelState::Ready {
            return Ok(());
        }
        self.start_locked(&mut facade).await
    }

    async fn start_locked(&self, facade: &mut Option<ToolFacade>) -> Result<()> {
        self.channel.start().await?;
        mcp::initialize(&self.channel).await?;
        let tools = mcp::list_tools(&self.channel).await?;
        let built = mcp::build_facade(&self.channel, tools);
        info!(tools = built.len(), "session ready");

        for name in &self.config.capabilities {
            if !self.harness.has_capability(name) {
                debug!(capability = %name, "configured capability group not registered");
            }
        }

        *facade = Some(built);
        Ok(())
    }

    /// Stop the worker. The facade is discarded; the next execution restarts.
    pub async fn stop(&self) {
        self.facade.write().await.take();
        self.channel.stop().await;
    }

    /// Tool descriptors as currently reported by the worker.
    ///
    /// Starts the session first if needed, so the handshake always precedes
    /// the listing.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_facade().await?;
        Ok(mcp::list_tools(&self.channel).await?)
    }

    /// The facade from the last successful start.
    pub async fn facade(&self) -> Option<ToolFacade> {
        self.facade.read().await.clone()
    }

    /// Run a script against the worker's tools.
    ///
    /// Returns `Err` only when the worker cannot be started; script failures
    /// are reported in the result.
    pub async fn execute_code(&self, script: &str) -> Result<ExecutionResult> {
        let facade = self.ensure_facade().await?;
        Ok(self.harness.execute_code(script, &facade).await)
    }

    /// The current facade, starting the session if there is none.
    async fn ensure_facade(&self) -> Result<ToolFacade> {
        if let Some(facade) = self.facade().await {
            return Ok(facade);
        }
        let mut facade = self.facade.write().await;
        // Another caller may have started the session meanwhile.
        if facade.is_none() {
            self.start_locked(&mut facade).await?;
        }
        Ok(facade.clone().unwrap_or_default())
    }
}
