//! Engine lifecycle: wires the registry to its background listeners.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use guidepost_util::{InMemoryContextService, JsonFileStorage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::catalog::builtin_walkthroughs;
use crate::config::EngineConfig;
use crate::context_watcher::spawn_context_watcher;
use crate::contributions::ExtensionWalkthroughs;
use crate::host_events::{HostEvent, spawn_host_event_pump};
use crate::registry::WalkthroughRegistry;
use crate::services::{GlobWorkspaceSearch, RegistryServices};

const HOST_EVENT_BUFFER: usize = 256;

/// Services backed by the configured state file and workspace folders.
pub fn default_services(config: &EngineConfig) -> Result<RegistryServices> {
    let storage = JsonFileStorage::new(config.state_file.clone()).context("open walkthrough state file")?;
    Ok(RegistryServices::in_memory()
        .with_storage(Arc::new(storage))
        .with_context(Arc::new(InMemoryContextService::new()))
        .with_workspace(Arc::new(GlobWorkspaceSearch::new(config.workspace_folders.clone()))))
}

/// A running walkthrough engine.
pub struct WalkthroughEngine {
    registry: Arc<WalkthroughRegistry>,
    extensions: ExtensionWalkthroughs,
    host_events: mpsc::Sender<HostEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WalkthroughEngine {
    /// Builds the registry, starts the context watcher and host event pump, and registers
    /// the built-in catalog. Built-in walkthroughs that fail to register are logged.
    pub async fn init(config: EngineConfig, services: RegistryServices) -> Result<Self> {
        let context = services.context.clone();
        let registry = Arc::new(WalkthroughRegistry::new(config, services));

        let watcher = spawn_context_watcher(registry.clone(), context);
        let (host_events, receiver) = mpsc::channel(HOST_EVENT_BUFFER);
        let pump = spawn_host_event_pump(registry.clone(), receiver);

        let engine = Self {
            extensions: ExtensionWalkthroughs::new(registry.clone()),
            registry,
            host_events,
            tasks: Mutex::new(vec![watcher, pump]),
        };

        let builtins = builtin_walkthroughs()?;
        let count = builtins.len();
        for descriptor in builtins {
            let id = descriptor.id.clone();
            if let Err(error) = engine.registry.register_walkthrough(descriptor).await {
                error!(walkthrough = %id, error = %error, "Failed to register built-in walkthrough");
            }
        }
        info!(builtins = count, "Walkthrough engine initialized");
        Ok(engine)
    }

    pub fn registry(&self) -> &Arc<WalkthroughRegistry> {
        &self.registry
    }

    pub fn extensions(&self) -> &ExtensionWalkthroughs {
        &self.extensions
    }

    /// Sender for host events; clone freely.
    pub fn host_events(&self) -> mpsc::Sender<HostEvent> {
        self.host_events.clone()
    }

    /// Stops the background listeners. The registry stays usable for direct calls.
    pub fn dispose(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("engine task lock poisoned"));
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            info!(tasks = tasks.len(), "Walkthrough engine disposed");
        }
    }
}

impl Drop for WalkthroughEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_registers_builtins_and_dispose_is_idempotent() {
        let engine = WalkthroughEngine::init(EngineConfig::default(), RegistryServices::in_memory())
            .await
            .unwrap();
        assert!(engine.registry().contains_walkthrough("setup"));
        assert!(engine.registry().contains_step("pickColorTheme"));

        engine.dispose();
        engine.dispose();
    }
}
