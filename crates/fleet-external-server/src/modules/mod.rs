//! Module registry and per-module runtime.
//!
//! A session hosts one [`ModuleRuntime`] per configured module id. The
//! runtime wraps the handler's [`ModuleApi`] and owns the command-waiting
//! thread that drains commands out of the library into the session's event
//! queue.

mod command_thread;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use self::command_thread::CommandWorker;
use crate::config::CarConfig;
use crate::error::ModuleError;
use crate::events::EventQueue;
use crate::module_api::{DynamicModule, ModuleApi};

/// One hosted module: its handler API plus the command-waiting thread.
pub struct ModuleRuntime {
    id: u16,
    api: Arc<dyn ModuleApi>,
    worker: Option<CommandWorker>,
}

impl ModuleRuntime {
    /// Wraps a handler API as the runtime for `id`.
    #[must_use]
    pub fn new(id: u16, api: Arc<dyn ModuleApi>) -> Self {
        Self {
            id,
            api,
            worker: None,
        }
    }

    /// Module id this runtime serves.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Handler API of this module.
    #[must_use]
    pub fn api(&self) -> &Arc<dyn ModuleApi> {
        &self.api
    }

    /// Starts the command-waiting thread. No-op when already started.
    pub fn start_worker(&mut self, queue: EventQueue, cancel: CancellationToken) {
        if self.worker.is_none() {
            self.worker = Some(CommandWorker::spawn(
                self.id,
                Arc::clone(&self.api),
                queue,
                cancel,
            ));
        }
    }

    /// Waits for the command-waiting thread to exit. The cancellation token
    /// passed to [`start_worker`](Self::start_worker) must already be
    /// cancelled, or this waits out the current `wait_for_command` call.
    pub async fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.join().await;
        }
    }
}

/// All module runtimes of one session, keyed by module id.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<u16, ModuleRuntime>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the handler library of every module configured for the car.
    /// Any failure is fatal: the session must not start half-equipped.
    pub fn load_dynamic(config: &CarConfig) -> Result<Self, ModuleError> {
        let mut registry = Self::new();
        for (&module_id, module_config) in &config.modules {
            let module = DynamicModule::load(
                module_id,
                module_config,
                &config.company_name,
                &config.car_name,
            )?;
            registry.insert(ModuleRuntime::new(module_id, Arc::new(module)));
        }
        Ok(registry)
    }

    /// Adds a runtime. Replacing an id is a configuration bug and is logged.
    pub fn insert(&mut self, runtime: ModuleRuntime) {
        let id = runtime.id();
        if self.modules.insert(id, runtime).is_some() {
            warn!(module_id = id, "module runtime replaced an existing registration");
        }
    }

    /// Runtime of the given module id.
    #[must_use]
    pub fn get(&self, module_id: u16) -> Option<&ModuleRuntime> {
        self.modules.get(&module_id)
    }

    /// Handler API of the given module id.
    #[must_use]
    pub fn api(&self, module_id: u16) -> Option<Arc<dyn ModuleApi>> {
        self.modules.get(&module_id).map(|m| Arc::clone(&m.api))
    }

    /// Registered module ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.modules.keys().copied()
    }

    /// Mutable iteration over the runtimes.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ModuleRuntime> {
        self.modules.values_mut()
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
