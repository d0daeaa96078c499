//! # Binding
//!
//! Ties the hooked client together: the module image, its memory, the pattern scanner and the
//! interceptor placing hooks. [`BindingManager`] owns the object bindings and the hook registry and
//! initializes both.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::browser::{BrowserManager, BrowserOptions};
use crate::error::{BindingError, Result};
use crate::hook::{Detour, InterceptRequest, Interceptor, RawHook};
use crate::hooks::{HookManager, HookManagerOptions, HookOptions};
use crate::memory::{Memory, ModuleInfo};
use crate::scan::{Pattern, Scanner};
use crate::sync::{SynchronizerOptions, ThreadSynchronizer};
use crate::wrapper::convention::FunctionDescriptor;

/// Every option of the bindings, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingOptions {
    /// Options of the hook catalog
    pub hooks: HookManagerOptions,
    /// Options of the object bindings
    pub browser: BrowserOptions,
    /// Options of the thread synchronizer
    pub synchronizer: SynchronizerOptions,
}

impl BindingOptions {
    /// Parses options from JSON, missing entries keep their defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// The client process as seen by the bindings
pub struct ProcessBinding {
    /// Main module of the client
    module: ModuleInfo,
    /// Memory of the client
    memory: Arc<dyn Memory>,
    /// Snapshot of the module image
    scanner: Scanner,
    /// Places hooks
    interceptor: Arc<dyn Interceptor>,
}

impl ProcessBinding {
    /// Captures the module image from `memory`
    pub fn new(
        module: ModuleInfo,
        memory: Arc<dyn Memory>,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<Self> {
        let scanner = Scanner::new(memory.as_ref(), &module)?;
        Ok(Self::with_scanner(module, memory, scanner, interceptor))
    }

    /// Uses an already captured image
    pub fn with_scanner(
        module: ModuleInfo,
        memory: Arc<dyn Memory>,
        scanner: Scanner,
        interceptor: Arc<dyn Interceptor>,
    ) -> Self {
        Self {
            module,
            memory,
            scanner,
            interceptor,
        }
    }

    /// Binds to the main module of the current process
    #[cfg(windows)]
    pub fn current() -> Result<Self> {
        let module = ModuleInfo::current()?;
        Self::new(
            module,
            Arc::new(crate::memory::LocalMemory::new()),
            Arc::new(crate::hook::AsmInterceptor::new()),
        )
    }

    /// Main module of the client
    pub fn module(&self) -> &ModuleInfo {
        &self.module
    }

    /// Memory of the client
    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    /// Absolute address of the first match of `pattern`
    pub fn find_pattern(&self, name: &str, pattern: &str) -> Result<usize> {
        let parsed = Pattern::parse(pattern)?;
        match self.scanner.find(&parsed) {
            Some(offset) => Ok(self.module.base + offset),
            None => {
                log::warn!("Could not find {name} using the pattern \"{pattern}\"");
                Err(BindingError::BindingNotFound {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                })
            }
        }
    }

    /// Locates a function by its pattern and hooks it, enabling it when `options.hook` is set
    pub fn create_hook(
        &self,
        name: &str,
        descriptor: FunctionDescriptor,
        detour: Arc<dyn Detour>,
        options: &HookOptions,
        cancelable: bool,
    ) -> Result<Box<dyn RawHook>> {
        let address = self
            .find_pattern(name, &options.pattern)?
            .wrapping_add_signed(options.offset);

        let hook = self.interceptor.intercept(InterceptRequest {
            name,
            address,
            descriptor,
            detour,
            cancelable,
        })?;
        if options.hook {
            hook.enable()?;
        }

        log::debug!(
            "Created hook {name} at {address:#x} (module offset {:#x}), enabled: {}",
            address.wrapping_sub(self.module.base),
            hook.is_enabled()
        );
        Ok(hook)
    }
}

/// Owner of the object bindings and the hook registry of a client
pub struct BindingManager {
    /// The bound process
    binding: Arc<ProcessBinding>,
    /// Object bindings
    browser: Arc<BrowserManager>,
    /// Hook registry
    hooks: Arc<HookManager>,
    /// Options the manager was created with
    options: BindingOptions,
}

impl BindingManager {
    /// Creates the manager, nothing is bound before [`BindingManager::initialize`]
    pub fn new(binding: ProcessBinding, options: BindingOptions) -> Self {
        Self {
            binding: Arc::new(binding),
            browser: Arc::new(BrowserManager::new(options.browser.clone())),
            hooks: Arc::new(HookManager::new(options.hooks.clone())),
            options,
        }
    }

    /// Binds to the current process
    #[cfg(windows)]
    pub fn current(options: BindingOptions) -> Result<Self> {
        Ok(Self::new(ProcessBinding::current()?, options))
    }

    /// Initializes the object bindings, then the hooks
    ///
    /// Every module is attempted even if others fail; the failures are returned together.
    pub fn initialize(&self) -> Result<()> {
        let mut errors = Vec::new();
        for result in [
            self.browser.initialize(&self.binding),
            self.hooks.initialize(&self.binding, &self.browser),
        ] {
            match result {
                Ok(()) => {}
                Err(BindingError::Aggregate(inner)) => errors.extend(inner),
                Err(e) => errors.push(e),
            }
        }
        BindingError::aggregate(errors)
    }

    /// The bound process
    pub fn binding(&self) -> &Arc<ProcessBinding> {
        &self.binding
    }

    /// Object bindings
    pub fn browser(&self) -> &Arc<BrowserManager> {
        &self.browser
    }

    /// Hook registry
    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.hooks
    }

    /// Whether a hook or object binding called `name` was loaded
    pub fn is_module_present(&self, name: &str) -> bool {
        self.hooks.get_by_name(name).is_some() || self.browser.is_module_loaded(name)
    }

    /// Creates a synchronizer driven by the periodic hook
    pub fn synchronizer(&self) -> Arc<ThreadSynchronizer> {
        ThreadSynchronizer::new(self.hooks.periodic(), self.options.synchronizer.clone())
    }
}

impl Drop for BindingManager {
    fn drop(&mut self) {
        if self.hooks.is_initialized() {
            if let Err(e) = self.hooks.disable_all() {
                log::warn!("Could not disable all hooks: {e}");
            }
        }
    }
}
